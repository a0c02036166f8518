use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::db::{self, NavRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NavPoint {
    pub date: NaiveDate,
    pub unit_nav: Decimal,
    pub accum_nav: Decimal,
}

/// Ordered NAV history of one fund
#[derive(Debug, Clone, Default)]
pub struct NavSeries {
    points: BTreeMap<NaiveDate, NavPoint>,
}

impl NavSeries {
    pub fn from_records(records: &[NavRecord]) -> Self {
        let points = records
            .iter()
            .map(|r| {
                (
                    r.nav_date,
                    NavPoint {
                        date: r.nav_date,
                        unit_nav: r.unit_nav,
                        accum_nav: r.accum_nav,
                    },
                )
            })
            .collect();
        Self { points }
    }

    pub fn load(conn: &Connection, fund_code: &str) -> Result<Self> {
        let records = db::list_nav_records(conn, fund_code, None, None)?;
        Ok(Self::from_records(&records))
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Latest record dated on or before `date`
    pub fn as_of(&self, date: NaiveDate) -> Option<&NavPoint> {
        self.points.range(..=date).next_back().map(|(_, p)| p)
    }

    /// Latest record dated strictly before `date`
    pub fn last_before(&self, date: NaiveDate) -> Option<&NavPoint> {
        self.points.range(..date).next_back().map(|(_, p)| p)
    }

    /// Earliest record dated on or after `date`
    pub fn first_on_or_after(&self, date: NaiveDate) -> Option<&NavPoint> {
        self.points
            .range((Bound::Included(date), Bound::Unbounded))
            .next()
            .map(|(_, p)| p)
    }

    /// Records dated within `[start, end]`, oldest first
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = &NavPoint> {
        self.points
            .range(start..)
            .take_while(move |(date, _)| **date <= end)
            .map(|(_, p)| p)
    }

    pub fn first(&self) -> Option<&NavPoint> {
        self.points.values().next()
    }

    pub fn latest(&self) -> Option<&NavPoint> {
        self.points.values().next_back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    fn series() -> NavSeries {
        let records: Vec<NavRecord> = [(d(7, 1), dec!(1.00)), (d(7, 8), dec!(1.05)), (d(7, 15), dec!(1.10))]
            .into_iter()
            .map(|(date, unit)| NavRecord {
                id: None,
                fund_code: "F1".into(),
                nav_date: date,
                unit_nav: unit,
                accum_nav: unit,
            })
            .collect();
        NavSeries::from_records(&records)
    }

    #[test]
    fn test_as_of_uses_latest_on_or_before() {
        let s = series();
        assert!(s.as_of(d(6, 30)).is_none());
        assert_eq!(s.as_of(d(7, 1)).unwrap().unit_nav, dec!(1.00));
        assert_eq!(s.as_of(d(7, 10)).unwrap().unit_nav, dec!(1.05));
        assert_eq!(s.as_of(d(12, 31)).unwrap().date, d(7, 15));
    }

    #[test]
    fn test_neighbour_lookups() {
        let s = series();
        assert_eq!(s.last_before(d(7, 8)).unwrap().date, d(7, 1));
        assert!(s.last_before(d(7, 1)).is_none());
        assert_eq!(s.first_on_or_after(d(7, 2)).unwrap().date, d(7, 8));
        assert!(s.first_on_or_after(d(7, 16)).is_none());
        assert_eq!(s.first().unwrap().date, d(7, 1));
        assert_eq!(s.latest().unwrap().date, d(7, 15));
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_between_is_inclusive() {
        let s = series();
        let dates: Vec<NaiveDate> = s.between(d(7, 1), d(7, 8)).map(|p| p.date).collect();
        assert_eq!(dates, vec![d(7, 1), d(7, 8)]);
        assert_eq!(s.between(d(7, 9), d(7, 14)).count(), 0);
        assert_eq!(s.between(d(7, 15), d(7, 1)).count(), 0);
    }
}
