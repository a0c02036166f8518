//! Look-through exposure: a client's positions in funds-of-funds are
//! decomposed into the asset classes and industries of the underlying
//! project, weighted by market value.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use super::NavCache;
use crate::config::LookThroughConfig;
use crate::db::{self, projects, RatioType};
use crate::error::FundbookError;
use crate::valuation::{self, percent_of};

/// Why a position could not be decomposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingConfig {
    NoProject,
    NoAssetSnapshot,
    NoIndustrySnapshot,
    /// Stock-based industry weights whose month has no asset snapshot to
    /// size the stock sleeve
    NoStockSleeveForIndustryMonth,
    NoNav,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnconfiguredPosition {
    pub fund_code: String,
    pub project_name: Option<String>,
    pub reason: MissingConfig,
}

/// One asset class or industry in the blended exposure
#[derive(Debug, Clone, Serialize)]
pub struct ExposureLine {
    pub label: String,
    pub value: Decimal,
    pub pct_of_included: Option<f64>,
    pub pct_of_portfolio: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncludedPosition {
    pub fund_code: String,
    pub project_name: String,
    pub market_value: Decimal,
    pub asset_month: Option<NaiveDate>,
    pub industry_month: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LookThroughReport {
    pub group_id: String,
    pub as_of: NaiveDate,
    pub portfolio_value: Decimal,
    pub included_value: Decimal,
    pub included: Vec<IncludedPosition>,
    pub asset_classes: Vec<ExposureLine>,
    pub industries: Vec<ExposureLine>,
    pub unconfigured: Vec<UnconfiguredPosition>,
}

fn exposure_lines(
    buckets: BTreeMap<String, Decimal>,
    included_value: Decimal,
    portfolio_value: Decimal,
) -> Vec<ExposureLine> {
    let mut lines: Vec<ExposureLine> = buckets
        .into_iter()
        .filter(|(_, value)| !value.is_zero())
        .map(|(label, value)| ExposureLine {
            pct_of_included: percent_of(value, included_value),
            pct_of_portfolio: percent_of(value, portfolio_value),
            label,
            value,
        })
        .collect();
    lines.sort_by(|a, b| b.value.cmp(&a.value));
    lines
}

/// Blend the project allocations behind a client's eligible positions.
///
/// Ratios are stored as percentages. Industry weights expressed against
/// the stock sleeve are scaled by the total stock ratio of the asset
/// snapshot from the same month as the industry snapshot.
pub fn client_look_through(
    conn: &Connection,
    group_id: &str,
    as_of: NaiveDate,
    config: &LookThroughConfig,
) -> Result<LookThroughReport> {
    db::get_client(conn, group_id)?.ok_or_else(|| FundbookError::not_found("client", group_id))?;

    let mut navs = NavCache::new(conn);
    let mut portfolio_value = Decimal::ZERO;
    let mut included_value = Decimal::ZERO;
    let mut included = Vec::new();
    let mut unconfigured = Vec::new();
    let mut assets: BTreeMap<String, Decimal> = BTreeMap::new();
    let mut industries: BTreeMap<String, Decimal> = BTreeMap::new();

    for position in db::latest_positions(conn, Some(group_id), None, as_of)? {
        let series = navs.get(&position.fund_code)?;
        let market_value = position
            .shares
            .and_then(|shares| valuation::market_value(shares, series, as_of));
        if let Some(mv) = market_value {
            portfolio_value += mv;
        }

        let strategy = db::get_strategy(conn, &position.fund_code)?;
        let eligible = strategy
            .as_ref()
            .is_some_and(|s| config.sub_strategies.iter().any(|sub| sub == &s.sub_strategy));
        if !eligible {
            continue;
        }
        let project_name = strategy.and_then(|s| s.project_name).filter(|p| !p.trim().is_empty());
        let mut skip = |reason| {
            unconfigured.push(UnconfiguredPosition {
                fund_code: position.fund_code.clone(),
                project_name: project_name.clone(),
                reason,
            })
        };

        let Some(project) = project_name.clone() else {
            skip(MissingConfig::NoProject);
            continue;
        };
        let Some(mv) = market_value else {
            skip(MissingConfig::NoNav);
            continue;
        };
        let Some(asset) = projects::project_asset_as_of(conn, &project, as_of)? else {
            skip(MissingConfig::NoAssetSnapshot);
            continue;
        };
        let industry = projects::project_industry_as_of(conn, &project, as_of)?;
        let stock_ratio = match &industry {
            None => {
                skip(MissingConfig::NoIndustrySnapshot);
                None
            }
            Some(industry) if industry.ratio_type == RatioType::BasedOnStock && industry.month != asset.month => {
                let sleeve = match industry.month {
                    Some(month) => projects::project_asset_for_month(conn, &project, month)?,
                    None => None,
                };
                if sleeve.is_none() {
                    skip(MissingConfig::NoStockSleeveForIndustryMonth);
                }
                sleeve.map(|a| a.stock_total_ratio())
            }
            Some(_) => Some(asset.stock_total_ratio()),
        };

        for (label, ratio) in asset.classes() {
            *assets.entry(label.to_string()).or_default() += mv * ratio / Decimal::ONE_HUNDRED;
        }
        if let (Some(industry), Some(stock_ratio)) = (&industry, stock_ratio) {
            for (name, ratio) in industry.actual_ratios(stock_ratio) {
                *industries.entry(name).or_default() += mv * ratio / Decimal::ONE_HUNDRED;
            }
        }

        included_value += mv;
        included.push(IncludedPosition {
            fund_code: position.fund_code.clone(),
            project_name: project,
            market_value: mv,
            asset_month: asset.month,
            industry_month: industry.and_then(|i| i.month),
        });
    }

    Ok(LookThroughReport {
        group_id: group_id.to_string(),
        as_of,
        portfolio_value,
        included_value,
        included,
        asset_classes: exposure_lines(assets, included_value, portfolio_value),
        industries: exposure_lines(industries, included_value, portfolio_value),
        unconfigured,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ProjectHoldingAsset, ProjectHoldingIndustry};
    use crate::test_support::*;
    use rust_decimal_macros::dec;

    const CLIENT: &str = "000000001";

    fn config() -> LookThroughConfig {
        LookThroughConfig {
            sub_strategies: vec!["Quant long".into()],
        }
    }

    fn seed_project(conn: &Connection, project: &str, month: NaiveDate, ratio_type: RatioType) {
        let asset = ProjectHoldingAsset {
            project_name: project.into(),
            month: Some(month),
            a_share_ratio: Some(dec!(60)),
            h_share_ratio: Some(dec!(20)),
            global_bond_ratio: Some(dec!(20)),
            ..Default::default()
        };
        projects::upsert_project_asset(conn, project, month, &asset).unwrap();
        let industry = ProjectHoldingIndustry {
            project_name: project.into(),
            month: Some(month),
            ratio_type,
            industries: vec![("Technology".into(), dec!(50)), ("Healthcare".into(), dec!(25))],
        };
        projects::upsert_project_industry(conn, project, month, &industry).unwrap();
    }

    #[test]
    fn test_stock_based_industries_scaled_by_stock_sleeve() {
        let conn = memory_db();
        let day = date(2025, 8, 15);
        add_nav(&conn, "F1", day, dec!(1));
        add_nav(&conn, "F2", day, dec!(1));
        add_strategy(&conn, "F1", "Equity", "Quant long", Some("Alpha"));
        add_strategy(&conn, "F2", "Bond", "Credit", None);
        add_position(&conn, CLIENT, "F1", day, dec!(1000), dec!(1000));
        add_position(&conn, CLIENT, "F2", day, dec!(1000), dec!(1000));
        seed_project(&conn, "Alpha", date(2025, 7, 1), RatioType::BasedOnStock);

        let report = client_look_through(&conn, CLIENT, day, &config()).unwrap();
        assert_eq!(report.portfolio_value, dec!(2000));
        assert_eq!(report.included_value, dec!(1000));
        assert_eq!(report.included[0].asset_month, Some(date(2025, 7, 1)));

        let a_share = report.asset_classes.iter().find(|l| l.label == "A-share").unwrap();
        assert_eq!(a_share.value, dec!(600));
        assert_eq!(a_share.pct_of_included, Some(60.0));
        assert_eq!(a_share.pct_of_portfolio, Some(30.0));

        // 50% of an 80% stock sleeve
        let tech = report.industries.iter().find(|l| l.label == "Technology").unwrap();
        assert_eq!(tech.value, dec!(400));
        assert_eq!(tech.pct_of_included, Some(40.0));
    }

    #[test]
    fn test_stock_based_industries_use_asset_mix_of_their_own_month() {
        let conn = memory_db();
        let day = date(2025, 8, 15);
        add_nav(&conn, "F1", day, dec!(1));
        add_strategy(&conn, "F1", "Equity", "Quant long", Some("Alpha"));
        add_position(&conn, CLIENT, "F1", day, dec!(1000), dec!(1000));
        // July: 80% stock sleeve with industries; August: asset mix only, 40% stock
        seed_project(&conn, "Alpha", date(2025, 7, 1), RatioType::BasedOnStock);
        let august = ProjectHoldingAsset {
            project_name: "Alpha".into(),
            month: Some(date(2025, 8, 1)),
            a_share_ratio: Some(dec!(40)),
            global_bond_ratio: Some(dec!(60)),
            ..Default::default()
        };
        projects::upsert_project_asset(&conn, "Alpha", date(2025, 8, 1), &august).unwrap();

        let report = client_look_through(&conn, CLIENT, day, &config()).unwrap();
        assert_eq!(report.included[0].asset_month, Some(date(2025, 8, 1)));
        assert_eq!(report.included[0].industry_month, Some(date(2025, 7, 1)));
        let a_share = report.asset_classes.iter().find(|l| l.label == "A-share").unwrap();
        assert_eq!(a_share.value, dec!(400));
        // 50% of July's 80% sleeve, not August's 40%
        let tech = report.industries.iter().find(|l| l.label == "Technology").unwrap();
        assert_eq!(tech.value, dec!(400));
        assert!(report.unconfigured.is_empty());
    }

    #[test]
    fn test_stock_based_industries_without_same_month_assets_are_flagged() {
        let conn = memory_db();
        let day = date(2025, 8, 15);
        add_nav(&conn, "F1", day, dec!(1));
        add_strategy(&conn, "F1", "Equity", "Quant long", Some("Alpha"));
        add_position(&conn, CLIENT, "F1", day, dec!(1000), dec!(1000));
        let asset = ProjectHoldingAsset {
            project_name: "Alpha".into(),
            month: Some(date(2025, 8, 1)),
            a_share_ratio: Some(dec!(40)),
            ..Default::default()
        };
        projects::upsert_project_asset(&conn, "Alpha", date(2025, 8, 1), &asset).unwrap();
        let industry = ProjectHoldingIndustry {
            project_name: "Alpha".into(),
            month: Some(date(2025, 6, 1)),
            ratio_type: RatioType::BasedOnStock,
            industries: vec![("Technology".into(), dec!(50))],
        };
        projects::upsert_project_industry(&conn, "Alpha", date(2025, 6, 1), &industry).unwrap();

        let report = client_look_through(&conn, CLIENT, day, &config()).unwrap();
        assert_eq!(report.included_value, dec!(1000));
        assert!(report.industries.is_empty());
        assert_eq!(report.unconfigured[0].reason, MissingConfig::NoStockSleeveForIndustryMonth);
    }

    #[test]
    fn test_total_based_industries_used_as_is() {
        let conn = memory_db();
        let day = date(2025, 8, 15);
        add_nav(&conn, "F1", day, dec!(2));
        add_strategy(&conn, "F1", "Equity", "Quant long", Some("Alpha"));
        add_position(&conn, CLIENT, "F1", day, dec!(500), dec!(1000));
        seed_project(&conn, "Alpha", date(2025, 8, 1), RatioType::BasedOnTotal);

        let report = client_look_through(&conn, CLIENT, day, &config()).unwrap();
        let tech = report.industries.iter().find(|l| l.label == "Technology").unwrap();
        assert_eq!(tech.value, dec!(500));
        assert_eq!(tech.pct_of_portfolio, Some(50.0));
    }

    #[test]
    fn test_future_month_snapshot_ignored() {
        let conn = memory_db();
        let day = date(2025, 8, 15);
        add_nav(&conn, "F1", day, dec!(1));
        add_strategy(&conn, "F1", "Equity", "Quant long", Some("Alpha"));
        add_position(&conn, CLIENT, "F1", day, dec!(100), dec!(100));
        seed_project(&conn, "Alpha", date(2025, 9, 1), RatioType::BasedOnTotal);

        let report = client_look_through(&conn, CLIENT, day, &config()).unwrap();
        assert!(report.included.is_empty());
        assert_eq!(report.unconfigured[0].reason, MissingConfig::NoAssetSnapshot);
    }

    #[test]
    fn test_missing_project_reported() {
        let conn = memory_db();
        let day = date(2025, 8, 15);
        add_nav(&conn, "F1", day, dec!(1));
        add_strategy(&conn, "F1", "Equity", "Quant long", None);
        add_position(&conn, CLIENT, "F1", day, dec!(100), dec!(100));

        let report = client_look_through(&conn, CLIENT, day, &config()).unwrap();
        assert_eq!(report.portfolio_value, dec!(100));
        assert_eq!(report.unconfigured.len(), 1);
        assert_eq!(report.unconfigured[0].reason, MissingConfig::NoProject);
        assert!(report.asset_classes.is_empty());
    }
}
