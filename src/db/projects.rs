//! Underlying project holdings (asset mix, top industries) and sync groups.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::models::{ProjectHoldingAsset, ProjectHoldingIndustry, RatioType, MAX_INDUSTRIES};
use super::{get_optional_decimal_value, WriteOutcome};
use crate::normalize::{decimal_key, month_start};

fn asset_from_row(row: &rusqlite::Row) -> Result<ProjectHoldingAsset, rusqlite::Error> {
    Ok(ProjectHoldingAsset {
        project_name: row.get(0)?,
        month: row.get(1)?,
        a_share_ratio: get_optional_decimal_value(row, 2)?,
        h_share_ratio: get_optional_decimal_value(row, 3)?,
        us_share_ratio: get_optional_decimal_value(row, 4)?,
        other_market_ratio: get_optional_decimal_value(row, 5)?,
        global_bond_ratio: get_optional_decimal_value(row, 6)?,
        convertible_bond_ratio: get_optional_decimal_value(row, 7)?,
        other_ratio: get_optional_decimal_value(row, 8)?,
    })
}

/// Store an asset snapshot; the month is normalised to its first day.
pub fn upsert_project_asset(
    conn: &Connection,
    project_name: &str,
    month: NaiveDate,
    asset: &ProjectHoldingAsset,
) -> Result<WriteOutcome> {
    let month = month_start(month);
    let ratios: Vec<Option<String>> = [
        asset.a_share_ratio,
        asset.h_share_ratio,
        asset.us_share_ratio,
        asset.other_market_ratio,
        asset.global_bond_ratio,
        asset.convertible_bond_ratio,
        asset.other_ratio,
    ]
    .iter()
    .map(|r| r.map(decimal_key))
    .collect();

    let existed: bool = conn
        .query_row(
            "SELECT 1 FROM project_holding_assets WHERE project_name = ?1 AND month = ?2",
            params![project_name, month],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    conn.execute(
        "INSERT INTO project_holding_assets (
            project_name, month, a_share_ratio, h_share_ratio, us_share_ratio,
            other_market_ratio, global_bond_ratio, convertible_bond_ratio, other_ratio
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(project_name, month) DO UPDATE SET
            a_share_ratio = excluded.a_share_ratio,
            h_share_ratio = excluded.h_share_ratio,
            us_share_ratio = excluded.us_share_ratio,
            other_market_ratio = excluded.other_market_ratio,
            global_bond_ratio = excluded.global_bond_ratio,
            convertible_bond_ratio = excluded.convertible_bond_ratio,
            other_ratio = excluded.other_ratio",
        params![
            project_name,
            month,
            ratios[0],
            ratios[1],
            ratios[2],
            ratios[3],
            ratios[4],
            ratios[5],
            ratios[6],
        ],
    )?;

    Ok(if existed {
        WriteOutcome::Updated
    } else {
        WriteOutcome::Created
    })
}

/// Latest asset snapshot for the month of `as_of` or earlier
pub fn project_asset_as_of(
    conn: &Connection,
    project_name: &str,
    as_of: NaiveDate,
) -> Result<Option<ProjectHoldingAsset>> {
    let asset = conn
        .query_row(
            "SELECT project_name, month, a_share_ratio, h_share_ratio, us_share_ratio,
                    other_market_ratio, global_bond_ratio, convertible_bond_ratio, other_ratio
             FROM project_holding_assets
             WHERE project_name = ?1 AND month <= ?2
             ORDER BY month DESC LIMIT 1",
            params![project_name, month_start(as_of)],
            asset_from_row,
        )
        .optional()?;
    Ok(asset)
}

/// Asset snapshot recorded for exactly the month of `month`
pub fn project_asset_for_month(
    conn: &Connection,
    project_name: &str,
    month: NaiveDate,
) -> Result<Option<ProjectHoldingAsset>> {
    let asset = conn
        .query_row(
            "SELECT project_name, month, a_share_ratio, h_share_ratio, us_share_ratio,
                    other_market_ratio, global_bond_ratio, convertible_bond_ratio, other_ratio
             FROM project_holding_assets
             WHERE project_name = ?1 AND month = ?2",
            params![project_name, month_start(month)],
            asset_from_row,
        )
        .optional()?;
    Ok(asset)
}

pub fn upsert_project_industry(
    conn: &Connection,
    project_name: &str,
    month: NaiveDate,
    industry: &ProjectHoldingIndustry,
) -> Result<WriteOutcome> {
    anyhow::ensure!(
        industry.industries.len() <= MAX_INDUSTRIES,
        "at most {} industries per snapshot",
        MAX_INDUSTRIES
    );
    let month = month_start(month);

    let mut names: [Option<String>; MAX_INDUSTRIES] = Default::default();
    let mut ratios: [Option<String>; MAX_INDUSTRIES] = Default::default();
    for (i, (name, ratio)) in industry.industries.iter().enumerate() {
        names[i] = Some(name.clone());
        ratios[i] = Some(decimal_key(*ratio));
    }

    let existed: bool = conn
        .query_row(
            "SELECT 1 FROM project_holding_industries WHERE project_name = ?1 AND month = ?2",
            params![project_name, month],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    conn.execute(
        "INSERT INTO project_holding_industries (
            project_name, month, ratio_type,
            industry1, industry1_ratio, industry2, industry2_ratio, industry3, industry3_ratio,
            industry4, industry4_ratio, industry5, industry5_ratio
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(project_name, month) DO UPDATE SET
            ratio_type = excluded.ratio_type,
            industry1 = excluded.industry1, industry1_ratio = excluded.industry1_ratio,
            industry2 = excluded.industry2, industry2_ratio = excluded.industry2_ratio,
            industry3 = excluded.industry3, industry3_ratio = excluded.industry3_ratio,
            industry4 = excluded.industry4, industry4_ratio = excluded.industry4_ratio,
            industry5 = excluded.industry5, industry5_ratio = excluded.industry5_ratio",
        params![
            project_name,
            month,
            industry.ratio_type.as_str(),
            names[0],
            ratios[0],
            names[1],
            ratios[1],
            names[2],
            ratios[2],
            names[3],
            ratios[3],
            names[4],
            ratios[4],
        ],
    )?;

    Ok(if existed {
        WriteOutcome::Updated
    } else {
        WriteOutcome::Created
    })
}

/// Latest industry snapshot for the month of `as_of` or earlier
pub fn project_industry_as_of(
    conn: &Connection,
    project_name: &str,
    as_of: NaiveDate,
) -> Result<Option<ProjectHoldingIndustry>> {
    let industry = conn
        .query_row(
            "SELECT project_name, month, ratio_type,
                    industry1, industry1_ratio, industry2, industry2_ratio, industry3, industry3_ratio,
                    industry4, industry4_ratio, industry5, industry5_ratio
             FROM project_holding_industries
             WHERE project_name = ?1 AND month <= ?2
             ORDER BY month DESC LIMIT 1",
            params![project_name, month_start(as_of)],
            |row| {
                let ratio_type: String = row.get(2)?;
                let mut industries = Vec::new();
                for i in 0..MAX_INDUSTRIES {
                    let name: Option<String> = row.get(3 + i * 2)?;
                    let ratio = get_optional_decimal_value(row, 4 + i * 2)?;
                    if let (Some(name), Some(ratio)) = (name, ratio) {
                        if !name.trim().is_empty() {
                            industries.push((name, ratio));
                        }
                    }
                }
                Ok(ProjectHoldingIndustry {
                    project_name: row.get(0)?,
                    month: row.get(1)?,
                    ratio_type: RatioType::from_str(&ratio_type).unwrap_or(RatioType::BasedOnTotal),
                    industries,
                })
            },
        )
        .optional()?;
    Ok(industry)
}

/// Distinct project names referenced by strategies or holdings
pub fn list_projects(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT project_name FROM strategies WHERE project_name IS NOT NULL AND project_name <> ''
         UNION SELECT project_name FROM project_holding_assets
         UNION SELECT project_name FROM project_holding_industries
         ORDER BY 1",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

// ---------------------------------------------------------------------------
// Sync groups
// ---------------------------------------------------------------------------

pub fn add_sync_member(conn: &Connection, group_name: &str, project_name: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO project_sync_groups (group_name, project_name) VALUES (?1, ?2)",
        params![group_name.trim(), project_name.trim()],
    )?;
    Ok(inserted > 0)
}

pub fn remove_sync_member(conn: &Connection, group_name: &str, project_name: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM project_sync_groups WHERE group_name = ?1 AND project_name = ?2",
        params![group_name.trim(), project_name.trim()],
    )?;
    Ok(deleted > 0)
}

/// group name -> member projects
pub fn list_sync_groups(conn: &Connection) -> Result<BTreeMap<String, Vec<String>>> {
    let mut stmt = conn.prepare(
        "SELECT group_name, project_name FROM project_sync_groups ORDER BY group_name, project_name",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (group, project) in rows {
        groups.entry(group).or_default().push(project);
    }
    Ok(groups)
}

/// Every other project sharing a sync group with `project_name`
pub fn sync_siblings(conn: &Connection, project_name: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT other.project_name
         FROM project_sync_groups own
         JOIN project_sync_groups other ON other.group_name = own.group_name
         WHERE own.project_name = ?1 AND other.project_name <> ?1
         ORDER BY other.project_name",
    )?;
    let siblings = stmt
        .query_map([project_name], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(siblings)
}

/// Store an asset snapshot for a project and every project synced with it.
///
/// Returns the names of the projects written, the requested one first.
pub fn set_project_asset_synced(
    conn: &mut Connection,
    project_name: &str,
    month: NaiveDate,
    asset: &ProjectHoldingAsset,
) -> Result<Vec<String>> {
    let tx = conn.transaction()?;
    let mut targets = vec![project_name.to_string()];
    targets.extend(sync_siblings(&tx, project_name)?);
    for target in &targets {
        let copy = ProjectHoldingAsset {
            project_name: target.clone(),
            ..asset.clone()
        };
        upsert_project_asset(&tx, target, month, &copy)?;
    }
    tx.commit()?;
    Ok(targets)
}

/// Industry counterpart of [`set_project_asset_synced`]
pub fn set_project_industry_synced(
    conn: &mut Connection,
    project_name: &str,
    month: NaiveDate,
    industry: &ProjectHoldingIndustry,
) -> Result<Vec<String>> {
    let tx = conn.transaction()?;
    let mut targets = vec![project_name.to_string()];
    targets.extend(sync_siblings(&tx, project_name)?);
    for target in &targets {
        let copy = ProjectHoldingIndustry {
            project_name: target.clone(),
            ..industry.clone()
        };
        upsert_project_industry(&tx, target, month, &copy)?;
    }
    tx.commit()?;
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::apply_schema(&conn).unwrap();
        conn
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_asset_snapshot_month_is_normalised_and_looked_up_as_of() {
        let conn = memory_db();
        let asset = ProjectHoldingAsset {
            project_name: "Alpha".into(),
            a_share_ratio: Some(dec!(70)),
            ..Default::default()
        };
        let outcome = upsert_project_asset(&conn, "Alpha", date(2025, 6, 17), &asset).unwrap();
        assert_eq!(outcome, WriteOutcome::Created);
        let again = upsert_project_asset(&conn, "Alpha", date(2025, 6, 30), &asset).unwrap();
        assert_eq!(again, WriteOutcome::Updated);

        let found = project_asset_as_of(&conn, "Alpha", date(2025, 8, 20)).unwrap().unwrap();
        assert_eq!(found.month, Some(date(2025, 6, 1)));
        assert_eq!(found.a_share_ratio, Some(dec!(70)));
        assert!(project_asset_as_of(&conn, "Alpha", date(2025, 5, 31)).unwrap().is_none());
    }

    #[test]
    fn test_asset_for_month_requires_exact_month() {
        let conn = memory_db();
        let asset = ProjectHoldingAsset {
            project_name: "Alpha".into(),
            a_share_ratio: Some(dec!(70)),
            ..Default::default()
        };
        upsert_project_asset(&conn, "Alpha", date(2025, 6, 1), &asset).unwrap();

        let found = project_asset_for_month(&conn, "Alpha", date(2025, 6, 20)).unwrap().unwrap();
        assert_eq!(found.month, Some(date(2025, 6, 1)));
        assert!(project_asset_for_month(&conn, "Alpha", date(2025, 7, 1)).unwrap().is_none());
    }

    #[test]
    fn test_industry_snapshot_keeps_negative_ratios() {
        let conn = memory_db();
        let industry = ProjectHoldingIndustry {
            project_name: "Alpha".into(),
            month: None,
            ratio_type: RatioType::BasedOnStock,
            industries: vec![("Banks".into(), dec!(30)), ("Index hedge".into(), dec!(-12.5))],
        };
        upsert_project_industry(&conn, "Alpha", date(2025, 6, 1), &industry).unwrap();

        let found = project_industry_as_of(&conn, "Alpha", date(2025, 6, 30)).unwrap().unwrap();
        assert_eq!(found.ratio_type, RatioType::BasedOnStock);
        assert_eq!(found.industries, industry.industries);
    }

    #[test]
    fn test_sync_siblings() {
        let conn = memory_db();
        add_sync_member(&conn, "alpha-family", "Alpha").unwrap();
        add_sync_member(&conn, "alpha-family", "Alpha II").unwrap();
        add_sync_member(&conn, "alpha-family", "Alpha III").unwrap();
        assert!(!add_sync_member(&conn, "alpha-family", "Alpha").unwrap());

        assert_eq!(sync_siblings(&conn, "Alpha").unwrap(), vec!["Alpha II", "Alpha III"]);
        assert!(sync_siblings(&conn, "Beta").unwrap().is_empty());

        remove_sync_member(&conn, "alpha-family", "Alpha III").unwrap();
        assert_eq!(list_sync_groups(&conn).unwrap()["alpha-family"].len(), 2);
    }

    #[test]
    fn test_synced_write_reaches_every_member() {
        let mut conn = memory_db();
        add_sync_member(&conn, "alpha-family", "Alpha").unwrap();
        add_sync_member(&conn, "alpha-family", "Alpha II").unwrap();

        let asset = ProjectHoldingAsset {
            project_name: "Alpha".into(),
            a_share_ratio: Some(dec!(55)),
            ..Default::default()
        };
        let written = set_project_asset_synced(&mut conn, "Alpha", date(2025, 7, 1), &asset).unwrap();
        assert_eq!(written, vec!["Alpha", "Alpha II"]);

        let copy = project_asset_as_of(&conn, "Alpha II", date(2025, 7, 31)).unwrap().unwrap();
        assert_eq!(copy.project_name, "Alpha II");
        assert_eq!(copy.a_share_ratio, Some(dec!(55)));

        let written = set_project_asset_synced(&mut conn, "Gamma", date(2025, 7, 1), &asset).unwrap();
        assert_eq!(written, vec!["Gamma"]);
    }
}
