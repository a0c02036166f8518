//! User configuration loaded from `~/.fundbook/config.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::db::TransactionKind;
use crate::error::FundbookError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Overrides the database location
    pub db_path: Option<PathBuf>,
    pub classification: ClassificationConfig,
    pub lookthrough: LookThroughConfig,
    pub holders: HoldersConfig,
    pub performance: PerformanceConfig,
}

/// Keyword rules for transaction labels, matched as substrings.
///
/// Groups are tried in the order forced adjustments, redemptions,
/// subscriptions, reinvested dividends, cash dividends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub forced_increase: Vec<String>,
    pub forced_decrease: Vec<String>,
    pub redemption: Vec<String>,
    pub subscription: Vec<String>,
    pub reinvest_dividend: Vec<String>,
    pub cash_dividend: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            forced_increase: strings(&["强制调增", "强行调增", "forced increase"]),
            forced_decrease: strings(&["强制调减", "强行调减", "forced decrease"]),
            redemption: strings(&["赎回", "卖出", "减持", "redemption", "redeem", "sell"]),
            subscription: strings(&[
                "申购",
                "买入",
                "认购",
                "增持",
                "subscription",
                "subscribe",
                "purchase",
                "buy",
            ]),
            reinvest_dividend: strings(&["红利再投", "红利转投", "再投资", "reinvest"]),
            cash_dividend: strings(&["分红", "现金红利", "dividend"]),
        }
    }
}

impl ClassificationConfig {
    /// Rule groups in match order.
    pub fn ordered_rules(&self) -> Vec<(TransactionKind, &[String])> {
        vec![
            (TransactionKind::ForcedIncrease, self.forced_increase.as_slice()),
            (TransactionKind::ForcedDecrease, self.forced_decrease.as_slice()),
            (TransactionKind::Redemption, self.redemption.as_slice()),
            (TransactionKind::Subscription, self.subscription.as_slice()),
            (TransactionKind::ReinvestDividend, self.reinvest_dividend.as_slice()),
            (TransactionKind::CashDividend, self.cash_dividend.as_slice()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookThroughConfig {
    /// Sub-strategies whose positions are decomposed into project holdings
    pub sub_strategies: Vec<String>,
}

impl Default for LookThroughConfig {
    fn default() -> Self {
        Self {
            sub_strategies: strings(&["主观多头", "量化多头", "股票多头", "股票多空", "指数增强"]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldersConfig {
    /// Market value above which a holder is "large"
    pub large_threshold: Decimal,
    /// Market value from which a holder is "medium" (inclusive)
    pub medium_threshold: Decimal,
    pub default_top: usize,
}

impl Default for HoldersConfig {
    fn default() -> Self {
        Self {
            large_threshold: Decimal::from(1_000_000),
            medium_threshold: Decimal::from(100_000),
            default_top: 10,
        }
    }
}

/// Inputs of the fund risk statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Annual risk-free rate as a fraction, e.g. 0.03
    pub risk_free_rate: f64,
    /// NAV observations per year used to annualise volatility
    pub trading_days: u32,
    /// Look-back window of `fundbook performance risk`
    pub default_period_days: i64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.03,
            trading_days: 252,
            default_period_days: 30,
        }
    }
}

impl AppConfig {
    /// Resolve and load the configuration file.
    ///
    /// Lookup order: explicit path, `$FUNDBOOK_CONFIG`, `~/.fundbook/config.toml`.
    /// Only an explicitly requested file has to exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var("FUNDBOOK_CONFIG") {
            return Self::from_file(Path::new(&path));
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = Self::from_toml(&raw)?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(raw).map_err(|e| FundbookError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.holders.medium_threshold > self.holders.large_threshold {
            return Err(FundbookError::Config(
                "holders.medium_threshold must not exceed holders.large_threshold".into(),
            )
            .into());
        }
        if self.holders.default_top == 0 {
            return Err(FundbookError::Config("holders.default_top must be positive".into()).into());
        }
        if self.performance.trading_days == 0 {
            return Err(FundbookError::Config("performance.trading_days must be positive".into()).into());
        }
        if !(1..=365).contains(&self.performance.default_period_days) {
            return Err(FundbookError::Config(
                "performance.default_period_days must be between 1 and 365".into(),
            )
            .into());
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".fundbook").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [lookthrough]
            sub_strategies = ["CTA"]

            [holders]
            default_top = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.lookthrough.sub_strategies, vec!["CTA"]);
        assert_eq!(config.holders.default_top, 5);
        assert_eq!(config.holders.large_threshold, dec!(1000000));
        assert!(config.classification.subscription.contains(&"申购".to_string()));
        assert!(config.db_path.is_none());
        assert_eq!(config.performance.trading_days, 252);
    }

    #[test]
    fn test_performance_section() {
        let config = AppConfig::from_toml(
            r#"
            [performance]
            risk_free_rate = 0.015
            "#,
        )
        .unwrap();
        assert_eq!(config.performance.risk_free_rate, 0.015);
        assert_eq!(config.performance.default_period_days, 30);

        let err = AppConfig::from_toml("[performance]\ntrading_days = 0\n").unwrap_err();
        assert!(err.to_string().contains("trading_days"));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let err = AppConfig::from_toml(
            r#"
            [holders]
            large_threshold = 1000
            medium_threshold = 5000
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("medium_threshold"));
    }

    #[test]
    fn test_forced_rules_come_before_redemptions() {
        let config = ClassificationConfig::default();
        let order: Vec<TransactionKind> = config.ordered_rules().iter().map(|(k, _)| *k).collect();
        let forced = order.iter().position(|k| *k == TransactionKind::ForcedDecrease).unwrap();
        let redeem = order.iter().position(|k| *k == TransactionKind::Redemption).unwrap();
        assert!(forced < redeem);
    }
}
