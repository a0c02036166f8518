//! Fundbook - private fund back office
//!
//! This library ingests custodian and transfer-agent spreadsheet exports
//! (NAVs, position snapshots, transactions, dividends, strategies) into a
//! local SQLite book and computes client portfolios, holder concentration,
//! look-through exposure and NAV performance from it.

pub mod cli;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod importers;
pub mod ledger;
pub mod normalize;
pub mod reports;
pub mod utils;
pub mod valuation;

#[cfg(test)]
mod test_support;
