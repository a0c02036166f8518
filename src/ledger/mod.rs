//! Event ledger: classification of raw transactions and share reconstruction.

pub mod classify;
pub mod reconstruct;

use std::collections::BTreeMap;

use crate::db::{Transaction, TransactionKind};
pub use classify::TransactionClassifier;
pub use reconstruct::{
    period_flows, reconstruct, HoldingStatus, LedgerEvent, PeriodFlows, ShareBalance,
};

/// Transactions of one product, classified and ready for replay
#[derive(Debug, Clone)]
pub struct ProductLedger {
    pub product_key: String,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    pub events: Vec<LedgerEvent>,
    pub unknown_labels: Vec<String>,
}

/// Group a client's transactions by product and classify each one.
pub fn group_by_product(
    transactions: &[Transaction],
    classifier: &TransactionClassifier,
) -> Vec<ProductLedger> {
    let mut products: BTreeMap<String, ProductLedger> = BTreeMap::new();

    for tx in transactions {
        let key = tx.product_key();
        let ledger = products.entry(key.clone()).or_insert_with(|| ProductLedger {
            product_key: key,
            product_code: None,
            product_name: None,
            events: Vec::new(),
            unknown_labels: Vec::new(),
        });

        if ledger.product_code.is_none() {
            ledger.product_code = tx.product_code.clone().filter(|c| !c.trim().is_empty());
        }
        if ledger.product_name.is_none() {
            ledger.product_name = tx.product_name.clone().or_else(|| tx.fund_name.clone());
        }

        let kind = classifier.classify(&tx.transaction_type);
        if kind == TransactionKind::Unknown && !ledger.unknown_labels.contains(&tx.transaction_type) {
            ledger.unknown_labels.push(tx.transaction_type.clone());
        }
        ledger.events.push(LedgerEvent::from_transaction(tx, kind));
    }

    products.into_values().collect()
}
