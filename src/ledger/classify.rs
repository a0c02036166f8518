//! Transaction label classification.
//!
//! Labels arrive as free text from transfer agents. An exact entry in the
//! `transaction_type_map` table wins; otherwise keyword rules from the
//! configuration are tried in order. Anything left is `Unknown`.

use anyhow::Result;
use rusqlite::Connection;
use std::collections::HashMap;

use crate::config::ClassificationConfig;
use crate::db::{self, TransactionKind};

#[derive(Debug, Clone)]
pub struct TransactionClassifier {
    exact: HashMap<String, TransactionKind>,
    rules: Vec<(TransactionKind, Vec<String>)>,
}

impl TransactionClassifier {
    pub fn new(config: &ClassificationConfig) -> Self {
        let rules = config
            .ordered_rules()
            .into_iter()
            .map(|(kind, keywords)| {
                let keywords = keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect();
                (kind, keywords)
            })
            .collect();

        Self {
            exact: HashMap::new(),
            rules,
        }
    }

    /// Classifier with keyword rules from `config` and exact overrides from the database
    pub fn load(conn: &Connection, config: &ClassificationConfig) -> Result<Self> {
        let mut classifier = Self::new(config);
        for (label, kind) in db::classification::list_type_mappings(conn)? {
            classifier.add_exact(&label, kind);
        }
        Ok(classifier)
    }

    pub fn add_exact(&mut self, label: &str, kind: TransactionKind) {
        self.exact.insert(label.trim().to_string(), kind);
    }

    pub fn classify(&self, label: &str) -> TransactionKind {
        let label = label.trim();
        if let Some(kind) = self.exact.get(label) {
            return *kind;
        }

        let lowered = label.to_lowercase();
        self.rules
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k.as_str())))
            .map(|(kind, _)| *kind)
            .unwrap_or(TransactionKind::Unknown)
    }
}

impl Default for TransactionClassifier {
    fn default() -> Self {
        Self::new(&ClassificationConfig::default())
    }
}
