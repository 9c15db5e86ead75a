//! Core relational row types shared across the juris sync pipeline.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "juris-core";

/// Entity taxonomy, listed in reconciliation dependency order: referenced
/// entities (clients, legal cases) come before the contract that points at
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Client,
    LegalCase,
    ServiceContract,
}

impl EntityKind {
    /// Target table in the reporting database.
    pub fn table_name(self) -> &'static str {
        match self {
            EntityKind::Client => "client",
            EntityKind::LegalCase => "legal_case",
            EntityKind::ServiceContract => "service_contract",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Flattened client record, keyed by the national identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRow {
    pub national_id: String,
    pub name: Option<String>,
    pub surname: Option<String>,
}

/// Flattened legal case record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRow {
    pub case_no: String,
    pub category: Option<String>,
}

/// Flattened service contract record. The client/case references stay
/// optional: a contract with no embedded client or case in the source is
/// persisted with null foreign keys rather than rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRow {
    pub contract_no: String,
    pub signed_on: Option<NaiveDate>,
    pub amount: Option<f64>,
    pub client_national_id: Option<String>,
    pub case_no: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kinds_map_to_tables() {
        assert_eq!(EntityKind::Client.table_name(), "client");
        assert_eq!(EntityKind::LegalCase.table_name(), "legal_case");
        assert_eq!(EntityKind::ServiceContract.table_name(), "service_contract");
    }

    #[test]
    fn entity_kind_display_matches_table_name() {
        assert_eq!(EntityKind::ServiceContract.to_string(), "service_contract");
    }
}
