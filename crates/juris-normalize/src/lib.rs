//! Source record flattening, deduplication, and type coercion.
//!
//! Converts the raw nested GraphQL records into the flat row types the
//! reconciler persists. Coercion failures never abort a row: the offending
//! field becomes null and a warning is logged.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate};
use juris_core::{CaseRow, ClientRow, ContractRow};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::warn;

pub const CRATE_NAME: &str = "juris-normalize";

pub const QUERY_CLIENTS: &str = "\
query {
  allClients {
    id
    name
    surname
  }
}";

pub const QUERY_CASES: &str = "\
query {
  allCases {
    id
    category
  }
}";

pub const QUERY_CONTRACTS: &str = "\
query {
  allContracts {
    id
    date
    amount
    client {
      id
    }
    case {
      id
    }
  }
}";

/// `data` payload shape for the clients query.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientsPayload {
    #[serde(rename = "allClients", default)]
    pub all_clients: Vec<RawClient>,
}

/// `data` payload shape for the cases query.
#[derive(Debug, Clone, Deserialize)]
pub struct CasesPayload {
    #[serde(rename = "allCases", default)]
    pub all_cases: Vec<RawCase>,
}

/// `data` payload shape for the contracts query.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractsPayload {
    #[serde(rename = "allContracts", default)]
    pub all_contracts: Vec<RawContract>,
}

/// Raw client record as emitted by the source. Identifiers arrive as JSON
/// strings or numbers depending on the upstream schema, so they stay
/// untyped until `coerce_key` runs.
#[derive(Debug, Clone, Deserialize)]
pub struct RawClient {
    #[serde(default)]
    pub id: JsonValue,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCase {
    #[serde(default)]
    pub id: JsonValue,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawContract {
    #[serde(default)]
    pub id: JsonValue,
    #[serde(default)]
    pub date: Option<JsonValue>,
    #[serde(default)]
    pub amount: Option<JsonValue>,
    #[serde(default)]
    pub client: Option<RawEntityRef>,
    #[serde(default)]
    pub case: Option<RawEntityRef>,
}

/// Embedded reference carrying only the referenced entity's key.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEntityRef {
    #[serde(default)]
    pub id: JsonValue,
}

/// Coerce a primary-key value to its canonical string form. Numbers are
/// rendered verbatim; blank or non-scalar values yield `None` and the
/// record carrying them is dropped by the caller.
pub fn coerce_key(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a date-like field into a canonical `NaiveDate`. Unparsable values
/// yield `None`.
pub fn coerce_date(value: &JsonValue) -> Option<NaiveDate> {
    let text = match value {
        JsonValue::String(s) => s.trim(),
        _ => return None,
    };

    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }

    // Some sources emit full timestamps for date columns.
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Coerce a monetary field to an `f64` rounded half-away-from-zero to two
/// decimals. Accepts JSON numbers and numeric strings; anything else
/// (including NaN/infinite values) yields `None`.
pub fn coerce_amount(value: &JsonValue) -> Option<f64> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    if !parsed.is_finite() {
        return None;
    }
    Some((parsed * 100.0).round() / 100.0)
}

/// Flatten and deduplicate client records, keeping the first occurrence
/// per national identifier in source order.
pub fn normalize_clients(raw: Vec<RawClient>) -> Vec<ClientRow> {
    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(raw.len());

    for record in raw {
        let Some(national_id) = coerce_key(&record.id) else {
            warn!("dropping client record without a usable identifier");
            continue;
        };
        if !seen.insert(national_id.clone()) {
            continue;
        }
        rows.push(ClientRow {
            national_id,
            name: record.name,
            surname: record.surname,
        });
    }

    rows
}

/// Flatten and deduplicate legal case records by case number.
pub fn normalize_cases(raw: Vec<RawCase>) -> Vec<CaseRow> {
    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(raw.len());

    for record in raw {
        let Some(case_no) = coerce_key(&record.id) else {
            warn!("dropping case record without a usable identifier");
            continue;
        };
        if !seen.insert(case_no.clone()) {
            continue;
        }
        rows.push(CaseRow {
            case_no,
            category: record.category,
        });
    }

    rows
}

/// Flatten and deduplicate contract records by contract number. Embedded
/// client/case references project to their key field; absent references
/// stay null (orphan references). Unparsable dates and amounts become null
/// without dropping the row.
pub fn normalize_contracts(raw: Vec<RawContract>) -> Vec<ContractRow> {
    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(raw.len());

    for record in raw {
        let Some(contract_no) = coerce_key(&record.id) else {
            warn!("dropping contract record without a usable identifier");
            continue;
        };
        if !seen.insert(contract_no.clone()) {
            continue;
        }

        let signed_on = match &record.date {
            None | Some(JsonValue::Null) => None,
            Some(value) => {
                let parsed = coerce_date(value);
                if parsed.is_none() {
                    warn!(contract = %contract_no, "unparsable contract date, storing null");
                }
                parsed
            }
        };

        let amount = match &record.amount {
            None | Some(JsonValue::Null) => None,
            Some(value) => {
                let parsed = coerce_amount(value);
                if parsed.is_none() {
                    warn!(contract = %contract_no, "unparsable contract amount, storing null");
                }
                parsed
            }
        };

        let client_national_id = record.client.as_ref().and_then(|r| coerce_key(&r.id));
        let case_no = record.case.as_ref().and_then(|r| coerce_key(&r.id));

        rows.push(ContractRow {
            contract_no,
            signed_on,
            amount,
            client_national_id,
            case_no,
        });
    }

    rows
}
