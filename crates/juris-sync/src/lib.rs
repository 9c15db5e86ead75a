//! Sync pipeline orchestration: fetch, normalize, reconcile, commit.
//!
//! One run fetches the three entity types from GraphQL, normalizes them,
//! and merges them into the reporting database inside a single transaction.
//! The merge is insert-only: rows whose primary key is already present are
//! left untouched, so repeated runs are idempotent and first-seen values
//! win. Existing rows are never updated even when the source has newer
//! field values; that mirrors the upstream merge contract and is documented
//! in DESIGN.md as a deliberate limitation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use juris_client::{QueryClient, QueryClientConfig, QueryError};
use juris_core::{CaseRow, ClientRow, ContractRow, EntityKind};
use juris_normalize::{
    normalize_cases, normalize_clients, normalize_contracts, CasesPayload, ClientsPayload,
    ContractsPayload, RawCase, RawClient, RawContract, QUERY_CASES, QUERY_CLIENTS, QUERY_CONTRACTS,
};
use serde::Serialize;
use sqlx::{Connection, PgConnection};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub const CRATE_NAME: &str = "juris-sync";

/// Process-wide configuration, constructed once at startup and passed down.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub graphql_url: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub http_timeout_secs: u64,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            graphql_url: std::env::var("GRAPHQL_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080/graphql".to_string()),
            db_host: std::env::var("DB_HOST").unwrap_or_else(|_| "db".to_string()),
            db_port: std::env::var("DB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5432),
            db_name: std::env::var("DB_NAME").unwrap_or_else(|_| "juris".to_string()),
            db_user: std::env::var("DB_USER").unwrap_or_else(|_| "juris".to_string()),
            db_password: std::env::var("DB_PASSWORD").unwrap_or_else(|_| "juris".to_string()),
            http_timeout_secs: std::env::var("JURIS_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }
}

/// Store-level failure while merging one row. Identifies the entity type
/// and primary key that failed.
#[derive(Debug, Error)]
#[error("inserting {entity} row {key}")]
pub struct PersistenceError {
    pub entity: EntityKind,
    pub key: String,
    #[source]
    pub source: sqlx::Error,
}

/// Aggregated run failure. Exactly one of these surfaces per failed run;
/// nothing commits when it does.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetching {entity} records")]
    Fetch {
        entity: EntityKind,
        #[source]
        source: QueryError,
    },
    #[error("opening database connection")]
    Connect(#[source] sqlx::Error),
    #[error("beginning sync transaction")]
    Begin(#[source] sqlx::Error),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("committing sync transaction")]
    Commit(#[source] sqlx::Error),
}

/// Seam between the orchestrator and the query endpoint, so orchestration
/// logic is testable with stub sources.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_clients(&self) -> Result<Vec<RawClient>, QueryError>;
    async fn fetch_cases(&self) -> Result<Vec<RawCase>, QueryError>;
    async fn fetch_contracts(&self) -> Result<Vec<RawContract>, QueryError>;
}

/// Production record source: the three fixed queries against the GraphQL
/// endpoint.
#[derive(Debug)]
pub struct GraphqlRecordSource {
    client: QueryClient,
}

impl GraphqlRecordSource {
    pub fn new(config: &SyncConfig) -> anyhow::Result<Self> {
        let client = QueryClient::new(QueryClientConfig {
            endpoint: config.graphql_url.clone(),
            timeout: std::time::Duration::from_secs(config.http_timeout_secs),
            ..Default::default()
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RecordSource for GraphqlRecordSource {
    async fn fetch_clients(&self) -> Result<Vec<RawClient>, QueryError> {
        let payload: ClientsPayload = self.client.execute(QUERY_CLIENTS).await?;
        Ok(payload.all_clients)
    }

    async fn fetch_cases(&self) -> Result<Vec<RawCase>, QueryError> {
        let payload: CasesPayload = self.client.execute(QUERY_CASES).await?;
        Ok(payload.all_cases)
    }

    async fn fetch_contracts(&self) -> Result<Vec<RawContract>, QueryError> {
        let payload: ContractsPayload = self.client.execute(QUERY_CONTRACTS).await?;
        Ok(payload.all_contracts)
    }
}

/// Normalized output of one fetch pass, ready for reconciliation.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatches {
    pub clients: Vec<ClientRow>,
    pub cases: Vec<CaseRow>,
    pub contracts: Vec<ContractRow>,
}

/// Fetch all three entity types and normalize them. Fetch failures abort
/// immediately, tagged with the entity that was being fetched.
pub async fn fetch_and_normalize(source: &dyn RecordSource) -> Result<NormalizedBatches, SyncError> {
    let clients = source.fetch_clients().await.map_err(|source| SyncError::Fetch {
        entity: EntityKind::Client,
        source,
    })?;
    let cases = source.fetch_cases().await.map_err(|source| SyncError::Fetch {
        entity: EntityKind::LegalCase,
        source,
    })?;
    let contracts = source
        .fetch_contracts()
        .await
        .map_err(|source| SyncError::Fetch {
            entity: EntityKind::ServiceContract,
            source,
        })?;

    Ok(NormalizedBatches {
        clients: normalize_clients(clients),
        cases: normalize_cases(cases),
        contracts: normalize_contracts(contracts),
    })
}

/// Per-entity merge result. `skipped` counts rows whose primary key was
/// already present.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReconcileOutcome {
    pub inserted: u64,
    pub skipped: u64,
}

const INSERT_CLIENT: &str = "\
INSERT INTO client (national_id, name, surname)
VALUES ($1, $2, $3)
ON CONFLICT (national_id) DO NOTHING";

const INSERT_CASE: &str = "\
INSERT INTO legal_case (case_no, category)
VALUES ($1, $2)
ON CONFLICT (case_no) DO NOTHING";

const INSERT_CONTRACT: &str = "\
INSERT INTO service_contract (contract_no, signed_on, amount, client_national_id, case_no)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (contract_no) DO NOTHING";

/// Merge client rows into the store, inserting only absent keys. Runs
/// inside the caller's transaction and never commits.
pub async fn reconcile_clients(
    conn: &mut PgConnection,
    rows: &[ClientRow],
) -> Result<ReconcileOutcome, PersistenceError> {
    let mut outcome = ReconcileOutcome::default();
    for row in rows {
        let result = sqlx::query(INSERT_CLIENT)
            .bind(&row.national_id)
            .bind(&row.name)
            .bind(&row.surname)
            .execute(&mut *conn)
            .await
            .map_err(|source| PersistenceError {
                entity: EntityKind::Client,
                key: row.national_id.clone(),
                source,
            })?;
        tally(&mut outcome, result.rows_affected());
    }
    Ok(outcome)
}

/// Merge legal case rows, inserting only absent keys.
pub async fn reconcile_cases(
    conn: &mut PgConnection,
    rows: &[CaseRow],
) -> Result<ReconcileOutcome, PersistenceError> {
    let mut outcome = ReconcileOutcome::default();
    for row in rows {
        let result = sqlx::query(INSERT_CASE)
            .bind(&row.case_no)
            .bind(&row.category)
            .execute(&mut *conn)
            .await
            .map_err(|source| PersistenceError {
                entity: EntityKind::LegalCase,
                key: row.case_no.clone(),
                source,
            })?;
        tally(&mut outcome, result.rows_affected());
    }
    Ok(outcome)
}

/// Merge service contract rows, inserting only absent keys. Null client or
/// case references are persisted as-is.
pub async fn reconcile_contracts(
    conn: &mut PgConnection,
    rows: &[ContractRow],
) -> Result<ReconcileOutcome, PersistenceError> {
    let mut outcome = ReconcileOutcome::default();
    for row in rows {
        let result = sqlx::query(INSERT_CONTRACT)
            .bind(&row.contract_no)
            .bind(row.signed_on)
            .bind(row.amount)
            .bind(&row.client_national_id)
            .bind(&row.case_no)
            .execute(&mut *conn)
            .await
            .map_err(|source| PersistenceError {
                entity: EntityKind::ServiceContract,
                key: row.contract_no.clone(),
                source,
            })?;
        tally(&mut outcome, result.rows_affected());
    }
    Ok(outcome)
}

fn tally(outcome: &mut ReconcileOutcome, rows_affected: u64) {
    if rows_affected == 0 {
        outcome.skipped += 1;
    } else {
        outcome.inserted += 1;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub clients: ReconcileOutcome,
    pub cases: ReconcileOutcome,
    pub contracts: ReconcileOutcome,
}

/// Run one complete sync: fetch, normalize, reconcile all three entity
/// types in dependency order, commit once.
///
/// Exactly one database connection is opened for the run and closed on
/// every exit path. If any step fails the transaction is dropped
/// uncommitted, so no rows from the run become visible.
pub async fn run_once(
    config: &SyncConfig,
    source: &dyn RecordSource,
) -> Result<SyncRunSummary, SyncError> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(%run_id, endpoint = %config.graphql_url, "starting sync run");

    let batches = fetch_and_normalize(source).await?;
    info!(
        clients = batches.clients.len(),
        cases = batches.cases.len(),
        contracts = batches.contracts.len(),
        "normalized source records"
    );

    let mut conn = PgConnection::connect(&config.database_url())
        .await
        .map_err(SyncError::Connect)?;

    let run: Result<_, SyncError> = async {
        let mut tx = conn.begin().await.map_err(SyncError::Begin)?;

        // Referenced entities first so enforced foreign keys see their targets.
        let clients = reconcile_clients(&mut tx, &batches.clients).await?;
        let cases = reconcile_cases(&mut tx, &batches.cases).await?;
        let contracts = reconcile_contracts(&mut tx, &batches.contracts).await?;

        tx.commit().await.map_err(SyncError::Commit)?;
        Ok((clients, cases, contracts))
    }
    .await;

    // Close the connection on both exit paths before reporting.
    let _ = conn.close().await;

    let (clients, cases, contracts) = run?;
    let finished_at = Utc::now();
    info!(
        %run_id,
        inserted_clients = clients.inserted,
        inserted_cases = cases.inserted,
        inserted_contracts = contracts.inserted,
        "sync run committed"
    );

    Ok(SyncRunSummary {
        run_id,
        started_at,
        finished_at,
        clients,
        cases,
        contracts,
    })
}

/// Convenience entry point for the CLI: environment config plus the
/// production GraphQL source.
pub async fn run_sync_once_from_env() -> anyhow::Result<SyncRunSummary> {
    let config = SyncConfig::from_env();
    let source = GraphqlRecordSource::new(&config)?;
    Ok(run_once(&config, &source).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubSource {
        fail_contracts: bool,
    }

    #[async_trait]
    impl RecordSource for StubSource {
        async fn fetch_clients(&self) -> Result<Vec<RawClient>, QueryError> {
            let payload: ClientsPayload = serde_json::from_value(json!({
                "allClients": [
                    { "id": "A1", "name": "Ana", "surname": "Ruiz" },
                    { "id": "A1", "name": "Anna", "surname": "Ruis" }
                ]
            }))
            .unwrap();
            Ok(payload.all_clients)
        }

        async fn fetch_cases(&self) -> Result<Vec<RawCase>, QueryError> {
            let payload: CasesPayload = serde_json::from_value(json!({
                "allCases": [{ "id": "C1", "category": "civil" }]
            }))
            .unwrap();
            Ok(payload.all_cases)
        }

        async fn fetch_contracts(&self) -> Result<Vec<RawContract>, QueryError> {
            if self.fail_contracts {
                return Err(QueryError::Protocol { status: 502 });
            }
            let payload: ContractsPayload = serde_json::from_value(json!({
                "allContracts": [
                    {
                        "id": "K1",
                        "date": "2024-03-01",
                        "amount": 150.555,
                        "client": { "id": "A1" },
                        "case": { "id": "C1" }
                    }
                ]
            }))
            .unwrap();
            Ok(payload.all_contracts)
        }
    }

    #[tokio::test]
    async fn fetch_and_normalize_flattens_and_dedupes() {
        let source = StubSource {
            fail_contracts: false,
        };
        let batches = fetch_and_normalize(&source).await.expect("batches");

        assert_eq!(batches.clients.len(), 1);
        assert_eq!(batches.clients[0].name.as_deref(), Some("Ana"));
        assert_eq!(batches.cases.len(), 1);
        assert_eq!(batches.contracts.len(), 1);
        assert_eq!(batches.contracts[0].amount, Some(150.56));
        assert_eq!(batches.contracts[0].client_national_id.as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn fetch_failure_is_tagged_with_the_failing_entity() {
        let source = StubSource {
            fail_contracts: true,
        };
        let error = fetch_and_normalize(&source).await.expect_err("error");
        match error {
            SyncError::Fetch { entity, source } => {
                assert_eq!(entity, EntityKind::ServiceContract);
                assert!(matches!(source, QueryError::Protocol { status: 502 }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn database_url_renders_all_parts() {
        let config = SyncConfig {
            graphql_url: "http://127.0.0.1:8080/graphql".to_string(),
            db_host: "db".to_string(),
            db_port: 5432,
            db_name: "juris".to_string(),
            db_user: "reporter".to_string(),
            db_password: "secret".to_string(),
            http_timeout_secs: 20,
        };
        assert_eq!(config.database_url(), "postgres://reporter:secret@db:5432/juris");
    }

    #[test]
    fn merge_statements_never_update_existing_rows() {
        for statement in [INSERT_CLIENT, INSERT_CASE, INSERT_CONTRACT] {
            assert!(statement.contains("ON CONFLICT"));
            assert!(statement.ends_with("DO NOTHING"));
            assert!(!statement.contains("DO UPDATE"));
        }
    }
}
