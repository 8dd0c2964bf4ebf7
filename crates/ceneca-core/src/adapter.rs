//! Adapter Contract (C2): the uniform interface each data-source driver
//! implements. The core never implements a driver itself — only this
//! contract and a deterministic test double.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::AdapterError;
use crate::registry::SourceKind;

/// Sampling method for [`Adapter::sample_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleMethod {
    /// Uniform random sample.
    Random,
    /// The first `n` rows in source order.
    First,
    /// A sample stratified across a driver-defined partition key.
    Stratified,
}

/// Insight kind requested from [`Adapter::generate_insights`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    /// Statistical outliers.
    Outliers,
    /// Time-series trends.
    Trends,
    /// Cluster structure.
    Clusters,
    /// Pairwise correlations.
    Correlations,
}

/// A unit of data returned by an adapter: one row/document, as opaque JSON.
pub type Row = serde_json::Value;

/// A schema bundle returned by [`Adapter::get_metadata`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataBundle {
    /// Per-table status and schema summary.
    pub tables: Vec<TableSummary>,
}

/// One table's summary within a [`MetadataBundle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummary {
    /// Table/collection name.
    pub name: String,
    /// Column or field names, as reported by the driver.
    pub columns: Vec<String>,
    /// Approximate row/document count, if known.
    pub row_count: Option<u64>,
}

/// Summary statistics returned by [`Adapter::run_summary`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryStats {
    /// Per-column statistics, keyed by column name.
    pub columns: std::collections::HashMap<String, serde_json::Value>,
}

/// Insights returned by [`Adapter::generate_insights`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Insights {
    /// The insight kind that was requested.
    pub kind: Option<InsightKind>,
    /// Freeform findings, one entry per insight.
    pub findings: Vec<serde_json::Value>,
}

/// A cooperative deadline passed to every adapter call. Adapters observing
/// [`Deadline::is_expired`] must abort cleanly and surface
/// `AdapterError{kind: Timeout}`.
#[derive(Debug, Clone)]
pub struct Deadline {
    deadline: Instant,
}

impl Deadline {
    /// A deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    /// Whether the deadline has already passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Remaining time until the deadline, or `Duration::ZERO` if expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// The uniform interface every data-source driver implements (C2).
///
/// All calls are async, cancellable via the passed [`Deadline`], and must
/// respect it. Adapters own no cross-request state and must be safe for
/// concurrent dispatch (the scheduler calls them from many tasks at once).
#[async_trait]
pub trait Adapter: Send + Sync {
    /// This adapter's source kind.
    fn kind(&self) -> SourceKind;

    /// Fetch metadata for the given tables, or all known tables if `None`.
    async fn get_metadata(
        &self,
        tables: Option<&[String]>,
        deadline: &Deadline,
    ) -> Result<MetadataBundle, AdapterError>;

    /// Run summary statistics over a table, optionally restricted to
    /// specific columns.
    async fn run_summary(
        &self,
        table: &str,
        columns: Option<&[String]>,
        deadline: &Deadline,
    ) -> Result<SummaryStats, AdapterError>;

    /// Run a targeted query and return matching rows.
    async fn run_targeted(&self, query: &str, deadline: &Deadline) -> Result<Vec<Row>, AdapterError>;

    /// Sample up to `n` rows from the result of `query` using `method`.
    async fn sample_data(
        &self,
        query: &str,
        n: usize,
        method: SampleMethod,
        deadline: &Deadline,
    ) -> Result<Vec<Row>, AdapterError>;

    /// Generate insights of the given kind over previously fetched `data`.
    async fn generate_insights(
        &self,
        data: &[Row],
        kind: InsightKind,
        deadline: &Deadline,
    ) -> Result<Insights, AdapterError>;
}

/// A process-wide registry of adapters, keyed by source id. Adapters
/// register themselves at startup.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: dashmap::DashMap<String, std::sync::Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under a source id, replacing any prior
    /// registration for that id.
    pub fn register(&self, source_id: impl Into<String>, adapter: std::sync::Arc<dyn Adapter>) {
        self.adapters.insert(source_id.into(), adapter);
    }

    /// Look up the adapter registered for a source id.
    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<std::sync::Arc<dyn Adapter>> {
        self.adapters.get(source_id).map(|e| e.value().clone())
    }

    /// Remove the adapter registered for a source id.
    pub fn remove(&self, source_id: &str) -> bool {
        self.adapters.remove(source_id).is_some()
    }
}

#[cfg(test)]
pub mod test_support {
    //! A deterministic, in-process [`Adapter`] double for tests, shipped
    //! alongside the contract the way a mock chat model or mock tool ships
    //! alongside an LLM provider trait.

    use super::{
        Adapter, AdapterError, Deadline, InsightKind, Insights, MetadataBundle, Row, SampleMethod,
        SourceKind, SummaryStats, TableSummary,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// A scripted response queue, one entry consumed per call.
    pub struct MockAdapter {
        kind: SourceKind,
        rows: Mutex<Vec<Row>>,
        fail_with: Mutex<Option<AdapterError>>,
        calls: Mutex<u32>,
    }

    impl MockAdapter {
        /// A mock adapter of the given kind that returns `rows` from
        /// `run_targeted`/`sample_data` until exhausted.
        #[must_use]
        pub fn new(kind: SourceKind, rows: Vec<Row>) -> Self {
            Self {
                kind,
                rows: Mutex::new(rows),
                fail_with: Mutex::new(None),
                calls: Mutex::new(0),
            }
        }

        /// Make every subsequent call fail with `err`.
        pub fn fail_with(&self, err: AdapterError) {
            *self.fail_with.lock() = Some(err);
        }

        /// Number of calls made so far.
        #[must_use]
        pub fn call_count(&self) -> u32 {
            *self.calls.lock()
        }

        fn check(&self) -> Result<(), AdapterError> {
            *self.calls.lock() += 1;
            if let Some(err) = self.fail_with.lock().clone() {
                return Err(err);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Adapter for MockAdapter {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn get_metadata(
            &self,
            _tables: Option<&[String]>,
            _deadline: &Deadline,
        ) -> Result<MetadataBundle, AdapterError> {
            self.check()?;
            Ok(MetadataBundle {
                tables: vec![TableSummary {
                    name: "mock_table".to_string(),
                    columns: vec!["id".to_string(), "value".to_string()],
                    row_count: Some(self.rows.lock().len() as u64),
                }],
            })
        }

        async fn run_summary(
            &self,
            _table: &str,
            _columns: Option<&[String]>,
            _deadline: &Deadline,
        ) -> Result<SummaryStats, AdapterError> {
            self.check()?;
            Ok(SummaryStats::default())
        }

        async fn run_targeted(&self, _query: &str, _deadline: &Deadline) -> Result<Vec<Row>, AdapterError> {
            self.check()?;
            Ok(self.rows.lock().clone())
        }

        async fn sample_data(
            &self,
            _query: &str,
            n: usize,
            _method: SampleMethod,
            _deadline: &Deadline,
        ) -> Result<Vec<Row>, AdapterError> {
            self.check()?;
            let rows = self.rows.lock();
            Ok(rows.iter().take(n).cloned().collect())
        }

        async fn generate_insights(
            &self,
            _data: &[Row],
            kind: InsightKind,
            _deadline: &Deadline,
        ) -> Result<Insights, AdapterError> {
            self.check()?;
            Ok(Insights {
                kind: Some(kind),
                findings: vec![],
            })
        }
    }

    #[tokio::test]
    async fn registry_register_get_remove() {
        use super::AdapterRegistry;
        use std::sync::Arc;

        let registry = AdapterRegistry::new();
        let adapter = Arc::new(MockAdapter::new(SourceKind::Relational, vec![]));
        registry.register("s1", adapter);
        assert!(registry.get("s1").is_some());
        assert!(registry.remove("s1"));
        assert!(registry.get("s1").is_none());
    }

    #[tokio::test]
    async fn mock_adapter_returns_scripted_rows_then_fails_on_demand() {
        let adapter = MockAdapter::new(SourceKind::Relational, vec![serde_json::json!({"id": 1})]);
        let deadline = Deadline::after(std::time::Duration::from_secs(1));
        let rows = adapter.run_targeted("select *", &deadline).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(adapter.call_count(), 1);

        adapter.fail_with(AdapterError::new(crate::error::AdapterErrorKind::Timeout, "slow"));
        let err = adapter.run_targeted("select *", &deadline).await.unwrap_err();
        assert!(err.retryable());
    }
}
