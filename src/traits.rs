//! Extension trait for custom connectors.
//!
//! Implement [`Connector`] to plug a new data source into the ingestion
//! pipeline without touching the orchestrator itself.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::SourceItem;

/// A data source connector that produces documents for ingestion.
///
/// The connector's only job is to enumerate items; chunking, embedding,
/// and indexing are the orchestrator's concern, not the connector's.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use context_harness::models::SourceItem;
/// use context_harness::traits::Connector;
///
/// pub struct DatabaseConnector {
///     connection_string: String,
/// }
///
/// #[async_trait]
/// impl Connector for DatabaseConnector {
///     fn name(&self) -> &str { "database" }
///     fn description(&self) -> &str { "Ingest rows from a database table" }
///     fn connector_type(&self) -> &str { "custom" }
///
///     async fn scan(&self) -> Result<Vec<SourceItem>> {
///         Ok(vec![])
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// The connector instance name (e.g. `"docs"`).
    ///
    /// Combined with [`connector_type`](Connector::connector_type) to form
    /// the source label: `"{type}:{name}"`.
    fn name(&self) -> &str;

    /// One-line description of what this connector does.
    fn description(&self) -> &str;

    /// Connector type identifier (e.g. `"filesystem"`, `"custom"`).
    fn connector_type(&self) -> &str {
        "custom"
    }

    /// Source label used to tag documents from this connector.
    ///
    /// Defaults to `"{connector_type}:{name}"`.
    fn source_label(&self) -> String {
        format!("{}:{}", self.connector_type(), self.name())
    }

    /// Scan the data source and return all items to ingest.
    async fn scan(&self) -> Result<Vec<SourceItem>>;
}
