//! Source attachment: the seam between the engine session and the shared
//! relational store.
//!
//! A catalog registers the store's shared tables into a session, already
//! restricted to the scope's permitted workspaces. Tenant filtering happens
//! at this boundary (the storage side), never by rewriting query text.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use datafusion::datasource::MemTable;
use datafusion::error::DataFusionError;
use datafusion::prelude::SessionContext;
use thiserror::Error;

use vantage_core::WorkspaceId;

use crate::session::SessionScope;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unsupported column type {type_name} for {table}.{column}")]
    UnsupportedType {
        table: String,
        column: String,
        type_name: String,
    },

    #[error("source registration failed: {0}")]
    Register(#[from] DataFusionError),

    #[error("source decoding failed: {0}")]
    Arrow(#[from] ArrowError),
}

/// Attaches the shared relational store to a session under a tenant scope.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn register(&self, ctx: &SessionContext, scope: &SessionScope)
        -> Result<(), SourceError>;
}

#[derive(Debug, Default)]
struct MemoryTable {
    schema: Option<SchemaRef>,
    partitions: Vec<(WorkspaceId, RecordBatch)>,
}

/// In-memory catalog for tests/dev.
///
/// Rows are tagged with the workspace that owns them; `register` exposes
/// only the batches belonging to the scope's permitted set, mimicking the
/// store-side row-level policy.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: HashMap<String, MemoryTable>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one batch of rows owned by `workspace` to `table`. The first
    /// batch fixes the table schema.
    pub fn add_batch(&mut self, table: &str, workspace: &WorkspaceId, batch: RecordBatch) {
        let entry = self.tables.entry(table.to_string()).or_default();
        entry.schema.get_or_insert_with(|| batch.schema());
        entry.partitions.push((workspace.clone(), batch));
    }
}

#[async_trait]
impl SourceCatalog for MemoryCatalog {
    async fn register(
        &self,
        ctx: &SessionContext,
        scope: &SessionScope,
    ) -> Result<(), SourceError> {
        for (name, table) in &self.tables {
            let Some(schema) = table.schema.clone() else {
                continue;
            };
            let visible: Vec<RecordBatch> = table
                .partitions
                .iter()
                .filter(|(workspace, _)| scope.allowed_workspace_ids.contains(workspace))
                .map(|(_, batch)| batch.clone())
                .collect();

            let provider = MemTable::try_new(schema, vec![visible])?;
            ctx.register_table(name.as_str(), Arc::new(provider))?;
        }
        Ok(())
    }
}
