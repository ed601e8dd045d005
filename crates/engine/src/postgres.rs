//! Postgres attachment: the shared relational store, mounted read-only into
//! an engine session under a restricted role.
//!
//! The session is scoped *before* anything is read: a dedicated connection
//! switches to the restricted role and publishes the permitted workspace set
//! as a session parameter. The store's row-level policies consume that
//! parameter, so a query that omits any workspace predicate still cannot
//! observe rows outside the permitted set.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Date32Builder, Float32Builder, Float64Builder, Int16Builder,
    Int32Builder, Int64Builder, StringBuilder, TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use datafusion::datasource::MemTable;
use datafusion::prelude::SessionContext;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column, Connection, Executor, Row, TypeInfo};
use tracing::debug;

use crate::session::SessionScope;
use crate::source::{SourceCatalog, SourceError};

/// Session parameter consumed by the store's row-level policies.
const WORKSPACE_VISIBILITY_PARAMETER: &str = "vantage.allowed_workspace_ids";

/// Row chunk size used while loading source tables.
const FETCH_CHUNK_ROWS: usize = 8192;

/// Connection settings for the shared relational store.
#[derive(Debug, Clone)]
pub struct PgSourceConfig {
    /// Connection URL. The credentials must be allowed to `SET ROLE` into
    /// the restricted query role.
    pub url: String,
    /// Restricted role whose row-level policies scope tenant visibility.
    pub role: String,
    /// Schema holding the shared views exposed to queries.
    pub schema: String,
    /// Shared views/tables registered into every session.
    pub tables: Vec<String>,
}

impl PgSourceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            role: "vantage_readonly".to_string(),
            schema: "public".to_string(),
            tables: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = tables;
        self
    }
}

/// Catalog backed by the shared Postgres store.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    config: PgSourceConfig,
}

impl PgCatalog {
    pub fn new(config: PgSourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceCatalog for PgCatalog {
    async fn register(
        &self,
        ctx: &SessionContext,
        scope: &SessionScope,
    ) -> Result<(), SourceError> {
        // Dedicated connection per invocation, released on every exit path
        // when it drops.
        let mut conn = PgConnection::connect(&self.config.url).await?;

        let result = self.register_scoped(ctx, scope, &mut conn).await;
        if result.is_ok() {
            conn.close().await?;
        }
        result
    }
}

impl PgCatalog {
    async fn register_scoped(
        &self,
        ctx: &SessionContext,
        scope: &SessionScope,
        conn: &mut PgConnection,
    ) -> Result<(), SourceError> {
        // Scope the session before anything is read.
        sqlx::query("SET default_transaction_read_only = on")
            .execute(&mut *conn)
            .await?;
        sqlx::query("SELECT set_config('statement_timeout', $1, false)")
            .bind((scope.statement_timeout.as_millis() as i64).to_string())
            .execute(&mut *conn)
            .await?;
        sqlx::query("SELECT set_config('role', $1, false)")
            .bind(&self.config.role)
            .execute(&mut *conn)
            .await?;
        sqlx::query("SELECT set_config($1, $2, false)")
            .bind(WORKSPACE_VISIBILITY_PARAMETER)
            .bind(scope.joined_workspace_ids())
            .execute(&mut *conn)
            .await?;

        for table in &self.config.tables {
            let sql = format!(r#"SELECT * FROM "{}"."{}""#, self.config.schema, table);

            // Describe first so zero-row tables still register with their
            // real schema.
            let describe = conn.describe(&sql).await?;
            let mut kinds = Vec::with_capacity(describe.columns().len());
            let mut fields = Vec::with_capacity(describe.columns().len());
            for column in describe.columns() {
                let type_name = column.type_info().name();
                let kind = ColKind::from_type_name(type_name).ok_or_else(|| {
                    SourceError::UnsupportedType {
                        table: table.clone(),
                        column: column.name().to_string(),
                        type_name: type_name.to_string(),
                    }
                })?;
                fields.push(Field::new(column.name(), kind.data_type(), true));
                kinds.push(kind);
            }
            let schema: SchemaRef = Arc::new(Schema::new(fields));

            let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
            let batches = rows_to_batches(&schema, &kinds, &rows, FETCH_CHUNK_ROWS)?;
            debug!(table = %table, rows = rows.len(), "registered source table");

            let provider = MemTable::try_new(schema, vec![batches])?;
            ctx.register_table(table.as_str(), Arc::new(provider))?;
        }

        Ok(())
    }
}

/// Source column types the engine can attach. Anything else is a hard error
/// naming the offending column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColKind {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Text,
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Json,
}

impl ColKind {
    fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "BOOL" => Some(ColKind::Bool),
            "INT2" => Some(ColKind::Int16),
            "INT4" => Some(ColKind::Int32),
            "INT8" => Some(ColKind::Int64),
            "FLOAT4" => Some(ColKind::Float32),
            "FLOAT8" => Some(ColKind::Float64),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Some(ColKind::Text),
            "UUID" => Some(ColKind::Uuid),
            "TIMESTAMPTZ" => Some(ColKind::TimestampTz),
            "TIMESTAMP" => Some(ColKind::Timestamp),
            "DATE" => Some(ColKind::Date),
            "JSON" | "JSONB" => Some(ColKind::Json),
            _ => None,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            ColKind::Bool => DataType::Boolean,
            ColKind::Int16 => DataType::Int16,
            ColKind::Int32 => DataType::Int32,
            ColKind::Int64 => DataType::Int64,
            ColKind::Float32 => DataType::Float32,
            ColKind::Float64 => DataType::Float64,
            ColKind::Text | ColKind::Uuid | ColKind::Json => DataType::Utf8,
            ColKind::TimestampTz => {
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
            }
            ColKind::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            ColKind::Date => DataType::Date32,
        }
    }
}

fn rows_to_batches(
    schema: &SchemaRef,
    kinds: &[ColKind],
    rows: &[PgRow],
    chunk_rows: usize,
) -> Result<Vec<RecordBatch>, SourceError> {
    let mut batches = Vec::new();
    for chunk in rows.chunks(chunk_rows.max(1)) {
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(kinds.len());
        for (i, kind) in kinds.iter().enumerate() {
            arrays.push(build_column(*kind, chunk, i)?);
        }
        batches.push(RecordBatch::try_new(schema.clone(), arrays)?);
    }
    Ok(batches)
}

fn build_column(kind: ColKind, rows: &[PgRow], col: usize) -> Result<ArrayRef, SourceError> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();

    Ok(match kind {
        ColKind::Bool => {
            let mut builder = BooleanBuilder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(row.try_get::<Option<bool>, _>(col)?);
            }
            Arc::new(builder.finish())
        }
        ColKind::Int16 => {
            let mut builder = Int16Builder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(row.try_get::<Option<i16>, _>(col)?);
            }
            Arc::new(builder.finish())
        }
        ColKind::Int32 => {
            let mut builder = Int32Builder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(row.try_get::<Option<i32>, _>(col)?);
            }
            Arc::new(builder.finish())
        }
        ColKind::Int64 => {
            let mut builder = Int64Builder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(row.try_get::<Option<i64>, _>(col)?);
            }
            Arc::new(builder.finish())
        }
        ColKind::Float32 => {
            let mut builder = Float32Builder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(row.try_get::<Option<f32>, _>(col)?);
            }
            Arc::new(builder.finish())
        }
        ColKind::Float64 => {
            let mut builder = Float64Builder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(row.try_get::<Option<f64>, _>(col)?);
            }
            Arc::new(builder.finish())
        }
        ColKind::Text => {
            let mut builder = StringBuilder::new();
            for row in rows {
                builder.append_option(row.try_get::<Option<String>, _>(col)?);
            }
            Arc::new(builder.finish())
        }
        ColKind::Uuid => {
            let mut builder = StringBuilder::new();
            for row in rows {
                let value = row.try_get::<Option<uuid::Uuid>, _>(col)?;
                builder.append_option(value.map(|u| u.to_string()));
            }
            Arc::new(builder.finish())
        }
        ColKind::Json => {
            let mut builder = StringBuilder::new();
            for row in rows {
                let value = row.try_get::<Option<serde_json::Value>, _>(col)?;
                builder.append_option(value.map(|v| v.to_string()));
            }
            Arc::new(builder.finish())
        }
        ColKind::TimestampTz => {
            let mut builder = TimestampMicrosecondBuilder::with_capacity(rows.len())
                .with_timezone("UTC");
            for row in rows {
                let value = row.try_get::<Option<DateTime<Utc>>, _>(col)?;
                builder.append_option(value.map(|t| t.timestamp_micros()));
            }
            Arc::new(builder.finish())
        }
        ColKind::Timestamp => {
            let mut builder = TimestampMicrosecondBuilder::with_capacity(rows.len());
            for row in rows {
                let value = row.try_get::<Option<NaiveDateTime>, _>(col)?;
                builder.append_option(value.map(|t| t.and_utc().timestamp_micros()));
            }
            Arc::new(builder.finish())
        }
        ColKind::Date => {
            let mut builder = Date32Builder::with_capacity(rows.len());
            for row in rows {
                let value = row.try_get::<Option<NaiveDate>, _>(col)?;
                builder.append_option(value.map(|d| (d - epoch).num_days() as i32));
            }
            Arc::new(builder.finish())
        }
    })
}
