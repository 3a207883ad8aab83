//! Audit trail of every posted (or would-be-posted) chunk (SQLite).

use crate::RawMessage;
use crate::error::{AuditError, Result};
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row as _, SqlitePool};

/// Everything needed to reconstruct how one chunk was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub character: String,
    pub input_messages: Vec<RawMessage>,
    pub input_text: String,
    pub input_dialogue: String,
    pub input_token_length: usize,
    pub output: String,
    pub output_speech: String,
    /// The chunk as generated.
    pub chunk: String,
    /// The text actually sent; the censor marker when blocked.
    pub posted_text: String,
    pub sampling_config: serde_json::Value,
    pub platform_message: serde_json::Value,
    pub platform_message_ref: Option<String>,
    pub moderation_details: serde_json::Map<String, serde_json::Value>,
    pub thread_ref: Option<String>,
    pub dry_run: bool,
}

/// Write-once sink for audit records.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// Audit store backed by the `rinna_responses` table.
#[derive(Debug, Clone)]
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the audit table.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rinna_responses (
                id TEXT PRIMARY KEY,
                created_at TIMESTAMP NOT NULL,
                character TEXT NOT NULL,
                input_messages TEXT NOT NULL,
                input_text TEXT NOT NULL,
                input_dialogue TEXT NOT NULL,
                input_token_length INTEGER NOT NULL,
                output TEXT NOT NULL,
                output_speech TEXT NOT NULL,
                chunk TEXT NOT NULL,
                posted_text TEXT NOT NULL,
                sampling_config TEXT NOT NULL,
                platform_message TEXT NOT NULL,
                platform_message_ref TEXT,
                moderation_details TEXT NOT NULL,
                thread_ref TEXT,
                dry_run INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create rinna_responses table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_rinna_responses_created_at ON rinna_responses(created_at)",
        )
        .execute(&self.pool)
        .await
        .context("failed to create rinna_responses index")?;

        Ok(())
    }

    /// Most recent records first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, created_at, character, input_messages, input_text, input_dialogue,
                   input_token_length, output, output_speech, chunk, posted_text,
                   sampling_config, platform_message, platform_message_ref,
                   moderation_details, thread_ref, dry_run
            FROM rinna_responses
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to load audit records")?;

        rows.into_iter().map(record_from_row).collect()
    }
}

#[async_trait::async_trait]
impl AuditSink for SqliteAuditStore {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rinna_responses (
                id, created_at, character, input_messages, input_text, input_dialogue,
                input_token_length, output, output_speech, chunk, posted_text,
                sampling_config, platform_message, platform_message_ref,
                moderation_details, thread_ref, dry_run
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(record.created_at)
        .bind(&record.character)
        .bind(encode("input_messages", &record.input_messages)?)
        .bind(&record.input_text)
        .bind(&record.input_dialogue)
        .bind(record.input_token_length as i64)
        .bind(&record.output)
        .bind(&record.output_speech)
        .bind(&record.chunk)
        .bind(&record.posted_text)
        .bind(encode("sampling_config", &record.sampling_config)?)
        .bind(encode("platform_message", &record.platform_message)?)
        .bind(&record.platform_message_ref)
        .bind(encode("moderation_details", &record.moderation_details)?)
        .bind(&record.thread_ref)
        .bind(record.dry_run as i64)
        .execute(&self.pool)
        .await
        .map_err(AuditError::Write)?;

        tracing::debug!(id = %record.id, character = %record.character, "audit record written");
        Ok(())
    }
}

fn encode<T: Serialize>(field: &'static str, value: &T) -> std::result::Result<String, AuditError> {
    serde_json::to_string(value).map_err(|source| AuditError::Encode { field, source })
}

fn decode<T: serde::de::DeserializeOwned>(
    row: &sqlx::sqlite::SqliteRow,
    field: &'static str,
) -> Result<T> {
    let raw: String = row.try_get(field)?;
    Ok(serde_json::from_str(&raw).map_err(|source| AuditError::Decode { field, source })?)
}

fn record_from_row(row: sqlx::sqlite::SqliteRow) -> Result<AuditRecord> {
    Ok(AuditRecord {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        character: row.try_get("character")?,
        input_messages: decode(&row, "input_messages")?,
        input_text: row.try_get("input_text")?,
        input_dialogue: row.try_get("input_dialogue")?,
        input_token_length: row.try_get::<i64, _>("input_token_length")? as usize,
        output: row.try_get("output")?,
        output_speech: row.try_get("output_speech")?,
        chunk: row.try_get("chunk")?,
        posted_text: row.try_get("posted_text")?,
        sampling_config: decode(&row, "sampling_config")?,
        platform_message: decode(&row, "platform_message")?,
        platform_message_ref: row.try_get("platform_message_ref")?,
        moderation_details: decode(&row, "moderation_details")?,
        thread_ref: row.try_get("thread_ref")?,
        dry_run: row.try_get::<i64, _>("dry_run")? != 0,
    })
}
