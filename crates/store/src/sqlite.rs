//! SQLite backend with FTS5 full-text search.
//!
//! Uses a single SQLite database file with two tables:
//! - `conversations` — the conversation records (turns and examples as JSON)
//! - `conversations_fts` — FTS5 virtual table over the rendered turn text
//!
//! Triggers keep the FTS index in sync on insert/delete/update. Every
//! mutation runs in a transaction: read the record, apply the change,
//! recompute the token total, write it back.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tidechat_context::token;
use tidechat_core::error::{Error, Result, StoreError, ValidationError};
use tidechat_core::message::{Conversation, ConversationId, FewShotExample, Turn};
use tidechat_core::store::{ConversationStore, ConversationSummary};
use tracing::{debug, info};

/// A durable SQLite conversation store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite store at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite conversation store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        // Main table with integer rowid alias for FTS5 sync
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                id           TEXT UNIQUE NOT NULL,
                turns        TEXT NOT NULL DEFAULT '[]',
                few_shots    TEXT NOT NULL DEFAULT '[]',
                conversation_text TEXT NOT NULL DEFAULT '',
                turn_count   INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations table: {e}")))?;

        // External-content FTS5 table synced via triggers
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS conversations_fts USING fts5(
                conversation_text,
                content='conversations',
                content_rowid='iid',
                tokenize='porter unicode61'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("FTS5 table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS conversations_ai AFTER INSERT ON conversations BEGIN
                INSERT INTO conversations_fts(rowid, conversation_text)
                VALUES (new.iid, new.conversation_text);
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("insert trigger: {e}")))?;

        // External-content delete uses the special 'delete' command
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS conversations_ad AFTER DELETE ON conversations BEGIN
                INSERT INTO conversations_fts(conversations_fts, rowid, conversation_text)
                VALUES ('delete', old.iid, old.conversation_text);
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("delete trigger: {e}")))?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS conversations_au AFTER UPDATE ON conversations BEGIN
                INSERT INTO conversations_fts(conversations_fts, rowid, conversation_text)
                VALUES ('delete', old.iid, old.conversation_text);
                INSERT INTO conversations_fts(rowid, conversation_text)
                VALUES (new.iid, new.conversation_text);
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("update trigger: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_created_at \
             ON conversations(created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("created_at index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let turns_json: String = row
            .try_get("turns")
            .map_err(|e| StoreError::QueryFailed(format!("turns column: {e}")))?;
        let few_shots_json: String = row
            .try_get("few_shots")
            .map_err(|e| StoreError::QueryFailed(format!("few_shots column: {e}")))?;
        let total_tokens: i64 = row
            .try_get("total_tokens")
            .map_err(|e| StoreError::QueryFailed(format!("total_tokens column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;
        let updated_at_str: String = row
            .try_get("updated_at")
            .map_err(|e| StoreError::QueryFailed(format!("updated_at column: {e}")))?;

        let turns: Vec<Turn> = serde_json::from_str(&turns_json)?;
        let few_shots: Vec<FewShotExample> = serde_json::from_str(&few_shots_json)?;

        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Conversation {
            id: ConversationId(id),
            turns,
            few_shots,
            created_at,
            updated_at,
            total_tokens: total_tokens as usize,
        })
    }

    fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationSummary> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let turn_count: i64 = row
            .try_get("turn_count")
            .map_err(|e| StoreError::QueryFailed(format!("turn_count column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;
        let updated_at_str: String = row
            .try_get("updated_at")
            .map_err(|e| StoreError::QueryFailed(format!("updated_at column: {e}")))?;

        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(ConversationSummary {
            id: ConversationId(id),
            created_at,
            updated_at,
            turn_count: turn_count as usize,
        })
    }

    /// Fetch a conversation inside an open transaction, locking its row
    /// for the duration of the read-modify-write.
    async fn fetch_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: &ConversationId,
    ) -> Result<Conversation> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?1")
            .bind(&id.0)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT by id: {e}")))?;

        match row {
            Some(ref r) => Self::row_to_conversation(r),
            None => Err(Error::NotFound(id.0.clone())),
        }
    }

    /// Write back a mutated conversation inside the same transaction.
    async fn write_back(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        conv: &Conversation,
    ) -> Result<()> {
        let turns_json = serde_json::to_string(&conv.turns)?;
        let few_shots_json = serde_json::to_string(&conv.few_shots)?;

        sqlx::query(
            r#"
            UPDATE conversations
            SET turns = ?2,
                few_shots = ?3,
                conversation_text = ?4,
                turn_count = ?5,
                total_tokens = ?6,
                updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&conv.id.0)
        .bind(&turns_json)
        .bind(&few_shots_json)
        .bind(conv.searchable_text())
        .bind(conv.turns.len() as i64)
        .bind(conv.total_tokens as i64)
        .bind(conv.updated_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE failed: {e}")))?;

        Ok(())
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")).into())
    }

    async fn commit(tx: sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<()> {
        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")).into())
    }

    /// Build a safe FTS5 query from user text.
    ///
    /// FTS5 requires special syntax. We tokenize the user input into words
    /// and join them with implicit AND, quoting each token to prevent
    /// injection.
    fn sanitize_fts_query(text: &str) -> String {
        text.split_whitespace()
            .map(|w| {
                let clean: String = w
                    .chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if clean.is_empty() {
                    return String::new();
                }
                // Prefix matching with *
                format!("\"{clean}\"*")
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create(&self) -> Result<Conversation> {
        let conv = Conversation::new();
        sqlx::query(
            r#"
            INSERT INTO conversations (id, turns, few_shots, conversation_text,
                                       turn_count, total_tokens, created_at, updated_at)
            VALUES (?1, '[]', '[]', '', 0, 0, ?2, ?3)
            "#,
        )
        .bind(&conv.id.0)
        .bind(conv.created_at.to_rfc3339())
        .bind(conv.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT failed: {e}")))?;

        debug!("Created conversation {}", conv.id);
        Ok(conv)
    }

    async fn get(&self, id: &ConversationId) -> Result<Conversation> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT by id: {e}")))?;

        match row {
            Some(ref r) => Self::row_to_conversation(r),
            None => Err(Error::NotFound(id.0.clone())),
        }
    }

    async fn append_turn(&self, id: &ConversationId, turn: Turn) -> Result<usize> {
        let mut tx = self.begin().await?;
        let mut conv = Self::fetch_in_tx(&mut tx, id).await?;
        conv.push_turn(turn);
        conv.total_tokens = token::measure_conversation(&conv);
        Self::write_back(&mut tx, &conv).await?;
        Self::commit(tx).await?;
        Ok(conv.total_tokens)
    }

    async fn append_few_shot(
        &self,
        id: &ConversationId,
        example: FewShotExample,
    ) -> Result<usize> {
        let mut tx = self.begin().await?;
        let mut conv = Self::fetch_in_tx(&mut tx, id).await?;
        if conv.has_duplicate_prompt(&example.user_prompt) {
            return Err(ValidationError::DuplicateFewShot {
                user_prompt: example.user_prompt,
            }
            .into());
        }
        conv.push_few_shot(example);
        conv.total_tokens = token::measure_conversation(&conv);
        Self::write_back(&mut tx, &conv).await?;
        Self::commit(tx).await?;
        Ok(conv.total_tokens)
    }

    async fn reset(&self, id: &ConversationId) -> Result<()> {
        let mut tx = self.begin().await?;
        let mut conv = Self::fetch_in_tx(&mut tx, id).await?;
        conv.clear();
        Self::write_back(&mut tx, &conv).await?;
        Self::commit(tx).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            "SELECT id, turn_count, created_at, updated_at \
             FROM conversations ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("LIST: {e}")))?;

        rows.iter().map(Self::row_to_summary).collect()
    }

    async fn search(&self, query: &str) -> Result<Vec<ConversationSummary>> {
        let fts_query = Self::sanitize_fts_query(query);
        if fts_query.is_empty() {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.turn_count, c.created_at, c.updated_at,
                   bm25(conversations_fts) AS rank
            FROM conversations_fts f
            JOIN conversations c ON c.iid = f.rowid
            WHERE conversations_fts MATCH ?1
            ORDER BY rank
            "#,
        )
        .bind(&fts_query)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("FTS5 search: {e}")))?;

        rows.iter().map(Self::row_to_summary).collect()
    }

    async fn count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM conversations")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("COUNT: {e}")))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| StoreError::QueryFailed(format!("cnt column: {e}")))?;
        Ok(cnt as usize)
    }
}
