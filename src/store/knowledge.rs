//! SQLite-backed knowledge store.
//!
//! Sessions, participant timelines, delivery receipts, and searchable
//! knowledge snippets share one database file. The snippet index is an
//! external-content FTS5 table over summary+content kept in sync by
//! triggers, so upserted snippets stay searchable without manual reindexing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;

/// Snippet source tag for snippets derived from closed voice sessions.
pub const SOURCE_VOICE_SESSION: &str = "voice_session";

/// One row in the `sessions` table.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionRow {
    pub id: i64,
    pub guild_id: String,
    pub channel_id: String,
    pub initiator_id: Option<String>,
    pub topic: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub transcript: Option<String>,
    pub last_broadcast_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

/// One presence window in the `session_participants` table. A user who
/// rejoins gets a new row; at most one row per (session, user) is open.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ParticipantRow {
    pub id: i64,
    pub session_id: i64,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

/// One row in the `session_deliveries` table.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeliveryRow {
    pub session_id: i64,
    pub user_id: String,
    pub delivered_at: DateTime<Utc>,
    pub delivered_by: Option<String>,
}

/// One row in the `knowledge_snippets` table.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SnippetRow {
    pub id: i64,
    pub guild_id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Storage handle. Connections are opened per call; the file is created and
/// migrated on construction.
pub struct KnowledgeStore {
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// Open or create the database at `db_path` and ensure the schema exists.
    pub fn new(db_path: PathBuf) -> Result<Self, rusqlite::Error> {
        let this = Self { db_path };
        this.init()?;
        Ok(this)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // Readers wait out concurrent writes instead of failing with BUSY.
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init(&self) -> Result<(), rusqlite::Error> {
        if let Some(parent) = self.db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                initiator_id TEXT NULL,
                topic TEXT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT NULL,
                summary TEXT NULL,
                transcript TEXT NULL,
                last_broadcast_at TEXT NULL,
                metadata TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_guild ON sessions(guild_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_sessions_channel ON sessions(guild_id, channel_id, started_at);

            CREATE TABLE IF NOT EXISTS session_participants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                user_id TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                left_at TEXT NULL,
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_participants_session ON session_participants(session_id, user_id);

            CREATE TABLE IF NOT EXISTS session_deliveries (
                session_id INTEGER NOT NULL,
                user_id TEXT NOT NULL,
                delivered_at TEXT NOT NULL,
                delivered_by TEXT NULL,
                PRIMARY KEY (session_id, user_id),
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS knowledge_snippets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id TEXT NOT NULL,
                source TEXT NOT NULL,
                source_id INTEGER NOT NULL,
                title TEXT NULL,
                summary TEXT NULL,
                content TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                UNIQUE (source, source_id)
            );
            CREATE INDEX IF NOT EXISTS idx_snippets_guild ON knowledge_snippets(guild_id, created_at);

            CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_fts USING fts5(
                summary,
                content,
                content='knowledge_snippets',
                content_rowid='id'
            );
            CREATE TRIGGER IF NOT EXISTS knowledge_snippets_ai
            AFTER INSERT ON knowledge_snippets BEGIN
                INSERT INTO knowledge_fts(rowid, summary, content)
                VALUES (new.id, new.summary, new.content);
            END;
            CREATE TRIGGER IF NOT EXISTS knowledge_snippets_ad
            AFTER DELETE ON knowledge_snippets BEGIN
                INSERT INTO knowledge_fts(knowledge_fts, rowid, summary, content)
                VALUES ('delete', old.id, old.summary, old.content);
            END;
            CREATE TRIGGER IF NOT EXISTS knowledge_snippets_au
            AFTER UPDATE ON knowledge_snippets BEGIN
                INSERT INTO knowledge_fts(knowledge_fts, rowid, summary, content)
                VALUES ('delete', old.id, old.summary, old.content);
                INSERT INTO knowledge_fts(rowid, summary, content)
                VALUES (new.id, new.summary, new.content);
            END;
            "#,
        )?;
        Ok(())
    }

    /// Insert a new open session and return its row.
    pub fn create_session(
        &self,
        guild_id: &str,
        channel_id: &str,
        initiator_id: Option<&str>,
        topic: Option<&str>,
    ) -> Result<SessionRow, rusqlite::Error> {
        let started_at = Utc::now();
        let metadata = serde_json::json!({ "started_by": initiator_id });
        let conn = self.open()?;
        conn.execute(
            r#"
            INSERT INTO sessions (guild_id, channel_id, initiator_id, topic, started_at, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![guild_id, channel_id, initiator_id, topic, started_at, metadata],
        )?;
        let id = conn.last_insert_rowid();
        Ok(SessionRow {
            id,
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            initiator_id: initiator_id.map(String::from),
            topic: topic.map(String::from),
            started_at,
            ended_at: None,
            summary: None,
            transcript: None,
            last_broadcast_at: None,
            metadata,
        })
    }

    /// Close a session. The guard on `ended_at IS NULL` makes the transition
    /// one-shot: a second close leaves the stored artifacts untouched and
    /// returns the already-closed row.
    pub fn close_session(
        &self,
        id: i64,
        ended_at: DateTime<Utc>,
        summary: Option<&str>,
        transcript: Option<&str>,
        metadata: &Value,
    ) -> Result<Option<SessionRow>, rusqlite::Error> {
        let conn = self.open()?;
        conn.execute(
            r#"
            UPDATE sessions
               SET ended_at = ?2, summary = ?3, transcript = ?4, metadata = ?5
             WHERE id = ?1 AND ended_at IS NULL
            "#,
            params![id, ended_at, summary, transcript, metadata],
        )?;
        self.get_session(id)
    }

    pub fn get_session(&self, id: i64) -> Result<Option<SessionRow>, rusqlite::Error> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT id, guild_id, channel_id, initiator_id, topic, started_at, ended_at,
                    summary, transcript, last_broadcast_at, metadata
             FROM sessions WHERE id = ?1",
            params![id],
            session_from_row,
        )
        .optional()
    }

    pub fn latest_session_for_channel(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<Option<SessionRow>, rusqlite::Error> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT id, guild_id, channel_id, initiator_id, topic, started_at, ended_at,
                    summary, transcript, last_broadcast_at, metadata
             FROM sessions
             WHERE guild_id = ?1 AND channel_id = ?2
             ORDER BY started_at DESC, id DESC
             LIMIT 1",
            params![guild_id, channel_id],
            session_from_row,
        )
        .optional()
    }

    /// Sessions for a guild, newest first.
    pub fn list_sessions(
        &self,
        guild_id: &str,
        limit: u32,
    ) -> Result<Vec<SessionRow>, rusqlite::Error> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, guild_id, channel_id, initiator_id, topic, started_at, ended_at,
                    summary, transcript, last_broadcast_at, metadata
             FROM sessions
             WHERE guild_id = ?1
             ORDER BY started_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![guild_id, limit as i64], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Open a presence window. No-op while the user already has an open
    /// entry in this session; a rejoin after leaving opens a fresh row.
    pub fn add_participant(&self, session_id: i64, user_id: &str) -> Result<(), rusqlite::Error> {
        let joined_at = Utc::now();
        let conn = self.open()?;
        conn.execute(
            r#"
            INSERT INTO session_participants (session_id, user_id, joined_at)
            SELECT ?1, ?2, ?3
            WHERE NOT EXISTS (
                SELECT 1 FROM session_participants
                WHERE session_id = ?1 AND user_id = ?2 AND left_at IS NULL
            )
            "#,
            params![session_id, user_id, joined_at],
        )?;
        Ok(())
    }

    /// Close the user's open presence window, if any.
    pub fn mark_participant_left(
        &self,
        session_id: i64,
        user_id: &str,
    ) -> Result<(), rusqlite::Error> {
        let left_at = Utc::now();
        let conn = self.open()?;
        conn.execute(
            "UPDATE session_participants
             SET left_at = ?3
             WHERE session_id = ?1 AND user_id = ?2 AND left_at IS NULL",
            params![session_id, user_id, left_at],
        )?;
        Ok(())
    }

    /// Close every presence window still open for the session. Used at stop
    /// so the timeline never outlives its session.
    pub fn close_open_participants(
        &self,
        session_id: i64,
        left_at: DateTime<Utc>,
    ) -> Result<usize, rusqlite::Error> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE session_participants
             SET left_at = ?2
             WHERE session_id = ?1 AND left_at IS NULL",
            params![session_id, left_at],
        )
    }

    pub fn list_participants(
        &self,
        session_id: i64,
    ) -> Result<Vec<ParticipantRow>, rusqlite::Error> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, user_id, joined_at, left_at
             FROM session_participants
             WHERE session_id = ?1
             ORDER BY joined_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], |r| {
                Ok(ParticipantRow {
                    id: r.get(0)?,
                    session_id: r.get(1)?,
                    user_id: r.get(2)?,
                    joined_at: r.get(3)?,
                    left_at: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Upsert the snippet for (source, source_id) and return its id.
    /// Re-closing a session updates the existing snippet in place.
    pub fn upsert_snippet(
        &self,
        guild_id: &str,
        source: &str,
        source_id: i64,
        title: Option<&str>,
        summary: Option<&str>,
        content: &str,
    ) -> Result<i64, rusqlite::Error> {
        let created_at = Utc::now();
        let conn = self.open()?;
        conn.execute(
            r#"
            INSERT INTO knowledge_snippets (guild_id, source, source_id, title, summary, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (source, source_id) DO UPDATE
                SET title = excluded.title,
                    summary = excluded.summary,
                    content = excluded.content
            "#,
            params![guild_id, source, source_id, title, summary, content, created_at],
        )?;
        conn.query_row(
            "SELECT id FROM knowledge_snippets WHERE source = ?1 AND source_id = ?2",
            params![source, source_id],
            |r| r.get(0),
        )
    }

    /// Full-text search over snippet summary+content for one guild, newest
    /// first. A query with no searchable terms returns nothing.
    pub fn search(
        &self,
        guild_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SnippetRow>, rusqlite::Error> {
        let match_expr = fts_query(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.guild_id, s.title, s.summary, s.content, s.created_at
             FROM knowledge_snippets AS s
             JOIN knowledge_fts ON knowledge_fts.rowid = s.id
             WHERE s.guild_id = ?1
               AND knowledge_fts MATCH ?2
             ORDER BY s.created_at DESC, s.id DESC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![guild_id, match_expr, limit as i64], |r| {
                Ok(SnippetRow {
                    id: r.get(0)?,
                    guild_id: r.get(1)?,
                    title: r.get(2)?,
                    summary: r.get(3)?,
                    content: r.get(4)?,
                    created_at: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Record that the session summary reached a user. Re-delivery refreshes
    /// the timestamp and deliverer instead of inserting a second receipt.
    pub fn record_delivery(
        &self,
        session_id: i64,
        user_id: &str,
        delivered_by: Option<&str>,
    ) -> Result<(), rusqlite::Error> {
        let delivered_at = Utc::now();
        let conn = self.open()?;
        conn.execute(
            r#"
            INSERT INTO session_deliveries (session_id, user_id, delivered_at, delivered_by)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (session_id, user_id) DO UPDATE
                SET delivered_at = excluded.delivered_at,
                    delivered_by = excluded.delivered_by
            "#,
            params![session_id, user_id, delivered_at, delivered_by],
        )?;
        Ok(())
    }

    pub fn list_deliveries(&self, session_id: i64) -> Result<Vec<DeliveryRow>, rusqlite::Error> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, user_id, delivered_at, delivered_by
             FROM session_deliveries
             WHERE session_id = ?1
             ORDER BY user_id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], |r| {
                Ok(DeliveryRow {
                    session_id: r.get(0)?,
                    user_id: r.get(1)?,
                    delivered_at: r.get(2)?,
                    delivered_by: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Stamp the session's last broadcast time.
    pub fn touch_broadcast(
        &self,
        session_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE sessions SET last_broadcast_at = ?2 WHERE id = ?1",
            params![session_id, at],
        )?;
        Ok(())
    }
}

fn session_from_row(r: &rusqlite::Row<'_>) -> Result<SessionRow, rusqlite::Error> {
    Ok(SessionRow {
        id: r.get(0)?,
        guild_id: r.get(1)?,
        channel_id: r.get(2)?,
        initiator_id: r.get(3)?,
        topic: r.get(4)?,
        started_at: r.get(5)?,
        ended_at: r.get(6)?,
        summary: r.get(7)?,
        transcript: r.get(8)?,
        last_broadcast_at: r.get(9)?,
        metadata: r.get(10)?,
    })
}

/// Quote each whitespace-separated term so user punctuation cannot break
/// the FTS5 match expression. Terms with no indexable characters are
/// dropped; the rest are implicitly ANDed.
fn fts_query(raw: &str) -> String {
    raw.split_whitespace()
        .filter(|term| term.chars().any(char::is_alphanumeric))
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::fts_query;

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(fts_query("photosynthesis"), "\"photosynthesis\"");
        assert_eq!(fts_query("cell walls"), "\"cell\" \"walls\"");
    }

    #[test]
    fn test_fts_query_survives_punctuation() {
        assert_eq!(fts_query("what's NEAR(x)?"), "\"what's\" \"NEAR(x)?\"");
        assert_eq!(fts_query("say \"hi\""), "\"say\" \"\"\"hi\"\"\"");
    }

    #[test]
    fn test_fts_query_drops_bare_punctuation() {
        assert_eq!(fts_query("--- ??? ..."), "");
        assert_eq!(fts_query(""), "");
        assert_eq!(fts_query("a -- b"), "\"a\" \"b\"");
    }
}
