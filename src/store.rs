//! SQLite persistence for transcripts, drafts and approval requests.
//!
//! State transitions are conditional updates inside a transaction, so a
//! request is resolved at most once and a draft leaves `pending` at most once
//! even when two callers race on the same row.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{
    ApprovalRequest, Decision, Draft, DraftStatus, GeneratedDraft, ParsedTranscript, TicketRef,
    Transcript, TranscriptFormat,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transcripts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    file_path TEXT NOT NULL,
    file_format TEXT NOT NULL,
    content TEXT NOT NULL,
    structured_content TEXT NOT NULL,
    transcript_metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS test_scripts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    transcript_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    script_format TEXT NOT NULL,
    content TEXT NOT NULL,
    ai_provider TEXT NOT NULL,
    ai_model TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    approved_by TEXT,
    approved_at TEXT,
    rejection_reason TEXT,
    servicenow_story_id TEXT,
    servicenow_story_number TEXT,
    servicenow_created_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS approval_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_script_id INTEGER NOT NULL,
    requested_by TEXT NOT NULL,
    requested_at TEXT NOT NULL,
    approval_token TEXT NOT NULL UNIQUE,
    token_expires_at TEXT NOT NULL,
    email_sent INTEGER NOT NULL DEFAULT 0,
    email_sent_at TEXT,
    responded_at TEXT,
    response TEXT,
    response_note TEXT
);
CREATE INDEX IF NOT EXISTS idx_approval_requests_script
ON approval_requests (test_script_id, requested_at);
";

const TRANSCRIPT_COLUMNS: &str = "id, filename, file_path, file_format, content, structured_content, transcript_metadata, created_at";

const DRAFT_COLUMNS: &str = "id, transcript_id, title, description, script_format, content, ai_provider, ai_model, status, approved_by, approved_at, rejection_reason, servicenow_story_id, servicenow_story_number, servicenow_created_at, created_at, updated_at";

const REQUEST_COLUMNS: &str = "id, test_script_id, requested_by, requested_at, approval_token, token_expires_at, email_sent, email_sent_at, responded_at, response, response_note";

/// Dashboard counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_transcripts: i64,
    pub total_scripts: i64,
    pub pending_approvals: i64,
    pub approved_scripts: i64,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) a database file and ensure the schema exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| Error::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a transcript and its draft together; neither row exists if either insert fails
    pub fn insert_transcript_with_draft(
        &self,
        parsed: &ParsedTranscript,
        filename: &str,
        file_path: &str,
        generated: &GeneratedDraft,
        auto_approved: bool,
        now: DateTime<Utc>,
    ) -> Result<(Transcript, Draft)> {
        let (transcript_id, draft_id) = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let transcript_id = insert_transcript_row(&tx, parsed, filename, file_path, now)?;
            let draft_id = insert_draft_row(&tx, transcript_id, generated, auto_approved, now)?;
            tx.commit()?;
            (transcript_id, draft_id)
        };
        Ok((self.transcript(transcript_id)?, self.draft(draft_id)?))
    }

    pub fn transcript(&self, id: i64) -> Result<Transcript> {
        let sql = format!("SELECT {} FROM transcripts WHERE id = ?1", TRANSCRIPT_COLUMNS);
        self.conn()
            .query_row(&sql, params![id], transcript_from_row)
            .optional()?
            .ok_or_else(|| Error::not_found("Transcript", id))
    }

    pub fn draft(&self, id: i64) -> Result<Draft> {
        let sql = format!("SELECT {} FROM test_scripts WHERE id = ?1", DRAFT_COLUMNS);
        self.conn()
            .query_row(&sql, params![id], draft_from_row)
            .optional()?
            .ok_or_else(|| Error::not_found("Test script", id))
    }

    /// Newest first, optionally filtered by status
    pub fn list_drafts(&self, status: Option<DraftStatus>, limit: usize) -> Result<Vec<Draft>> {
        let sql = format!(
            "SELECT {} FROM test_scripts
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
            DRAFT_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![status.map(|s| s.as_str()), limit as i64],
            draft_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn insert_approval_request(
        &self,
        draft_id: i64,
        requested_by: &str,
        token: &str,
        requested_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<ApprovalRequest> {
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO approval_requests (test_script_id, requested_by, requested_at, approval_token, token_expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![draft_id, requested_by, requested_at, token, expires_at],
            )?;
            conn.last_insert_rowid()
        };
        self.approval_request(id)
    }

    pub fn approval_request(&self, id: i64) -> Result<ApprovalRequest> {
        let sql = format!("SELECT {} FROM approval_requests WHERE id = ?1", REQUEST_COLUMNS);
        self.conn()
            .query_row(&sql, params![id], request_from_row)
            .optional()?
            .ok_or_else(|| Error::not_found("Approval request", id))
    }

    pub fn approval_request_by_token(&self, token: &str) -> Result<Option<ApprovalRequest>> {
        let sql = format!(
            "SELECT {} FROM approval_requests WHERE approval_token = ?1",
            REQUEST_COLUMNS
        );
        Ok(self
            .conn()
            .query_row(&sql, params![token], request_from_row)
            .optional()?)
    }

    /// Most recent first
    pub fn approval_requests_for_draft(&self, draft_id: i64) -> Result<Vec<ApprovalRequest>> {
        let sql = format!(
            "SELECT {} FROM approval_requests
             WHERE test_script_id = ?1
             ORDER BY requested_at DESC, id DESC",
            REQUEST_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![draft_id], request_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Id of the newest request for a draft, the only one a token may act on
    pub fn latest_request_id(&self, draft_id: i64) -> Result<Option<i64>> {
        latest_request_id(&self.conn(), draft_id)
    }

    pub fn mark_email_sent(&self, request_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE approval_requests SET email_sent = 1, email_sent_at = ?1 WHERE id = ?2",
            params![at, request_id],
        )?;
        Ok(())
    }

    /// Record a response on a request and move its draft out of `pending`, atomically.
    ///
    /// A request that is no longer the newest for its draft is `Superseded`.
    /// Zero rows matched on the request means another caller got there first.
    pub fn resolve_request(
        &self,
        request: &ApprovalRequest,
        decision: Decision,
        note: Option<&str>,
        approver: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        if latest_request_id(&tx, request.draft_id)? != Some(request.id) {
            return Err(Error::Superseded);
        }

        let updated = tx.execute(
            "UPDATE approval_requests
             SET responded_at = ?1, response = ?2, response_note = ?3
             WHERE id = ?4 AND responded_at IS NULL",
            params![now, decision.as_str(), note, request.id],
        )?;
        if updated == 0 {
            return Err(Error::AlreadyResolved);
        }

        apply_decision(&tx, request.draft_id, decision, approver, note, now)?;
        tx.commit()?;
        Ok(())
    }

    /// Move a draft out of `pending` without an approval request
    pub fn decide_draft(
        &self,
        draft_id: i64,
        decision: Decision,
        approver: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        apply_decision(&tx, draft_id, decision, approver, note, now)?;
        tx.commit()?;
        Ok(())
    }

    /// Write ticket identifiers once, and only onto an approved draft.
    ///
    /// Returns false when the draft is not approved or already has a ticket.
    pub fn record_ticket(
        &self,
        draft_id: i64,
        story_id: &str,
        story_number: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE test_scripts
             SET servicenow_story_id = ?1, servicenow_story_number = ?2,
                 servicenow_created_at = ?3, updated_at = ?3
             WHERE id = ?4 AND status = 'approved' AND servicenow_story_id IS NULL",
            params![story_id, story_number, now, draft_id],
        )?;
        Ok(updated == 1)
    }

    pub fn stats(&self) -> Result<Stats> {
        Ok(self.conn().query_row(
            "SELECT
                (SELECT COUNT(*) FROM transcripts),
                (SELECT COUNT(*) FROM test_scripts),
                (SELECT COUNT(*) FROM test_scripts WHERE status = 'pending'),
                (SELECT COUNT(*) FROM test_scripts WHERE status = 'approved')",
            [],
            |row| {
                Ok(Stats {
                    total_transcripts: row.get(0)?,
                    total_scripts: row.get(1)?,
                    pending_approvals: row.get(2)?,
                    approved_scripts: row.get(3)?,
                })
            },
        )?)
    }
}

fn insert_transcript_row(
    conn: &Connection,
    parsed: &ParsedTranscript,
    filename: &str,
    file_path: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO transcripts (filename, file_path, file_format, content, structured_content, transcript_metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            filename,
            file_path,
            parsed.format.as_str(),
            parsed.content,
            to_json(&parsed.utterances)?,
            to_json(&parsed.metadata)?,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Auto-approved drafts start `approved` with approver `auto`
fn insert_draft_row(
    conn: &Connection,
    transcript_id: i64,
    generated: &GeneratedDraft,
    auto_approved: bool,
    now: DateTime<Utc>,
) -> Result<i64> {
    let (status, approved_by, approved_at) = if auto_approved {
        (DraftStatus::Approved, Some("auto"), Some(now))
    } else {
        (DraftStatus::Pending, None, None)
    };
    conn.execute(
        "INSERT INTO test_scripts (transcript_id, title, description, script_format, content, ai_provider, ai_model, status, approved_by, approved_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            transcript_id,
            generated.title,
            generated.description,
            generated.format.as_str(),
            generated.content,
            generated.ai_provider,
            generated.ai_model,
            status.as_str(),
            approved_by,
            approved_at,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn latest_request_id(conn: &Connection, draft_id: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM approval_requests
             WHERE test_script_id = ?1
             ORDER BY requested_at DESC, id DESC
             LIMIT 1",
            params![draft_id],
            |row| row.get(0),
        )
        .optional()?)
}

fn apply_decision(
    tx: &Transaction<'_>,
    draft_id: i64,
    decision: Decision,
    approver: &str,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let status = decision.status().as_str();
    let updated = match decision {
        Decision::Approved => tx.execute(
            "UPDATE test_scripts
             SET status = ?1, approved_by = ?2, approved_at = ?3, updated_at = ?3
             WHERE id = ?4 AND status = 'pending'",
            params![status, approver, now, draft_id],
        )?,
        Decision::Rejected => tx.execute(
            "UPDATE test_scripts
             SET status = ?1, rejection_reason = ?2, updated_at = ?3
             WHERE id = ?4 AND status = 'pending'",
            params![status, note, now, draft_id],
        )?,
    };
    if updated == 1 {
        return Ok(());
    }

    let current: Option<String> = tx
        .query_row(
            "SELECT status FROM test_scripts WHERE id = ?1",
            params![draft_id],
            |row| row.get(0),
        )
        .optional()?;
    match current {
        Some(status) => Err(Error::InvalidTransition(format!(
            "test script {} is already {}",
            draft_id, status
        ))),
        None => Err(Error::not_found("Test script", draft_id)),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Parse(format!("serialize column: {}", e)))
}

fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = Error>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_err(idx, e))
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_err(idx, e))
}

fn transcript_from_row(row: &Row<'_>) -> rusqlite::Result<Transcript> {
    let format: String = row.get(3)?;
    Ok(Transcript {
        id: row.get(0)?,
        filename: row.get(1)?,
        file_path: row.get(2)?,
        format: TranscriptFormat::from_extension(&format).map_err(|e| conversion_err(3, e))?,
        content: row.get(4)?,
        utterances: json_col(row, 5)?,
        metadata: json_col(row, 6)?,
        created_at: row.get(7)?,
    })
}

fn draft_from_row(row: &Row<'_>) -> rusqlite::Result<Draft> {
    let story_id: Option<String> = row.get(12)?;
    let story_number: Option<String> = row.get(13)?;
    let story_created_at: Option<DateTime<Utc>> = row.get(14)?;
    let ticket = match (story_id, story_created_at) {
        (Some(story_id), Some(created_at)) => Some(TicketRef {
            story_id,
            story_number,
            created_at,
        }),
        _ => None,
    };

    Ok(Draft {
        id: row.get(0)?,
        transcript_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        format: parse_col(row, 4)?,
        content: row.get(5)?,
        ai_provider: row.get(6)?,
        ai_model: row.get(7)?,
        status: parse_col(row, 8)?,
        approved_by: row.get(9)?,
        approved_at: row.get(10)?,
        rejection_reason: row.get(11)?,
        ticket,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<ApprovalRequest> {
    let response: Option<String> = row.get(9)?;
    let response = response
        .map(|r| r.parse::<Decision>())
        .transpose()
        .map_err(|e| conversion_err(9, e))?;

    Ok(ApprovalRequest {
        id: row.get(0)?,
        draft_id: row.get(1)?,
        requested_by: row.get(2)?,
        requested_at: row.get(3)?,
        token: row.get(4)?,
        token_expires_at: row.get(5)?,
        email_sent: row.get(6)?,
        email_sent_at: row.get(7)?,
        responded_at: row.get(8)?,
        response,
        response_note: row.get(10)?,
    })
}

/// Whether an error is a UNIQUE/constraint violation
pub fn is_constraint_violation(err: &Error) -> bool {
    matches!(
        err,
        Error::Storage(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
