//! SQLite-backed bid history ledger: outcome tracking, rating events, and
//! per-prompt-version success statistics.
//!
//! Single-process, single-writer store. All operations are synchronous and
//! blocking; a missing record id is reported as `Ok(None)` / `Ok(false)`,
//! never as an error.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use bidflow_core::{
    BidRecord, EditDiff, MilestonePlan, NewBid, OutcomeUpdate, ProjectInfo, PromptVersion,
    RatingKind, StoredJson, UploadSource,
};

pub const CRATE_NAME: &str = "bidflow-ledger";

/// Version key attached to imported training bids. Never registered in the
/// prompt-version table, so imports stay outside the funnel statistics.
pub const UPLOADED_VERSION_KEY: &str = "uploaded";

/// Default on-disk location, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "data/bid_history.db";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Funnel counters maintained on a prompt-version row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunnelCounter {
    Total,
    Won,
    Engaged,
    Viewed,
}

impl FunnelCounter {
    fn column(self) -> &'static str {
        match self {
            Self::Total => "total_bids",
            Self::Won => "won_bids",
            Self::Engaged => "engaged_bids",
            Self::Viewed => "viewed_bids",
        }
    }
}

/// Input contract for importing an external winning bid as training material.
#[derive(Debug, Clone)]
pub struct UploadedBid {
    pub project: ProjectInfo,
    pub bid_text: String,
    pub source: UploadSource,
}

/// Aggregate learning statistics over the whole ledger.
#[derive(Debug, Clone, Serialize)]
pub struct LearningStats {
    pub total_bids: i64,
    pub won: i64,
    pub engaged: i64,
    pub viewed: i64,
    pub pending: i64,
    pub win_rate: f64,
    pub engagement_rate: f64,
    pub high_rated: i64,
    pub low_rated: i64,
    pub mean_rating: f64,
    pub by_type: Vec<TypeBreakdown>,
}

/// Per-project-category slice of the learning statistics.
#[derive(Debug, Clone, Serialize)]
pub struct TypeBreakdown {
    pub project_type: String,
    pub total: i64,
    pub won: i64,
    pub engaged: i64,
    pub viewed: i64,
    pub mean_rating: f64,
}

/// Columns added after the initial schema shipped. Applied with
/// `ALTER TABLE`, tolerating stores that already carry the column.
const ADDED_BID_COLUMNS: &[(&str, &str)] = &[
    ("rating", "INTEGER NOT NULL DEFAULT 0"),
    ("is_uploaded", "INTEGER NOT NULL DEFAULT 0"),
    ("upload_source", "TEXT"),
];

#[derive(Debug)]
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Open (or create) the ledger database at the given file path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let ledger = Self { conn };
        ledger.migrate()?;
        Ok(ledger)
    }

    /// In-memory ledger for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self { conn };
        ledger.migrate()?;
        Ok(ledger)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS bids (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL,

              project_id INTEGER,
              project_title TEXT NOT NULL,
              project_url TEXT,
              project_description TEXT,
              project_type TEXT,
              project_language TEXT,
              project_budget_min REAL,
              project_budget_max REAL,

              bid_text TEXT NOT NULL,
              milestone_plan TEXT,

              prompt_version TEXT NOT NULL,
              model_used TEXT,
              tone TEXT,

              outcome TEXT NOT NULL DEFAULT 'pending',
              outcome_updated_at TEXT,
              outcome_notes TEXT,

              was_viewed INTEGER NOT NULL DEFAULT 0,
              was_engaged INTEGER NOT NULL DEFAULT 0,
              was_won INTEGER NOT NULL DEFAULT 0,
              was_high_rank INTEGER NOT NULL DEFAULT 0,

              user_edits TEXT,
              final_bid_text TEXT,
              feedback_notes TEXT
            );

            CREATE TABLE IF NOT EXISTS prompt_versions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              version_key TEXT UNIQUE NOT NULL,
              name TEXT NOT NULL,
              description TEXT,
              created_at TEXT NOT NULL,
              is_active INTEGER NOT NULL DEFAULT 0,
              is_approved INTEGER NOT NULL DEFAULT 0,

              total_bids INTEGER NOT NULL DEFAULT 0,
              won_bids INTEGER NOT NULL DEFAULT 0,
              engaged_bids INTEGER NOT NULL DEFAULT 0,
              viewed_bids INTEGER NOT NULL DEFAULT 0,
              success_rate REAL NOT NULL DEFAULT 0.0
            );

            CREATE INDEX IF NOT EXISTS idx_bids_project_id ON bids(project_id);
            CREATE INDEX IF NOT EXISTS idx_bids_outcome ON bids(outcome);
            CREATE INDEX IF NOT EXISTS idx_bids_prompt_version ON bids(prompt_version);
            CREATE INDEX IF NOT EXISTS idx_bids_created_at ON bids(created_at);
            "#,
        )?;

        self.apply_column_migrations()?;

        // Indexed only once the column exists.
        self.conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_bids_rating ON bids(rating);",
        )?;
        Ok(())
    }

    /// Add late-arriving columns. A duplicate-column conflict means the
    /// store is already migrated and is expected steady state, not an error.
    fn apply_column_migrations(&self) -> Result<()> {
        for (name, decl) in ADDED_BID_COLUMNS {
            let sql = format!("ALTER TABLE bids ADD COLUMN {name} {decl}");
            match self.conn.execute(&sql, []) {
                Ok(_) => debug!(column = name, "added bids column"),
                Err(err) if is_duplicate_column(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    // ----- Bid CRUD -----

    /// Persist a new bid with pending outcome and zeroed funnel state.
    /// Bumps the owning prompt-version's total counter; a missing version
    /// is a soft reference and the bump silently no-ops.
    pub fn create(&self, bid: &NewBid) -> Result<i64> {
        let now = Utc::now();
        let milestone_json = bid
            .milestone_plan
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            r#"
            INSERT INTO bids (
              created_at, updated_at,
              project_id, project_title, project_url, project_description,
              project_type, project_language, project_budget_min, project_budget_max,
              bid_text, milestone_plan, prompt_version, model_used, tone
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                now,
                now,
                bid.project.project_id,
                bid.project.title,
                bid.project.url,
                bid.project.description,
                bid.project.project_type,
                bid.project.language,
                bid.project.budget_min,
                bid.project.budget_max,
                bid.bid_text,
                milestone_json,
                bid.prompt_version,
                bid.model_used,
                bid.tone,
            ],
        )?;
        let id = self.conn.last_insert_rowid();

        self.bump_prompt_counter(&bid.prompt_version, FunnelCounter::Total)?;
        Ok(id)
    }

    /// Insert an imported training bid directly in a terminal won state,
    /// rated by provenance tier. Bypasses the pending lifecycle and the
    /// prompt-version counters.
    pub fn save_uploaded(&self, upload: &UploadedBid) -> Result<i64> {
        let now = Utc::now();
        self.conn.execute(
            r#"
            INSERT INTO bids (
              created_at, updated_at,
              project_id, project_title, project_url, project_description,
              project_type, project_language, project_budget_min, project_budget_max,
              bid_text, prompt_version,
              outcome, outcome_updated_at, was_won,
              rating, is_uploaded, upload_source
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 'won', ?13, 1, ?14, 1, ?15)
            "#,
            params![
                now,
                now,
                upload.project.project_id,
                upload.project.title,
                upload.project.url,
                upload.project.description,
                upload.project.project_type,
                upload.project.language,
                upload.project.budget_min,
                upload.project.budget_max,
                upload.bid_text,
                UPLOADED_VERSION_KEY,
                now,
                upload.source.rating(),
                upload.source.as_str(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<Option<BidRecord>> {
        let record = self
            .conn
            .query_row("SELECT * FROM bids WHERE id = ?1", params![id], map_bid_row)
            .optional()?;
        Ok(record)
    }

    /// Most recent bids, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<BidRecord>> {
        self.select_bids(
            "SELECT * FROM bids ORDER BY created_at DESC LIMIT ?1",
            params![limit as i64],
        )
    }

    pub fn by_outcome(&self, outcome: &str, limit: usize) -> Result<Vec<BidRecord>> {
        self.select_bids(
            "SELECT * FROM bids WHERE outcome = ?1 ORDER BY created_at DESC LIMIT ?2",
            params![outcome, limit as i64],
        )
    }

    /// Bids marked as won: the gold standard for learning context.
    pub fn winning(&self, limit: usize) -> Result<Vec<BidRecord>> {
        self.select_bids(
            "SELECT * FROM bids WHERE was_won = 1 ORDER BY created_at DESC LIMIT ?1",
            params![limit as i64],
        )
    }

    /// Bids with a positive funnel outcome (engaged or won).
    pub fn successful(&self, limit: usize) -> Result<Vec<BidRecord>> {
        self.select_bids(
            r#"
            SELECT * FROM bids
             WHERE was_engaged = 1 OR was_won = 1
             ORDER BY was_won DESC, was_engaged DESC, created_at DESC
             LIMIT ?1
            "#,
            params![limit as i64],
        )
    }

    /// Similar past bids for a project category, best funnel state first.
    pub fn by_project_type(&self, project_type: &str, limit: usize) -> Result<Vec<BidRecord>> {
        self.select_bids(
            r#"
            SELECT * FROM bids
             WHERE project_type = ?1
             ORDER BY was_won DESC, was_engaged DESC, was_viewed DESC, created_at DESC
             LIMIT ?2
            "#,
            params![project_type, limit as i64],
        )
    }

    pub fn high_rated(&self, min_rating: i64, limit: usize) -> Result<Vec<BidRecord>> {
        self.select_bids(
            r#"
            SELECT * FROM bids
             WHERE rating >= ?1
             ORDER BY rating DESC, created_at DESC
             LIMIT ?2
            "#,
            params![min_rating, limit as i64],
        )
    }

    pub fn high_rated_by_type(
        &self,
        project_type: &str,
        min_rating: i64,
        limit: usize,
    ) -> Result<Vec<BidRecord>> {
        self.select_bids(
            r#"
            SELECT * FROM bids
             WHERE project_type = ?1 AND rating >= ?2
             ORDER BY rating DESC, created_at DESC
             LIMIT ?3
            "#,
            params![project_type, min_rating, limit as i64],
        )
    }

    pub fn uploaded(&self, limit: usize) -> Result<Vec<BidRecord>> {
        self.select_bids(
            r#"
            SELECT * FROM bids
             WHERE is_uploaded = 1
             ORDER BY rating DESC, created_at DESC
             LIMIT ?1
            "#,
            params![limit as i64],
        )
    }

    fn select_bids(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<BidRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, map_bid_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Store the operator's final version of a proposal. A structured diff
    /// is kept only when the text actually changed. Returns false for a
    /// missing id.
    pub fn save_final_text(
        &self,
        id: i64,
        final_text: &str,
        feedback: Option<&str>,
    ) -> Result<bool> {
        let original: Option<String> = self
            .conn
            .query_row(
                "SELECT bid_text FROM bids WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(original) = original else {
            return Ok(false);
        };

        let edits = if original != final_text {
            Some(serde_json::to_string(&EditDiff {
                original,
                final_text: final_text.to_string(),
            })?)
        } else {
            None
        };

        self.conn.execute(
            r#"
            UPDATE bids SET
              final_bid_text = ?1,
              user_edits = ?2,
              feedback_notes = ?3,
              updated_at = ?4
            WHERE id = ?5
            "#,
            params![final_text, edits, feedback, Utc::now(), id],
        )?;
        Ok(true)
    }

    // ----- Rating engine -----

    /// Apply a rating event and return the new rating, or `None` for a
    /// missing id. `Winning` adds its bonus instead of replacing the value
    /// and forces the won flag, rippling through the funnel ratchet.
    pub fn rate(&self, id: i64, kind: RatingKind) -> Result<Option<i64>> {
        let row = self
            .conn
            .query_row(
                "SELECT prompt_version, rating, was_won FROM bids WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((prompt_version, rating, was_won)) = row else {
            return Ok(None);
        };

        let (new_rating, force_won) = match kind {
            RatingKind::Bad => (-5, false),
            RatingKind::Regular => (0, false),
            RatingKind::Good => (5, false),
            RatingKind::Winning => (rating + 10, true),
        };

        self.conn.execute(
            r#"
            UPDATE bids SET
              rating = ?1,
              was_won = CASE WHEN ?2 THEN 1 ELSE was_won END,
              updated_at = ?3
            WHERE id = ?4
            "#,
            params![new_rating, force_won, Utc::now(), id],
        )?;

        if force_won && !was_won {
            self.bump_prompt_counter(&prompt_version, FunnelCounter::Won)?;
            self.recalculate_success_rate(&prompt_version)?;
        }
        Ok(Some(new_rating))
    }

    // ----- Outcome tracking -----

    /// Update outcome label, funnel flags, and notes. Counters on the
    /// owning prompt-version only ever ratchet upward: each one is bumped
    /// on a false-to-true flag transition and never decremented, even when
    /// a flag is written back to false.
    pub fn update_outcome(&self, id: i64, update: &OutcomeUpdate) -> Result<bool> {
        let row = self
            .conn
            .query_row(
                "SELECT prompt_version, was_viewed, was_engaged, was_won FROM bids WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((prompt_version, prev_viewed, prev_engaged, prev_won)) = row else {
            return Ok(false);
        };

        let now = Utc::now();
        self.conn.execute(
            r#"
            UPDATE bids SET
              outcome = ?1,
              outcome_updated_at = ?2,
              outcome_notes = ?3,
              was_viewed = ?4,
              was_engaged = ?5,
              was_won = ?6,
              was_high_rank = ?7,
              updated_at = ?8
            WHERE id = ?9
            "#,
            params![
                update.outcome,
                now,
                update.notes,
                update.was_viewed,
                update.was_engaged,
                update.was_won,
                update.was_high_rank,
                now,
                id,
            ],
        )?;

        let mut bumped = false;
        if update.was_viewed && !prev_viewed {
            self.bump_prompt_counter(&prompt_version, FunnelCounter::Viewed)?;
            bumped = true;
        }
        if update.was_engaged && !prev_engaged {
            self.bump_prompt_counter(&prompt_version, FunnelCounter::Engaged)?;
            bumped = true;
        }
        if update.was_won && !prev_won {
            self.bump_prompt_counter(&prompt_version, FunnelCounter::Won)?;
            bumped = true;
        }
        if bumped {
            self.recalculate_success_rate(&prompt_version)?;
        }
        Ok(true)
    }

    // ----- Prompt version management -----

    /// Register a prompt version, updating metadata in place if the key
    /// already exists. Counters survive re-registration.
    pub fn register_prompt_version(
        &self,
        version_key: &str,
        name: &str,
        description: Option<&str>,
        is_active: bool,
        is_approved: bool,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO prompt_versions (version_key, name, description, created_at, is_active, is_approved)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(version_key) DO UPDATE SET
              name = excluded.name,
              description = excluded.description,
              is_active = MAX(prompt_versions.is_active, excluded.is_active),
              is_approved = MAX(prompt_versions.is_approved, excluded.is_approved)
            "#,
            params![version_key, name, description, Utc::now(), is_active, is_approved],
        )?;
        Ok(())
    }

    pub fn prompt_versions(&self) -> Result<Vec<PromptVersion>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT version_key, name, description, created_at, is_active, is_approved,
                   total_bids, won_bids, engaged_bids, viewed_bids, success_rate
              FROM prompt_versions
             ORDER BY is_active DESC, is_approved DESC, success_rate DESC
            "#,
        )?;
        let rows = stmt.query_map([], map_prompt_version_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn prompt_version(&self, version_key: &str) -> Result<Option<PromptVersion>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT version_key, name, description, created_at, is_active, is_approved,
                       total_bids, won_bids, engaged_bids, viewed_bids, success_rate
                  FROM prompt_versions
                 WHERE version_key = ?1
                "#,
                params![version_key],
                map_prompt_version_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn active_prompt_version(&self) -> Result<Option<String>> {
        let key = self
            .conn
            .query_row(
                "SELECT version_key FROM prompt_versions WHERE is_active = 1 LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key)
    }

    /// Activate one version and deactivate all others in a single
    /// transaction, keeping the at-most-one-active invariant.
    pub fn set_active_prompt_version(&mut self, version_key: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        tx.execute("UPDATE prompt_versions SET is_active = 0", [])?;
        let changed = tx.execute(
            "UPDATE prompt_versions SET is_active = 1 WHERE version_key = ?1",
            params![version_key],
        )?;
        tx.commit()?;
        Ok(changed > 0)
    }

    pub fn approve_prompt_version(&self, version_key: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE prompt_versions SET is_approved = 1 WHERE version_key = ?1",
            params![version_key],
        )?;
        Ok(changed > 0)
    }

    /// Typed counter bump. A missing prompt version is a soft reference:
    /// zero rows updated is logged and ignored.
    fn bump_prompt_counter(&self, version_key: &str, counter: FunnelCounter) -> Result<()> {
        let column = counter.column();
        let sql = format!(
            "UPDATE prompt_versions SET {column} = {column} + 1 WHERE version_key = ?1"
        );
        let changed = self.conn.execute(&sql, params![version_key])?;
        if changed == 0 {
            debug!(version_key, column, "prompt version missing; counter bump skipped");
        }
        Ok(())
    }

    /// Weighted success score: won=3, engaged=2, viewed=1, against three
    /// points per recorded bid, clamped to 1.0. Left untouched while the
    /// version has no bids.
    fn recalculate_success_rate(&self, version_key: &str) -> Result<()> {
        let counters = self
            .conn
            .query_row(
                r#"
                SELECT total_bids, won_bids, engaged_bids, viewed_bids
                  FROM prompt_versions
                 WHERE version_key = ?1
                "#,
                params![version_key],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((total, won, engaged, viewed)) = counters else {
            return Ok(());
        };
        if total <= 0 {
            return Ok(());
        }

        let weighted = (won * 3 + engaged * 2 + viewed) as f64 / (total * 3) as f64;
        let success_rate = weighted.min(1.0);
        self.conn.execute(
            "UPDATE prompt_versions SET success_rate = ?1 WHERE version_key = ?2",
            params![success_rate, version_key],
        )?;
        Ok(())
    }

    // ----- Analytics -----

    /// Overall learning statistics, computed on demand.
    pub fn learning_stats(&self) -> Result<LearningStats> {
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };

        let total = count("SELECT COUNT(*) FROM bids")?;
        let won = count("SELECT COUNT(*) FROM bids WHERE was_won = 1")?;
        let engaged = count("SELECT COUNT(*) FROM bids WHERE was_engaged = 1")?;
        let viewed = count("SELECT COUNT(*) FROM bids WHERE was_viewed = 1")?;
        let pending = count("SELECT COUNT(*) FROM bids WHERE outcome = 'pending'")?;
        let high_rated = count("SELECT COUNT(*) FROM bids WHERE rating >= 5")?;
        let low_rated = count("SELECT COUNT(*) FROM bids WHERE rating <= -5")?;

        // Unrated records sit at exactly 0 and would drag the mean there.
        let mean_rating: Option<f64> = self.conn.query_row(
            "SELECT AVG(rating) FROM bids WHERE rating != 0",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT project_type, COUNT(*) AS total,
                   SUM(was_won), SUM(was_engaged), SUM(was_viewed),
                   AVG(CASE WHEN rating != 0 THEN rating END)
              FROM bids
             WHERE project_type IS NOT NULL
             GROUP BY project_type
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TypeBreakdown {
                project_type: row.get(0)?,
                total: row.get(1)?,
                won: row.get(2)?,
                engaged: row.get(3)?,
                viewed: row.get(4)?,
                mean_rating: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
            })
        })?;
        let mut by_type = Vec::new();
        for row in rows {
            by_type.push(row?);
        }

        let pct = |part: i64| {
            if total > 0 {
                part as f64 / total as f64 * 100.0
            } else {
                0.0
            }
        };

        Ok(LearningStats {
            total_bids: total,
            won,
            engaged,
            viewed,
            pending,
            win_rate: pct(won),
            engagement_rate: pct(engaged),
            high_rated,
            low_rated,
            mean_rating: mean_rating.unwrap_or(0.0),
            by_type,
        })
    }
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    err.to_string().contains("duplicate column name")
}

fn map_bid_row(row: &Row<'_>) -> rusqlite::Result<BidRecord> {
    let milestone_plan = row
        .get::<_, Option<String>>("milestone_plan")?
        .map(|text| StoredJson::<MilestonePlan>::from_column(&text));
    let user_edits = row
        .get::<_, Option<String>>("user_edits")?
        .map(|text| StoredJson::<EditDiff>::from_column(&text));

    Ok(BidRecord {
        id: row.get("id")?,
        created_at: row.get::<_, DateTime<Utc>>("created_at")?,
        updated_at: row.get::<_, DateTime<Utc>>("updated_at")?,
        project: ProjectInfo {
            project_id: row.get("project_id")?,
            title: row.get("project_title")?,
            url: row.get("project_url")?,
            description: row.get("project_description")?,
            project_type: row.get("project_type")?,
            language: row.get("project_language")?,
            budget_min: row.get("project_budget_min")?,
            budget_max: row.get("project_budget_max")?,
        },
        bid_text: row.get("bid_text")?,
        milestone_plan,
        prompt_version: row.get("prompt_version")?,
        model_used: row.get("model_used")?,
        tone: row.get("tone")?,
        outcome: row.get("outcome")?,
        outcome_updated_at: row.get("outcome_updated_at")?,
        outcome_notes: row.get("outcome_notes")?,
        was_viewed: row.get("was_viewed")?,
        was_engaged: row.get("was_engaged")?,
        was_won: row.get("was_won")?,
        was_high_rank: row.get("was_high_rank")?,
        rating: row.get("rating")?,
        is_uploaded: row.get("is_uploaded")?,
        upload_source: row.get("upload_source")?,
        final_bid_text: row.get("final_bid_text")?,
        user_edits,
        feedback_notes: row.get("feedback_notes")?,
    })
}

fn map_prompt_version_row(row: &Row<'_>) -> rusqlite::Result<PromptVersion> {
    Ok(PromptVersion {
        version_key: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        is_active: row.get(4)?,
        is_approved: row.get(5)?,
        total_bids: row.get(6)?,
        won_bids: row.get(7)?,
        engaged_bids: row.get(8)?,
        viewed_bids: row.get(9)?,
        success_rate: row.get(10)?,
    })
}
