//! SQLite-backed record store implementation.

use super::models::{
    AnalysisResults, AnalysisStatus, AudioAnalysis, Granularity, RecordStats,
};
use super::schema::RECORD_VERSIONED_SCHEMAS;
use super::trait_def::RecordStore;
use crate::blob_store::LEGACY_IMAGE_SUFFIX;
use crate::sqlite_persistence::migrate_if_needed;
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// SQLite-backed record store.
#[derive(Clone)]
pub struct SqliteRecordStore {
    read_conn: Arc<Mutex<Connection>>,
    write_conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path_ref = db_path.as_ref();

        let mut write_conn = Connection::open_with_flags(
            db_path_ref,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open record database")?;

        migrate_if_needed(&mut write_conn, RECORD_VERSIONED_SCHEMAS, "record")?;

        write_conn
            .pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on record write connection")?;

        let read_conn = Connection::open_with_flags(
            db_path_ref,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open record database for reading")?;

        let store = Self {
            read_conn: Arc::new(Mutex::new(read_conn)),
            write_conn: Arc::new(Mutex::new(write_conn)),
        };
        let stats = store.stats()?;
        info!(
            "Record store ready: {} content keys, {} analyses done, {} in error",
            stats.content_key_count, stats.analyses_done, stats.analyses_error
        );
        Ok(store)
    }
}

const ANALYSIS_COLUMNS: &str = "key, status, mirrors, error_count, last_error, processed_by,
     processed_at, bpm, musical_key";

fn analysis_from_row(row: &Row) -> rusqlite::Result<AudioAnalysis> {
    let status: String = row.get(1)?;
    let mirrors: String = row.get(2)?;
    let processed_at: i64 = row.get(6)?;
    let bpm: Option<f64> = row.get(7)?;
    let musical_key: Option<String> = row.get(8)?;

    let status = status.parse::<AnalysisStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;
    let mirrors = serde_json::from_str(&mirrors).unwrap_or_else(|e| {
        warn!("Malformed mirrors JSON in record db: {}: {}", mirrors, e);
        Vec::new()
    });

    Ok(AudioAnalysis {
        key: row.get(0)?,
        status,
        mirrors,
        error_count: row.get(3)?,
        last_error: row.get(4)?,
        processed_by: row.get(5)?,
        processed_at: Utc
            .timestamp_opt(processed_at, 0)
            .single()
            .unwrap_or_default(),
        results: match (bpm, musical_key) {
            (Some(bpm), Some(key)) => Some(AnalysisResults { bpm, key }),
            _ => None,
        },
    })
}

fn period_start(granularity: Granularity, at: DateTime<Utc>) -> String {
    match granularity {
        Granularity::Day => at.format("%Y-%m-%d").to_string(),
        Granularity::Month => format!("{:04}-{:02}-01", at.year(), at.month()),
    }
}

impl RecordStore for SqliteRecordStore {
    fn register_content_key(&self, key: &str) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO content_keys (key) VALUES (?1)",
            params![key],
        )?;
        Ok(())
    }

    fn list_analysis_candidates(&self) -> Result<Vec<String>> {
        let conn = self.read_conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT key FROM content_keys WHERE key NOT LIKE '%.jpg' ORDER BY RANDOM()",
        )?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys
            .into_iter()
            .filter(|k| !k.ends_with(LEGACY_IMAGE_SUFFIX))
            .collect())
    }

    fn get_analysis(&self, key: &str) -> Result<Option<AudioAnalysis>> {
        let conn = self.read_conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM audio_analyses WHERE key = ?1",
            ANALYSIS_COLUMNS
        ))?;
        Ok(stmt.query_row(params![key], analysis_from_row).optional()?)
    }

    fn insert_analysis(&self, analysis: &AudioAnalysis) -> Result<AudioAnalysis> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO audio_analyses ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                ANALYSIS_COLUMNS
            ),
            params![
                analysis.key,
                analysis.status.as_str(),
                serde_json::to_string(&analysis.mirrors)?,
                analysis.error_count,
                analysis.last_error,
                analysis.processed_by,
                analysis.processed_at.timestamp(),
                analysis.results.as_ref().map(|r| r.bpm),
                analysis.results.as_ref().map(|r| r.key.clone()),
            ],
        )?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM audio_analyses WHERE key = ?1",
            ANALYSIS_COLUMNS
        ))?;
        Ok(stmt.query_row(params![analysis.key], analysis_from_row)?)
    }

    fn update_analysis(&self, analysis: &AudioAnalysis) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE audio_analyses SET status = ?2, mirrors = ?3, error_count = ?4,
                last_error = ?5, processed_by = ?6, processed_at = ?7, bpm = ?8, musical_key = ?9
             WHERE key = ?1",
            params![
                analysis.key,
                analysis.status.as_str(),
                serde_json::to_string(&analysis.mirrors)?,
                analysis.error_count,
                analysis.last_error,
                analysis.processed_by,
                analysis.processed_at.timestamp(),
                analysis.results.as_ref().map(|r| r.bpm),
                analysis.results.as_ref().map(|r| r.key.clone()),
            ],
        )?;
        if updated == 0 {
            anyhow::bail!("No analysis record for key {}", analysis.key);
        }
        Ok(())
    }

    fn record_serve_action(&self, action: &str, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.write_conn.lock().unwrap();
        let tx = conn.transaction()?;
        for granularity in [Granularity::Day, Granularity::Month] {
            tx.execute(
                "INSERT INTO serve_metrics (granularity, period_start, action, count)
                 VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT (granularity, period_start, action) DO UPDATE SET count = count + 1",
                params![granularity.as_str(), period_start(granularity, at), action],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn serve_action_count(
        &self,
        action: &str,
        granularity: Granularity,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let conn = self.read_conn.lock().unwrap();
        let count: Option<u64> = conn
            .query_row(
                "SELECT count FROM serve_metrics
                 WHERE granularity = ?1 AND period_start = ?2 AND action = ?3",
                params![granularity.as_str(), period_start(granularity, at), action],
                |r| r.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    fn stats(&self) -> Result<RecordStats> {
        let conn = self.read_conn.lock().unwrap();
        let page_count: u64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: u64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
        let content_key_count: u64 =
            conn.query_row("SELECT COUNT(*) FROM content_keys", [], |r| r.get(0))?;

        let mut stats = RecordStats {
            database_size_bytes: page_count * page_size,
            content_key_count,
            ..Default::default()
        };
        let mut stmt =
            conn.prepare_cached("SELECT status, COUNT(*) FROM audio_analyses GROUP BY status")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            match status.parse::<AnalysisStatus>() {
                Ok(AnalysisStatus::Pending) => stats.analyses_pending = count,
                Ok(AnalysisStatus::Busy) => stats.analyses_busy = count,
                Ok(AnalysisStatus::Done) => stats.analyses_done = count,
                Ok(AnalysisStatus::Error) => stats.analyses_error = count,
                Err(e) => warn!("{}", e),
            }
        }
        Ok(stats)
    }
}
