//! SQLite schema definitions for the record database.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};
use anyhow::Result;
use rusqlite::Connection;

/// Every content key committed on this node.
const CONTENT_KEYS_TABLE: Table = Table {
    name: "content_keys",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[],
};

const AUDIO_ANALYSES_TABLE: Table = Table {
    name: "audio_analyses",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("mirrors", &SqlType::Text, non_null = true), // JSON array
        sqlite_column!("error_count", &SqlType::Integer, non_null = true),
        sqlite_column!("last_error", &SqlType::Text, non_null = true),
        sqlite_column!("processed_by", &SqlType::Text, non_null = true),
        sqlite_column!("processed_at", &SqlType::Integer, non_null = true),
        sqlite_column!("bpm", &SqlType::Real),
        sqlite_column!("musical_key", &SqlType::Text),
    ],
    indices: &[("idx_audio_analyses_status", "status")],
    unique_constraints: &[],
};

/// Daily and monthly serve counters.
const SERVE_METRICS_TABLE: Table = Table {
    name: "serve_metrics",
    columns: &[
        sqlite_column!("granularity", &SqlType::Text, non_null = true),
        sqlite_column!("period_start", &SqlType::Text, non_null = true),
        sqlite_column!("action", &SqlType::Text, non_null = true),
        sqlite_column!("count", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["granularity", "period_start", "action"]],
};

fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
    SERVE_METRICS_TABLE.create(conn)
}

pub const RECORD_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[CONTENT_KEYS_TABLE, AUDIO_ANALYSES_TABLE],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[CONTENT_KEYS_TABLE, AUDIO_ANALYSES_TABLE, SERVE_METRICS_TABLE],
        migration: Some(migrate_v0_to_v1),
    },
];
