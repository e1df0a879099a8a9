//! SQL migration definitions for the castlefinder database.
//!
//! Migrations are applied in order on database open. Each migration records
//! its version in `schema_migrations` as its last statement.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: castles, castle_tags",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per reconciled castle, keyed by country code + filtered name
CREATE TABLE IF NOT EXISTS castles (
    country            TEXT NOT NULL,
    name               TEXT NOT NULL,
    state              TEXT NOT NULL DEFAULT '',
    city               TEXT NOT NULL DEFAULT '',
    district           TEXT NOT NULL DEFAULT '',
    foundation_period  TEXT NOT NULL DEFAULT '',
    property_condition TEXT NOT NULL DEFAULT 'unknown',
    coordinates        TEXT NOT NULL DEFAULT '',
    picture_url        TEXT NOT NULL DEFAULT '',
    contact_json       TEXT,
    visiting_info_json TEXT,
    sources_json       TEXT NOT NULL DEFAULT '[]',
    updated_at         TEXT NOT NULL,
    UNIQUE(country, name)
);

CREATE INDEX IF NOT EXISTS idx_castles_country ON castles(country);

-- Matching tags, rewritten on every save
CREATE TABLE IF NOT EXISTS castle_tags (
    country TEXT NOT NULL,
    name    TEXT NOT NULL,
    tag     TEXT NOT NULL,
    PRIMARY KEY (country, name, tag)
);

CREATE INDEX IF NOT EXISTS idx_castle_tags_tag ON castle_tags(tag);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
