//! SQL migration definitions for the leadflow database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: projects, leads, config documents, blacklist",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS projects (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE,
    active        INTEGER NOT NULL DEFAULT 1,
    created_at_ms INTEGER NOT NULL,
    doc           TEXT NOT NULL
);

-- Lead documents with the columns the pipeline filters and orders on
CREATE TABLE IF NOT EXISTS leads (
    id                TEXT PRIMARY KEY,
    project_id        TEXT NOT NULL REFERENCES projects(id),
    email             TEXT NOT NULL,
    status            TEXT NOT NULL,
    created_at_ms     INTEGER NOT NULL,
    last_contacted_ms INTEGER,
    doc               TEXT NOT NULL,
    UNIQUE(project_id, email)
);

CREATE INDEX IF NOT EXISTS idx_leads_project_status ON leads(project_id, status);
CREATE INDEX IF NOT EXISTS idx_leads_email ON leads(email);

-- scope is 'global' or 'project:<id>'
CREATE TABLE IF NOT EXISTS config_documents (
    scope         TEXT PRIMARY KEY,
    doc           TEXT NOT NULL,
    updated_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS blacklist (
    scope         TEXT NOT NULL,
    email         TEXT NOT NULL,
    reason        TEXT,
    created_at_ms INTEGER NOT NULL,
    PRIMARY KEY (scope, email)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Delivery bookkeeping: lead locks, send counters, deliveries",
            sql: r#"
ALTER TABLE leads ADD COLUMN lock_owner TEXT;
ALTER TABLE leads ADD COLUMN lock_expires_at_ms INTEGER;

-- day is the calendar date in the project's timezone (YYYY-MM-DD)
CREATE TABLE IF NOT EXISTS send_counters (
    project_id TEXT NOT NULL,
    day        TEXT NOT NULL,
    count      INTEGER NOT NULL,
    PRIMARY KEY (project_id, day)
);

CREATE TABLE IF NOT EXISTS deliveries (
    idempotency_key TEXT PRIMARY KEY,
    lead_id         TEXT NOT NULL REFERENCES leads(id),
    project_id      TEXT NOT NULL,
    email_type      TEXT NOT NULL,
    ordinal         INTEGER NOT NULL,
    sent_at_ms      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_deliveries_lead ON deliveries(lead_id);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
