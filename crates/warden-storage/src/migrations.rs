//! Database schema migrations.
//!
//! Applies the initial schema: intents, decision_memos, audit_entries,
//! workflows, tenant_halts, and the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use warden_core::error::WardenError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), WardenError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| WardenError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| WardenError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), WardenError> {
    conn.execute_batch(
        "
        BEGIN IMMEDIATE;

        CREATE TABLE IF NOT EXISTS intents (
            id                TEXT PRIMARY KEY NOT NULL,
            tenant_id         TEXT NOT NULL,
            actor             TEXT NOT NULL,
            intent_type       TEXT NOT NULL,
            payload           TEXT NOT NULL,
            data_class        TEXT NOT NULL DEFAULT 'NONE'
                              CHECK (data_class IN ('NONE', 'PII', 'PHI')),
            spend_usd         REAL NOT NULL DEFAULT 0,
            spend_reported    INTEGER NOT NULL DEFAULT 1,
            status            TEXT NOT NULL DEFAULT 'DRAFT'
                              CHECK (status IN ('DRAFT', 'VALIDATING', 'AWAITING_HUMAN',
                                                'BLOCKED_SGL', 'EXECUTED', 'FAILED')),
            sgl_result        TEXT
                              CHECK (sgl_result IS NULL OR sgl_result IN ('ALLOW', 'REVIEW', 'BLOCK')),
            approved_memo_id  TEXT,
            claimed_by        TEXT,
            lease_expires_at  INTEGER,
            attempts          INTEGER NOT NULL DEFAULT 0,
            last_error        TEXT,
            created_at        INTEGER NOT NULL,
            updated_at        INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_intents_claimable
            ON intents (status, created_at);

        CREATE INDEX IF NOT EXISTS idx_intents_tenant
            ON intents (tenant_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS decision_memos (
            id                TEXT PRIMARY KEY NOT NULL,
            tenant_id         TEXT NOT NULL,
            intent_id         TEXT,
            agent             TEXT NOT NULL,
            title             TEXT NOT NULL,
            rationale         TEXT NOT NULL,
            risk_tier         INTEGER NOT NULL CHECK (risk_tier BETWEEN 1 AND 3),
            requires_approval INTEGER NOT NULL DEFAULT 1,
            status            TEXT NOT NULL DEFAULT 'PROPOSED'
                              CHECK (status IN ('PROPOSED', 'APPROVED', 'REJECTED', 'EXECUTED')),
            payload           TEXT NOT NULL DEFAULT 'null',
            spend_usd         REAL NOT NULL DEFAULT 0,
            decided_by        TEXT,
            decision_reason   TEXT,
            created_at        INTEGER NOT NULL,
            decided_at        INTEGER,
            executed_at       INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_memos_tenant_status
            ON decision_memos (tenant_id, status, created_at);

        CREATE INDEX IF NOT EXISTS idx_memos_intent
            ON decision_memos (intent_id);

        CREATE TABLE IF NOT EXISTS audit_entries (
            id           TEXT PRIMARY KEY NOT NULL,
            tenant_id    TEXT NOT NULL,
            actor        TEXT NOT NULL,
            action       TEXT NOT NULL,
            entity_type  TEXT NOT NULL,
            entity_id    TEXT NOT NULL,
            level        TEXT NOT NULL
                         CHECK (level IN ('info', 'warn', 'error', 'security')),
            message      TEXT NOT NULL DEFAULT '',
            meta         TEXT NOT NULL DEFAULT 'null',
            timestamp    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_entity
            ON audit_entries (entity_id, timestamp);

        CREATE INDEX IF NOT EXISTS idx_audit_tenant
            ON audit_entries (tenant_id, timestamp DESC);

        -- The ledger is append-only.
        CREATE TRIGGER IF NOT EXISTS audit_entries_no_update
            BEFORE UPDATE ON audit_entries
        BEGIN
            SELECT RAISE(ABORT, 'audit_entries is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS audit_entries_no_delete
            BEFORE DELETE ON audit_entries
        BEGIN
            SELECT RAISE(ABORT, 'audit_entries is append-only');
        END;

        CREATE TABLE IF NOT EXISTS workflows (
            id           TEXT PRIMARY KEY NOT NULL,
            key          TEXT NOT NULL UNIQUE,
            handler      TEXT NOT NULL,
            description  TEXT NOT NULL DEFAULT '',
            created_at   INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tenant_halts (
            tenant_id    TEXT PRIMARY KEY NOT NULL,
            reason       TEXT NOT NULL,
            halted_at    INTEGER NOT NULL
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');

        COMMIT;
        ",
    )
    .map_err(|e| WardenError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_migrations_record_version() {
        let conn = fresh();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = fresh();
        run_migrations(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_status_check_constraint() {
        let conn = fresh();
        let result = conn.execute(
            "INSERT INTO intents (id, tenant_id, actor, intent_type, payload, status, created_at, updated_at)
             VALUES ('x', 't', 'a', 'ENGINE_RUN', '{}', 'QUEUED', 0, 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_audit_entries_reject_update_and_delete() {
        let conn = fresh();
        conn.execute(
            "INSERT INTO audit_entries (id, tenant_id, actor, action, entity_type, entity_id, level, timestamp)
             VALUES ('a1', 't', 'system', 'EXECUTED', 'intent', 'i1', 'info', 0)",
            [],
        )
        .unwrap();

        let update = conn.execute("UPDATE audit_entries SET message = 'x' WHERE id = 'a1'", []);
        assert!(update.is_err());

        let delete = conn.execute("DELETE FROM audit_entries WHERE id = 'a1'", []);
        assert!(delete.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM audit_entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
