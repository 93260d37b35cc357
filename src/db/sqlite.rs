use std::path::Path;

use rusqlite::Connection;

use super::DatabaseError;

/// Open a SQLite connection to the given path and run migrations
pub fn open_database(path: &Path) -> Result<Connection, DatabaseError> {
    let conn = Connection::open(path)?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing)
pub fn open_memory_database() -> Result<Connection, DatabaseError> {
    let conn = Connection::open_in_memory()?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn configure_pragmas(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

const MIGRATION_001_INITIAL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);

CREATE TABLE appointments (
    id              TEXT PRIMARY KEY,
    external_id     INTEGER NOT NULL,
    status          TEXT NOT NULL,
    organization_id TEXT,
    package_code    TEXT,
    barcode         TEXT,
    latest_result   TEXT NOT NULL,
    scheduled_at    TEXT,
    deadline        TEXT,
    first_name      TEXT NOT NULL DEFAULT '',
    last_name       TEXT NOT NULL DEFAULT '',
    email           TEXT,
    phone           TEXT,
    date_of_birth   TEXT,
    canceled        INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE INDEX idx_appointments_external ON appointments(external_id);
CREATE INDEX idx_appointments_barcode ON appointments(barcode);
CREATE INDEX idx_appointments_scheduled ON appointments(scheduled_at);

CREATE TABLE test_results (
    id                TEXT PRIMARY KEY,
    appointment_id    TEXT NOT NULL REFERENCES appointments(id),
    barcode           TEXT,
    result            TEXT NOT NULL,
    waiting_result    INTEGER NOT NULL DEFAULT 0,
    recollected       INTEGER NOT NULL DEFAULT 0,
    run_number        INTEGER NOT NULL DEFAULT 1,
    re_collect_number INTEGER NOT NULL DEFAULT 1,
    display_in_result INTEGER NOT NULL DEFAULT 1,
    confirmed         INTEGER NOT NULL DEFAULT 0,
    previous_result   TEXT,
    linked_barcodes   TEXT NOT NULL DEFAULT '[]',
    organization_id   TEXT,
    admin_id          TEXT,
    result_analysis   TEXT NOT NULL DEFAULT '[]',
    result_date       TEXT,
    first_name        TEXT NOT NULL DEFAULT '',
    last_name         TEXT NOT NULL DEFAULT '',
    date_of_birth     TEXT,
    test_type         TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);
CREATE INDEX idx_results_appointment ON test_results(appointment_id);
CREATE INDEX idx_results_barcode ON test_results(barcode);

CREATE TABLE packages (
    code            TEXT PRIMARY KEY,
    organization_id TEXT,
    name            TEXT
);

CREATE TABLE activity_log (
    id           TEXT PRIMARY KEY,
    entity_id    TEXT NOT NULL,
    action       TEXT NOT NULL,
    actor        TEXT,
    current_data TEXT NOT NULL,
    new_data     TEXT NOT NULL,
    created_at   TEXT NOT NULL
);
CREATE INDEX idx_activity_entity ON activity_log(entity_id);

CREATE TABLE barcode_counter (
    id    INTEGER PRIMARY KEY CHECK (id = 1),
    value INTEGER NOT NULL
);
INSERT INTO barcode_counter (id, value) VALUES (1, 0);

INSERT INTO schema_version (version) VALUES (1);
";

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_current_version(conn);

    let migrations: Vec<(i64, &str)> = vec![(1, MIGRATION_001_INITIAL)];

    for (version, sql) in migrations {
        if version > current_version {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    reason: e.to_string(),
                })?;
        }
    }

    Ok(())
}

/// Get the current schema version (0 if no schema exists yet)
fn get_current_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, i64>(0)
    })
    .unwrap_or(0)
}

/// Count tables in the database (for verification)
pub fn count_tables(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_opens_on_disk_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labsync.db");

        let conn = open_database(&path).unwrap();
        assert_eq!(count_tables(&conn).unwrap(), 6);
        drop(conn);

        // Reopen: migrations must be a no-op against the existing schema.
        let conn = open_database(&path).unwrap();
        assert_eq!(count_tables(&conn).unwrap(), 6);
    }

    #[test]
    fn database_initializes_all_tables() {
        let conn = open_memory_database().unwrap();
        // appointments, test_results, packages, activity_log, barcode_counter,
        // schema_version
        let count = count_tables(&conn).unwrap();
        assert_eq!(count, 6, "Expected 6 tables, got {count}");
    }

    #[test]
    fn schema_version_is_current() {
        let conn = open_memory_database().unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn migration_idempotent() {
        let conn = open_memory_database().unwrap();
        assert!(run_migrations(&conn).is_ok());
    }

    #[test]
    fn foreign_keys_enabled() {
        let conn = open_memory_database().unwrap();
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn barcode_counter_seeded_at_zero() {
        let conn = open_memory_database().unwrap();
        let value: i64 = conn
            .query_row("SELECT value FROM barcode_counter WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(value, 0);
    }
}
