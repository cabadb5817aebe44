use rusqlite::{Connection, Result};

/// Initialise the sitewatch schema. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_logging_configs_table(conn)?;
    create_billing_configs_table(conn)?;
    create_power_analyzer_configs_table(conn)?;
    create_locations_table(conn)?;
    create_poll_results_table(conn)?;
    Ok(())
}

fn create_logging_configs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS logging_configs (
            id                TEXT    NOT NULL PRIMARY KEY,
            name              TEXT    NOT NULL,
            device_topic      TEXT    NOT NULL,
            value_key         TEXT    NOT NULL,
            multiplier        REAL,               -- NULL means 1.0
            interval_minutes  INTEGER,            -- NULL means service default
            output_topic      TEXT,
            active            INTEGER NOT NULL DEFAULT 1,
            created_at        TEXT    NOT NULL,
            updated_at        TEXT    NOT NULL
        ) STRICT;",
    )
}

fn create_billing_configs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS billing_configs (
            id            TEXT    NOT NULL PRIMARY KEY,
            name          TEXT    NOT NULL,
            device_topic  TEXT    NOT NULL,
            value_key     TEXT    NOT NULL,
            rate          REAL    NOT NULL,
            currency      TEXT    NOT NULL DEFAULT 'IDR',
            output_topic  TEXT,
            active        INTEGER NOT NULL DEFAULT 1,
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL
        ) STRICT;",
    )
}

fn create_power_analyzer_configs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS power_analyzer_configs (
            id                TEXT    NOT NULL PRIMARY KEY,
            name              TEXT    NOT NULL,
            device_topic      TEXT    NOT NULL,
            voltage_key       TEXT    NOT NULL,
            current_key       TEXT    NOT NULL,
            power_factor_key  TEXT,
            phases            INTEGER NOT NULL DEFAULT 3,
            output_topic      TEXT,
            active            INTEGER NOT NULL DEFAULT 1,
            created_at        TEXT    NOT NULL,
            updated_at        TEXT    NOT NULL
        ) STRICT;",
    )
}

/// `status_changed_at` is only touched when the status actually flips.
fn create_locations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS locations (
            id                 TEXT NOT NULL PRIMARY KEY,
            name               TEXT NOT NULL,
            topic              TEXT NOT NULL,
            status             TEXT NOT NULL DEFAULT 'inactive',
            status_changed_at  TEXT,
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL
        ) STRICT;",
    )
}

fn create_poll_results_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS poll_results (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            service      TEXT    NOT NULL,
            job_id       TEXT    NOT NULL,
            value        REAL    NOT NULL,
            derived      TEXT    NOT NULL,   -- JSON object
            recorded_at  TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_poll_results_job
            ON poll_results(job_id, recorded_at DESC);",
    )
}
