//! Queue database schema

use rusqlite::Connection;

/// Schema applied on every open; idempotent.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS REQUEST_QUEUE (
    OPERATION    INTEGER NOT NULL,
    REQ_NUM      INTEGER NOT NULL,
    TARGET_STATE INTEGER NOT NULL,
    NUM_REPL     INTEGER NOT NULL,
    REPL_NUM     INTEGER NOT NULL,
    POOL         TEXT    NOT NULL DEFAULT '',
    TAPE_ID      TEXT    NOT NULL DEFAULT '',
    DRIVE_ID     TEXT    NOT NULL DEFAULT '',
    STATE        INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS REQUEST_QUEUE_STATE_IDX
    ON REQUEST_QUEUE (STATE, OPERATION, REQ_NUM);

CREATE TABLE IF NOT EXISTS JOB_QUEUE (
    OPERATION    INTEGER NOT NULL,
    FILE_NAME    TEXT    NOT NULL,
    REQ_NUM      INTEGER NOT NULL,
    REPL_NUM     INTEGER NOT NULL,
    FILE_SIZE    INTEGER NOT NULL,
    TAPE_ID      TEXT    NOT NULL DEFAULT '',
    FILE_STATE   INTEGER NOT NULL,
    PRIMARY KEY (FILE_NAME, REQ_NUM, REPL_NUM)
);

CREATE INDEX IF NOT EXISTS JOB_QUEUE_REQ_IDX
    ON JOB_QUEUE (REQ_NUM, REPL_NUM, FILE_STATE);
";

pub(crate) fn apply(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
