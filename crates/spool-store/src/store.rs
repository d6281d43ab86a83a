//! Mutex-guarded queue store

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use thiserror::Error;
use tracing::debug;

use spool_core::{FileState, Operation, RequestState, ReqNum};

use crate::records::{JobCounts, JobRecord, RequestRecord};
use crate::schema;

/// Store failures, with unique-key violations surfaced distinctly so the
/// dispatcher can report duplicate files per-file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `(file_name, req_num, repl_num)` already queued.
    #[error("duplicate job: {file_name}")]
    DuplicateJob { file_name: String },

    #[error("queue database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt queue row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Underlying SQLite extended code, when there is one.
    #[must_use]
    pub fn sqlite_code(&self) -> Option<i32> {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => Some(err.extended_code),
            _ => None,
        }
    }
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The persistent request and job queues.
///
/// One connection, one writer at a time. Thread safety comes from the
/// mutex; SQLite's own locking never sees contention.
pub struct QueueStore {
    conn: Mutex<Connection>,
}

impl QueueStore {
    /// Open (or create) the queue database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        schema::apply(&conn)?;
        debug!(path = %path.display(), "queue store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::apply(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Insert one request row.
    pub fn add_request(&self, rec: &RequestRecord) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO REQUEST_QUEUE \
             (OPERATION, REQ_NUM, TARGET_STATE, NUM_REPL, REPL_NUM, POOL, TAPE_ID, DRIVE_ID, STATE) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                rec.operation.code(),
                rec.req_num,
                rec.target_state.code(),
                rec.num_repl,
                rec.repl_num,
                rec.pool,
                rec.tape_id,
                rec.drive_id,
                rec.state.code(),
            ],
        )?;
        Ok(())
    }

    /// Insert one job row; duplicates of the `(file, request, replica)`
    /// key are rejected by the primary key and reported distinctly.
    pub fn add_job(&self, job: &JobRecord) -> Result<()> {
        let result = self.conn.lock().execute(
            "INSERT INTO JOB_QUEUE \
             (OPERATION, FILE_NAME, REQ_NUM, REPL_NUM, FILE_SIZE, TAPE_ID, FILE_STATE) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job.operation.code(),
                job.file_name,
                job.req_num,
                job.repl_num,
                job.file_size,
                job.tape_id,
                job.file_state.code(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateJob {
                    file_name: job.file_name.clone(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// All `NEW` rows in scheduling order: operation code major (lower
    /// code is higher priority), request number minor. The ordering is
    /// produced by the SELECT itself, so it is stable across restarts.
    pub fn new_requests(&self) -> Result<Vec<RequestRecord>> {
        self.select_requests(
            "SELECT OPERATION, REQ_NUM, TARGET_STATE, NUM_REPL, REPL_NUM, POOL, TAPE_ID, DRIVE_ID, STATE \
             FROM REQUEST_QUEUE WHERE STATE = ?1 \
             ORDER BY OPERATION ASC, REQ_NUM ASC, REPL_NUM ASC",
            params![RequestState::New.code()],
        )
    }

    /// All request rows, optionally filtered by request number, in
    /// scheduling order. Used by the info queries.
    pub fn requests(&self, req_num: Option<ReqNum>) -> Result<Vec<RequestRecord>> {
        match req_num {
            Some(req) => self.select_requests(
                "SELECT OPERATION, REQ_NUM, TARGET_STATE, NUM_REPL, REPL_NUM, POOL, TAPE_ID, DRIVE_ID, STATE \
                 FROM REQUEST_QUEUE WHERE REQ_NUM = ?1 \
                 ORDER BY OPERATION ASC, REQ_NUM ASC, REPL_NUM ASC",
                params![req],
            ),
            None => self.select_requests(
                "SELECT OPERATION, REQ_NUM, TARGET_STATE, NUM_REPL, REPL_NUM, POOL, TAPE_ID, DRIVE_ID, STATE \
                 FROM REQUEST_QUEUE \
                 ORDER BY OPERATION ASC, REQ_NUM ASC, REPL_NUM ASC",
                params![],
            ),
        }
    }

    /// Reserve a whole request (motion, maintenance, recall rows).
    pub fn mark_in_progress(&self, req_num: ReqNum, drive_id: &str) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE REQUEST_QUEUE SET STATE = ?1, DRIVE_ID = ?2 WHERE REQ_NUM = ?3",
            params![RequestState::InProgress.code(), drive_id, req_num],
        )?;
        Ok(())
    }

    /// Reserve one migration replica, persisting the chosen cartridge.
    pub fn mark_migration_in_progress(
        &self,
        req_num: ReqNum,
        repl_num: i32,
        pool: &str,
        tape_id: &str,
        drive_id: &str,
    ) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE REQUEST_QUEUE SET STATE = ?1, TAPE_ID = ?2, DRIVE_ID = ?3 \
             WHERE REQ_NUM = ?4 AND REPL_NUM = ?5 AND POOL = ?6",
            params![
                RequestState::InProgress.code(),
                tape_id,
                drive_id,
                req_num,
                repl_num,
                pool
            ],
        )?;
        Ok(())
    }

    /// Reserve a recall row addressed by its cartridge.
    pub fn mark_recall_in_progress(
        &self,
        req_num: ReqNum,
        tape_id: &str,
        drive_id: &str,
    ) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE REQUEST_QUEUE SET STATE = ?1, DRIVE_ID = ?2 \
             WHERE REQ_NUM = ?3 AND TAPE_ID = ?4",
            params![RequestState::InProgress.code(), drive_id, req_num, tape_id],
        )?;
        Ok(())
    }

    /// Terminal transition for a whole request.
    pub fn mark_completed(&self, req_num: ReqNum) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE REQUEST_QUEUE SET STATE = ?1 WHERE REQ_NUM = ?2",
            params![RequestState::Completed.code(), req_num],
        )?;
        Ok(())
    }

    /// Terminal transition for one migration replica.
    pub fn mark_replica_completed(
        &self,
        req_num: ReqNum,
        repl_num: i32,
        pool: &str,
    ) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE REQUEST_QUEUE SET STATE = ?1 \
             WHERE REQ_NUM = ?2 AND REPL_NUM = ?3 AND POOL = ?4",
            params![RequestState::Completed.code(), req_num, repl_num, pool],
        )?;
        Ok(())
    }

    /// Return a replica to `NEW` so the scheduler picks it up again.
    /// `keep_tape` distinguishes suspension (same cartridge, retry when
    /// it frees up) from tape-full (any pool cartridge will do).
    pub fn requeue_replica(
        &self,
        req_num: ReqNum,
        repl_num: i32,
        pool: &str,
        keep_tape: bool,
    ) -> Result<()> {
        let sql = if keep_tape {
            "UPDATE REQUEST_QUEUE SET STATE = ?1, DRIVE_ID = '' \
             WHERE REQ_NUM = ?2 AND REPL_NUM = ?3 AND POOL = ?4"
        } else {
            "UPDATE REQUEST_QUEUE SET STATE = ?1, DRIVE_ID = '', TAPE_ID = '' \
             WHERE REQ_NUM = ?2 AND REPL_NUM = ?3 AND POOL = ?4"
        };
        self.conn.lock().execute(
            sql,
            params![RequestState::New.code(), req_num, repl_num, pool],
        )?;
        Ok(())
    }

    /// Smallest still-resident job of a migration replica, in bytes.
    pub fn smallest_resident_job(&self, req_num: ReqNum, repl_num: i32) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let min: Option<i64> = conn
            .query_row(
                "SELECT MIN(FILE_SIZE) FROM JOB_QUEUE \
                 WHERE REQ_NUM = ?1 AND REPL_NUM = ?2 AND FILE_STATE = ?3",
                params![req_num, repl_num, FileState::Resident.code()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(min)
    }

    /// Resident jobs of one replica, smallest first, to maximise packing
    /// on the selected cartridge.
    pub fn resident_jobs_by_size(&self, req_num: ReqNum, repl_num: i32) -> Result<Vec<JobRecord>> {
        self.select_jobs(
            "SELECT OPERATION, FILE_NAME, REQ_NUM, REPL_NUM, FILE_SIZE, TAPE_ID, FILE_STATE \
             FROM JOB_QUEUE \
             WHERE REQ_NUM = ?1 AND REPL_NUM = ?2 AND FILE_STATE = ?3 \
             ORDER BY FILE_SIZE ASC, FILE_NAME ASC",
            params![req_num, repl_num, FileState::Resident.code()],
        )
    }

    /// Jobs of a recall request that live on one specific cartridge.
    pub fn recall_jobs_on_tape(&self, req_num: ReqNum, tape_id: &str) -> Result<Vec<JobRecord>> {
        self.select_jobs(
            "SELECT OPERATION, FILE_NAME, REQ_NUM, REPL_NUM, FILE_SIZE, TAPE_ID, FILE_STATE \
             FROM JOB_QUEUE \
             WHERE REQ_NUM = ?1 AND TAPE_ID = ?2 AND FILE_STATE IN (?3, ?4) \
             ORDER BY FILE_NAME ASC",
            params![
                req_num,
                tape_id,
                FileState::Premigrated.code(),
                FileState::Migrated.code()
            ],
        )
    }

    /// Distinct cartridges the recall request needs, id-ordered.
    pub fn recall_tapes(&self, req_num: ReqNum) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT TAPE_ID FROM JOB_QUEUE \
             WHERE REQ_NUM = ?1 AND TAPE_ID != '' AND FILE_STATE IN (?2, ?3) \
             ORDER BY TAPE_ID ASC",
        )?;
        let rows = stmt.query_map(
            params![
                req_num,
                FileState::Premigrated.code(),
                FileState::Migrated.code()
            ],
            |row| row.get::<_, String>(0),
        )?;
        let mut tapes = Vec::new();
        for row in rows {
            tapes.push(row?);
        }
        Ok(tapes)
    }

    /// All job rows, optionally filtered by request number.
    pub fn jobs(&self, req_num: Option<ReqNum>) -> Result<Vec<JobRecord>> {
        match req_num {
            Some(req) => self.select_jobs(
                "SELECT OPERATION, FILE_NAME, REQ_NUM, REPL_NUM, FILE_SIZE, TAPE_ID, FILE_STATE \
                 FROM JOB_QUEUE WHERE REQ_NUM = ?1 ORDER BY REQ_NUM, REPL_NUM, FILE_NAME",
                params![req],
            ),
            None => self.select_jobs(
                "SELECT OPERATION, FILE_NAME, REQ_NUM, REPL_NUM, FILE_SIZE, TAPE_ID, FILE_STATE \
                 FROM JOB_QUEUE ORDER BY REQ_NUM, REPL_NUM, FILE_NAME",
                params![],
            ),
        }
    }

    /// Record a job's state transition, optionally stamping the
    /// cartridge it landed on.
    pub fn update_job(
        &self,
        file_name: &str,
        req_num: ReqNum,
        repl_num: i32,
        state: FileState,
        tape_id: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        match tape_id {
            Some(tape) => conn.execute(
                "UPDATE JOB_QUEUE SET FILE_STATE = ?1, TAPE_ID = ?2 \
                 WHERE FILE_NAME = ?3 AND REQ_NUM = ?4 AND REPL_NUM = ?5",
                params![state.code(), tape, file_name, req_num, repl_num],
            )?,
            None => conn.execute(
                "UPDATE JOB_QUEUE SET FILE_STATE = ?1 \
                 WHERE FILE_NAME = ?2 AND REQ_NUM = ?3 AND REPL_NUM = ?4",
                params![state.code(), file_name, req_num, repl_num],
            )?,
        };
        Ok(())
    }

    /// True once no replica of the file is still resident; gates the
    /// stub transition for multi-replica migrations.
    pub fn file_fully_premigrated(&self, file_name: &str, req_num: ReqNum) -> Result<bool> {
        let open: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM JOB_QUEUE \
             WHERE FILE_NAME = ?1 AND REQ_NUM = ?2 AND FILE_STATE = ?3",
            params![file_name, req_num, FileState::Resident.code()],
            |row| row.get(0),
        )?;
        Ok(open == 0)
    }

    /// Transition every replica row of one file at once; used when the
    /// stub is cut and all copies become the authoritative data.
    pub fn set_file_state_all_replicas(
        &self,
        file_name: &str,
        req_num: ReqNum,
        state: FileState,
    ) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE JOB_QUEUE SET FILE_STATE = ?1 WHERE FILE_NAME = ?2 AND REQ_NUM = ?3",
            params![state.code(), file_name, req_num],
        )?;
        Ok(())
    }

    /// Terminal transition for one per-tape recall row.
    pub fn mark_recall_completed(&self, req_num: ReqNum, tape_id: &str) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE REQUEST_QUEUE SET STATE = ?1 WHERE REQ_NUM = ?2 AND TAPE_ID = ?3",
            params![RequestState::Completed.code(), req_num, tape_id],
        )?;
        Ok(())
    }

    /// Tape-full recovery: detach the cartridge from every job the
    /// replica has not written yet so another pool member can take them.
    pub fn clear_tape_on_resident(&self, req_num: ReqNum, repl_num: i32) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE JOB_QUEUE SET TAPE_ID = '' \
             WHERE REQ_NUM = ?1 AND REPL_NUM = ?2 AND FILE_STATE = ?3",
            params![req_num, repl_num, FileState::Resident.code()],
        )?;
        Ok(())
    }

    /// Per-state job counters for the status-poll response.
    pub fn job_counts(&self, req_num: ReqNum) -> Result<JobCounts> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT FILE_STATE, COUNT(*) FROM JOB_QUEUE WHERE REQ_NUM = ?1 GROUP BY FILE_STATE",
        )?;
        let mut counts = JobCounts::default();
        let rows = stmt.query_map(params![req_num], |row| {
            Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (code, count) = row?;
            match FileState::from_code(code) {
                Some(FileState::Resident) => counts.resident = count,
                Some(FileState::Premigrated) => counts.premigrated = count,
                Some(FileState::Migrated) => counts.migrated = count,
                Some(FileState::Failed) => counts.failed = count,
                None => {
                    return Err(StoreError::Corrupt(format!(
                        "unknown file state code {code}"
                    )))
                }
            }
        }
        Ok(counts)
    }

    /// True once every row of the request reached `COMPLETED`.
    pub fn request_done(&self, req_num: ReqNum) -> Result<bool> {
        let open: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM REQUEST_QUEUE WHERE REQ_NUM = ?1 AND STATE != ?2",
            params![req_num, RequestState::Completed.code()],
            |row| row.get(0),
        )?;
        Ok(open == 0)
    }

    /// Startup recovery: rows left `INPROGRESS` by a previous server
    /// generation lost their workers; put them back in line.
    pub fn recover_in_progress(&self) -> Result<usize> {
        let changed = self.conn.lock().execute(
            "UPDATE REQUEST_QUEUE SET STATE = ?1, DRIVE_ID = '' WHERE STATE = ?2",
            params![RequestState::New.code(), RequestState::InProgress.code()],
        )?;
        Ok(changed)
    }

    /// Number of `INPROGRESS` rows; the stop handler polls this down to
    /// zero before acknowledging.
    pub fn in_progress_count(&self) -> Result<i64> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM REQUEST_QUEUE WHERE STATE = ?1",
            params![RequestState::InProgress.code()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn select_requests(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<RequestRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, decode_request_raw)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(convert_request(row?)?);
        }
        Ok(records)
    }

    fn select_jobs(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<JobRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, decode_job_raw)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(convert_job(row?)?);
        }
        Ok(records)
    }
}

type RawRequest = (i32, i64, i32, i32, i32, String, String, String, i32);
type RawJob = (i32, String, i64, i32, i64, String, i32);

fn decode_request_raw(row: &Row<'_>) -> rusqlite::Result<RawRequest> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn decode_job_raw(row: &Row<'_>) -> rusqlite::Result<RawJob> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn convert_request(raw: RawRequest) -> Result<RequestRecord> {
    let (op, req_num, target, num_repl, repl_num, pool, tape_id, drive_id, state) = raw;
    Ok(RequestRecord {
        operation: Operation::from_code(op)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown operation code {op}")))?,
        req_num,
        target_state: FileState::from_code(target)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown file state code {target}")))?,
        num_repl,
        repl_num,
        pool,
        tape_id,
        drive_id,
        state: RequestState::from_code(state)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown request state code {state}")))?,
    })
}

fn convert_job(raw: RawJob) -> Result<JobRecord> {
    let (op, file_name, req_num, repl_num, file_size, tape_id, state) = raw;
    Ok(JobRecord {
        operation: Operation::from_code(op)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown operation code {op}")))?,
        file_name,
        req_num,
        repl_num,
        file_size,
        tape_id,
        file_state: FileState::from_code(state)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown file state code {state}")))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(op: Operation, req_num: i64) -> RequestRecord {
        RequestRecord::new(op, req_num, FileState::Migrated, 1, 0, "", "")
    }

    fn job(name: &str, req_num: i64, size: i64) -> JobRecord {
        JobRecord {
            operation: Operation::Migration,
            file_name: name.to_string(),
            req_num,
            repl_num: 0,
            file_size: size,
            tape_id: String::new(),
            file_state: FileState::Resident,
        }
    }

    #[test]
    fn test_new_requests_ordered_by_priority_then_reqnum() {
        let store = QueueStore::open_in_memory().unwrap();
        store.add_request(&request(Operation::Migration, 3)).unwrap();
        store.add_request(&request(Operation::SelRecall, 5)).unwrap();
        store.add_request(&request(Operation::Unmount, 1)).unwrap();
        store.add_request(&request(Operation::SelRecall, 2)).unwrap();

        let rows = store.new_requests().unwrap();
        let order: Vec<(Operation, i64)> =
            rows.iter().map(|r| (r.operation, r.req_num)).collect();
        assert_eq!(
            order,
            vec![
                (Operation::SelRecall, 2),
                (Operation::SelRecall, 5),
                (Operation::Migration, 3),
                (Operation::Unmount, 1),
            ]
        );
    }

    #[test]
    fn test_duplicate_job_detected() {
        let store = QueueStore::open_in_memory().unwrap();
        store.add_job(&job("/m/a", 7, 10)).unwrap();
        let err = store.add_job(&job("/m/a", 7, 10)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateJob { ref file_name } if file_name == "/m/a"
        ));
        // Same file under another request is fine.
        store.add_job(&job("/m/a", 8, 10)).unwrap();
    }

    #[test]
    fn test_reservation_round_trip() {
        let store = QueueStore::open_in_memory().unwrap();
        store.add_request(&request(Operation::SelRecall, 4)).unwrap();
        store.mark_in_progress(4, "dr0").unwrap();

        assert!(store.new_requests().unwrap().is_empty());
        assert_eq!(store.in_progress_count().unwrap(), 1);
        assert!(!store.request_done(4).unwrap());

        store.mark_completed(4).unwrap();
        assert_eq!(store.in_progress_count().unwrap(), 0);
        assert!(store.request_done(4).unwrap());
    }

    #[test]
    fn test_migration_replica_reservation_targets_one_row() {
        let store = QueueStore::open_in_memory().unwrap();
        for (repl, pool) in [(0, "p1"), (1, "p2")] {
            store
                .add_request(&RequestRecord::new(
                    Operation::Migration,
                    9,
                    FileState::Migrated,
                    2,
                    repl,
                    pool,
                    "",
                ))
                .unwrap();
        }
        store
            .mark_migration_in_progress(9, 0, "p1", "T00001", "dr0")
            .unwrap();

        let remaining = store.new_requests().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].pool, "p2");

        let all = store.requests(Some(9)).unwrap();
        let reserved = all.iter().find(|r| r.pool == "p1").unwrap();
        assert_eq!(reserved.tape_id, "T00001");
        assert_eq!(reserved.drive_id, "dr0");
        assert_eq!(reserved.state, RequestState::InProgress);
    }

    #[test]
    fn test_smallest_resident_job() {
        let store = QueueStore::open_in_memory().unwrap();
        assert_eq!(store.smallest_resident_job(7, 0).unwrap(), None);
        store.add_job(&job("/m/a", 7, 300)).unwrap();
        store.add_job(&job("/m/b", 7, 100)).unwrap();
        store.add_job(&job("/m/c", 7, 200)).unwrap();
        assert_eq!(store.smallest_resident_job(7, 0).unwrap(), Some(100));

        store
            .update_job("/m/b", 7, 0, FileState::Premigrated, Some("T00001"))
            .unwrap();
        assert_eq!(store.smallest_resident_job(7, 0).unwrap(), Some(200));
    }

    #[test]
    fn test_resident_jobs_sorted_by_size() {
        let store = QueueStore::open_in_memory().unwrap();
        store.add_job(&job("/m/big", 7, 900)).unwrap();
        store.add_job(&job("/m/small", 7, 10)).unwrap();
        store.add_job(&job("/m/mid", 7, 400)).unwrap();

        let names: Vec<String> = store
            .resident_jobs_by_size(7, 0)
            .unwrap()
            .into_iter()
            .map(|j| j.file_name)
            .collect();
        assert_eq!(names, vec!["/m/small", "/m/mid", "/m/big"]);
    }

    #[test]
    fn test_tape_full_requeue_clears_resident_assignments() {
        let store = QueueStore::open_in_memory().unwrap();
        let mut done = job("/m/done", 7, 10);
        done.tape_id = "T00001".into();
        done.file_state = FileState::Premigrated;
        store.add_job(&done).unwrap();
        let mut pending = job("/m/pending", 7, 10);
        pending.tape_id = "T00001".into();
        store.add_job(&pending).unwrap();

        store.clear_tape_on_resident(7, 0).unwrap();
        let jobs = store.jobs(Some(7)).unwrap();
        let done = jobs.iter().find(|j| j.file_name == "/m/done").unwrap();
        let pending = jobs.iter().find(|j| j.file_name == "/m/pending").unwrap();
        assert_eq!(done.tape_id, "T00001");
        assert_eq!(pending.tape_id, "");
    }

    #[test]
    fn test_job_counts_aggregate_states() {
        let store = QueueStore::open_in_memory().unwrap();
        store.add_job(&job("/m/a", 7, 1)).unwrap();
        store.add_job(&job("/m/b", 7, 1)).unwrap();
        store.add_job(&job("/m/c", 7, 1)).unwrap();
        store
            .update_job("/m/a", 7, 0, FileState::Migrated, None)
            .unwrap();
        store
            .update_job("/m/b", 7, 0, FileState::Failed, None)
            .unwrap();

        let counts = store.job_counts(7).unwrap();
        assert_eq!(counts.resident, 1);
        assert_eq!(counts.migrated, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.premigrated, 0);
    }

    #[test]
    fn test_requeue_replica_keep_and_clear_tape() {
        let store = QueueStore::open_in_memory().unwrap();
        store
            .add_request(&RequestRecord::new(
                Operation::Migration,
                11,
                FileState::Premigrated,
                1,
                0,
                "p1",
                "",
            ))
            .unwrap();
        store
            .mark_migration_in_progress(11, 0, "p1", "T00001", "dr1")
            .unwrap();

        store.requeue_replica(11, 0, "p1", true).unwrap();
        let row = &store.requests(Some(11)).unwrap()[0];
        assert_eq!(row.state, RequestState::New);
        assert_eq!(row.tape_id, "T00001");
        assert_eq!(row.drive_id, "");

        store
            .mark_migration_in_progress(11, 0, "p1", "T00001", "dr1")
            .unwrap();
        store.requeue_replica(11, 0, "p1", false).unwrap();
        let row = &store.requests(Some(11)).unwrap()[0];
        assert_eq!(row.tape_id, "");
    }

    #[test]
    fn test_recover_in_progress_requeues_orphans() {
        let store = QueueStore::open_in_memory().unwrap();
        store.add_request(&request(Operation::SelRecall, 1)).unwrap();
        store.add_request(&request(Operation::Migration, 2)).unwrap();
        store.mark_in_progress(1, "dr0").unwrap();

        assert_eq!(store.recover_in_progress().unwrap(), 1);
        assert_eq!(store.in_progress_count().unwrap(), 0);
        let rows = store.requests(Some(1)).unwrap();
        assert_eq!(rows[0].state, RequestState::New);
        assert_eq!(rows[0].drive_id, "");
    }

    #[test]
    fn test_persisted_queue_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("queue.db");
        {
            let store = QueueStore::open(&path).unwrap();
            store.add_request(&request(Operation::Format, 2)).unwrap();
        }
        let store = QueueStore::open(&path).unwrap();
        let rows = store.new_requests().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].operation, Operation::Format);
    }
}
