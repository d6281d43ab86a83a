//! End-to-end daemon tests
//!
//! Each test boots a real `spoold` instance on a temp runtime dir with
//! the directory-backed library and drives it over the Unix socket the
//! way the CLI would.

use std::fs;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use spool_config::{DaemonConfig, LibraryConfig, TapeConfig};
use spool_core::FileState;
use spool_proto::{FramedStream, Request, Response};
use spool_server::{LockFile, Server};

struct TestServer {
    key: u64,
    config: DaemonConfig,
    handle: Option<JoinHandle<()>>,
    _tmp: tempfile::TempDir,
}

impl TestServer {
    fn start(tapes: &[(&str, u64)], drives: u32) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let config = DaemonConfig {
            runtime_dir: tmp.path().join("run"),
            log: "warn".into(),
            library: LibraryConfig {
                backend: "sim".into(),
                root: None,
                drives,
                tapes: tapes
                    .iter()
                    .map(|(id, cap)| TapeConfig {
                        id: (*id).to_string(),
                        capacity_mib: *cap,
                    })
                    .collect(),
            },
        };

        let server = Server::bootstrap(config.clone()).unwrap();
        let key = server.services().ctx.session_key();
        let handle = thread::spawn(move || server.run().unwrap());

        let socket = config.socket_path();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !socket.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(socket.exists(), "daemon did not come up");

        Self {
            key,
            config,
            handle: Some(handle),
            _tmp: tmp,
        }
    }

    fn connect(&self) -> FramedStream<UnixStream> {
        let stream = UnixStream::connect(self.config.socket_path()).unwrap();
        FramedStream::new(stream)
    }

    /// Protocol handshake: allocate a request number.
    fn handshake(&self, framed: &mut FramedStream<UnixStream>) -> i64 {
        framed.send_request(&Request::ReqNum { key: self.key }).unwrap();
        match framed.recv_response().unwrap() {
            Response::ReqNum { success, req_num } => {
                assert!(success);
                req_num
            }
            other => panic!("unexpected handshake response: {other:?}"),
        }
    }

    fn pool_create(&self, pool: &str) -> i32 {
        let mut framed = self.connect();
        self.handshake(&mut framed);
        framed
            .send_request(&Request::PoolCreate {
                key: self.key,
                pool: pool.into(),
            })
            .unwrap();
        match framed.recv_response().unwrap() {
            Response::Pool { error, .. } => error,
            other => panic!("unexpected pool response: {other:?}"),
        }
    }

    fn pool_add(&self, pool: &str, tape: &str) -> i32 {
        let mut framed = self.connect();
        self.handshake(&mut framed);
        framed
            .send_request(&Request::PoolAdd {
                key: self.key,
                pool: pool.into(),
                tapes: vec![tape.into()],
            })
            .unwrap();
        match framed.recv_response().unwrap() {
            Response::Pool { error, .. } => error,
            other => panic!("unexpected pool response: {other:?}"),
        }
    }

    /// Drive a whole migration: admission, object stream, status poll.
    /// Returns the final counters `(resident, premigrated, migrated,
    /// failed)`.
    fn migrate(
        &self,
        pools: &str,
        target: FileState,
        files: &[&Path],
    ) -> (i32, (i64, i64, i64, i64)) {
        let mut framed = self.connect();
        let req_num = self.handshake(&mut framed);
        framed
            .send_request(&Request::Migrate {
                key: self.key,
                req_num,
                pid: std::process::id(),
                pools: pools.into(),
                target_state: target.code(),
            })
            .unwrap();
        let error = match framed.recv_response().unwrap() {
            Response::Migrate { error, .. } => error,
            other => panic!("unexpected migrate response: {other:?}"),
        };
        if error != 0 {
            return (error, (0, 0, 0, 0));
        }

        let mut names: Vec<String> = files
            .iter()
            .map(|p| p.to_str().unwrap().to_string())
            .collect();
        names.push(String::new());
        framed
            .send_request(&Request::SendObjects {
                key: self.key,
                req_num,
                file_names: names,
            })
            .unwrap();
        match framed.recv_response().unwrap() {
            Response::SendObjects { success, .. } => assert!(success),
            other => panic!("unexpected objects response: {other:?}"),
        }

        (0, self.poll_status(&mut framed, req_num))
    }

    fn poll_status(
        &self,
        framed: &mut FramedStream<UnixStream>,
        req_num: i64,
    ) -> (i64, i64, i64, i64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            assert!(Instant::now() < deadline, "request {req_num} never finished");
            framed
                .send_request(&Request::ReqStatus {
                    key: self.key,
                    req_num,
                    pid: std::process::id(),
                })
                .unwrap();
            match framed.recv_response().unwrap() {
                Response::ReqStatus {
                    success,
                    resident,
                    premigrated,
                    migrated,
                    failed,
                    done,
                    ..
                } => {
                    assert!(success);
                    if done {
                        return (resident, premigrated, migrated, failed);
                    }
                }
                other => panic!("unexpected status response: {other:?}"),
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    fn recall(&self, target: FileState, files: &[&Path]) -> (i64, i64, i64, i64) {
        let mut framed = self.connect();
        let req_num = self.handshake(&mut framed);
        framed
            .send_request(&Request::SelRecall {
                key: self.key,
                req_num,
                pid: std::process::id(),
                target_state: target.code(),
            })
            .unwrap();
        match framed.recv_response().unwrap() {
            Response::SelRecall { error, .. } => assert_eq!(error, 0),
            other => panic!("unexpected recall response: {other:?}"),
        }

        let mut names: Vec<String> = files
            .iter()
            .map(|p| p.to_str().unwrap().to_string())
            .collect();
        names.push(String::new());
        framed
            .send_request(&Request::SendObjects {
                key: self.key,
                req_num,
                file_names: names,
            })
            .unwrap();
        match framed.recv_response().unwrap() {
            Response::SendObjects { success, .. } => assert!(success),
            other => panic!("unexpected objects response: {other:?}"),
        }

        self.poll_status(&mut framed, req_num)
    }

    fn stop(&mut self) {
        let mut framed = self.connect();
        self.handshake(&mut framed);
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            framed
                .send_request(&Request::Stop {
                    key: self.key,
                    req_num: 0,
                    forced: false,
                    finish: false,
                })
                .unwrap();
            match framed.recv_response().unwrap() {
                Response::Stop { success } => {
                    if success {
                        break;
                    }
                }
                other => panic!("unexpected stop response: {other:?}"),
            }
            assert!(Instant::now() < deadline, "server never drained");
            thread::sleep(Duration::from_millis(50));
        }
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }

    fn data_dir(&self) -> PathBuf {
        let dir = self._tmp.path().join("data");
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

#[test]
fn test_empty_stop_releases_lock_immediately() {
    let mut server = TestServer::start(&[("T00001", 8)], 1);

    let mut framed = server.connect();
    framed
        .send_request(&Request::Stop {
            key: server.key,
            req_num: 0,
            forced: false,
            finish: false,
        })
        .unwrap();
    match framed.recv_response().unwrap() {
        Response::Stop { success } => assert!(success),
        other => panic!("unexpected stop response: {other:?}"),
    }

    server.handle.take().unwrap().join().unwrap();
    assert!(!LockFile::is_held(&server.config.lock_path()));
}

#[test]
fn test_status_reports_server_pid() {
    let mut server = TestServer::start(&[("T00001", 8)], 1);
    let mut framed = server.connect();
    server.handshake(&mut framed);
    framed
        .send_request(&Request::Status {
            key: server.key,
            req_num: 0,
        })
        .unwrap();
    match framed.recv_response().unwrap() {
        Response::Status { success, pid } => {
            assert!(success);
            assert_eq!(pid, std::process::id());
        }
        other => panic!("unexpected status response: {other:?}"),
    }
    server.stop();
}

#[test]
fn test_foreign_session_key_drops_connection() {
    let mut server = TestServer::start(&[("T00001", 8)], 1);
    let mut framed = server.connect();
    framed
        .send_request(&Request::Status {
            key: server.key ^ 0xdead_beef,
            req_num: 0,
        })
        .unwrap();
    assert!(framed.recv_response().is_err());
    server.stop();
}

#[test]
fn test_migration_rejects_more_than_three_pools() {
    let mut server = TestServer::start(&[("T00001", 8)], 1);
    let mut framed = server.connect();
    let req_num = server.handshake(&mut framed);
    framed
        .send_request(&Request::Migrate {
            key: server.key,
            req_num,
            pid: 0,
            pools: "p1,p2,p3,p4".into(),
            target_state: FileState::Migrated.code(),
        })
        .unwrap();
    match framed.recv_response().unwrap() {
        Response::Migrate { error, .. } => assert_eq!(error, 1011),
        other => panic!("unexpected migrate response: {other:?}"),
    }
    server.stop();
}

#[test]
fn test_migration_rejects_unknown_pool() {
    let mut server = TestServer::start(&[("T00001", 8)], 1);
    let mut framed = server.connect();
    let req_num = server.handshake(&mut framed);
    framed
        .send_request(&Request::Migrate {
            key: server.key,
            req_num,
            pid: 0,
            pools: "ghost".into(),
            target_state: FileState::Migrated.code(),
        })
        .unwrap();
    match framed.recv_response().unwrap() {
        Response::Migrate { error, .. } => assert_eq!(error, 1012),
        other => panic!("unexpected migrate response: {other:?}"),
    }
    server.stop();
}

#[test]
fn test_duplicate_filename_is_reported_per_file_and_batch_succeeds() {
    let mut server = TestServer::start(&[("T00001", 8)], 1);
    assert_eq!(server.pool_create("p1"), 0);
    assert_eq!(server.pool_add("p1", "T00001"), 0);

    let file = server.data_dir().join("a");
    fs::write(&file, b"payload").unwrap();
    let name = file.to_str().unwrap().to_string();

    let mut framed = server.connect();
    let req_num = server.handshake(&mut framed);
    framed
        .send_request(&Request::Migrate {
            key: server.key,
            req_num,
            pid: 0,
            pools: "p1".into(),
            target_state: FileState::Premigrated.code(),
        })
        .unwrap();
    match framed.recv_response().unwrap() {
        Response::Migrate { error, .. } => assert_eq!(error, 0),
        other => panic!("unexpected migrate response: {other:?}"),
    }

    // First batch queues the file.
    framed
        .send_request(&Request::SendObjects {
            key: server.key,
            req_num,
            file_names: vec![name.clone()],
        })
        .unwrap();
    match framed.recv_response().unwrap() {
        Response::SendObjects {
            success,
            diagnostics,
            ..
        } => {
            assert!(success);
            assert!(diagnostics.is_empty());
        }
        other => panic!("unexpected objects response: {other:?}"),
    }

    // Second batch repeats it and terminates the stream; the duplicate
    // is diagnosed per-file while the batch still succeeds.
    framed
        .send_request(&Request::SendObjects {
            key: server.key,
            req_num,
            file_names: vec![name, String::new()],
        })
        .unwrap();
    match framed.recv_response().unwrap() {
        Response::SendObjects {
            success,
            diagnostics,
            ..
        } => {
            assert!(success);
            assert_eq!(diagnostics.len(), 1);
        }
        other => panic!("unexpected objects response: {other:?}"),
    }

    let (_, premigrated, _, failed) = server.poll_status(&mut framed, req_num);
    assert_eq!(premigrated, 1);
    assert_eq!(failed, 0);
    server.stop();
}

#[test]
fn test_migrate_then_recall_round_trip() {
    let mut server = TestServer::start(&[("T00001", 64)], 2);
    assert_eq!(server.pool_create("p1"), 0);
    assert_eq!(server.pool_add("p1", "T00001"), 0);

    let file = server.data_dir().join("movie.bin");
    let content: Vec<u8> = (0..32_768u32).map(|i| (i % 251) as u8).collect();
    fs::write(&file, &content).unwrap();

    // Migrate to full MIGRATED state: the disk copy becomes a stub.
    let (error, (_, _, migrated, failed)) =
        server.migrate("p1", FileState::Migrated, &[&file]);
    assert_eq!(error, 0);
    assert_eq!(migrated, 1);
    assert_eq!(failed, 0);
    assert_eq!(fs::metadata(&file).unwrap().len(), 0, "file should be stubbed");

    // Recall back to resident: byte-identical content.
    let (resident, _, _, failed) = server.recall(FileState::Resident, &[&file]);
    assert_eq!(resident, 1);
    assert_eq!(failed, 0);
    assert_eq!(fs::read(&file).unwrap(), content);

    server.stop();
}

#[test]
fn test_recall_uses_already_mounted_cartridge() {
    let mut server = TestServer::start(&[("T00001", 64)], 1);
    assert_eq!(server.pool_create("p1"), 0);
    assert_eq!(server.pool_add("p1", "T00001"), 0);

    let file = server.data_dir().join("hot.bin");
    fs::write(&file, vec![1u8; 1024]).unwrap();

    // The migration leaves T00001 mounted in the only drive.
    let (error, (_, premigrated, _, _)) =
        server.migrate("p1", FileState::Premigrated, &[&file]);
    assert_eq!(error, 0);
    assert_eq!(premigrated, 1);

    // The recall finds T00001 still mounted and reuses the drive
    // without any further motion.
    let (resident, _, _, failed) = server.recall(FileState::Resident, &[&file]);
    assert_eq!(resident, 1);
    assert_eq!(failed, 0);

    server.stop();
}

#[test]
fn test_info_streams_end_with_sentinels() {
    let mut server = TestServer::start(&[("T00001", 8), ("T00002", 8)], 2);
    assert_eq!(server.pool_create("p1"), 0);
    assert_eq!(server.pool_add("p1", "T00001"), 0);

    let mut framed = server.connect();
    server.handshake(&mut framed);
    framed
        .send_request(&Request::InfoTapes { key: server.key })
        .unwrap();
    let mut rows = Vec::new();
    loop {
        let response = framed.recv_response().unwrap();
        if response.is_sentinel() {
            break;
        }
        rows.push(response);
    }
    assert_eq!(rows.len(), 2);
    match &rows[0] {
        Response::InfoTape { id, pool, state, .. } => {
            assert_eq!(id, "T00001");
            assert_eq!(pool, "p1");
            assert_eq!(state, "unmounted");
        }
        other => panic!("unexpected info row: {other:?}"),
    }

    let mut framed = server.connect();
    server.handshake(&mut framed);
    framed
        .send_request(&Request::InfoDrives { key: server.key })
        .unwrap();
    let mut count = 0;
    loop {
        let response = framed.recv_response().unwrap();
        if response.is_sentinel() {
            break;
        }
        count += 1;
    }
    assert_eq!(count, 2);

    let mut framed = server.connect();
    server.handshake(&mut framed);
    framed
        .send_request(&Request::InfoPools { key: server.key })
        .unwrap();
    match framed.recv_response().unwrap() {
        Response::InfoPool {
            name, num_tapes, ..
        } => {
            assert_eq!(name, "p1");
            assert_eq!(num_tapes, 1);
        }
        other => panic!("unexpected pool row: {other:?}"),
    }
    assert!(framed.recv_response().unwrap().is_sentinel());

    server.stop();
}

#[test]
fn test_pool_protocol_validation_codes() {
    let mut server = TestServer::start(&[("T00001", 8)], 1);
    assert_eq!(server.pool_create("p1"), 0);
    // Duplicate create.
    assert_eq!(server.pool_create("p1"), 1007);
    // Unknown tape.
    assert_eq!(server.pool_add("p1", "GHOST1"), 1009);
    assert_eq!(server.pool_add("p1", "T00001"), 0);
    // Tape already pooled.
    assert_eq!(server.pool_add("p1", "T00001"), 1005);

    // Pool file persisted for the next daemon generation.
    let pools = fs::read_to_string(server.config.pools_path()).unwrap();
    assert!(pools.contains("p1\tT00001"));

    server.stop();
}

#[test]
fn test_retrieve_triggers_inventorize() {
    let mut server = TestServer::start(&[("T00001", 8)], 1);
    let mut framed = server.connect();
    server.handshake(&mut framed);
    framed
        .send_request(&Request::Retrieve { key: server.key })
        .unwrap();
    match framed.recv_response().unwrap() {
        Response::Retrieve { error } => assert_eq!(error, 0),
        other => panic!("unexpected retrieve response: {other:?}"),
    }
    server.stop();
}

#[test]
fn test_add_reports_already_managed() {
    let mut server = TestServer::start(&[("T00001", 8)], 1);
    let dir = server.data_dir();

    let mut framed = server.connect();
    server.handshake(&mut framed);
    framed
        .send_request(&Request::Add {
            key: server.key,
            req_num: 0,
            managed_fs: dir.to_str().unwrap().into(),
            mount_point: dir.to_str().unwrap().into(),
            fs_name: "data".into(),
        })
        .unwrap();
    match framed.recv_response().unwrap() {
        Response::Add { outcome, error } => {
            assert_eq!(outcome, spool_proto::AddOutcome::Success);
            assert_eq!(error, 0);
        }
        other => panic!("unexpected add response: {other:?}"),
    }

    let mut framed = server.connect();
    server.handshake(&mut framed);
    framed
        .send_request(&Request::Add {
            key: server.key,
            req_num: 0,
            managed_fs: dir.to_str().unwrap().into(),
            mount_point: dir.to_str().unwrap().into(),
            fs_name: "data".into(),
        })
        .unwrap();
    match framed.recv_response().unwrap() {
        Response::Add { outcome, .. } => {
            assert_eq!(outcome, spool_proto::AddOutcome::AlreadyAdded);
        }
        other => panic!("unexpected add response: {other:?}"),
    }

    server.stop();
}
