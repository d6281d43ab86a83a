//! Daemon bootstrap and accept loop

use std::fs;
use std::io;
use std::os::unix::net::UnixListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use spool_config::DaemonConfig;
use spool_core::backend::TapeLibrary;
use spool_core::emulator::{DirConnector, DirLibrary};
use spool_core::Context;
use spool_inventory::Inventory;
use spool_sched::{Scheduler, Services, SubServer};
use spool_store::QueueStore;

use crate::dispatch::Dispatcher;
use crate::lockfile::LockFile;
use crate::signal::install_wakeup;
use crate::Result;

/// Poll interval of the accept loop between connection attempts; the
/// loop re-checks the termination flag at this cadence in addition to
/// the `SIGUSR1` nudge.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// The assembled daemon.
pub struct Server {
    config: DaemonConfig,
    services: Services,
    subs: Arc<SubServer>,
    _lock: LockFile,
}

impl Server {
    /// Wire everything up: lock file, session key, library backend,
    /// inventory, queue store and shared context.
    pub fn bootstrap(config: DaemonConfig) -> Result<Self> {
        fs::create_dir_all(&config.runtime_dir)?;
        let lock = LockFile::acquire(&config.lock_path())?;

        let session_key = generate_key();
        fs::write(config.key_path(), format!("{session_key:016x}\n"))?;

        let tapes: Vec<(&str, u64)> = config
            .library
            .tapes
            .iter()
            .map(|t| (t.id.as_str(), t.capacity_mib))
            .collect();
        let library = Arc::new(DirLibrary::create(
            &config.library_root(),
            config.library.drives,
            &tapes,
        )?);
        let library_handle: Arc<dyn TapeLibrary> = library.clone();
        let inventory = Arc::new(Inventory::open(library_handle, config.pools_path())?);
        let store = Arc::new(QueueStore::open(&config.db_path())?);
        let recovered = store.recover_in_progress()?;
        if recovered > 0 {
            info!(recovered, "requeued requests orphaned by the previous run");
        }
        let ctx = Arc::new(Context::new(session_key));

        let services = Services {
            ctx,
            store,
            inventory,
            library,
            connector: Arc::new(DirConnector),
        };

        Ok(Self {
            config,
            services,
            subs: Arc::new(SubServer::new()),
            _lock: lock,
        })
    }

    /// The shared collaborators, exposed for embedding in tests.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Run to completion: scheduler thread, accept loop, shutdown
    /// drain. Returns once a stop request went through.
    pub fn run(self) -> Result<()> {
        install_wakeup()?;

        let scheduler =
            Scheduler::new(self.services.clone(), Arc::clone(&self.subs)).spawn();

        let socket_path = self.config.socket_path();
        let _ = fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;
        info!(
            socket = %socket_path.display(),
            pid = std::process::id(),
            "spoold ready"
        );

        let mut connection_id: u64 = 0;
        while !self.services.ctx.terminate() {
            match listener.accept() {
                Ok((stream, _)) => {
                    connection_id += 1;
                    stream.set_nonblocking(false)?;
                    let dispatcher = Dispatcher::new(self.services.clone());
                    let name = format!("dispatch-{connection_id}");
                    debug!(connection = connection_id, "client connected");
                    thread::Builder::new()
                        .name(name)
                        .spawn(move || dispatcher.run(stream))?;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    if self.services.ctx.terminate() {
                        break;
                    }
                    error!(%err, "accept failed");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        info!("accept loop left, waiting for the scheduler to drain");
        self.services.ctx.scheduler().notify();
        if scheduler.join().is_err() {
            error!("scheduler thread panicked");
        }
        let _ = fs::remove_file(&socket_path);
        info!("spoold stopped");
        Ok(())
    }
}

fn generate_key() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServerError;

    fn test_config(dir: &std::path::Path) -> DaemonConfig {
        DaemonConfig {
            runtime_dir: dir.to_path_buf(),
            log: "warn".into(),
            library: spool_config::LibraryConfig {
                backend: "sim".into(),
                root: None,
                drives: 1,
                tapes: vec![spool_config::TapeConfig {
                    id: "T00001".into(),
                    capacity_mib: 8,
                }],
            },
        }
    }

    #[test]
    fn test_bootstrap_writes_key_and_holds_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let server = Server::bootstrap(config.clone()).unwrap();

        let key_raw = fs::read_to_string(config.key_path()).unwrap();
        let key = u64::from_str_radix(key_raw.trim(), 16).unwrap();
        assert_eq!(key, server.services().ctx.session_key());
        assert!(LockFile::is_held(&config.lock_path()));

        // A second instance on the same runtime dir must refuse.
        assert!(matches!(
            Server::bootstrap(config),
            Err(ServerError::AlreadyRunning(_))
        ));
    }

    #[test]
    fn test_bootstrap_builds_inventory_from_config() {
        let tmp = tempfile::tempdir().unwrap();
        let server = Server::bootstrap(test_config(tmp.path())).unwrap();
        let services = server.services();
        assert_eq!(services.inventory.drives().len(), 1);
        assert_eq!(services.inventory.cartridges().len(), 1);
        assert!(services.store.new_requests().unwrap().is_empty());
    }
}
