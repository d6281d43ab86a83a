//! Directory-backed library emulator
//!
//! Emulates a tape library on a plain directory tree: one subdirectory
//! per cartridge, capacity accounted in memory, slot occupancy tracked
//! like the robot would. Used by the daemon's `sim` backend and by the
//! test suites; the semantics the core observes (mount states, tape-full
//! on write, format preconditions) match the real wrapper.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{
    BackendError, DriveSlot, FsConnector, LibraryScan, TapeLibrary, TapeSlot,
};
use crate::types::FileState;

const MIB: u64 = 1024 * 1024;

/// Marker file that tags a filesystem as managed.
pub const MANAGED_MARKER: &str = ".spool-managed";

#[derive(Debug)]
struct TapeMeta {
    total_cap_mib: u64,
    used_bytes: u64,
    slot: Option<u32>,
    formatted: bool,
}

/// A tape library living in a directory.
#[derive(Debug)]
pub struct DirLibrary {
    root: PathBuf,
    drives: Vec<DriveSlot>,
    tapes: Mutex<HashMap<String, TapeMeta>>,
}

impl DirLibrary {
    /// Build a library with `num_drives` empty drives and the given
    /// `(tape id, capacity MiB)` cartridges, all unmounted.
    pub fn create(
        root: &Path,
        num_drives: u32,
        tapes: &[(&str, u64)],
    ) -> Result<Self, BackendError> {
        fs::create_dir_all(root)?;
        let drives = (0..num_drives)
            .map(|slot| DriveSlot {
                id: format!("dr{slot}"),
                devname: format!("/dev/sg{slot}"),
                slot,
            })
            .collect();

        let mut meta = HashMap::new();
        for (id, cap) in tapes {
            let dir = root.join(id);
            fs::create_dir_all(&dir)?;
            // A restart finds earlier contents on disk; account for
            // them so remaining capacity stays truthful.
            meta.insert(
                (*id).to_string(),
                TapeMeta {
                    total_cap_mib: *cap,
                    used_bytes: dir_size(&dir)?,
                    slot: None,
                    formatted: false,
                },
            );
        }

        Ok(Self {
            root: root.to_path_buf(),
            drives,
            tapes: Mutex::new(meta),
        })
    }

    fn drive_slot(&self, drive_id: &str) -> Result<u32, BackendError> {
        self.drives
            .iter()
            .find(|d| d.id == drive_id)
            .map(|d| d.slot)
            .ok_or_else(|| BackendError::UnknownDrive(drive_id.to_string()))
    }

    fn tape_path(&self, tape_id: &str, name: &str) -> PathBuf {
        self.root.join(tape_id).join(name.trim_start_matches('/'))
    }

    fn load(&self, drive_id: &str, tape_id: &str) -> Result<(), BackendError> {
        let slot = self.drive_slot(drive_id)?;
        let mut tapes = self.tapes.lock();
        if tapes.values().any(|t| t.slot == Some(slot)) {
            return Err(BackendError::BadPosition {
                tape: tape_id.to_string(),
                operation: "load",
            });
        }
        let meta = tapes
            .get_mut(tape_id)
            .ok_or_else(|| BackendError::UnknownTape(tape_id.to_string()))?;
        meta.slot = Some(slot);
        debug!(drive_id, tape_id, slot, "cartridge loaded");
        Ok(())
    }
}

impl TapeLibrary for DirLibrary {
    fn scan(&self) -> Result<LibraryScan, BackendError> {
        let tapes = self.tapes.lock();
        Ok(LibraryScan {
            drives: self.drives.clone(),
            tapes: tapes
                .iter()
                .map(|(id, meta)| TapeSlot {
                    id: id.clone(),
                    slot: meta.slot,
                    total_cap_mib: meta.total_cap_mib,
                    remaining_cap_mib: meta
                        .total_cap_mib
                        .saturating_sub(meta.used_bytes.div_ceil(MIB)),
                })
                .collect(),
        })
    }

    fn mount(&self, drive_id: &str, tape_id: &str) -> Result<(), BackendError> {
        self.load(drive_id, tape_id)
    }

    fn move_to_drive(&self, drive_id: &str, tape_id: &str) -> Result<(), BackendError> {
        self.load(drive_id, tape_id)
    }

    fn unmount(&self, drive_id: &str, tape_id: &str) -> Result<(), BackendError> {
        let slot = self.drive_slot(drive_id)?;
        let mut tapes = self.tapes.lock();
        let meta = tapes
            .get_mut(tape_id)
            .ok_or_else(|| BackendError::UnknownTape(tape_id.to_string()))?;
        if meta.slot != Some(slot) {
            return Err(BackendError::BadPosition {
                tape: tape_id.to_string(),
                operation: "unmount",
            });
        }
        meta.slot = None;
        debug!(drive_id, tape_id, "cartridge unloaded");
        Ok(())
    }

    fn format(&self, drive_id: &str, tape_id: &str) -> Result<(), BackendError> {
        let slot = self.drive_slot(drive_id)?;
        let mut tapes = self.tapes.lock();
        let meta = tapes
            .get_mut(tape_id)
            .ok_or_else(|| BackendError::UnknownTape(tape_id.to_string()))?;
        if meta.slot != Some(slot) {
            return Err(BackendError::BadPosition {
                tape: tape_id.to_string(),
                operation: "format",
            });
        }
        if meta.formatted {
            return Err(BackendError::AlreadyFormatted(tape_id.to_string()));
        }
        let dir = self.root.join(tape_id);
        fs::remove_dir_all(&dir)?;
        fs::create_dir_all(&dir)?;
        meta.used_bytes = 0;
        meta.formatted = true;
        Ok(())
    }

    fn check(&self, drive_id: &str, tape_id: &str) -> Result<(), BackendError> {
        let slot = self.drive_slot(drive_id)?;
        let tapes = self.tapes.lock();
        let meta = tapes
            .get(tape_id)
            .ok_or_else(|| BackendError::UnknownTape(tape_id.to_string()))?;
        if meta.slot != Some(slot) {
            return Err(BackendError::BadPosition {
                tape: tape_id.to_string(),
                operation: "check",
            });
        }
        Ok(())
    }

    fn write_file(&self, tape_id: &str, name: &str, data: &[u8]) -> Result<(), BackendError> {
        {
            let mut tapes = self.tapes.lock();
            let meta = tapes
                .get_mut(tape_id)
                .ok_or_else(|| BackendError::UnknownTape(tape_id.to_string()))?;
            let cap = meta.total_cap_mib * MIB;
            if meta.used_bytes + data.len() as u64 > cap {
                return Err(BackendError::TapeFull(tape_id.to_string()));
            }
            meta.used_bytes += data.len() as u64;
        }
        let path = self.tape_path(tape_id, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }

    fn read_file(&self, tape_id: &str, name: &str) -> Result<Vec<u8>, BackendError> {
        if !self.tapes.lock().contains_key(tape_id) {
            return Err(BackendError::UnknownTape(tape_id.to_string()));
        }
        Ok(fs::read(self.tape_path(tape_id, name))?)
    }

    fn remaining_mib(&self, tape_id: &str) -> Result<u64, BackendError> {
        let tapes = self.tapes.lock();
        let meta = tapes
            .get(tape_id)
            .ok_or_else(|| BackendError::UnknownTape(tape_id.to_string()))?;
        Ok(meta
            .total_cap_mib
            .saturating_sub(meta.used_bytes.div_ceil(MIB)))
    }
}

fn dir_size(dir: &Path) -> Result<u64, BackendError> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

/// Connector that works directly on the local filesystem. Migration
/// attributes live in a sidecar file next to the managed file, standing
/// in for the extended attributes the real connector writes.
#[derive(Debug, Default)]
pub struct DirConnector;

fn sidecar_path(path: &Path) -> Result<PathBuf, BackendError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BackendError::AttrFormat(path.display().to_string()))?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(format!(".{name}.spoolattr")))
}

impl FsConnector for DirConnector {
    fn manage_fs(&self, path: &Path) -> Result<(), BackendError> {
        let meta = fs::metadata(path)
            .map_err(|_| BackendError::FsCheck(path.display().to_string()))?;
        if !meta.is_dir() {
            return Err(BackendError::FsCheck(path.display().to_string()));
        }
        if path.join(MANAGED_MARKER).exists() {
            return Err(BackendError::AlreadyManaged(path.display().to_string()));
        }
        fs::write(path.join(MANAGED_MARKER), b"")
            .map_err(|_| BackendError::FsAdd(path.display().to_string()))?;
        Ok(())
    }

    fn is_managed(&self, path: &Path) -> Result<bool, BackendError> {
        Ok(path.join(MANAGED_MARKER).exists())
    }

    fn file_size(&self, path: &Path) -> Result<u64, BackendError> {
        Ok(fs::metadata(path)?.len())
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, BackendError> {
        Ok(fs::read(path)?)
    }

    fn restore_file(&self, path: &Path, data: &[u8]) -> Result<(), BackendError> {
        fs::write(path, data)?;
        Ok(())
    }

    fn stub_file(&self, path: &Path) -> Result<(), BackendError> {
        let file = fs::OpenOptions::new().write(true).open(path)?;
        file.set_len(0).map_err(io::Error::from)?;
        Ok(())
    }

    fn set_attrs(
        &self,
        path: &Path,
        tape_id: &str,
        state: FileState,
    ) -> Result<(), BackendError> {
        fs::write(sidecar_path(path)?, format!("{tape_id}\t{}", state.code()))?;
        Ok(())
    }

    fn attrs(&self, path: &Path) -> Result<Option<(String, FileState)>, BackendError> {
        let sidecar = sidecar_path(path)?;
        let raw = match fs::read_to_string(&sidecar) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut parts = raw.splitn(2, '\t');
        let tape = parts.next().unwrap_or_default().to_string();
        let state = parts
            .next()
            .and_then(|s| s.trim().parse::<i32>().ok())
            .and_then(FileState::from_code)
            .ok_or_else(|| BackendError::AttrFormat(path.display().to_string()))?;
        Ok(Some((tape, state)))
    }

    fn clear_attrs(&self, path: &Path) -> Result<(), BackendError> {
        match fs::remove_file(sidecar_path(path)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
