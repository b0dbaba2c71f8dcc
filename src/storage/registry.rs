//! File Registry
//!
//! Owns every open file of a log directory behind a small integer handle.
//!
//! ## Concurrency:
//! - The slot table is protected by RwLock (I/O lookups are shared, open/close exclusive)
//! - Handles are reference counted per name; freed slots are reused
//! - Each file has its own Mutex so positional I/O on different files never contends
//! - All methods use `&self`; the registry is shared as `Arc<FileRegistry>`

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{RepError, Result};

/// Handle to a file owned by a [`FileRegistry`]
///
/// Slots are reused once a file is fully closed; the generation tells a
/// handle to a closed file apart from the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle {
    index: u32,
    generation: u32,
}

struct OpenFile {
    name: String,
    path: PathBuf,
    file: Mutex<File>,
}

struct Slot {
    generation: u32,
    /// Openers that have not closed yet
    refs: AtomicUsize,
    entry: Option<Arc<OpenFile>>,
}

#[derive(Default)]
struct Slots {
    files: Vec<Slot>,
    free: Vec<u32>,
    by_name: HashMap<String, FileHandle>,
}

impl Slots {
    fn slot(&self, handle: FileHandle) -> Option<&Slot> {
        self.files
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.entry.is_some())
    }

    /// Take another reference on an open name
    fn retain(&self, name: &str) -> Option<FileHandle> {
        let handle = *self.by_name.get(name)?;
        self.slot(handle)?.refs.fetch_add(1, Ordering::Relaxed);
        Some(handle)
    }

    fn release(&mut self, handle: FileHandle) {
        let Some(slot) = self.files.get_mut(handle.index as usize) else {
            return;
        };
        if slot.generation != handle.generation {
            return;
        }
        if let Some(entry) = slot.entry.take() {
            *slot.refs.get_mut() = 0;
            slot.generation = slot.generation.wrapping_add(1);
            self.by_name.remove(&entry.name);
            self.free.push(handle.index);
        }
    }
}

/// Arena of open files rooted at one directory
///
/// Every opener of a name shares one handle. Each `open_file`/`create_file`
/// takes a reference and each [`close`](Self::close) drops one, so a file
/// stays open while any opener still uses it.
pub struct FileRegistry {
    dir: PathBuf,
    slots: RwLock<Slots>,
}

impl FileRegistry {
    /// Create a registry rooted at `dir` (created if missing)
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| RepError::os("create_dir", dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            slots: RwLock::new(Slots::default()),
        })
    }

    /// Directory all names are resolved against
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open an existing file
    pub fn open_file(&self, name: &str) -> Result<FileHandle> {
        self.register(name, false)
    }

    /// Open a file, creating it if it does not exist
    pub fn create_file(&self, name: &str) -> Result<FileHandle> {
        self.register(name, true)
    }

    fn register(&self, name: &str, create: bool) -> Result<FileHandle> {
        // Closing needs the write lock, so a reference taken here is safe
        if let Some(handle) = self.slots.read().retain(name) {
            return Ok(handle);
        }

        let path = self.dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(&path)
            .map_err(|e| RepError::os(if create { "create" } else { "open" }, &path, e))?;

        let mut slots = self.slots.write();
        // Lost a race with another opener of the same name
        if let Some(handle) = slots.retain(name) {
            return Ok(handle);
        }

        let entry = Arc::new(OpenFile {
            name: name.to_string(),
            path,
            file: Mutex::new(file),
        });
        let reused = slots.free.pop();
        let handle = match reused {
            Some(index) => {
                let slot = &mut slots.files[index as usize];
                *slot.refs.get_mut() = 1;
                slot.entry = Some(entry);
                FileHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = slots.files.len() as u32;
                slots.files.push(Slot {
                    generation: 0,
                    refs: AtomicUsize::new(1),
                    entry: Some(entry),
                });
                FileHandle {
                    index,
                    generation: 0,
                }
            }
        };
        slots.by_name.insert(name.to_string(), handle);
        Ok(handle)
    }

    fn get(&self, handle: FileHandle) -> Result<Arc<OpenFile>> {
        self.slots
            .read()
            .files
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.clone())
            .ok_or_else(|| RepError::Protocol(format!("stale file handle {}", handle.index)))
    }

    /// Write `data` at byte `offset` (not yet durable, see [`sync`](Self::sync))
    pub fn write_at(&self, handle: FileHandle, offset: u64, data: &[u8]) -> Result<()> {
        let entry = self.get(handle)?;
        let mut file = entry.file.lock();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(data))
            .map_err(|e| RepError::os("write", &entry.path, e))
    }

    /// Write and sync in one step
    pub fn write_durable(&self, handle: FileHandle, offset: u64, data: &[u8]) -> Result<()> {
        self.write_at(handle, offset, data)?;
        self.sync(handle)
    }

    /// Read up to `buf.len()` bytes at `offset`; returns bytes read (short at EOF)
    pub fn read_at(&self, handle: FileHandle, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let entry = self.get(handle)?;
        let mut file = entry.file.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| RepError::os("seek", &entry.path, e))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RepError::os("read", &entry.path, e)),
            }
        }
        Ok(filled)
    }

    /// Current file length in bytes
    pub fn len(&self, handle: FileHandle) -> Result<u64> {
        let entry = self.get(handle)?;
        let file = entry.file.lock();
        file.metadata()
            .map(|m| m.len())
            .map_err(|e| RepError::os("stat", &entry.path, e))
    }

    /// fsync data and metadata
    pub fn sync(&self, handle: FileHandle) -> Result<()> {
        let entry = self.get(handle)?;
        let file = entry.file.lock();
        file.sync_all()
            .map_err(|e| RepError::os("fsync", &entry.path, e))
    }

    pub fn truncate(&self, handle: FileHandle, size: u64) -> Result<()> {
        let entry = self.get(handle)?;
        let file = entry.file.lock();
        file.set_len(size)
            .map_err(|e| RepError::os("truncate", &entry.path, e))
    }

    /// Drop one reference; the file is closed when the last opener closes
    /// it and stays on disk either way
    pub fn close(&self, handle: FileHandle) {
        let mut slots = self.slots.write();
        let Some(slot) = slots.slot(handle) else {
            return;
        };
        let refs = slot.refs.load(Ordering::Relaxed);
        if refs <= 1 {
            slots.release(handle);
        } else {
            slot.refs.store(refs - 1, Ordering::Relaxed);
        }
    }

    /// Open files currently held by the registry
    pub fn open_count(&self) -> usize {
        self.slots.read().by_name.len()
    }

    /// Unlink a file by name, closing it for every opener if registered
    pub fn remove(&self, name: &str) -> Result<()> {
        {
            let mut slots = self.slots.write();
            if let Some(handle) = slots.by_name.get(name).copied() {
                slots.release(handle);
            }
        }
        let path = self.dir.join(name);
        fs::remove_file(&path).map_err(|e| RepError::os("unlink", &path, e))
    }

    /// fsync the directory itself so newly created names are durable
    pub fn sync_dir(&self) -> Result<()> {
        // Directories cannot be opened for fsync on every platform
        #[cfg(unix)]
        {
            let dir = File::open(&self.dir).map_err(|e| RepError::os("open", &self.dir, e))?;
            dir.sync_all().map_err(|e| RepError::os("fsync", &self.dir, e))?;
        }
        Ok(())
    }

    /// File names currently present in the directory
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| RepError::os("readdir", &self.dir, e))? {
            let entry = entry.map_err(|e| RepError::os("readdir", &self.dir, e))?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
