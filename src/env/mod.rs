//! The key-value environment: one memory-mapped data file, the named
//! maps of the schema, and single-writer / many-reader transactions.
//!
//! Readers are snapshot-isolated: a read transaction pins the committed
//! root that was current when it began and never observes a concurrent
//! writer. Writes are serialized by an environment-wide lock and become
//! durable as one checksummed frame per commit. When a write outgrows the
//! mapped region the transaction fails with `MapFull`; [`Environment::grow`]
//! quiesces readers, enlarges the map (at least doubling), and the caller
//! retries.

pub(crate) mod coordinator;
pub(crate) mod frames;
pub(crate) mod state;
mod txn;

pub use txn::{ReadTxn, WriteTxn};

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use memmap2::MmapOptions;
use parking_lot::{Mutex, RwLock};
use zerocopy::AsBytes;

use crate::error::{DbError, DbResult, StoreErrorKind};

use coordinator::{CommitHooks, ReaderGate};
use frames::FileHeader;
use state::Root;

/// Smallest mapped region the environment will create.
const MIN_MAP_SIZE: u64 = 64 * 1024;

/// Minimum step when growing the map.
const MIN_GROW: u64 = 16 * 1024 * 1024;

/// Marker left on disk for the duration of a resize; a lingering marker
/// at open time means a process died mid-resize.
pub(crate) fn grow_marker_path(data_file: &Path) -> PathBuf {
    data_file.with_extension("grow")
}

fn lock_file_path(data_file: &Path) -> PathBuf {
    data_file.with_extension("lock")
}

/// Take the exclusive writer lock next to the data file. The OS lock is
/// released when the returned handle (and with it the descriptor) drops.
fn acquire_writer_lock(data_file: &Path) -> DbResult<fd_lock::RwLock<File>> {
    let path = lock_file_path(data_file);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| DbError::io(&path, e))?;
    let mut lock = fd_lock::RwLock::new(file);
    let guard = lock.try_write().map_err(|e| DbError::io(&path, e))?;
    // Keep the lock held for the environment's lifetime; dropping the
    // guard here would release it, closing the file later will.
    std::mem::forget(guard);
    Ok(lock)
}

/// Open-time knobs for an environment.
#[derive(Debug, Clone)]
pub struct EnvOptions {
    pub readonly: bool,
    pub initial_map_size: u64,
    pub max_map_size: u64,
    pub max_readers: usize,
}

impl Default for EnvOptions {
    fn default() -> EnvOptions {
        EnvOptions {
            readonly: false,
            initial_map_size: 64 * 1024 * 1024,
            max_map_size: 1 << 40,
            max_readers: 64,
        }
    }
}

/// Owns the data file, the mapping, and the committed root.
///
/// There is exactly one owning handle per environment; transactions
/// borrow from it, and cross-thread sharing goes through shared ownership
/// of the environment itself.
pub struct Environment {
    path: PathBuf,
    file: File,
    readonly: bool,
    max_map_size: u64,
    data: RwLock<Arc<memmap2::Mmap>>,
    root: RwLock<Arc<Root>>,
    gate: ReaderGate,
    write_lock: Mutex<()>,
    poisoned: AtomicBool,
    hooks: CommitHooks,
    /// Held for the lifetime of a writable environment; guards against a
    /// second writing process.
    _writer_lock: Option<fd_lock::RwLock<File>>,
}

impl Environment {
    /// Open (or create, unless read-only) the data file at `path`.
    pub fn open(path: &Path, options: EnvOptions) -> DbResult<Environment> {
        let (file, writer_lock) = if options.readonly {
            (File::open(path).map_err(|e| DbError::io(path, e))?, None)
        } else {
            let lock = acquire_writer_lock(path)?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .map_err(|e| DbError::io(path, e))?;
            (file, Some(lock))
        };

        let len = file.metadata().map_err(|e| DbError::io(path, e))?.len();
        let initial = options.initial_map_size.max(MIN_MAP_SIZE);
        if len == 0 {
            if options.readonly {
                return Err(DbError::store("open", StoreErrorKind::Corrupted));
            }
            file.set_len(initial).map_err(|e| DbError::io(path, e))?;
            file.write_all_at(FileHeader::current().as_bytes(), 0)
                .map_err(|e| DbError::io(path, e))?;
            file.sync_data().map_err(|e| DbError::io(path, e))?;
        } else if len < initial && !options.readonly {
            file.set_len(initial).map_err(|e| DbError::io(path, e))?;
        }

        // Safety: the mapping is read-only and the file is written only
        // through positioned writes that never shrink it; committed bytes
        // are flushed before the root that references them is published.
        let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(|e| DbError::io(path, e))?;
        let root = frames::replay(&mmap)?;
        tracing::debug!(
            path = %path.display(),
            seq = root.seq,
            capacity = mmap.len(),
            "opened environment"
        );

        Ok(Environment {
            path: path.to_path_buf(),
            file,
            readonly: options.readonly,
            max_map_size: options.max_map_size.max(initial),
            data: RwLock::new(Arc::new(mmap)),
            root: RwLock::new(Arc::new(root)),
            gate: ReaderGate::new(options.max_readers),
            write_lock: Mutex::new(()),
            poisoned: AtomicBool::new(false),
            hooks: CommitHooks::default(),
            _writer_lock: writer_lock,
        })
    }

    fn check_poisoned(&self, op: &'static str) -> DbResult<()> {
        if self.poisoned.load(Ordering::Acquire) {
            Err(DbError::store(op, StoreErrorKind::Corrupted))
        } else {
            Ok(())
        }
    }

    /// Mark the environment unusable after detected corruption. Every
    /// subsequent transaction fails fast.
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    /// Begin a snapshot-isolated read transaction.
    pub fn begin_read(&self) -> DbResult<ReadTxn<'_>> {
        self.check_poisoned("begin_read")?;
        self.gate.enter()?;
        let root = self.root.read().clone();
        let data = self.data.read().clone();
        Ok(ReadTxn::new(self, root, data))
    }

    /// Begin the (single) write transaction. Blocks while another writer
    /// is active.
    pub fn begin_write(&self) -> DbResult<WriteTxn<'_>> {
        self.check_poisoned("begin_write")?;
        if self.readonly {
            return Err(DbError::ReadOnly);
        }
        let guard = self.write_lock.lock();
        let root = self.root.read().clone();
        let data = self.data.read().clone();
        Ok(WriteTxn::new(self, guard, &root, data))
    }

    /// Grow the mapped region after a `MapFull` failure.
    ///
    /// Takes the writer lock, drains every active reader, enlarges the
    /// file by at least doubling (minimum step [`MIN_GROW`], bounded by
    /// `max_map_size`), and remaps. New readers arriving during the drain
    /// block until the resize completes.
    pub fn grow(&self) -> DbResult<()> {
        self.check_poisoned("grow")?;
        if self.readonly {
            return Err(DbError::ReadOnly);
        }
        let _writer = self.write_lock.lock();
        self.gate.begin_resize();
        let result = self.grow_locked();
        self.gate.end_resize();
        result
    }

    fn grow_locked(&self) -> DbResult<()> {
        let current = self.data.read().len() as u64;
        let new_capacity = current
            .saturating_mul(2)
            .max(current.saturating_add(MIN_GROW))
            .min(self.max_map_size);
        if new_capacity <= current {
            return Err(DbError::store("grow", StoreErrorKind::MapFull));
        }

        let marker = grow_marker_path(&self.path);
        fs::write(&marker, b"resize in progress").map_err(|e| DbError::io(&marker, e))?;

        self.file
            .set_len(new_capacity)
            .map_err(|e| DbError::io(&self.path, e))?;
        // Safety: see `open`.
        let mmap =
            unsafe { MmapOptions::new().map(&self.file) }.map_err(|e| DbError::io(&self.path, e))?;
        *self.data.write() = Arc::new(mmap);

        fs::remove_file(&marker).map_err(|e| DbError::io(&marker, e))?;
        tracing::info!(from = current, to = new_capacity, "grew mapped region");
        Ok(())
    }

    /// Register a hook fired (outside all locks) after each commit with
    /// the committed sequence number.
    pub fn on_commit(&self, hook: impl Fn(u64) + Send + Sync + 'static) {
        self.hooks.register(Arc::new(hook));
    }

    pub fn active_readers(&self) -> usize {
        self.gate.active_readers()
    }

    pub fn capacity(&self) -> u64 {
        self.data.read().len() as u64
    }

    /// Sequence number of the latest commit.
    pub fn seq(&self) -> u64 {
        self.root.read().seq
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn reader_done(&self) {
        self.gate.exit();
    }

    pub(crate) fn write_frame(&self, offset: u64, bytes: &[u8]) -> DbResult<()> {
        self.file
            .write_all_at(bytes, offset)
            .map_err(|e| DbError::io(&self.path, e))?;
        self.file
            .sync_data()
            .map_err(|e| DbError::io(&self.path, e))
    }

    pub(crate) fn publish(&self, root: Root) {
        *self.root.write() = Arc::new(root);
    }

    pub(crate) fn fire_commit_hooks(&self, seq: u64) {
        self.hooks.fire(seq);
    }
}
