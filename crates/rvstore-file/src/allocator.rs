use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error};

use rvstore_storage::{StorageError, StorageResult};
use rvstore_types::ResourceVersion;

use crate::config::{AllocationStrategy, AllocatorConfig};

/// Size of the persisted watermark record.
///
/// ```text
/// [8 bytes: watermark (little-endian u64)]
/// [4 bytes: CRC32 of the watermark bytes (little-endian u32)]
/// [4 bytes: magic (little-endian u32)]
/// ```
pub const WATERMARK_RECORD_SIZE: usize = 16;

const WATERMARK_MAGIC: u32 = 0x5256_574d;

struct AllocatorState {
    /// Last version handed out.
    last: u64,
    /// Highest version covered by the persisted watermark.
    reserved: u64,
    poisoned: bool,
}

/// Strictly monotonic resource version source backed by a watermark file.
///
/// The watermark on disk is always at or above every version handed out, so
/// a restarted allocator resumes strictly above anything a previous process
/// could have issued. Safe for concurrent use via an internal [`Mutex`].
pub struct ResourceVersionAllocator {
    path: PathBuf,
    config: AllocatorConfig,
    state: Mutex<AllocatorState>,
}

impl ResourceVersionAllocator {
    /// Load the watermark at `path`. A missing file starts a fresh store at
    /// zero; an unreadable or corrupt one is an error.
    pub fn open(path: impl Into<PathBuf>, config: AllocatorConfig) -> StorageResult<Self> {
        let path = path.into();
        let watermark = read_watermark(&path)?;
        debug!(path = %path.display(), watermark, "allocator opened");
        Ok(Self {
            path,
            config,
            state: Mutex::new(AllocatorState {
                last: watermark,
                reserved: watermark,
                poisoned: false,
            }),
        })
    }

    /// Issue the next version.
    ///
    /// Fails with `Internal` once a watermark write has failed; the owning
    /// store must be reopened.
    pub fn next(&self) -> StorageResult<ResourceVersion> {
        let mut state = self.state.lock().expect("allocator lock poisoned");
        if state.poisoned {
            return Err(StorageError::Internal(
                "resource version allocator is poisoned by an earlier watermark failure".into(),
            ));
        }

        let mut candidate = state
            .last
            .checked_add(1)
            .ok_or_else(|| StorageError::Internal("resource version space exhausted".into()))?;
        if self.config.strategy == AllocationStrategy::WallClock {
            candidate = candidate.max(wall_clock_us());
        }

        if candidate > state.reserved {
            let bound = candidate.saturating_add(self.config.lease_size.max(1) - 1);
            if let Err(e) = write_watermark(&self.path, bound) {
                state.poisoned = true;
                error!(path = %self.path.display(), error = %e, "watermark write failed; allocator poisoned");
                return Err(StorageError::Internal(format!("persist watermark: {e}")));
            }
            state.reserved = bound;
        }

        state.last = candidate;
        Ok(ResourceVersion::new(candidate))
    }

    /// Last version issued, or the persisted watermark if nothing has been
    /// issued since open.
    pub fn current(&self) -> ResourceVersion {
        ResourceVersion::new(self.state.lock().expect("allocator lock poisoned").last)
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.lock().expect("allocator lock poisoned").poisoned
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn wall_clock_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

fn encode_record(watermark: u64) -> [u8; WATERMARK_RECORD_SIZE] {
    let value = watermark.to_le_bytes();
    let mut record = [0u8; WATERMARK_RECORD_SIZE];
    record[..8].copy_from_slice(&value);
    record[8..12].copy_from_slice(&crc32fast::hash(&value).to_le_bytes());
    record[12..].copy_from_slice(&WATERMARK_MAGIC.to_le_bytes());
    record
}

fn corrupt(path: &Path, reason: impl Into<String>) -> StorageError {
    StorageError::Corrupt {
        location: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Read the watermark record. Missing file reads as zero.
pub fn read_watermark(path: &Path) -> StorageResult<u64> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StorageError::Internal(format!("read {}: {e}", path.display()))),
    };
    let record: [u8; WATERMARK_RECORD_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        corrupt(
            path,
            format!("watermark record is {} bytes, expected {WATERMARK_RECORD_SIZE}", bytes.len()),
        )
    })?;

    let magic = u32::from_le_bytes([record[12], record[13], record[14], record[15]]);
    if magic != WATERMARK_MAGIC {
        return Err(corrupt(path, format!("bad watermark magic {magic:#010x}")));
    }
    let expected_crc = u32::from_le_bytes([record[8], record[9], record[10], record[11]]);
    let actual_crc = crc32fast::hash(&record[..8]);
    if actual_crc != expected_crc {
        return Err(corrupt(
            path,
            format!("watermark CRC mismatch (expected {expected_crc:#010x}, got {actual_crc:#010x})"),
        ));
    }

    let mut value = [0u8; 8];
    value.copy_from_slice(&record[..8]);
    Ok(u64::from_le_bytes(value))
}

/// Durably replace the watermark record: temp file, fsync, rename, then
/// fsync of the directory so the rename itself survives a crash.
pub fn write_watermark(path: &Path, watermark: u64) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "watermark path has no parent"))?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".watermark.tmp")
        .tempfile_in(dir)?;
    tmp.write_all(&encode_record(watermark))?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(lease: u64) -> AllocatorConfig {
        AllocatorConfig {
            strategy: AllocationStrategy::Counter,
            lease_size: lease,
        }
    }

    #[test]
    fn fresh_store_starts_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = ResourceVersionAllocator::open(dir.path().join(".watermark"), counter(1)).unwrap();
        assert_eq!(alloc.current(), ResourceVersion::ZERO);
        assert_eq!(alloc.next().unwrap(), ResourceVersion::new(1));
        assert_eq!(alloc.next().unwrap(), ResourceVersion::new(2));
        assert_eq!(alloc.current(), ResourceVersion::new(2));
        assert_eq!(read_watermark(alloc.path()).unwrap(), 2);
    }

    #[test]
    fn restart_resumes_above_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".watermark");
        {
            let alloc = ResourceVersionAllocator::open(&path, counter(1)).unwrap();
            for _ in 0..5 {
                alloc.next().unwrap();
            }
        }
        let alloc = ResourceVersionAllocator::open(&path, counter(1)).unwrap();
        assert_eq!(alloc.next().unwrap(), ResourceVersion::new(6));
    }

    #[test]
    fn leasing_persists_block_bound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".watermark");
        {
            let alloc = ResourceVersionAllocator::open(&path, counter(10)).unwrap();
            assert_eq!(alloc.next().unwrap(), ResourceVersion::new(1));
            assert_eq!(read_watermark(&path).unwrap(), 10);
            for _ in 0..3 {
                alloc.next().unwrap();
            }
            assert_eq!(read_watermark(&path).unwrap(), 10);
        }
        // The unused part of the lease is skipped, never reissued.
        let alloc = ResourceVersionAllocator::open(&path, counter(10)).unwrap();
        assert_eq!(alloc.next().unwrap(), ResourceVersion::new(11));
    }

    #[test]
    fn wall_clock_versions_track_time() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = ResourceVersionAllocator::open(
            dir.path().join(".watermark"),
            AllocatorConfig::default(),
        )
        .unwrap();
        let before = wall_clock_us();
        let a = alloc.next().unwrap();
        let b = alloc.next().unwrap();
        assert!(a.get() >= before);
        assert!(b > a);
    }

    #[test]
    fn corrupt_watermark_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".watermark");

        fs::write(&path, b"short").unwrap();
        assert!(ResourceVersionAllocator::open(&path, counter(1)).is_err());

        let mut record = encode_record(42);
        record[0] ^= 0xff;
        fs::write(&path, record).unwrap();
        let err = ResourceVersionAllocator::open(&path, counter(1)).err().unwrap();
        assert!(err.is_internal());
        assert!(err.to_string().contains("CRC"));

        let mut record = encode_record(42);
        record[15] = 0;
        fs::write(&path, record).unwrap();
        assert!(ResourceVersionAllocator::open(&path, counter(1)).is_err());
    }

    #[test]
    fn failed_persist_poisons() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("store");
        fs::create_dir(&sub).unwrap();
        let alloc = ResourceVersionAllocator::open(sub.join(".watermark"), counter(1)).unwrap();
        // Replace the directory with a regular file so every write fails.
        fs::remove_dir(&sub).unwrap();
        fs::write(&sub, b"").unwrap();

        assert!(alloc.next().unwrap_err().is_internal());
        assert!(alloc.is_poisoned());
        assert!(alloc.next().unwrap_err().to_string().contains("poisoned"));
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = std::sync::Arc::new(
            ResourceVersionAllocator::open(dir.path().join(".watermark"), counter(16)).unwrap(),
        );
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alloc = alloc.clone();
                std::thread::spawn(move || (0..50).map(|_| alloc.next().unwrap().get()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 200);
    }
}
