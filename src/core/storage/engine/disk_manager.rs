use crate::core::common::lock_utils::lock_poisoned;
use crate::core::common::MdStoreError;
use crate::core::storage::engine::traits::DiskBackend;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug)]
struct FileState {
    file: File,
    end: u64,                          // first byte past everything ever allocated
    reserved_prefix: u64,              // bytes at the start owned by the caller (superblock)
    preserved_end: u64,                // contents below this were present when opened
    allocations: BTreeMap<u64, u64>,   // offset -> length
    free_ranges: BTreeMap<u64, u64>,   // offset -> length, coalesced
    writable: bool,
}

/// Disk backend over a single backing file.
///
/// Freed ranges are reused first-fit; otherwise the file grows at its end. A file opened with
/// [`FileDiskBackend::open_existing`] keeps its original contents intact: ranges below the
/// original length are never handed out again.
#[derive(Debug)]
pub struct FileDiskBackend {
    state: Mutex<FileState>,
    path: PathBuf,
}

impl FileDiskBackend {
    /// Creates (truncating) a backing file. The first `reserved_prefix` bytes are zeroed and
    /// never allocated; callers may write them directly.
    pub fn create(path: &Path, reserved_prefix: u64) -> Result<Self, MdStoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                MdStoreError::Io(IoError::new(
                    e.kind(),
                    format!("Failed to create backing file '{}': {}", path.display(), e),
                ))
            })?;
        file.set_len(reserved_prefix)?;

        Ok(Self {
            state: Mutex::new(FileState {
                file,
                end: reserved_prefix,
                reserved_prefix,
                preserved_end: 0,
                allocations: BTreeMap::new(),
                free_ranges: BTreeMap::new(),
                writable: true,
            }),
            path: path.to_path_buf(),
        })
    }

    /// Opens an existing file without truncating it. Everything already in the file is
    /// treated as immutable; new allocations are appended.
    ///
    /// The handle follows the file it opened. If that path is later replaced by a rename,
    /// appended blocks keep going to the original, now unlinked, file until the backend is
    /// dropped.
    pub fn open_existing(path: &Path) -> Result<Self, MdStoreError> {
        Self::open_with(path, true)
    }

    /// Opens an existing file for reading only. `allocate`, `write` and `write_reserved`
    /// fail with `InvalidInput`; the file itself only needs read permission.
    pub fn open_read_only(path: &Path) -> Result<Self, MdStoreError> {
        Self::open_with(path, false)
    }

    fn open_with(path: &Path, writable: bool) -> Result<Self, MdStoreError> {
        let file = OpenOptions::new().read(true).write(writable).open(path).map_err(|e| {
            MdStoreError::Io(IoError::new(
                e.kind(),
                format!("Failed to open backing file '{}': {}", path.display(), e),
            ))
        })?;
        let len = file.metadata()?.len();

        Ok(Self {
            state: Mutex::new(FileState {
                file,
                end: len,
                reserved_prefix: 0,
                preserved_end: len,
                allocations: BTreeMap::new(),
                free_ranges: BTreeMap::new(),
                writable,
            }),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.state.lock().map_or(true, |state| !state.writable)
    }

    /// Writes into the reserved prefix, e.g. a superblock.
    pub fn write_reserved(&self, offset: u64, bytes: &[u8]) -> Result<(), MdStoreError> {
        let mut state = self.state.lock().map_err(lock_poisoned)?;
        state.check_writable(&self.path)?;
        if offset + bytes.len() as u64 > state.reserved_prefix {
            return Err(MdStoreError::invalid_input(format!(
                "write of {} bytes at {} exceeds the {} byte reserved prefix",
                bytes.len(),
                offset,
                state.reserved_prefix
            )));
        }
        write_at(&mut state.file, offset, bytes)
    }

    /// Total bytes spanned by the file, including freed holes.
    pub fn file_len(&self) -> Result<u64, MdStoreError> {
        Ok(self.state.lock().map_err(lock_poisoned)?.end)
    }
}

fn write_at(file: &mut File, offset: u64, bytes: &[u8]) -> Result<(), MdStoreError> {
    file.seek(SeekFrom::Start(offset)).map_err(|e| {
        MdStoreError::Io(IoError::new(e.kind(), format!("Failed to seek to offset {offset}: {e}")))
    })?;
    file.write_all(bytes).map_err(|e| {
        MdStoreError::Io(IoError::new(
            e.kind(),
            format!("Failed to write {} bytes at offset {}: {}", bytes.len(), offset, e),
        ))
    })
}

impl FileState {
    fn check_writable(&self, path: &Path) -> Result<(), MdStoreError> {
        if self.writable {
            Ok(())
        } else {
            Err(MdStoreError::invalid_input(format!(
                "backing file '{}' is open read-only",
                path.display()
            )))
        }
    }

    fn take_free_range(&mut self, size: u64) -> Option<u64> {
        let (&offset, &len) = self.free_ranges.iter().find(|(_, len)| **len >= size)?;
        self.free_ranges.remove(&offset);
        if len > size {
            self.free_ranges.insert(offset + size, len - size);
        }
        Some(offset)
    }

    fn release_range(&mut self, offset: u64, len: u64) {
        let mut start = offset;
        let mut length = len;

        if let Some((&prev_off, &prev_len)) = self.free_ranges.range(..offset).next_back() {
            if prev_off + prev_len == offset {
                self.free_ranges.remove(&prev_off);
                start = prev_off;
                length += prev_len;
            }
        }
        if let Some(&next_len) = self.free_ranges.get(&(offset + len)) {
            self.free_ranges.remove(&(offset + len));
            length += next_len;
        }
        self.free_ranges.insert(start, length);
    }
}

impl DiskBackend for FileDiskBackend {
    fn allocate(&self, size: u64) -> Result<u64, MdStoreError> {
        if size == 0 {
            return Err(MdStoreError::invalid_input("cannot allocate a zero-length range"));
        }
        let mut state = self.state.lock().map_err(lock_poisoned)?;
        state.check_writable(&self.path)?;
        let offset = match state.take_free_range(size) {
            Some(offset) => offset,
            None => {
                let offset = state.end;
                state.end += size;
                let end = state.end;
                state.file.set_len(end)?;
                offset
            }
        };
        state.allocations.insert(offset, size);
        Ok(offset)
    }

    fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), MdStoreError> {
        let mut state = self.state.lock().map_err(lock_poisoned)?;
        state.check_writable(&self.path)?;
        let capacity = state.allocations.get(&offset).copied().ok_or_else(|| {
            MdStoreError::invalid_input(format!("offset {offset} is not an allocated range"))
        })?;
        if bytes.len() as u64 > capacity {
            return Err(MdStoreError::invalid_input(format!(
                "write of {} bytes overflows the {} byte range at {}",
                bytes.len(),
                capacity,
                offset
            )));
        }
        write_at(&mut state.file, offset, bytes)
    }

    fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, MdStoreError> {
        let mut state = self.state.lock().map_err(lock_poisoned)?;
        let file_len = state.file.metadata()?.len();
        if offset.checked_add(len).map_or(true, |end| end > file_len) {
            return Err(MdStoreError::CorruptData(format!(
                "read of {} bytes at offset {} runs past end of '{}' ({} bytes)",
                len,
                offset,
                self.path.display(),
                file_len
            )));
        }

        state.file.seek(SeekFrom::Start(offset)).map_err(|e| {
            MdStoreError::Io(IoError::new(e.kind(), format!("Failed to seek to offset {offset}: {e}")))
        })?;
        let len = usize::try_from(len)
            .map_err(|_| MdStoreError::invalid_input(format!("read length {len} too large")))?;
        let mut buffer = vec![0u8; len];
        match state.file.read_exact(&mut buffer) {
            Ok(()) => Ok(buffer),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(MdStoreError::CorruptData(
                format!("Unexpected EOF when reading {len} bytes at offset {offset}"),
            )),
            Err(e) => Err(MdStoreError::Io(e)),
        }
    }

    fn free(&self, offset: u64) -> Result<(), MdStoreError> {
        let mut state = self.state.lock().map_err(lock_poisoned)?;
        match state.allocations.remove(&offset) {
            Some(len) if offset >= state.preserved_end => {
                state.release_range(offset, len);
                Ok(())
            }
            // Ranges inside the preserved snapshot are never reused.
            Some(_) => Ok(()),
            None if offset < state.preserved_end => Ok(()),
            None => Err(MdStoreError::invalid_input(format!(
                "offset {offset} is not an allocated range"
            ))),
        }
    }

    fn flush(&self) -> Result<(), MdStoreError> {
        let mut state = self.state.lock().map_err(lock_poisoned)?;
        if !state.writable {
            return Ok(());
        }
        state.file.flush()?;
        state.file.sync_all()?;
        Ok(())
    }

    fn bytes_in_use(&self) -> u64 {
        self.state.lock().map_or(0, |state| state.allocations.values().sum())
    }

    fn describe(&self) -> String {
        format!("file backend '{}'", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_temp_backend(prefix: u64) -> (FileDiskBackend, NamedTempFile) {
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let backend = FileDiskBackend::create(temp_file.path(), prefix).unwrap();
        (backend, temp_file)
    }

    #[test]
    fn test_allocate_write_read() {
        let (backend, _temp) = create_temp_backend(64);

        let off0 = backend.allocate(100).unwrap();
        assert_eq!(off0, 64);
        let off1 = backend.allocate(50).unwrap();
        assert_eq!(off1, 164);

        let data0: Vec<u8> = (0..100u8).collect();
        backend.write(off0, &data0).unwrap();
        backend.write(off1, &[7u8; 50]).unwrap();

        assert_eq!(backend.read(off0, 100).unwrap(), data0);
        assert_eq!(backend.read(off1, 50).unwrap(), vec![7u8; 50]);
        assert_eq!(backend.bytes_in_use(), 150);
        assert_eq!(backend.file_len().unwrap(), 214);
    }

    #[test]
    fn test_freed_ranges_are_reused_and_coalesced() {
        let (backend, _temp) = create_temp_backend(0);
        let a = backend.allocate(10).unwrap();
        let b = backend.allocate(10).unwrap();
        let c = backend.allocate(10).unwrap();
        assert_eq!((a, b, c), (0, 10, 20));

        backend.free(a).unwrap();
        backend.free(b).unwrap();
        // a and b coalesce into one 20-byte hole.
        let d = backend.allocate(15).unwrap();
        assert_eq!(d, 0);
        let e = backend.allocate(5).unwrap();
        assert_eq!(e, 15);
        let f = backend.allocate(1).unwrap();
        assert_eq!(f, 30, "no hole left, must append");
    }

    #[test]
    fn test_write_outside_allocation_rejected() {
        let (backend, _temp) = create_temp_backend(0);
        let off = backend.allocate(4).unwrap();
        assert!(matches!(backend.write(off, &[0u8; 5]), Err(MdStoreError::InvalidInput { .. })));
        assert!(matches!(backend.write(off + 1, &[0u8; 1]), Err(MdStoreError::InvalidInput { .. })));
        assert!(backend.free(999).is_err());
    }

    #[test]
    fn test_short_read_is_corrupt() {
        let (backend, _temp) = create_temp_backend(0);
        let off = backend.allocate(8).unwrap();
        assert!(matches!(backend.read(off, 64), Err(MdStoreError::CorruptData(_))));
    }

    #[test]
    fn test_reserved_prefix_writes() {
        let (backend, temp) = create_temp_backend(16);
        backend.write_reserved(0, b"MDSTORE1").unwrap();
        assert!(backend.write_reserved(10, &[0u8; 8]).is_err());
        backend.flush().unwrap();
        let raw = std::fs::read(temp.path()).unwrap();
        assert_eq!(&raw[..8], b"MDSTORE1");
    }

    #[test]
    fn test_open_existing_preserves_snapshot() {
        let (backend, temp) = create_temp_backend(0);
        let off = backend.allocate(32).unwrap();
        backend.write(off, &[1u8; 32]).unwrap();
        backend.flush().unwrap();
        drop(backend);

        let reopened = FileDiskBackend::open_existing(temp.path()).unwrap();
        assert_eq!(reopened.read(off, 32).unwrap(), vec![1u8; 32]);
        // Freeing a pre-existing block is accepted but the bytes are never handed out again.
        reopened.free(off).unwrap();
        let fresh = reopened.allocate(32).unwrap();
        assert_eq!(fresh, 32);
        reopened.write(fresh, &[2u8; 32]).unwrap();
        assert_eq!(reopened.read(off, 32).unwrap(), vec![1u8; 32]);

        // Blocks allocated after opening are reusable as usual.
        reopened.free(fresh).unwrap();
        assert_eq!(reopened.allocate(16).unwrap(), 32);
    }

    #[test]
    fn test_read_only_open_reads_but_never_writes() {
        let (backend, temp) = create_temp_backend(0);
        let off = backend.allocate(16).unwrap();
        backend.write(off, &[9u8; 16]).unwrap();
        backend.flush().unwrap();
        drop(backend);

        let reader = FileDiskBackend::open_read_only(temp.path()).unwrap();
        assert!(reader.is_read_only());
        assert_eq!(reader.read(off, 16).unwrap(), vec![9u8; 16]);
        assert!(matches!(reader.allocate(8), Err(MdStoreError::InvalidInput { .. })));
        assert!(matches!(reader.write(off, &[0u8; 4]), Err(MdStoreError::InvalidInput { .. })));
        assert!(matches!(reader.write_reserved(0, &[0u8; 4]), Err(MdStoreError::InvalidInput { .. })));
        reader.free(off).unwrap();
        reader.flush().unwrap();
        assert_eq!(reader.file_len().unwrap(), 16);
        assert_eq!(std::fs::read(temp.path()).unwrap(), vec![9u8; 16]);
    }

    #[test]
    fn test_read_only_open_of_write_protected_file() {
        let (backend, temp) = create_temp_backend(0);
        let off = backend.allocate(8).unwrap();
        backend.write(off, b"readonly").unwrap();
        backend.flush().unwrap();
        drop(backend);

        let mut perms = std::fs::metadata(temp.path()).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(temp.path(), perms).unwrap();

        let reader = FileDiskBackend::open_read_only(temp.path()).unwrap();
        assert_eq!(reader.read(off, 8).unwrap(), b"readonly".to_vec());
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileDiskBackend::open_existing(&dir.path().join("absent.mdstore"));
        assert!(matches!(result, Err(MdStoreError::Io(_))));
        let result = FileDiskBackend::open_read_only(&dir.path().join("absent.mdstore"));
        assert!(matches!(result, Err(MdStoreError::Io(_))));
    }
}
