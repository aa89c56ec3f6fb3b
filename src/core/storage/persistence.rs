//! Single-file workspace snapshots.
//!
//! Layout: a fixed superblock, then one encoded event block per non-empty leaf, then the
//! JSON box table. The superblock locates the table and carries its checksum; the table
//! locates every block. Snapshots are written to a sibling temp file and renamed into place.

use crate::core::common::{BoxId, MdStoreError};
use crate::core::config::WorkspaceConfig;
use crate::core::dimension::Dimension;
use crate::core::event::MAX_DIMENSIONS;
use crate::core::geometry::{checked_children, Extents};
use crate::core::storage::engine::{store_block, DiskBackend, DiskBlock, FileDiskBackend};
use crate::core::validation::{extents_match, sums_match};
use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

pub const SUPERBLOCK_SIZE: u64 = 64;
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"MDSTORE1";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub version: u32,
    pub table_offset: u64,
    pub table_len: u64,
    pub table_crc: u32,
}

impl Superblock {
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> [u8; SUPERBLOCK_SIZE as usize] {
        let mut buf = [0u8; SUPERBLOCK_SIZE as usize];
        buf[..8].copy_from_slice(SNAPSHOT_MAGIC);
        LittleEndian::write_u32(&mut buf[8..12], self.version);
        LittleEndian::write_u64(&mut buf[12..20], self.table_offset);
        LittleEndian::write_u64(&mut buf[20..28], self.table_len);
        LittleEndian::write_u32(&mut buf[28..32], self.table_crc);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MdStoreError> {
        if bytes.len() < 32 {
            return Err(MdStoreError::CorruptData(format!(
                "superblock is {} bytes, expected {}",
                bytes.len(),
                SUPERBLOCK_SIZE
            )));
        }
        if &bytes[..8] != SNAPSHOT_MAGIC {
            return Err(MdStoreError::CorruptData("not an mdstore workspace file".to_string()));
        }
        let version = LittleEndian::read_u32(&bytes[8..12]);
        if version != FORMAT_VERSION {
            return Err(MdStoreError::CorruptData(format!(
                "unsupported format version {version}, expected {FORMAT_VERSION}"
            )));
        }
        Ok(Self {
            version,
            table_offset: LittleEndian::read_u64(&bytes[12..20]),
            table_len: LittleEndian::read_u64(&bytes[20..28]),
            table_crc: LittleEndian::read_u32(&bytes[28..32]),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableHeader {
    pub nd: usize,
    pub dimensions: Vec<Dimension>,
    pub split_threshold: usize,
    pub split_factor: u32,
    pub max_depth: u32,
    pub split_on_insert: bool,
    pub next_id: u64,
    pub total_events: u64,
    pub saved_at: DateTime<Utc>,
}

impl TableHeader {
    /// The saved split policy layered over `base`, which supplies the process-only settings.
    pub fn config_over(&self, base: &WorkspaceConfig) -> WorkspaceConfig {
        WorkspaceConfig {
            split_threshold: self.split_threshold,
            split_factor: self.split_factor,
            max_depth: self.max_depth,
            split_on_insert: self.split_on_insert,
            ..base.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoxContent {
    Children(Vec<BoxId>),
    Events { offset: u64, length: u64, count: usize },
}

impl BoxContent {
    pub fn empty_leaf() -> Self {
        Self::Events { offset: 0, length: 0, count: 0 }
    }

    pub const fn block(&self) -> Option<DiskBlock> {
        match *self {
            Self::Events { offset, length, count } if count > 0 => Some(DiskBlock { offset, length }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedBox {
    pub id: BoxId,
    pub parent: Option<BoxId>,
    pub depth: u32,
    pub extents: Extents,
    pub signal: f64,
    pub error_squared: f64,
    pub n_points: u64,
    pub content: BoxContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxTable {
    pub header: TableHeader,
    pub boxes: Vec<PersistedBox>,
}

impl BoxTable {
    /// Rejects any table that could not have been produced by a consistent tree.
    pub fn validate(&self) -> Result<(), MdStoreError> {
        let header = &self.header;
        if header.nd == 0 || header.nd > MAX_DIMENSIONS {
            return corrupt(format!("table declares {} dimensions", header.nd));
        }
        if header.dimensions.len() != header.nd {
            return corrupt(format!(
                "table declares {} dimensions but lists {}",
                header.nd,
                header.dimensions.len()
            ));
        }
        for dim in &header.dimensions {
            dim.validate()
                .map_err(|e| MdStoreError::CorruptData(format!("saved dimension invalid: {e}")))?;
        }
        header
            .config_over(&WorkspaceConfig::default())
            .validate()
            .map_err(|e| MdStoreError::CorruptData(format!("saved split policy invalid: {e}")))?;
        let factor = usize::try_from(header.split_factor)
            .map_err(|_| MdStoreError::CorruptData("split factor out of range".to_string()))?;
        let n_children = checked_children(factor, header.nd)
            .ok_or_else(|| MdStoreError::CorruptData("children per split overflow".to_string()))?;

        let boxes = &self.boxes;
        if boxes.is_empty() {
            return corrupt("table holds no boxes".to_string());
        }
        for (index, b) in boxes.iter().enumerate() {
            if b.id.index() != index {
                return corrupt(format!("box {} found at position {}", b.id, index));
            }
        }
        if header.next_id < boxes.len() as u64 {
            return corrupt(format!("next id {} below box count {}", header.next_id, boxes.len()));
        }

        let root = &boxes[0];
        if root.parent.is_some() || root.depth != 0 {
            return corrupt("root box has a parent or nonzero depth".to_string());
        }
        if !extents_match(&root.extents, &Extents::from_dimensions(&header.dimensions)) {
            return corrupt("root extents differ from the dimensions".to_string());
        }
        if root.n_points != header.total_events {
            return corrupt(format!(
                "header counts {} events, root holds {}",
                header.total_events, root.n_points
            ));
        }

        let mut claimed = vec![0u32; boxes.len()];
        for b in boxes {
            if b.depth > header.max_depth {
                return corrupt(format!("box {} deeper than max depth", b.id));
            }
            if b.extents.nd() != header.nd {
                return corrupt(format!("box {} has {} dimensions", b.id, b.extents.nd()));
            }
            match &b.content {
                BoxContent::Children(children) => {
                    if children.len() != n_children {
                        return corrupt(format!(
                            "grid {} has {} children, expected {}",
                            b.id,
                            children.len(),
                            n_children
                        ));
                    }
                    let (mut signal, mut error_squared, mut n_points) = (0.0, 0.0, 0u64);
                    for (slot, &child_id) in children.iter().enumerate() {
                        let Some(child) = boxes.get(child_id.index()) else {
                            return corrupt(format!("grid {} lists unknown child {}", b.id, child_id));
                        };
                        claimed[child_id.index()] += 1;
                        if child_id <= b.id || child.parent != Some(b.id) || child.depth != b.depth + 1 {
                            return corrupt(format!("child {} is not linked to grid {}", child_id, b.id));
                        }
                        if !extents_match(&child.extents, &b.extents.child(slot, factor)) {
                            return corrupt(format!("child {} does not tile grid {}", child_id, b.id));
                        }
                        signal += child.signal;
                        error_squared += child.error_squared;
                        n_points += child.n_points;
                    }
                    if n_points != b.n_points
                        || !sums_match(signal, b.signal)
                        || !sums_match(error_squared, b.error_squared)
                    {
                        return corrupt(format!("grid {} totals differ from its children", b.id));
                    }
                }
                BoxContent::Events { offset, length, count } => {
                    if *count as u64 != b.n_points {
                        return corrupt(format!("leaf {} counts {} events, block holds {}", b.id, b.n_points, count));
                    }
                    if *count > 0 && (*offset < SUPERBLOCK_SIZE || *length == 0) {
                        return corrupt(format!("leaf {} points at an invalid block", b.id));
                    }
                }
            }
        }
        for (b, &times) in boxes.iter().zip(&claimed).skip(1) {
            if times != 1 {
                return corrupt(format!("box {} is referenced {} times", b.id, times));
            }
        }
        Ok(())
    }
}

fn corrupt(message: String) -> Result<(), MdStoreError> {
    Err(MdStoreError::CorruptData(message))
}

/// `<path>.tmp`, next to the destination so the final rename stays on one filesystem.
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Builds a snapshot in a temp file and renames it over the destination on commit.
///
/// Dropping an uncommitted writer removes the temp file.
#[derive(Debug)]
pub struct SnapshotWriter {
    backend: FileDiskBackend,
    temp_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl SnapshotWriter {
    pub fn create(path: &Path) -> Result<Self, MdStoreError> {
        let temp_path = temp_path_for(path);
        let backend = FileDiskBackend::create(&temp_path, SUPERBLOCK_SIZE)?;
        Ok(Self { backend, temp_path, final_path: path.to_path_buf(), committed: false })
    }

    pub fn write_block(&self, bytes: &[u8]) -> Result<DiskBlock, MdStoreError> {
        store_block(&self.backend, bytes)
    }

    /// Appends the table, writes the superblock, syncs and renames into place.
    pub fn commit(mut self, table: &BoxTable) -> Result<u64, MdStoreError> {
        let table_bytes =
            serde_json::to_vec(table).map_err(|e| MdStoreError::Serialization(e.to_string()))?;
        let table_block = self.write_block(&table_bytes)?;
        let superblock = Superblock {
            version: FORMAT_VERSION,
            table_offset: table_block.offset,
            table_len: table_block.length,
            table_crc: crc32fast::hash(&table_bytes),
        };
        self.backend.write_reserved(0, &superblock.encode())?;
        self.backend.flush()?;
        let size = self.backend.file_len()?;

        fs::rename(&self.temp_path, &self.final_path).map_err(|e| {
            MdStoreError::io_error(format!(
                "Failed to move snapshot into place at '{}': {}",
                self.final_path.display(),
                e
            ))
        })?;
        self.committed = true;
        Ok(size)
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = fs::remove_file(&self.temp_path) {
                log::debug!("could not remove temp snapshot '{}': {}", self.temp_path.display(), e);
            }
        }
    }
}

/// Reads and validates the superblock and box table of a snapshot.
pub fn read_table(backend: &dyn DiskBackend) -> Result<BoxTable, MdStoreError> {
    let superblock = Superblock::decode(&backend.read(0, SUPERBLOCK_SIZE)?)?;
    let bytes = backend.read(superblock.table_offset, superblock.table_len)?;
    if crc32fast::hash(&bytes) != superblock.table_crc {
        return Err(MdStoreError::CorruptData("box table checksum mismatch".to_string()));
    }
    let table: BoxTable = serde_json::from_slice(&bytes)?;
    table.validate()?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn single_leaf_table() -> BoxTable {
        let dimensions = vec![Dimension::new("x", 0.0, 1.0, 10)];
        BoxTable {
            header: TableHeader {
                nd: 1,
                dimensions: dimensions.clone(),
                split_threshold: 10,
                split_factor: 2,
                max_depth: 5,
                split_on_insert: false,
                next_id: 1,
                total_events: 0,
                saved_at: Utc::now(),
            },
            boxes: vec![PersistedBox {
                id: BoxId::ROOT,
                parent: None,
                depth: 0,
                extents: Extents::from_dimensions(&dimensions),
                signal: 0.0,
                error_squared: 0.0,
                n_points: 0,
                content: BoxContent::empty_leaf(),
            }],
        }
    }

    #[test]
    fn test_superblock_round_trip_and_rejection() {
        let sb = Superblock { version: FORMAT_VERSION, table_offset: 128, table_len: 40, table_crc: 7 };
        let bytes = sb.encode();
        assert_eq!(Superblock::decode(&bytes).unwrap(), sb);

        let mut bad = bytes;
        bad[0] = b'X';
        assert!(matches!(Superblock::decode(&bad), Err(MdStoreError::CorruptData(_))));
        assert!(Superblock::decode(&bytes[..10]).is_err());
    }

    #[test]
    fn test_commit_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ws.mdstore");
        let table = single_leaf_table();

        let writer = SnapshotWriter::create(&path).unwrap();
        writer.commit(&table).unwrap();
        assert!(path.exists());
        assert!(!temp_path_for(&path).exists());

        let backend = FileDiskBackend::open_existing(&path).unwrap();
        assert_eq!(read_table(&backend).unwrap(), table);
    }

    #[test]
    fn test_uncommitted_writer_cleans_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ws.mdstore");
        {
            let writer = SnapshotWriter::create(&path).unwrap();
            writer.write_block(&[1, 2, 3]).unwrap();
        }
        assert!(!temp_path_for(&path).exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_validate_rejects_broken_tables() {
        let mut table = single_leaf_table();
        table.header.total_events = 3;
        assert!(matches!(table.validate(), Err(MdStoreError::CorruptData(_))));

        let mut table = single_leaf_table();
        table.boxes[0].content = BoxContent::Children(vec![BoxId(1), BoxId(2)]);
        assert!(table.validate().is_err());

        let mut table = single_leaf_table();
        table.header.split_factor = 1;
        assert!(table.validate().is_err());

        assert!(single_leaf_table().validate().is_ok());
    }

    #[test]
    fn test_flipped_table_byte_fails_checksum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ws.mdstore");
        SnapshotWriter::create(&path).unwrap().commit(&single_leaf_table()).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let backend = FileDiskBackend::open_existing(&path).unwrap();
        assert!(matches!(read_table(&backend), Err(MdStoreError::CorruptData(_))));
    }
}
