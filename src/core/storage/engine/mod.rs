pub mod disk_manager;
pub mod implementations;
pub mod residency;
pub mod traits;

pub use disk_manager::FileDiskBackend;
pub use implementations::in_memory::InMemoryDiskBackend;
pub use residency::{EvictionCandidate, ResidencyManager, ResidencySnapshot};
pub use traits::{store_block, DiskBackend, DiskBackendHandle, DiskBlock};
