pub mod atomic;
pub mod error;
pub mod lock_utils;
pub mod types;

pub use atomic::AtomicF64;
pub use error::MdStoreError;
pub use types::BoxId;
