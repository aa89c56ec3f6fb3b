//! Lock error handling utilities
//!
//! Poisoned std locks are surfaced as `MdStoreError::Lock` instead of panicking.

use crate::core::common::MdStoreError;
use std::sync::{MutexGuard, PoisonError, RwLockReadGuard, RwLockWriteGuard};

/// Convert a poisoned mutex error to MdStoreError with a generic message
pub fn lock_poisoned<T>(_: PoisonError<MutexGuard<'_, T>>) -> MdStoreError {
    MdStoreError::Lock("Lock poisoned".to_string())
}

/// Convert a poisoned box-state mutex error to MdStoreError
pub fn box_lock_poisoned<T>(_: PoisonError<MutexGuard<'_, T>>) -> MdStoreError {
    MdStoreError::Lock("Failed to lock box state".to_string())
}

/// Convert a poisoned read lock error to MdStoreError
pub fn read_lock_poisoned<T>(_: PoisonError<RwLockReadGuard<'_, T>>) -> MdStoreError {
    MdStoreError::Lock("Failed to acquire read lock".to_string())
}

/// Convert a poisoned write lock error to MdStoreError
pub fn write_lock_poisoned<T>(_: PoisonError<RwLockWriteGuard<'_, T>>) -> MdStoreError {
    MdStoreError::Lock("Failed to acquire write lock".to_string())
}
