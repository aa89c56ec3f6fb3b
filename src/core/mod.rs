pub mod boxes;
pub mod common;
pub mod config;
pub mod controller;
pub mod dimension;
pub mod event;
pub mod geometry;
pub mod storage;
pub mod validation;
pub use self::config::WorkspaceConfig;
