//! Filesystem state storage
//!
//! One JSON file per session under `<root>/sessions/`, named by the
//! hex-encoded session id so any id is a valid file name.

pub mod atomic;
pub mod file_store;

pub use atomic::atomic_write;
pub use file_store::FileStore;
