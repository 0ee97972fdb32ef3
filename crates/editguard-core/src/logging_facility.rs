//! Structured logging for the recovery core
//!
//! All components log through `tracing`. Operation boundaries use the
//! macros in [`macros`], so a submission, a retry sequence or an integrity
//! pass can be followed by filtering on `op` and `event`. Field names are
//! shared through [`crate::core_types::schema`].
//!
//! A host process installs a subscriber once:
//!
//! ```rust
//! use editguard_core::logging_facility::{init, Profile};
//!
//! init(Profile::Production);
//! ```
//!
//! `Profile::Production` writes line-delimited JSON. Tests use
//! [`init_test_capture`] and assert on the captured events instead.

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
