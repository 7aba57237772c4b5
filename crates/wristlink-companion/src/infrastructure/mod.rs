//! Infrastructure layer for the companion.
//!
//! Contains adapters to the outside world: vendor transport implementations
//! and file-system storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `wristlink_core`, but MUST NOT be imported by the `application` layer
//! outside of tests.

pub mod storage;
pub mod transport;
