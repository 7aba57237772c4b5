//! Domain entities for Wristlink.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//!
//! # What is "domain" here? (for beginners)
//!
//! The innermost layer of the application holds the rules that make the
//! system what it is, with **no** imports from vendor SDKs, async runtimes, or
//! UI frameworks.  For Wristlink that is the device list: how a new poll
//! snapshot or a status event turns the previously published list into the
//! next one.  Because the rules are plain functions over plain data, they can
//! be unit-tested (and property-tested) without a watch, a phone, or a
//! transport.
//!
//! Outer layers (the registry loop in the companion crate, the UI) depend on
//! the domain; the domain never depends on them.

/// Devices, their identity, and the device-list reducer.
///
/// See [`device::reduce`] for the main entry point.
pub mod device;
