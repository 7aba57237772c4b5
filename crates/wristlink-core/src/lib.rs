//! # wristlink-core
//!
//! Shared library for Wristlink containing the message value model, the
//! command/response codec, and the device domain model.
//!
//! This crate is used by the companion (phone-side) application and by any
//! tooling that needs to speak the watch app's protocol.  It has zero
//! dependencies on async runtimes, vendor SDKs, or UI frameworks.
//!
//! # Architecture overview (for beginners)
//!
//! Wristlink pairs a phone application with a wearable.  The vendor transport
//! between the two only moves *lists of primitive values* around: it has no
//! notion of requests, replies, or message types.  This crate supplies the
//! missing structure:
//!
//! - **`protocol`** – What a message looks like.  Every outbound command is
//!   flattened into `[type_tag, field, field, ...]` and every inbound value
//!   list is decoded back into a typed [`Response`] (or a [`DecodeError`]
//!   when the device sent something we do not understand).
//!
//! - **`domain`** – Pure business logic with no I/O.  The most important piece
//!   is the device-list reducer: given the previously published list and a new
//!   poll snapshot or status event, it computes the next list while keeping
//!   exactly one entry per device and never losing a known display name.

// Rust will look for each module in a subdirectory with the same name
// (e.g., src/protocol/mod.rs).
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `wristlink_core::Device` instead of `wristlink_core::domain::device::Device`.
pub use domain::device::{
    apply_snapshot, apply_status_event, merge_device, pick_current_device, reduce, Device,
    DeviceId, DeviceList, DeviceStatus, KnownNames, Reduction, RegistryEvent,
};
pub use protocol::codec::{
    decode_command, decode_response, encode_command, encode_response, DecodeError,
};
pub use protocol::messages::{Command, CommandType, ExpectedResponse, Response, ResponseType};
pub use protocol::value::{Value, ValueKind};
