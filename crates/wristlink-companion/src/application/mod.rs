//! Application layer for the companion.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure business rules, here in `wristlink_core`) and the infrastructure
//! (vendor SDK bindings, storage).
//!
//! Code in this layer:
//!
//! - **Orchestrates** domain objects to fulfil a goal (e.g., "send this
//!   command to the watch and hand back its typed reply").
//! - **Depends on abstractions** (the [`transport::VendorTransport`] trait)
//!   rather than concrete SDKs, so the infrastructure can be swapped without
//!   changing this code.
//! - **Contains no file system access** and no direct SDK calls.
//!
//! # Sub-modules
//!
//! - **`transport`**       – The vendor SDK port plus RAII listener handles.
//! - **`resolve_once`**    – Single-assignment slots for callbacks that may
//!   fire more than once.
//! - **`session`**         – The connect/initialize state machine.
//! - **`device_registry`** – The live list of nearby devices.
//! - **`app_gate`**        – Best-effort "is the watch app installed and open".
//! - **`correlator`**      – Send a command and await its typed reply.

pub mod app_gate;
pub mod correlator;
pub mod device_registry;
pub mod resolve_once;
pub mod session;
pub mod transport;
