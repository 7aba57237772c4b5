//! Vendor transport adapters.
//!
//! The production binding to the wearable vendor's SDK lives outside this
//! crate.  What ships here is [`simulated::SimulatedTransport`], used by the
//! test suite and by the headless binary.

pub mod simulated;
