//! stepwise-wire: Wire layer for step event streams
//!
//! This crate turns a raw HTTP response body into typed events: fragments are
//! reassembled into lines, and lines carrying the event marker are decoded.

pub mod client;
pub mod error;
pub mod event;
pub mod reassembler;

pub use client::{FragmentStream, StreamClient};
pub use error::{Error, Result};
pub use event::{decode, error_step_id, Args, DecodedEvent, StepStatus, ERROR_STEP_ID};
pub use reassembler::LineReassembler;
