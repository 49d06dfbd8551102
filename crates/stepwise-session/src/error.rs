//! Error types for stepwise-session

use thiserror::Error;

/// Result type alias using stepwise-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a session
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the wire layer
    #[error(transparent)]
    Wire(#[from] stepwise_wire::Error),
}
