//! Error types for the scene culling crate
//!
//! This module defines the error types shared by the tile map, the
//! visibility indexer, the portal culler and the preview cache.

use std::fmt;

/// Result type for scene culling operations
pub type Result<T> = std::result::Result<T, Error>;

/// Scene culling errors
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A rendering, physics or navigation server rejected a request
    BackendError(String),

    /// Argument outside its accepted range (quadrant size, collision bit, ...)
    InvalidArgument(String),

    /// Unknown or stale resource (tile, portal, occluder, notifier, ...)
    InvalidResource(String),

    /// A required collaborator is missing (tile set, parent collision object, ...)
    MissingDependency(String),

    /// Initialization failed (engine, worker thread, servers)
    InitializationFailed(String),

    /// File system or image codec failure
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::MissingDependency(msg) => write!(f, "Missing dependency: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
