//! Error taxonomy for negotiation, mapping and posting.
//!
//! Page-flip degradation is never an error; it is reported through
//! [`crate::PageFlip`]. Everything here is fatal to the call that returned it.

use std::path::PathBuf;

use fb_platform::{AllocError, DriverError};
use thiserror::Error;

/// Errors returned by the display manager.
#[derive(Debug, Error)]
pub enum Error {
    /// No candidate device path could be opened.
    #[error("no framebuffer device could be opened (tried {tried:?})")]
    FailedOpen {
        /// Every path attempted, in order.
        tried: Vec<PathBuf>,
        /// The error from the last attempt.
        #[source]
        last: DriverError,
    },

    /// A required screen-info read failed.
    #[error("screen info query failed")]
    Query(#[source] DriverError),

    /// The driver reported no usable framebuffer memory.
    #[error("driver reported no framebuffer memory")]
    Memory,

    /// Mapping failed at every attempted virtual height.
    #[error("framebuffer mapping failed")]
    Map(#[source] DriverError),

    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The driver rejected a display-offset update.
    #[error("display offset update rejected")]
    DriverWrite(#[source] DriverError),

    /// The allocator could not lock a buffer for the blit path.
    #[error("buffer lock failed")]
    Lock(#[source] AllocError),

    /// The negotiated depth has no matching pixel format.
    #[error("unsupported framebuffer depth: {0} bpp")]
    UnsupportedFormat(u32),

    /// The configuration file could not be read.
    #[error("cannot read display configuration {}", .path.display())]
    ConfigRead {
        /// The file that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("invalid display configuration")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// The negative errno a C-style caller would see for this error.
    pub fn errno(&self) -> i32 {
        let positive = match self {
            Self::FailedOpen { last, .. } => last.errno,
            Self::Query(e) | Self::Map(e) | Self::DriverWrite(e) => e.errno,
            Self::Memory => DriverError::ENOMEM,
            Self::Lock(AllocError::LockFailed(errno)) => *errno,
            Self::InvalidArgument(_)
            | Self::UnsupportedFormat(_)
            | Self::Lock(_)
            | Self::Config(_) => DriverError::EINVAL,
            Self::ConfigRead { source, .. } => source.raw_os_error().unwrap_or(DriverError::EIO),
        };
        positive.saturating_neg()
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
