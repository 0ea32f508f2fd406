//! Display driver control abstraction
//!
//! The kernel exposes a framebuffer as a character device answering three
//! ioctls and `mmap`. [`FbDevice`] captures exactly that surface so the
//! negotiation and posting logic can run against a scripted mock in tests
//! and against `/dev/fb0` on a target.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::screeninfo::{FbFixScreenInfo, FbVarScreenInfo};

/// Which driver operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOp {
    /// Opening the device node.
    Open,
    /// `FBIOGET_FSCREENINFO`.
    GetFixedInfo,
    /// `FBIOGET_VSCREENINFO`.
    GetVariableInfo,
    /// `FBIOPUT_VSCREENINFO`.
    PutVariableInfo,
    /// `mmap` of the framebuffer memory.
    Map,
}

impl DriverOp {
    /// Short operation name for log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::GetFixedInfo => "FBIOGET_FSCREENINFO",
            Self::GetVariableInfo => "FBIOGET_VSCREENINFO",
            Self::PutVariableInfo => "FBIOPUT_VSCREENINFO",
            Self::Map => "mmap",
        }
    }
}

impl core::fmt::Display for DriverOp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed driver operation with the OS error number it reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{op} failed: {}", errno_text(.errno))]
pub struct DriverError {
    /// The operation that failed.
    pub op: DriverOp,
    /// Positive OS error number (`EINVAL`, `ENOMEM`, ...).
    pub errno: i32,
}

impl DriverError {
    /// `EINVAL`: the driver rejected the request.
    pub const EINVAL: i32 = 22;
    /// `ENOMEM`: not enough memory to satisfy a mapping.
    pub const ENOMEM: i32 = 12;
    /// `ENOENT`: no such device node.
    pub const ENOENT: i32 = 2;
    /// `EIO`: generic I/O failure, used when the OS gave no errno.
    pub const EIO: i32 = 5;

    /// Create an error for `op` carrying `errno`.
    pub const fn new(op: DriverOp, errno: i32) -> Self {
        Self { op, errno }
    }

    /// Capture `errno` from an `std::io::Error`, falling back to `EIO`.
    pub fn from_io(op: DriverOp, err: &std::io::Error) -> Self {
        Self::new(op, err.raw_os_error().unwrap_or(Self::EIO))
    }
}

fn errno_text(errno: &i32) -> std::io::Error {
    std::io::Error::from_raw_os_error(*errno)
}

/// A mapped, CPU-visible window onto framebuffer memory.
///
/// Implementations own the mapping and release it on drop. The base
/// address must stay fixed for the lifetime of the value: page-flip offsets
/// are computed against it.
pub trait FbMemory: Send + Sync {
    /// The whole mapping as bytes.
    fn as_bytes(&self) -> &[u8];

    /// The whole mapping as mutable bytes.
    fn as_bytes_mut(&mut self) -> &mut [u8];

    /// Address of the first byte.
    fn base_addr(&self) -> usize {
        self.as_bytes().as_ptr() as usize
    }

    /// Mapping length in bytes.
    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// `true` for an empty mapping.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The fbdev driver control interface.
///
/// Methods take `&self`: the kernel serialises ioctls on the file, and the
/// device is shared between the one-time negotiation and the per-frame
/// page-flip writes.
pub trait FbDevice: Send + Sync {
    /// The mapping type returned by [`FbDevice::map`].
    type Memory: FbMemory;

    /// Read the fixed screen information (`FBIOGET_FSCREENINFO`).
    fn fixed_info(&self) -> Result<FbFixScreenInfo, DriverError>;

    /// Read the variable screen information (`FBIOGET_VSCREENINFO`).
    fn variable_info(&self) -> Result<FbVarScreenInfo, DriverError>;

    /// Write the variable screen information (`FBIOPUT_VSCREENINFO`).
    ///
    /// Like the ioctl, the driver may adjust fields and the adjusted values
    /// are written back into `info` on success.
    fn put_variable_info(&self, info: &mut FbVarScreenInfo) -> Result<(), DriverError>;

    /// Map `len` bytes of framebuffer memory shared and read-write at
    /// offset zero.
    fn map(&self, len: usize) -> Result<Self::Memory, DriverError>;

    /// Platform page size used to round mapping lengths.
    fn page_size(&self) -> usize {
        4096
    }
}

impl<T: FbDevice + ?Sized> FbDevice for Arc<T> {
    type Memory = T::Memory;

    fn fixed_info(&self) -> Result<FbFixScreenInfo, DriverError> {
        (**self).fixed_info()
    }

    fn variable_info(&self) -> Result<FbVarScreenInfo, DriverError> {
        (**self).variable_info()
    }

    fn put_variable_info(&self, info: &mut FbVarScreenInfo) -> Result<(), DriverError> {
        (**self).put_variable_info(info)
    }

    fn map(&self, len: usize) -> Result<Self::Memory, DriverError> {
        (**self).map(len)
    }

    fn page_size(&self) -> usize {
        (**self).page_size()
    }
}

/// Opens a candidate device path.
pub trait DeviceOpener {
    /// The device type produced on success.
    type Device: FbDevice;

    /// Open `path` read-write as a framebuffer device.
    fn open(&self, path: &Path) -> Result<Self::Device, DriverError>;
}
