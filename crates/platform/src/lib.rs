//! Hardware Abstraction Layer (HAL) for Linux fbdev display controllers
//!
//! This crate provides trait-based abstractions for the two collaborators
//! a framebuffer display manager talks to, enabling development and testing
//! without a physical panel.
//!
//! # Architecture Layers
//!
//! ```text
//! Graphics stack (surface flinger / compositor)
//!         ↓
//! gralloc-fb (negotiation, mapping, posting)
//!         ↓
//! Platform HAL (this crate - trait abstractions)
//!         ↓
//! Kernel fbdev driver (/dev/graphics/fb0, /dev/fb0)
//! ```
//!
//! # Abstractions
//!
//! - [`FbDevice`] - the driver control interface: fixed/variable screen
//!   info queries, variable info writes, shared memory mapping
//! - [`DeviceOpener`] - turns a candidate device path into an [`FbDevice`]
//! - [`FbMemory`] - a mapped, CPU-visible framebuffer window
//! - [`BufferMapper`] - the external buffer allocator's validate/lock/unlock
//!   capability, consumed when a client buffer must be copied to the screen
//!
//! # Features
//!
//! - `linux` (default): real `/dev/fb*` backend using `libc`
//! - `mocks`: scriptable driver and allocator mocks for host tests
//!
//! # Example
//!
//! ```no_run
//! use fb_platform::{DeviceOpener, FbDevice};
//!
//! fn probe<O: DeviceOpener>(opener: &O) -> Result<u32, fb_platform::DriverError> {
//!     let device = opener.open(std::path::Path::new("/dev/fb0"))?;
//!     Ok(device.variable_info()?.xres)
//! }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing over println! in lib code
// Pedantic lints suppressed for this hardware HAL crate:
#![allow(clippy::doc_markdown)] // ioctl names and hex values in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors, callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod buffer;
pub mod device;
pub mod screeninfo;

#[cfg(all(feature = "linux", target_os = "linux"))]
pub mod linux;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

// Re-export main high-level traits
pub use buffer::{
    AllocError, BufferFlags, BufferHandle, BufferMapper, BufferUsage, CpuMapping, LockRect,
};
pub use device::{DeviceOpener, DriverError, DriverOp, FbDevice, FbMemory};

// Re-export the fbdev ABI
pub use screeninfo::{
    FbBitfield, FbFixScreenInfo, FbVarScreenInfo, FB_ACTIVATE_NOW, FB_ACTIVATE_VBL,
    FBIOGET_FSCREENINFO, FBIOGET_VSCREENINFO, FBIOPUT_VSCREENINFO,
};

#[cfg(all(feature = "linux", target_os = "linux"))]
pub use linux::{LinuxFbDevice, LinuxOpener, MmapRegion};
