//! fbdev framebuffer manager for a gralloc-style graphics stack
//!
//! Maps the kernel's linear framebuffer, negotiates a page-flip capable
//! multi-buffer layout with the driver, and posts buffers either by moving
//! the display offset or, when that is impossible, by copying them in
//! software.
//!
//! # Architecture
//!
//! ```text
//! FramebufferDevice::open("fb0")
//!         ↓
//! DisplayModule (negotiates once, under a mutex)
//!         ├── negotiate   open candidates, 5-6-5 baseline, virtual height,
//!         │               refresh / physical size / DPI
//!         ├── map_region  mmap with shrink-and-retry, zero fill
//!         ↓
//! Display::post(handle)
//!         ├── Flip { yoffset }   framebuffer-flagged handles
//!         └── Blit               split-swap copy of client buffers
//! ```
//!
//! Page-flip loss is a capability, not an error: see [`PageFlip`].
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(all(feature = "linux", target_os = "linux"))]
//! # fn demo<A: fb_platform::BufferMapper>(mapper: A) -> gralloc_fb::Result<()> {
//! use gralloc_fb::{DisplayConfig, DisplayModule, FramebufferDevice, FB0};
//!
//! let module = DisplayModule::linux(DisplayConfig::default());
//! let mut device = FramebufferDevice::open(&module, FB0, mapper)?;
//! let front = device.display().framebuffer_handle();
//! device.post(&front)?;
//! # Ok(())
//! # }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
// ────────────────────────────────────────────────────────────────────────────
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::print_stdout)] // prefer tracing over println! in lib code
#![allow(clippy::doc_markdown)] // ioctl names in doc comments
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod blit;
pub mod config;
pub mod device;
pub mod error;
pub mod metrics;
pub mod module;
pub mod negotiate;
pub mod poster;
pub mod region;

pub use blit::{Segment, SplitSwap};
pub use config::{BlitCalibration, DisplayConfig, FB0, UPDATE_RECT_MAGIC};
pub use device::{DeviceInfo, FramebufferDevice, PixelFormat, UpdateRect};
pub use error::{Error, Result};
pub use metrics::DisplayMetrics;
pub use module::{Display, DisplayModule};
pub use negotiate::{ChannelLayout, DisplayConfiguration, PageFlip, PageFlipUnsupported};
pub use poster::PostStrategy;
pub use region::FramebufferRegion;
