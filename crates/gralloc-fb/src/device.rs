//! The framebuffer device handed to the graphics stack.
//!
//! ```text
//! open("fb0") ──► DisplayModule::display()   (negotiates once)
//!      │
//!      ├── set_swap_interval(n)   n ∈ [1, 1]
//!      ├── set_update_rect(l, t, w, h)
//!      ├── post(handle)           flip or blit
//!      └── close()
//! ```

use std::sync::Arc;

use fb_platform::{BufferHandle, BufferMapper, DeviceOpener, FbDevice};
use serde::Serialize;

use crate::config::{FB0, MAX_SWAP_INTERVAL, MIN_SWAP_INTERVAL};
use crate::error::{Error, Result};
use crate::module::{Display, DisplayModule};
use crate::negotiate::DisplayConfiguration;
use crate::poster::PostStrategy;

// ── PixelFormat ──────────────────────────────────────────────────────────────

/// Pixel formats the device can advertise, with their HAL codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PixelFormat {
    /// 32-bit, R in the high byte.
    Rgba8888 = 1,
    /// 32-bit, alpha ignored.
    Rgbx8888 = 2,
    /// 16-bit 5-6-5.
    Rgb565 = 4,
    /// 32-bit, B in the high byte.
    Bgra8888 = 5,
    /// 16-bit 5-5-5-1.
    Rgba5551 = 6,
}

impl PixelFormat {
    /// HAL format code.
    pub const fn hal_code(self) -> i32 {
        self as i32
    }

    /// The 32-bit format the red channel offset points at.
    pub const fn preferred_32bpp(red_offset: u32) -> Self {
        match red_offset {
            16 => Self::Bgra8888,
            24 => Self::Rgba8888,
            _ => Self::Rgbx8888,
        }
    }

    /// Select the advertised format from the negotiated layout.
    ///
    /// 32-bit layouts always advertise RGBX 8888; the layout-derived choice
    /// is only logged.
    pub fn select(configuration: &DisplayConfiguration) -> Result<Self> {
        match configuration.bits_per_pixel {
            32 => {
                let preferred = Self::preferred_32bpp(configuration.red.offset);
                tracing::debug!(
                    preferred = preferred.hal_code(),
                    selected = Self::Rgbx8888.hal_code(),
                    "32 bpp format"
                );
                Ok(Self::Rgbx8888)
            }
            16 if configuration.green.length == 6 => Ok(Self::Rgb565),
            16 => Ok(Self::Rgba5551),
            other => {
                tracing::error!(bpp = other, "unsupported format");
                Err(Error::UnsupportedFormat(other))
            }
        }
    }
}

// ── DeviceInfo ───────────────────────────────────────────────────────────────

/// Metadata the device reports on open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviceInfo {
    /// Flags, always zero.
    pub flags: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Stride in pixels.
    pub stride: u32,
    /// Advertised pixel format.
    pub format: PixelFormat,
    /// Horizontal density.
    pub xdpi: f32,
    /// Vertical density.
    pub ydpi: f32,
    /// Refresh rate in Hz.
    pub fps: f32,
    /// Smallest accepted swap interval.
    pub min_swap_interval: i32,
    /// Largest accepted swap interval.
    pub max_swap_interval: i32,
}

// ── UpdateRect ───────────────────────────────────────────────────────────────

/// A partial-update rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRect {
    /// Left edge.
    pub left: i32,
    /// Top edge.
    pub top: i32,
    /// Width.
    pub width: i32,
    /// Height.
    pub height: i32,
}

impl UpdateRect {
    /// Validate and build. Width and height must be positive, left and top
    /// non-negative.
    pub fn new(left: i32, top: i32, width: i32, height: i32) -> Result<Self> {
        if width <= 0 || height <= 0 {
            return Err(Error::InvalidArgument("update rect must have positive size"));
        }
        if left < 0 || top < 0 {
            return Err(Error::InvalidArgument("update rect must not start off screen"));
        }
        Ok(Self {
            left,
            top,
            width,
            height,
        })
    }

    /// The three reserved words drivers read the rectangle from:
    /// marker, `left | top << 16`, `right | bottom << 16`.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn pack(&self) -> [u32; 3] {
        let word = |x: i32, y: i32| u32::from(x as u16) | ((y as u32) << 16);
        let right = self.left.saturating_add(self.width);
        let bottom = self.top.saturating_add(self.height);
        [
            crate::config::UPDATE_RECT_MAGIC,
            word(self.left, self.top),
            word(right, bottom),
        ]
    }
}

// ── FramebufferDevice ────────────────────────────────────────────────────────

/// An open framebuffer device.
pub struct FramebufferDevice<D: FbDevice, A: BufferMapper> {
    display: Arc<Display<D>>,
    mapper: A,
    info: DeviceInfo,
    swap_interval: i32,
    update_rect: Option<UpdateRect>,
    current: Option<BufferHandle>,
}

impl<D: FbDevice, A: BufferMapper> core::fmt::Debug for FramebufferDevice<D, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FramebufferDevice")
            .field("info", &self.info)
            .field("swap_interval", &self.swap_interval)
            .field("update_rect", &self.update_rect)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl<D: FbDevice, A: BufferMapper> FramebufferDevice<D, A> {
    /// Open the device called `name` on `module`, negotiating the display if
    /// this is the first open. Only [`FB0`] exists.
    pub fn open<O>(module: &DisplayModule<O>, name: &str, mapper: A) -> Result<Self>
    where
        O: DeviceOpener<Device = D>,
    {
        if name != FB0 {
            return Err(Error::InvalidArgument("unknown framebuffer device"));
        }
        let display = module.display()?;
        let configuration = display.configuration();
        let format = PixelFormat::select(configuration)?;
        let bytes_per_pixel = configuration.bits_per_pixel / 8;
        let stride = configuration
            .line_length
            .checked_div(bytes_per_pixel)
            .ok_or(Error::UnsupportedFormat(configuration.bits_per_pixel))?;

        let info = DeviceInfo {
            flags: 0,
            width: configuration.xres,
            height: configuration.yres,
            stride,
            format,
            xdpi: configuration.xdpi,
            ydpi: configuration.ydpi,
            fps: configuration.fps,
            min_swap_interval: MIN_SWAP_INTERVAL,
            max_swap_interval: MAX_SWAP_INTERVAL,
        };
        tracing::debug!(
            width = info.width,
            height = info.height,
            stride = info.stride,
            format = format.hal_code(),
            "framebuffer device opened"
        );
        Ok(Self {
            display,
            mapper,
            info,
            swap_interval: MIN_SWAP_INTERVAL,
            update_rect: None,
            current: None,
        })
    }

    /// Device metadata.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// The shared negotiated display.
    pub fn display(&self) -> &Arc<Display<D>> {
        &self.display
    }

    /// The allocator capability this device locks buffers through.
    pub fn mapper(&self) -> &A {
        &self.mapper
    }

    /// Current swap interval.
    pub fn swap_interval(&self) -> i32 {
        self.swap_interval
    }

    /// Set the swap interval; values outside
    /// `[min_swap_interval, max_swap_interval]` are rejected.
    pub fn set_swap_interval(&mut self, interval: i32) -> Result<()> {
        if interval < self.info.min_swap_interval || interval > self.info.max_swap_interval {
            return Err(Error::InvalidArgument("swap interval out of range"));
        }
        self.swap_interval = interval;
        Ok(())
    }

    /// The last accepted update rectangle.
    pub fn update_rect(&self) -> Option<UpdateRect> {
        self.update_rect
    }

    /// Set the partial-update rectangle sent with subsequent flips.
    pub fn set_update_rect(&mut self, left: i32, top: i32, width: i32, height: i32) -> Result<()> {
        let rect = UpdateRect::new(left, top, width, height)?;
        self.display.set_update_rect(rect.pack());
        self.update_rect = Some(rect);
        Ok(())
    }

    /// The last buffer successfully posted.
    pub fn current_buffer(&self) -> Option<BufferHandle> {
        self.current
    }

    /// Show `handle` on screen.
    pub fn post(&mut self, handle: &BufferHandle) -> Result<PostStrategy> {
        let strategy = self.display.post(&self.mapper, handle)?;
        if matches!(strategy, PostStrategy::Flip { .. }) {
            self.current = Some(*handle);
        }
        Ok(strategy)
    }

    /// Close the device. The display stays mapped for later opens.
    pub fn close(self) {
        tracing::debug!("framebuffer device closed");
    }
}
