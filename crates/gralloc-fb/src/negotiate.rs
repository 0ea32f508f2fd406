//! Capability negotiation.
//!
//! Opens the display device, establishes a 16-bit 5-6-5 baseline, asks the
//! driver for a multi-buffer virtual layout and derives the display metrics.
//! A driver that cannot page flip degrades the [`PageFlip`] capability; only
//! open failures, failed reads and missing memory are fatal.

use std::path::{Path, PathBuf};

use fb_platform::{
    DeviceOpener, DriverError, DriverOp, FbBitfield, FbDevice, FbFixScreenInfo, FbVarScreenInfo,
    FB_ACTIVATE_NOW,
};
use serde::Serialize;

use crate::config::DisplayConfig;
use crate::error::{Error, Result};
use crate::metrics::DisplayMetrics;

// ── PageFlip ─────────────────────────────────────────────────────────────────

/// Why page flipping is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageFlipUnsupported {
    /// The configuration asked for a single buffer.
    SingleBufferRequested,
    /// The driver rejected the enlarged virtual height.
    DriverRejectedVirtualHeight,
    /// The driver accepted the write but granted fewer rows than needed.
    DriverShrankVirtualHeight {
        /// Rows the driver granted.
        granted: u32,
        /// Rows needed for two buffers.
        requested: u32,
    },
    /// Mapping only succeeded after shrinking to a single buffer.
    InsufficientMappableMemory {
        /// Buffers finally mapped.
        buffers: u32,
    },
}

impl core::fmt::Display for PageFlipUnsupported {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SingleBufferRequested => f.write_str("a single buffer was requested"),
            Self::DriverRejectedVirtualHeight => {
                f.write_str("driver rejected the virtual height")
            }
            Self::DriverShrankVirtualHeight { granted, requested } => {
                write!(f, "driver granted {granted} rows, {requested} needed")
            }
            Self::InsufficientMappableMemory { buffers } => {
                write!(f, "only {buffers} buffer(s) could be mapped")
            }
        }
    }
}

/// Page-flip capability established by negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PageFlip {
    /// Buffers inside the framebuffer region can be flipped to.
    Supported,
    /// Every post takes the software blit path.
    Unsupported {
        /// The first condition that ruled flipping out.
        reason: PageFlipUnsupported,
    },
}

impl PageFlip {
    /// `true` when flipping is available.
    pub const fn is_supported(&self) -> bool {
        matches!(self, Self::Supported)
    }

    /// Rule out flipping. The first reason recorded is kept.
    pub fn disable(&mut self, reason: PageFlipUnsupported) {
        if self.is_supported() {
            tracing::warn!(%reason, "page flipping not supported");
            *self = Self::Unsupported { reason };
        }
    }
}

// ── Negotiated configuration ────────────────────────────────────────────────

/// One colour channel's position in a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelLayout {
    /// Bit offset from the least significant bit.
    pub offset: u32,
    /// Width in bits.
    pub length: u32,
}

impl From<FbBitfield> for ChannelLayout {
    fn from(b: FbBitfield) -> Self {
        Self {
            offset: b.offset,
            length: b.length,
        }
    }
}

/// The finalized display configuration, immutable once negotiated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayConfiguration {
    /// Driver identification string.
    pub id: String,
    /// Device node that was opened.
    pub path: PathBuf,
    /// Visible width in pixels.
    pub xres: u32,
    /// Visible height in pixels.
    pub yres: u32,
    /// Bits per pixel.
    pub bits_per_pixel: u32,
    /// Red channel.
    pub red: ChannelLayout,
    /// Green channel.
    pub green: ChannelLayout,
    /// Blue channel.
    pub blue: ChannelLayout,
    /// Alpha channel.
    pub transp: ChannelLayout,
    /// Stride in bytes.
    pub line_length: u32,
    /// Total rows mapped across all buffers.
    pub yres_virtual: u32,
    /// Buffers in the mapped region, at least one.
    pub buffer_count: u32,
    /// Framebuffer memory the driver reports.
    pub smem_len: u32,
    /// Physical width in millimetres.
    pub width_mm: u32,
    /// Physical height in millimetres.
    pub height_mm: u32,
    /// Horizontal density.
    pub xdpi: f32,
    /// Vertical density.
    pub ydpi: f32,
    /// Refresh rate × 1000.
    pub refresh_mhz: u32,
    /// Refresh rate in Hz.
    pub fps: f32,
    /// Page-flip capability.
    pub page_flip: PageFlip,
}

// ── Negotiation ──────────────────────────────────────────────────────────────

/// Driver state after negotiation, before mapping.
#[derive(Debug, Clone)]
pub struct Negotiation {
    /// The variable info to map with and to flip through.
    pub var: FbVarScreenInfo,
    /// The fixed info re-read after negotiation.
    pub fix: FbFixScreenInfo,
    /// Capability so far; mapping may still degrade it.
    pub page_flip: PageFlip,
    /// Derived metrics.
    pub metrics: DisplayMetrics,
}

impl Negotiation {
    /// Freeze into a [`DisplayConfiguration`] once mapping has settled the
    /// virtual height.
    pub fn configuration(&self, path: &Path, buffer_count: u32) -> DisplayConfiguration {
        let var = &self.var;
        DisplayConfiguration {
            id: self.fix.id_str().into_owned(),
            path: path.to_path_buf(),
            xres: var.xres,
            yres: var.yres,
            bits_per_pixel: var.bits_per_pixel,
            red: var.red.into(),
            green: var.green.into(),
            blue: var.blue.into(),
            transp: var.transp.into(),
            line_length: self.fix.line_length,
            yres_virtual: var.yres_virtual,
            buffer_count,
            smem_len: self.fix.smem_len,
            width_mm: self.metrics.width_mm,
            height_mm: self.metrics.height_mm,
            xdpi: self.metrics.xdpi,
            ydpi: self.metrics.ydpi,
            refresh_mhz: self.metrics.refresh_mhz,
            fps: self.metrics.fps,
            page_flip: self.page_flip,
        }
    }
}

/// Open the first candidate path that succeeds.
pub fn open_first<O: DeviceOpener>(
    opener: &O,
    candidates: &[PathBuf],
) -> Result<(O::Device, PathBuf)> {
    let mut last = DriverError::new(DriverOp::Open, DriverError::ENOENT);
    for path in candidates {
        match opener.open(path) {
            Ok(device) => {
                tracing::debug!(path = %path.display(), "opened display device");
                return Ok((device, path.clone()));
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "candidate did not open");
                last = e;
            }
        }
    }
    Err(Error::FailedOpen {
        tried: candidates.to_vec(),
        last,
    })
}

/// Negotiate the buffer layout with an open device.
pub fn negotiate<D: FbDevice>(device: &D, config: &DisplayConfig) -> Result<Negotiation> {
    let fix = device.fixed_info().map_err(Error::Query)?;
    let mut var = device.variable_info().map_err(Error::Query)?;
    if var.xres == 0 || var.yres == 0 {
        return Err(Error::Query(DriverError::new(
            DriverOp::GetVariableInfo,
            DriverError::EINVAL,
        )));
    }
    tracing::debug!(
        id = %fix.id_str(),
        xres = var.xres,
        yres = var.yres,
        yres_virtual = var.yres_virtual,
        bpp = var.bits_per_pixel,
        "driver reports"
    );

    var.clear_reserved();
    var.xoffset = 0;
    var.yoffset = 0;
    var.activate = FB_ACTIVATE_NOW;
    var.set_rgb565();

    let two_buffers = var.yres.saturating_mul(2);
    let mut page_flip = PageFlip::Supported;
    var.yres_virtual = var.yres.saturating_mul(config.num_buffers);
    tracing::debug!(yres_virtual = var.yres_virtual, "requesting virtual height");

    if let Err(e) = device.put_variable_info(&mut var) {
        tracing::debug!(error = %e, "virtual height write failed");
        var.yres_virtual = var.yres;
        page_flip.disable(PageFlipUnsupported::DriverRejectedVirtualHeight);
    }
    if var.yres_virtual < two_buffers {
        let reason = if config.num_buffers < 2 {
            PageFlipUnsupported::SingleBufferRequested
        } else {
            PageFlipUnsupported::DriverShrankVirtualHeight {
                granted: var.yres_virtual,
                requested: two_buffers,
            }
        };
        var.yres_virtual = var.yres;
        page_flip.disable(reason);
    }

    var = device.variable_info().map_err(Error::Query)?;
    if var.yres == 0 {
        return Err(Error::Query(DriverError::new(
            DriverOp::GetVariableInfo,
            DriverError::EINVAL,
        )));
    }
    let settled_two_buffers = var.yres.saturating_mul(2);
    if page_flip.is_supported() && var.yres_virtual < settled_two_buffers {
        page_flip.disable(PageFlipUnsupported::DriverShrankVirtualHeight {
            granted: var.yres_virtual,
            requested: settled_two_buffers,
        });
    }
    if !page_flip.is_supported() || var.yres_virtual < var.yres {
        var.yres_virtual = var.yres;
    }
    tracing::debug!(
        yres = var.yres,
        yres_virtual = var.yres_virtual,
        "driver settled virtual height"
    );

    let metrics = DisplayMetrics::derive(&var, config.default_dpi, config.default_refresh_mhz);
    if metrics.refresh_defaulted {
        tracing::debug!(refresh_mhz = metrics.refresh_mhz, "no usable timings, using default refresh");
    }
    if metrics.size_synthesized {
        tracing::debug!(
            width_mm = metrics.width_mm,
            height_mm = metrics.height_mm,
            "driver reports no physical size, synthesized"
        );
    }

    var.set_rgb565();

    let fix = device.fixed_info().map_err(Error::Query)?;
    if fix.smem_len == 0 || fix.line_length == 0 {
        return Err(Error::Memory);
    }

    let layout = format!(
        "r={}:{} g={}:{} b={}:{}",
        var.red.offset, var.red.length, var.green.offset, var.green.length, var.blue.offset,
        var.blue.length
    );
    tracing::info!(
        id = %fix.id_str(),
        xres = var.xres,
        yres = var.yres,
        xres_virtual = var.xres_virtual,
        yres_virtual = var.yres_virtual,
        bpp = var.bits_per_pixel,
        layout = %layout,
        width_mm = metrics.width_mm,
        height_mm = metrics.height_mm,
        xdpi = metrics.xdpi,
        ydpi = metrics.ydpi,
        fps = metrics.fps,
        "negotiated framebuffer"
    );

    Ok(Negotiation {
        var,
        fix,
        page_flip,
        metrics,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use fb_platform::mocks::{DriverCall, MockFbDevice, MockOpener};
    use std::sync::Arc;

    #[test]
    fn test_page_flip_keeps_first_reason() {
        let mut flip = PageFlip::Supported;
        flip.disable(PageFlipUnsupported::DriverRejectedVirtualHeight);
        flip.disable(PageFlipUnsupported::InsufficientMappableMemory { buffers: 1 });
        assert_eq!(
            flip,
            PageFlip::Unsupported {
                reason: PageFlipUnsupported::DriverRejectedVirtualHeight
            }
        );
    }

    #[test]
    fn test_open_first_falls_through_candidates() {
        let dev = Arc::new(MockFbDevice::panel(16, 16, 16));
        let opener = MockOpener::new().with_device("/dev/fb0", dev);
        let paths = DisplayConfig::default().candidate_paths;
        let (_, path) = open_first(&opener, &paths).unwrap();
        assert_eq!(path, PathBuf::from("/dev/fb0"));
        assert_eq!(opener.attempts(), paths);
    }

    #[test]
    fn test_open_first_exhaustion_is_failed_open() {
        let opener = MockOpener::new();
        let err = open_first(&opener, &DisplayConfig::default().candidate_paths).unwrap_err();
        assert!(matches!(err, Error::FailedOpen { ref tried, .. } if tried.len() == 2));
    }

    #[test]
    fn test_baseline_write_clears_scratch_and_forces_565() {
        let dev = MockFbDevice::panel(320, 240, 32);
        negotiate(&dev, &DisplayConfig::default()).unwrap();
        let put = dev.puts()[0];
        assert_eq!(put.yres_virtual, 480);
        assert_eq!(put.bits_per_pixel, 16);
        assert_eq!(put.green, FbBitfield::new(5, 6));
        assert_eq!(&put.reserved[..3], &[0, 0, 0]);
        assert_eq!(put.activate, FB_ACTIVATE_NOW);
    }

    #[test]
    fn test_late_settled_virtual_height_disables_flip() {
        let dev = MockFbDevice::panel(320, 240, 16).settling_yres_virtual(300);
        let n = negotiate(&dev, &DisplayConfig::default()).unwrap();
        assert_eq!(
            n.page_flip,
            PageFlip::Unsupported {
                reason: PageFlipUnsupported::DriverShrankVirtualHeight {
                    granted: 300,
                    requested: 480
                }
            }
        );
        assert_eq!(n.var.yres_virtual, 240);
    }

    #[test]
    fn test_call_sequence() {
        let dev = MockFbDevice::panel(320, 240, 16);
        negotiate(&dev, &DisplayConfig::default()).unwrap();
        let calls = dev.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0], DriverCall::GetFixedInfo);
        assert_eq!(calls[1], DriverCall::GetVariableInfo);
        assert!(matches!(calls[2], DriverCall::PutVariableInfo(_)));
        assert_eq!(calls[3], DriverCall::GetVariableInfo);
        assert_eq!(calls[4], DriverCall::GetFixedInfo);
    }

    #[test]
    fn test_zero_smem_len_is_memory_error() {
        let dev = MockFbDevice::panel(320, 240, 16).with_smem_len(0);
        assert!(matches!(
            negotiate(&dev, &DisplayConfig::default()),
            Err(Error::Memory)
        ));
    }

    #[test]
    fn test_read_failure_is_query_error() {
        let dev = MockFbDevice::panel(320, 240, 16).failing_variable_info_after(1);
        assert!(matches!(
            negotiate(&dev, &DisplayConfig::default()),
            Err(Error::Query(e)) if e.op == DriverOp::GetVariableInfo
        ));
    }

    #[test]
    fn test_single_buffer_config_disables_flip() {
        let dev = MockFbDevice::panel(320, 240, 16);
        let config = DisplayConfig {
            num_buffers: 1,
            ..DisplayConfig::default()
        };
        let n = negotiate(&dev, &config).unwrap();
        assert_eq!(
            n.page_flip,
            PageFlip::Unsupported {
                reason: PageFlipUnsupported::SingleBufferRequested
            }
        );
        assert_eq!(n.var.yres_virtual, 240);
    }
}
