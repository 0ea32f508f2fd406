//! fbprobe info / pattern
//!
//! Both commands go through the same `FramebufferDevice::open` a compositor
//! would use, so what they print is what a compositor would see.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use fb_platform::{BufferHandle, BufferMapper, BufferUsage, DeviceOpener, LockRect};
use gralloc_fb::{
    DeviceInfo, DisplayConfiguration, DisplayModule, FramebufferDevice, PageFlip, PostStrategy,
    FB0,
};
use serde::Serialize;

use crate::heap::HeapMapper;
use crate::pattern::{color_bars, Surface};

/// Everything `info` reports.
#[derive(Debug, Serialize)]
pub struct Report {
    pub configuration: DisplayConfiguration,
    pub device: DeviceInfo,
}

/// How `pattern` gets frames on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Via {
    /// Flip when the panel supports it, otherwise blit.
    Auto,
    /// Draw into framebuffer slots and flip between them.
    Flip,
    /// Draw into a heap buffer and copy it with the software blit.
    Blit,
}

type Device<O> = FramebufferDevice<<O as DeviceOpener>::Device, HeapMapper>;

fn open<O: DeviceOpener>(module: &DisplayModule<O>) -> Result<Device<O>> {
    let display = module.display().context("display bring-up failed")?;
    let region = display.region();
    let mapper = HeapMapper::new().with_framebuffer(region.base(), region.len());
    FramebufferDevice::open(module, FB0, mapper).context("opening fb0")
}

/// Negotiate (if needed) and describe the display.
pub fn info<O: DeviceOpener>(module: &DisplayModule<O>) -> Result<Report> {
    let device = open(module)?;
    let report = Report {
        configuration: device.display().configuration().clone(),
        device: *device.info(),
    };
    device.close();
    Ok(report)
}

fn surface(configuration: &DisplayConfiguration) -> Surface {
    Surface {
        width: configuration.xres as usize,
        height: configuration.yres as usize,
        stride: configuration.line_length as usize,
        bits_per_pixel: configuration.bits_per_pixel,
    }
}

fn draw(mapper: &HeapMapper, handle: &BufferHandle, surface: Surface, phase: usize) -> Result<()> {
    let full = LockRect::full(
        u32::try_from(surface.width).unwrap_or(u32::MAX),
        u32::try_from(surface.height).unwrap_or(u32::MAX),
    );
    let mut mapping = mapper
        .lock(handle, BufferUsage::SW_WRITE_RARELY, full)
        .context("locking buffer for drawing")?;
    let drawn = color_bars(mapping.as_bytes_mut(), surface, phase);
    mapper.unlock(handle).context("unlocking drawn buffer")?;
    if !drawn {
        bail!("no test pattern for {} bpp", surface.bits_per_pixel);
    }
    Ok(())
}

/// Post `frames` frames of scrolling colour bars, `interval` apart.
///
/// Returns the strategy each post took.
pub fn pattern<O: DeviceOpener>(
    module: &DisplayModule<O>,
    via: Via,
    frames: u32,
    interval: Duration,
) -> Result<Vec<PostStrategy>> {
    let mut device = open(module)?;
    let display = std::sync::Arc::clone(device.display());
    let configuration = display.configuration();
    let surface = surface(configuration);

    let flip = match (via, &configuration.page_flip) {
        (Via::Blit, _) | (Via::Auto, PageFlip::Unsupported { .. }) => false,
        (_, PageFlip::Supported) => true,
        (Via::Flip, PageFlip::Unsupported { reason }) => {
            bail!("page flipping unavailable: {reason}")
        }
    };

    let buffers: Vec<BufferHandle> = if flip {
        std::iter::from_fn(|| display.allocate_framebuffer()).collect()
    } else {
        let len = surface.stride.saturating_mul(surface.height);
        vec![device.mapper().allocate(len)]
    };
    if buffers.is_empty() {
        bail!("no free framebuffer slots");
    }
    tracing::info!(flip, buffers = buffers.len(), frames, "posting test pattern");

    let mut strategies = Vec::new();
    for (frame, handle) in (0..frames).zip(buffers.iter().cycle()) {
        let phase = frame as usize;
        draw(device.mapper(), handle, surface, phase)?;
        let strategy = device
            .post(handle)
            .with_context(|| format!("posting frame {frame}"))?;
        tracing::debug!(frame, flip = matches!(strategy, PostStrategy::Flip { .. }), "posted");
        strategies.push(strategy);
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }

    for handle in &buffers {
        if handle.is_framebuffer() {
            display.free_framebuffer(handle);
        } else {
            device.mapper().free(handle);
        }
    }
    device.close();
    Ok(strategies)
}
