//! One-time display negotiation shared by every opened device.
//!
//! A [`DisplayModule`] owns the device opener and configuration. The first
//! [`DisplayModule::display`] call opens, negotiates and maps under a mutex;
//! concurrent and later callers get the same [`Display`]. A failed attempt
//! leaves the module unconfigured so the next call tries again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fb_platform::{BufferHandle, BufferMapper, DeviceOpener, FbDevice, FbVarScreenInfo};

use crate::config::{BlitCalibration, DisplayConfig};
use crate::error::{Error, Result};
use crate::negotiate::{self, DisplayConfiguration};
use crate::poster::{self, PostStrategy};
use crate::region::{self, FramebufferRegion};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A negotiated, mapped display.
pub struct Display<D: FbDevice> {
    device: D,
    region: FramebufferRegion<D::Memory>,
    configuration: DisplayConfiguration,
    var: Mutex<FbVarScreenInfo>,
    calibration: BlitCalibration,
}

impl<D: FbDevice> core::fmt::Debug for Display<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Display")
            .field("configuration", &self.configuration)
            .field("base", &self.region.base())
            .field("len", &self.region.len())
            .finish_non_exhaustive()
    }
}

impl<D: FbDevice> Display<D> {
    /// The negotiated configuration.
    pub fn configuration(&self) -> &DisplayConfiguration {
        &self.configuration
    }

    /// The mapped region.
    pub fn region(&self) -> &FramebufferRegion<D::Memory> {
        &self.region
    }

    /// The open driver.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The distinguished handle covering the whole framebuffer.
    pub fn framebuffer_handle(&self) -> BufferHandle {
        self.region.handle()
    }

    /// Snapshot of the variable info flips are written with.
    pub fn variable_info(&self) -> FbVarScreenInfo {
        *lock(&self.var)
    }

    /// Hand out a flippable one-buffer slot, or `None` when page flipping
    /// is unsupported or every slot is taken.
    pub fn allocate_framebuffer(&self) -> Option<BufferHandle> {
        if !self.configuration.page_flip.is_supported() {
            return None;
        }
        self.region.allocate_slot()
    }

    /// Return a slot from [`Display::allocate_framebuffer`].
    pub fn free_framebuffer(&self, handle: &BufferHandle) -> bool {
        self.region.release_slot(handle)
    }

    /// Store packed update-rectangle words in the reserved fields sent with
    /// flips.
    pub(crate) fn set_update_rect(&self, words: [u32; 3]) {
        let mut var = lock(&self.var);
        for (dst, src) in var.reserved.iter_mut().zip(words) {
            *dst = src;
        }
    }

    /// Show `handle`: validate it, then flip or blit.
    ///
    /// An invalid handle fails before any driver I/O.
    pub fn post<A: BufferMapper + ?Sized>(
        &self,
        mapper: &A,
        handle: &BufferHandle,
    ) -> Result<PostStrategy> {
        if !mapper.validate(handle) {
            return Err(Error::InvalidArgument("invalid buffer handle"));
        }
        let page_flip = &self.configuration.page_flip;
        let strategy = PostStrategy::choose(&self.region, page_flip, handle)?;
        match strategy {
            PostStrategy::Flip { yoffset } => {
                let mut var = lock(&self.var);
                poster::flip(&self.device, &mut var, yoffset)?;
            }
            PostStrategy::Blit => {
                let var = self.variable_info();
                poster::blit(&self.region, &var, self.calibration, mapper, handle)?;
            }
        }
        Ok(strategy)
    }
}

/// Owner of the one-time negotiation.
pub struct DisplayModule<O: DeviceOpener> {
    opener: O,
    config: DisplayConfig,
    display: Mutex<Option<Arc<Display<O::Device>>>>,
}

impl<O: DeviceOpener> core::fmt::Debug for DisplayModule<O> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DisplayModule")
            .field("config", &self.config)
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}

impl<O: DeviceOpener> DisplayModule<O> {
    /// A module that will open devices through `opener`.
    pub fn new(opener: O, config: DisplayConfig) -> Self {
        Self {
            opener,
            config,
            display: Mutex::new(None),
        }
    }

    /// The opener devices are opened through.
    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// The configuration negotiation runs with.
    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    /// `true` once a display has been negotiated.
    pub fn is_configured(&self) -> bool {
        lock(&self.display).is_some()
    }

    /// The negotiated display, negotiating on first use.
    pub fn display(&self) -> Result<Arc<Display<O::Device>>> {
        let mut slot = lock(&self.display);
        if let Some(display) = slot.as_ref() {
            return Ok(Arc::clone(display));
        }
        let display = Arc::new(self.bring_up()?);
        *slot = Some(Arc::clone(&display));
        Ok(display)
    }

    fn bring_up(&self) -> Result<Display<O::Device>> {
        self.config.validate()?;
        let (device, path) = negotiate::open_first(&self.opener, &self.config.candidate_paths)?;
        let mut n = negotiate::negotiate(&device, &self.config)?;
        let region = region::map_region(&device, &mut n.var, n.fix.line_length, &mut n.page_flip)?;
        let configuration = n.configuration(&path, region.buffer_count());
        Ok(Display {
            device,
            region,
            configuration,
            var: Mutex::new(n.var),
            calibration: self.config.blit,
        })
    }
}

#[cfg(all(feature = "linux", target_os = "linux"))]
impl DisplayModule<fb_platform::LinuxOpener> {
    /// A module backed by the real `/dev/fb*` devices.
    pub fn linux(config: DisplayConfig) -> Self {
        Self::new(fb_platform::LinuxOpener, config)
    }
}
