//! Buffer posting: page flip or software blit.

use fb_platform::{
    BufferHandle, BufferMapper, BufferUsage, CpuMapping, FbDevice, FbVarScreenInfo, LockRect,
    FB_ACTIVATE_VBL,
};

use crate::blit::SplitSwap;
use crate::config::BlitCalibration;
use crate::error::{Error, Result};
use crate::negotiate::PageFlip;
use crate::region::FramebufferRegion;

/// How a buffer reaches the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostStrategy {
    /// Point the display at a buffer already inside the framebuffer.
    Flip {
        /// Row offset written to the driver.
        yoffset: u32,
    },
    /// Copy a client buffer into the framebuffer.
    Blit,
}

impl PostStrategy {
    /// Pick a strategy for `handle`: framebuffer-flagged buffers flip,
    /// everything else is copied.
    ///
    /// Without page flipping the driver only ever shows row 0, so a
    /// framebuffer buffer anywhere else is refused.
    pub fn choose<M: fb_platform::FbMemory>(
        region: &FramebufferRegion<M>,
        page_flip: &PageFlip,
        handle: &BufferHandle,
    ) -> Result<Self> {
        if !handle.is_framebuffer() {
            return Ok(Self::Blit);
        }
        let yoffset = region.yoffset_of(handle.base)?;
        if yoffset != 0 && !page_flip.is_supported() {
            return Err(Error::InvalidArgument(
                "page flipping unavailable for a buffer past the first",
            ));
        }
        Ok(Self::Flip { yoffset })
    }
}

/// A buffer locked for CPU access, unlocked on drop.
struct LockGuard<'a, A: BufferMapper + ?Sized> {
    mapper: &'a A,
    handle: BufferHandle,
    mapping: CpuMapping,
}

impl<'a, A: BufferMapper + ?Sized> LockGuard<'a, A> {
    fn lock(mapper: &'a A, handle: BufferHandle, usage: BufferUsage, rect: LockRect) -> Result<Self> {
        let mapping = mapper.lock(&handle, usage, rect).map_err(Error::Lock)?;
        Ok(Self {
            mapper,
            handle,
            mapping,
        })
    }
}

impl<A: BufferMapper + ?Sized> Drop for LockGuard<'_, A> {
    fn drop(&mut self) {
        if let Err(e) = self.mapper.unlock(&self.handle) {
            tracing::warn!(base = self.handle.base, error = %e, "unlock failed");
        }
    }
}

/// Write `yoffset` to the driver, activating at the next vertical blank.
pub fn flip<D: FbDevice>(device: &D, var: &mut FbVarScreenInfo, yoffset: u32) -> Result<()> {
    var.activate = FB_ACTIVATE_VBL;
    var.yoffset = yoffset;
    tracing::debug!(yoffset, "page flip");
    device.put_variable_info(var).map_err(|e| {
        tracing::error!(error = %e, "display offset update failed");
        Error::DriverWrite(e)
    })
}

/// Copy `source` into the framebuffer through the allocator's CPU locks.
///
/// Both locks are released on every exit path.
pub fn blit<M, A>(
    region: &FramebufferRegion<M>,
    var: &FbVarScreenInfo,
    calibration: BlitCalibration,
    mapper: &A,
    source: &BufferHandle,
) -> Result<usize>
where
    M: fb_platform::FbMemory,
    A: BufferMapper + ?Sized,
{
    let stride = u32::try_from(region.stride()).map_err(|_| Error::InvalidArgument("stride"))?;
    let plan = SplitSwap::new(var.xres, var.yres, var.bits_per_pixel, stride, calibration)?;
    let rect = LockRect::full(var.xres, var.yres);

    let mut fb = LockGuard::lock(mapper, region.handle(), BufferUsage::SW_WRITE_RARELY, rect)?;
    let src = LockGuard::lock(mapper, *source, BufferUsage::SW_READ_RARELY, rect)?;

    tracing::debug!(
        line_length = stride,
        xres = var.xres,
        yres = var.yres,
        split = plan.split(),
        "software blit"
    );
    Ok(plan.apply(fb.mapping.as_bytes_mut(), src.mapping.as_bytes()))
}
