//! The mapped framebuffer region.
//!
//! [`map_region`] maps `stride × yres_virtual` bytes, shrinking the virtual
//! height one buffer at a time when the mapping fails. The resulting
//! [`FramebufferRegion`] is zero-filled, page aligned, holds at least one
//! buffer, and never changes size afterwards.
//!
//! # Layout
//!
//! ```text
//! base ─► ┌──────────────┐  slot 0   rows 0 .. yres
//!         ├──────────────┤  slot 1   rows yres .. 2·yres
//!         ├──────────────┤  ...
//!         └──────────────┘  len = round_up(stride · yres_virtual, page)
//! ```

use std::sync::{Mutex, PoisonError};

use fb_platform::{BufferHandle, DriverError, DriverOp, FbDevice, FbMemory, FbVarScreenInfo};

use crate::error::{Error, Result};
use crate::negotiate::{PageFlip, PageFlipUnsupported};

/// Most slots tracked by the allocation mask.
const MAX_SLOTS: u32 = 32;

/// Round `len` up to a multiple of `page`.
pub fn round_up_to_page(len: usize, page: usize) -> Option<usize> {
    let page = page.max(1);
    len.checked_add(page.checked_sub(1)?)?
        .checked_div(page)?
        .checked_mul(page)
}

/// A mapped, zero-filled run of framebuffer memory.
#[derive(Debug)]
pub struct FramebufferRegion<M> {
    memory: M,
    base: usize,
    len: usize,
    stride: usize,
    buffer_len: usize,
    buffer_count: u32,
    slots: Mutex<u32>,
}

impl<M: FbMemory> FramebufferRegion<M> {
    /// Wrap a fresh mapping, clearing it.
    ///
    /// Fails when the mapping cannot hold one `stride × rows` buffer.
    pub fn new(mut memory: M, stride: usize, rows: usize, buffer_count: u32) -> Result<Self> {
        let buffer_len = stride
            .checked_mul(rows)
            .ok_or(Error::InvalidArgument("buffer size overflows"))?;
        if buffer_len == 0 || memory.len() < buffer_len || buffer_count == 0 {
            return Err(Error::InvalidArgument("mapping smaller than one buffer"));
        }
        memory.as_bytes_mut().fill(0);
        Ok(Self {
            base: memory.base_addr(),
            len: memory.len(),
            memory,
            stride,
            buffer_len,
            buffer_count,
            slots: Mutex::new(0),
        })
    }

    /// Address of the first mapped byte.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Mapped length in bytes (page aligned).
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` for an empty region (never the case once constructed).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Bytes per buffer.
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Buffers that fit in the region.
    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    /// The mapped bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.memory.as_bytes()
    }

    /// The distinguished handle covering the whole region.
    pub fn handle(&self) -> BufferHandle {
        BufferHandle::framebuffer(self.len, 0, self.base)
    }

    /// The vertical offset that shows the buffer starting at `addr`.
    ///
    /// `addr` must lie on a row boundary with a whole buffer after it, inside
    /// the `buffer_count` buffers of virtual height. The page-rounding slack
    /// past the last buffer is not displayable.
    pub fn yoffset_of(&self, addr: usize) -> Result<u32> {
        let offset = addr
            .checked_sub(self.base)
            .ok_or(Error::InvalidArgument("buffer starts before the framebuffer"))?;
        if offset.checked_rem(self.stride) != Some(0) {
            return Err(Error::InvalidArgument("buffer is not row aligned"));
        }
        match offset.checked_add(self.buffer_len) {
            Some(end) if end <= self.buffers_end() => {}
            _ => return Err(Error::InvalidArgument("buffer extends past the framebuffer")),
        }
        offset
            .checked_div(self.stride)
            .and_then(|rows| u32::try_from(rows).ok())
            .ok_or(Error::InvalidArgument("buffer offset out of range"))
    }

    /// End of the last whole buffer, as an offset from `base`.
    fn buffers_end(&self) -> usize {
        usize::try_from(self.buffer_count)
            .ok()
            .and_then(|n| n.checked_mul(self.buffer_len))
            .map_or(self.buffer_len, |end| end.min(self.len))
    }

    /// Carve a free one-buffer slot out of the region.
    pub fn allocate_slot(&self) -> Option<BufferHandle> {
        let mut mask = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slots = self.buffer_count.min(MAX_SLOTS);
        let index = (0..slots).find(|i| *mask & (1 << i) == 0)?;
        let offset = usize::try_from(index).ok()?.checked_mul(self.buffer_len)?;
        *mask |= 1 << index;
        tracing::trace!(index, offset, "allocated framebuffer slot");
        Some(BufferHandle::framebuffer(
            self.buffer_len,
            offset,
            self.base.checked_add(offset)?,
        ))
    }

    /// Return a slot taken with [`FramebufferRegion::allocate_slot`].
    ///
    /// Only a handle shaped exactly like a slot is accepted: framebuffer
    /// flagged, one buffer long, buffer aligned, and based at its offset.
    pub fn release_slot(&self, handle: &BufferHandle) -> bool {
        if !handle.is_framebuffer()
            || handle.size != self.buffer_len
            || handle.offset.checked_rem(self.buffer_len) != Some(0)
            || self.base.checked_add(handle.offset) != Some(handle.base)
        {
            return false;
        }
        let Some(index) = handle
            .offset
            .checked_div(self.buffer_len)
            .and_then(|i| u32::try_from(i).ok())
            .filter(|i| *i < self.buffer_count.min(MAX_SLOTS))
        else {
            return false;
        };
        let mut mask = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let bit = 1 << index;
        let was_set = *mask & bit != 0;
        *mask &= !bit;
        was_set
    }

    /// Slots currently handed out.
    pub fn slots_in_use(&self) -> u32 {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .count_ones()
    }
}

/// Map the framebuffer, retrying with one buffer fewer on each failure.
///
/// Every retry is preceded by a variable-info write carrying the smaller
/// virtual height. If that write fails, or the height reaches zero, the last
/// mapping error is returned.
pub fn map_region<D: FbDevice>(
    device: &D,
    var: &mut FbVarScreenInfo,
    stride: u32,
    page_flip: &mut PageFlip,
) -> Result<FramebufferRegion<D::Memory>> {
    let rows = var.yres;
    if rows == 0 || stride == 0 {
        return Err(Error::Memory);
    }
    let stride_bytes = usize::try_from(stride).map_err(|_| Error::Memory)?;
    let page = device.page_size();

    // Whole buffers only.
    let whole = var.yres_virtual.checked_div(rows).unwrap_or(0).max(1);
    var.yres_virtual = whole.saturating_mul(rows);

    let mut last_err = DriverError::new(DriverOp::Map, DriverError::ENOMEM);
    while var.yres_virtual > 0 {
        let buffers = var.yres_virtual.checked_div(rows).unwrap_or(0);
        let len = usize::try_from(var.yres_virtual)
            .ok()
            .and_then(|v| v.checked_mul(stride_bytes))
            .and_then(|bytes| round_up_to_page(bytes, page))
            .ok_or(Error::Memory)?;

        match device.map(len) {
            Ok(memory) => {
                let row_count = usize::try_from(rows).map_err(|_| Error::Memory)?;
                let region = FramebufferRegion::new(memory, stride_bytes, row_count, buffers)?;
                if buffers < 2 {
                    page_flip.disable(PageFlipUnsupported::InsufficientMappableMemory { buffers });
                }
                tracing::info!(
                    buffers,
                    len,
                    base = region.base(),
                    "framebuffer mapped"
                );
                return Ok(region);
            }
            Err(e) => {
                tracing::error!(len, error = %e, "error mapping the framebuffer");
                last_err = e;
            }
        }

        var.yres_virtual = var.yres_virtual.saturating_sub(rows);
        if var.yres_virtual == 0 {
            break;
        }
        tracing::warn!(
            buffers = var.yres_virtual.checked_div(rows).unwrap_or(0),
            "falling back to fewer buffers"
        );
        if let Err(e) = device.put_variable_info(var) {
            tracing::error!(error = %e, "shrinking virtual height rejected");
            break;
        }
        if var.yres_virtual <= rows {
            page_flip.disable(PageFlipUnsupported::InsufficientMappableMemory {
                buffers: var.yres_virtual.checked_div(rows).unwrap_or(0),
            });
        }
    }

    Err(Error::Map(last_err))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use fb_platform::mocks::{MockFbDevice, MockMemory};

    fn region(stride: usize, rows: usize, buffers: u32) -> FramebufferRegion<MockMemory> {
        let len = stride * rows * buffers as usize;
        FramebufferRegion::new(MockMemory::filled(len, 0xFF), stride, rows, buffers).unwrap()
    }

    #[test]
    fn test_round_up_to_page() {
        assert_eq!(round_up_to_page(0, 4096), Some(0));
        assert_eq!(round_up_to_page(1, 4096), Some(4096));
        assert_eq!(round_up_to_page(4096, 4096), Some(4096));
        assert_eq!(round_up_to_page(4097, 4096), Some(8192));
        assert_eq!(round_up_to_page(usize::MAX, 4096), None);
    }

    #[test]
    fn test_new_region_is_zeroed() {
        let r = region(64, 4, 2);
        assert!(r.as_bytes().iter().all(|b| *b == 0));
        assert_eq!(r.buffer_len(), 256);
    }

    #[test]
    fn test_region_rejects_short_mapping() {
        let err = FramebufferRegion::new(MockMemory::filled(100, 0), 64, 4, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_yoffset_of_rows() {
        let r = region(64, 4, 2);
        assert_eq!(r.yoffset_of(r.base()).unwrap(), 0);
        assert_eq!(r.yoffset_of(r.base() + 4 * 64).unwrap(), 4);
        assert!(r.yoffset_of(r.base() + 10).is_err(), "unaligned");
        assert!(r.yoffset_of(r.base() + 5 * 64).is_err(), "past the end");
        assert!(r.yoffset_of(r.base().wrapping_sub(64)).is_err(), "before base");
    }

    #[test]
    fn test_yoffset_of_ignores_page_slack() {
        // One 2000-byte buffer inside a 4096-byte mapping.
        let r = FramebufferRegion::new(MockMemory::filled(4096, 0), 200, 10, 1).unwrap();
        assert_eq!(r.yoffset_of(r.base()).unwrap(), 0);
        assert!(r.yoffset_of(r.base() + 2000).is_err(), "slack is not a buffer");
        assert!(r.yoffset_of(r.base() + 200).is_err(), "would run past yres_virtual");
    }

    #[test]
    fn test_slots_are_carved_per_buffer() {
        let r = region(64, 4, 2);
        let a = r.allocate_slot().unwrap();
        let b = r.allocate_slot().unwrap();
        assert!(r.allocate_slot().is_none());
        assert_eq!(a.base, r.base());
        assert_eq!(b.base, r.base() + 256);
        assert_eq!(b.offset, 256);
        assert!(b.is_framebuffer());
        assert_eq!(r.slots_in_use(), 2);

        assert!(r.release_slot(&a));
        assert!(!r.release_slot(&a), "double release");
        assert_eq!(r.allocate_slot().unwrap().base, r.base());
    }

    #[test]
    fn test_release_slot_rejects_foreign_handles() {
        let r = region(64, 4, 2);
        let a = r.allocate_slot().unwrap();

        let client = BufferHandle::client(16, 0x1234);
        let whole = r.handle();
        let misplaced = BufferHandle::framebuffer(256, 0, r.base() + 64);
        let unaligned = BufferHandle::framebuffer(256, 64, r.base() + 64);
        for h in [client, whole, misplaced, unaligned] {
            assert!(!r.release_slot(&h), "{h:?} must not free a slot");
        }
        assert_eq!(r.slots_in_use(), 1);

        let b = r.allocate_slot().unwrap();
        assert_ne!(a.base, b.base, "slot 0 still belongs to its first owner");
        assert!(r.release_slot(&a));
    }

    #[test]
    fn test_map_region_first_try() {
        let dev = MockFbDevice::panel(100, 10, 16).with_page_size(4096);
        let mut var = dev.current_var();
        var.yres_virtual = 20;
        let mut flip = PageFlip::Supported;
        let r = map_region(&dev, &mut var, 200, &mut flip).unwrap();
        assert_eq!(r.len(), 4096);
        assert_eq!(r.buffer_count(), 2);
        assert!(flip.is_supported());
        assert_eq!(dev.map_attempts(), vec![4096]);
    }

    #[test]
    fn test_map_region_single_buffer_disables_flip() {
        let dev = MockFbDevice::panel(100, 10, 16);
        let mut var = dev.current_var();
        var.yres_virtual = 10;
        let mut flip = PageFlip::Supported;
        let r = map_region(&dev, &mut var, 200, &mut flip).unwrap();
        assert_eq!(r.buffer_count(), 1);
        assert_eq!(
            flip,
            PageFlip::Unsupported {
                reason: PageFlipUnsupported::InsufficientMappableMemory { buffers: 1 }
            }
        );
    }

    #[test]
    fn test_map_region_rounds_partial_buffers_down() {
        let dev = MockFbDevice::panel(100, 10, 16);
        let mut var = dev.current_var();
        var.yres_virtual = 25;
        let mut flip = PageFlip::Supported;
        let r = map_region(&dev, &mut var, 200, &mut flip).unwrap();
        assert_eq!(var.yres_virtual, 20);
        assert_eq!(r.buffer_count(), 2);
    }
}
