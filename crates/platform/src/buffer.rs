//! Buffer allocator capability
//!
//! The display manager never allocates client buffers itself. It receives
//! opaque [`BufferHandle`]s from the graphics stack and, when a buffer
//! cannot be page-flipped, asks the allocator for CPU mappings through
//! [`BufferMapper`].
//!
//! # Lock protocol
//!
//! ```text
//! validate(handle)          -> bool
//! lock(handle, usage, rect) -> CpuMapping   (valid until unlock)
//! unlock(handle)
//! ```
//!
//! Every successful `lock` must be paired with exactly one `unlock`.

use core::ptr::NonNull;

use thiserror::Error;

// ── BufferFlags ──────────────────────────────────────────────────────────────

/// Private handle flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// No flags: an ordinary client buffer.
    pub const NONE: Self = Self(0);
    /// The buffer lives inside the mapped framebuffer region.
    pub const FRAMEBUFFER: Self = Self(0x0000_0001);

    /// Build from raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// `true` if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

// ── BufferUsage ──────────────────────────────────────────────────────────────

/// CPU access hints passed to [`BufferMapper::lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct BufferUsage(u32);

impl BufferUsage {
    /// Infrequent CPU reads.
    pub const SW_READ_RARELY: Self = Self(0x0000_0002);
    /// Infrequent CPU writes.
    pub const SW_WRITE_RARELY: Self = Self(0x0000_0020);

    /// Raw usage bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// `true` if the hint allows CPU reads.
    pub const fn reads(self) -> bool {
        self.0 & 0x0000_000F != 0
    }

    /// `true` if the hint allows CPU writes.
    pub const fn writes(self) -> bool {
        self.0 & 0x0000_00F0 != 0
    }
}

// ── BufferHandle ─────────────────────────────────────────────────────────────

/// Opaque buffer handle as produced by the allocator.
///
/// `base` is the address of the buffer's first byte once it is mapped;
/// framebuffer-flagged handles are always mapped because they point into
/// the display region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    magic: u32,
    /// Handle flags.
    pub flags: BufferFlags,
    /// Buffer size in bytes.
    pub size: usize,
    /// Byte offset of the buffer inside its backing memory.
    pub offset: usize,
    /// Mapped address of the first byte.
    pub base: usize,
}

impl BufferHandle {
    /// Marker every live handle carries.
    pub const MAGIC: u32 = 0x0314_1592;

    /// A live handle.
    pub const fn new(flags: BufferFlags, size: usize, offset: usize, base: usize) -> Self {
        Self {
            magic: Self::MAGIC,
            flags,
            size,
            offset,
            base,
        }
    }

    /// A live framebuffer-flagged handle.
    pub const fn framebuffer(size: usize, offset: usize, base: usize) -> Self {
        Self::new(BufferFlags::FRAMEBUFFER, size, offset, base)
    }

    /// A live client buffer handle.
    pub const fn client(size: usize, base: usize) -> Self {
        Self::new(BufferFlags::NONE, size, 0, base)
    }

    /// Rebuild a handle from raw parts, including a possibly stale marker.
    pub const fn from_raw_parts(
        magic: u32,
        flags: BufferFlags,
        size: usize,
        offset: usize,
        base: usize,
    ) -> Self {
        Self {
            magic,
            flags,
            size,
            offset,
            base,
        }
    }

    /// The marker word.
    pub const fn magic(&self) -> u32 {
        self.magic
    }

    /// `true` when the marker matches [`BufferHandle::MAGIC`].
    pub const fn has_valid_magic(&self) -> bool {
        self.magic == Self::MAGIC
    }

    /// `true` for buffers inside the mapped framebuffer region.
    pub const fn is_framebuffer(&self) -> bool {
        self.flags.contains(BufferFlags::FRAMEBUFFER)
    }
}

// ── LockRect ─────────────────────────────────────────────────────────────────

/// Region of interest for a CPU lock, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockRect {
    /// Left edge.
    pub left: u32,
    /// Top edge.
    pub top: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl LockRect {
    /// The full `width × height` surface starting at the origin.
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            width,
            height,
        }
    }
}

// ── CpuMapping ───────────────────────────────────────────────────────────────

/// A CPU-visible view of a locked buffer.
///
/// Only an allocator can create one, and only through the unsafe
/// [`CpuMapping::from_raw_parts`]; after that every access is a
/// bounds-checked slice.
#[derive(Debug)]
pub struct CpuMapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl CpuMapping {
    /// Wrap `len` bytes starting at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until the
    /// matching [`BufferMapper::unlock`] call, and no other live
    /// `CpuMapping` may alias the same bytes mutably.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Mapped length in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// `true` for an empty mapping.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the first mapped byte.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// The mapped bytes.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: from_raw_parts' contract guarantees `len` readable bytes at
        // `ptr` for as long as the mapping is locked, which outlives `self`'s
        // borrow.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The mapped bytes, mutably.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, plus the no-alias requirement of from_raw_parts
        // and the `&mut self` receiver make this the only live reference.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Allocator capability errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The handle is not one the allocator issued.
    #[error("invalid buffer handle")]
    InvalidHandle,
    /// The requested usage is not permitted for this buffer.
    #[error("usage {0:#x} not permitted for this buffer")]
    UsageNotPermitted(u32),
    /// The buffer is not currently locked.
    #[error("buffer is not locked")]
    NotLocked,
    /// The allocator failed to map the buffer (errno).
    #[error("lock failed: errno {0}")]
    LockFailed(i32),
}

// ── BufferMapper ─────────────────────────────────────────────────────────────

/// The external allocator's CPU-access capability.
pub trait BufferMapper {
    /// `true` if `handle` is a live handle issued by this allocator.
    fn validate(&self, handle: &BufferHandle) -> bool;

    /// Lock `rect` of `handle` for CPU access with the given usage hint.
    fn lock(
        &self,
        handle: &BufferHandle,
        usage: BufferUsage,
        rect: LockRect,
    ) -> Result<CpuMapping, AllocError>;

    /// Release a lock taken with [`BufferMapper::lock`].
    fn unlock(&self, handle: &BufferHandle) -> Result<(), AllocError>;
}

impl<T: BufferMapper + ?Sized> BufferMapper for &T {
    fn validate(&self, handle: &BufferHandle) -> bool {
        (**self).validate(handle)
    }

    fn lock(
        &self,
        handle: &BufferHandle,
        usage: BufferUsage,
        rect: LockRect,
    ) -> Result<CpuMapping, AllocError> {
        (**self).lock(handle, usage, rect)
    }

    fn unlock(&self, handle: &BufferHandle) -> Result<(), AllocError> {
        (**self).unlock(handle)
    }
}

impl<T: BufferMapper + ?Sized> BufferMapper for std::sync::Arc<T> {
    fn validate(&self, handle: &BufferHandle) -> bool {
        (**self).validate(handle)
    }

    fn lock(
        &self,
        handle: &BufferHandle,
        usage: BufferUsage,
        rect: LockRect,
    ) -> Result<CpuMapping, AllocError> {
        (**self).lock(handle, usage, rect)
    }

    fn unlock(&self, handle: &BufferHandle) -> Result<(), AllocError> {
        (**self).unlock(handle)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn framebuffer_flag_is_detected() {
        let fb = BufferHandle::framebuffer(4096, 0, 0x1000);
        let client = BufferHandle::client(4096, 0x2000);
        assert!(fb.is_framebuffer());
        assert!(!client.is_framebuffer());
    }

    #[test]
    fn stale_magic_is_not_valid() {
        let h = BufferHandle::from_raw_parts(0xDEAD_BEEF, BufferFlags::NONE, 16, 0, 0x10);
        assert!(!h.has_valid_magic());
        assert!(BufferHandle::client(16, 0x10).has_valid_magic());
    }

    #[test]
    fn usage_hints_split_read_and_write() {
        assert!(BufferUsage::SW_READ_RARELY.reads());
        assert!(!BufferUsage::SW_READ_RARELY.writes());
        assert!(BufferUsage::SW_WRITE_RARELY.writes());
        assert!(!BufferUsage::SW_WRITE_RARELY.reads());
    }

    #[test]
    fn cpu_mapping_exposes_backing_bytes() {
        let mut backing = vec![7u8; 32];
        let ptr = NonNull::new(backing.as_mut_ptr()).unwrap();
        // SAFETY: `backing` outlives `mapping` and is not otherwise accessed.
        let mut mapping = unsafe { CpuMapping::from_raw_parts(ptr, backing.len()) };
        mapping.as_bytes_mut()[3] = 9;
        assert_eq!(mapping.len(), 32);
        assert_eq!(mapping.as_bytes()[3], 9);
        assert_eq!(mapping.addr(), ptr.as_ptr() as usize);
        drop(mapping);
        assert_eq!(backing[3], 9);
    }
}
