//! Linux `/dev/fb*` backend.
//!
//! `LinuxFbDevice` implements [`FbDevice`] with raw `ioctl(2)` and
//! `mmap(2)` calls on an owned file descriptor. Used when the `linux`
//! feature is enabled on a Linux target.

use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use crate::device::{DeviceOpener, DriverError, DriverOp, FbDevice, FbMemory};
use crate::screeninfo::{
    FbFixScreenInfo, FbVarScreenInfo, FBIOGET_FSCREENINFO, FBIOGET_VSCREENINFO,
    FBIOPUT_VSCREENINFO,
};

fn last_error(op: DriverOp) -> DriverError {
    DriverError::from_io(op, &std::io::Error::last_os_error())
}

/// An open framebuffer character device.
#[derive(Debug)]
pub struct LinuxFbDevice {
    fd: OwnedFd,
    path: PathBuf,
}

impl LinuxFbDevice {
    /// Open `path` read-write.
    pub fn open(path: &Path) -> Result<Self, DriverError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DriverError::from_io(DriverOp::Open, &e))?;
        tracing::trace!(path = %path.display(), fd = file.as_raw_fd(), "opened framebuffer device");
        Ok(Self {
            fd: OwnedFd::from(file),
            path: path.to_path_buf(),
        })
    }

    /// The path this device was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ioctl<T>(&self, op: DriverOp, request: u32, arg: &mut T) -> Result<(), DriverError> {
        // SAFETY: `arg` is a live, exclusively borrowed `#[repr(C)]` struct
        // whose layout matches what `request` reads or writes (checked by the
        // ABI size tests in `screeninfo`), and `fd` is an open descriptor
        // owned by `self`.
        let rc = unsafe {
            libc::ioctl(
                self.fd.as_raw_fd(),
                request as _,
                (arg as *mut T).cast::<libc::c_void>(),
            )
        };
        if rc == -1 {
            let err = last_error(op);
            tracing::trace!(op = op.as_str(), errno = err.errno, "ioctl failed");
            Err(err)
        } else {
            Ok(())
        }
    }
}

impl FbDevice for LinuxFbDevice {
    type Memory = MmapRegion;

    fn fixed_info(&self) -> Result<FbFixScreenInfo, DriverError> {
        let mut info = FbFixScreenInfo::default();
        self.ioctl(DriverOp::GetFixedInfo, FBIOGET_FSCREENINFO, &mut info)?;
        Ok(info)
    }

    fn variable_info(&self) -> Result<FbVarScreenInfo, DriverError> {
        let mut info = FbVarScreenInfo::default();
        self.ioctl(DriverOp::GetVariableInfo, FBIOGET_VSCREENINFO, &mut info)?;
        Ok(info)
    }

    fn put_variable_info(&self, info: &mut FbVarScreenInfo) -> Result<(), DriverError> {
        self.ioctl(DriverOp::PutVariableInfo, FBIOPUT_VSCREENINFO, info)
    }

    fn map(&self, len: usize) -> Result<MmapRegion, DriverError> {
        if len == 0 {
            return Err(DriverError::new(DriverOp::Map, DriverError::EINVAL));
        }
        // SAFETY: a fresh shared mapping of our own descriptor; the kernel
        // picks the address, so no existing Rust allocation is aliased.
        let addr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(last_error(DriverOp::Map));
        }
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or(DriverError::new(DriverOp::Map, DriverError::ENOMEM))?;
        tracing::trace!(len, addr = ptr.as_ptr() as usize, "mapped framebuffer memory");
        Ok(MmapRegion { ptr, len })
    }

    fn page_size(&self) -> usize {
        // SAFETY: sysconf has no memory-safety preconditions.
        let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(raw).ok().filter(|p| *p > 0).unwrap_or(4096)
    }
}

/// A shared `mmap` of framebuffer memory, unmapped on drop.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is plain shared memory with no thread affinity;
// mutation requires `&mut self`.
unsafe impl Send for MmapRegion {}
// SAFETY: shared access only hands out `&[u8]`.
unsafe impl Sync for MmapRegion {}

impl FbMemory for MmapRegion {
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: `ptr` is a live mapping of exactly `len` bytes until drop.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` guarantees exclusivity.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly the region returned by mmap; no slices
        // into it can outlive `self`.
        let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast::<libc::c_void>(), self.len) };
        if rc == -1 {
            tracing::warn!(len = self.len, "munmap of framebuffer region failed");
        }
    }
}

/// Opens candidate paths as [`LinuxFbDevice`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxOpener;

impl DeviceOpener for LinuxOpener {
    type Device = LinuxFbDevice;

    fn open(&self, path: &Path) -> Result<LinuxFbDevice, DriverError> {
        LinuxFbDevice::open(path)
    }
}
