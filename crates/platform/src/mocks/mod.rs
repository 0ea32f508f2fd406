//! Mock implementations for testing
//!
//! This module provides scriptable implementations of the driver and
//! allocator traits for use in unit and integration tests of the display
//! manager. Every driver call is recorded so tests can assert on the exact
//! ioctl sequence.

#![cfg(any(test, feature = "mocks"))]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::buffer::{AllocError, BufferHandle, BufferMapper, BufferUsage, CpuMapping, LockRect};
use crate::device::{DeviceOpener, DriverError, DriverOp, FbDevice, FbMemory};
use crate::screeninfo::{FbBitfield, FbFixScreenInfo, FbVarScreenInfo};

fn lock_state<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Driver mock ──────────────────────────────────────────────────────────────

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    /// `FBIOGET_FSCREENINFO`.
    GetFixedInfo,
    /// `FBIOGET_VSCREENINFO`.
    GetVariableInfo,
    /// `FBIOPUT_VSCREENINFO` with the info as submitted.
    PutVariableInfo(FbVarScreenInfo),
    /// `mmap` of the given length.
    Map(usize),
}

/// Scripted answer to one `FBIOPUT_VSCREENINFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Accept (subject to the virtual-height cap).
    Accept,
    /// Fail with `EINVAL`.
    Reject,
}

#[derive(Debug)]
struct DriverState {
    fix: FbFixScreenInfo,
    var: FbVarScreenInfo,
    put_script: VecDeque<PutOutcome>,
    reject_all_puts: bool,
    max_yres_virtual: Option<u32>,
    settled_yres_virtual: Option<u32>,
    map_limit: Option<usize>,
    fixed_reads_before_failure: Option<usize>,
    variable_reads_before_failure: Option<usize>,
    calls: Vec<DriverCall>,
}

/// Mock fbdev driver.
#[derive(Debug)]
pub struct MockFbDevice {
    state: Mutex<DriverState>,
    page_size: usize,
}

impl MockFbDevice {
    /// Create a mock reporting `var` and `fix`.
    pub fn new(var: FbVarScreenInfo, fix: FbFixScreenInfo) -> Self {
        Self {
            state: Mutex::new(DriverState {
                fix,
                var,
                put_script: VecDeque::new(),
                reject_all_puts: false,
                max_yres_virtual: None,
                settled_yres_virtual: None,
                map_limit: None,
                fixed_reads_before_failure: None,
                variable_reads_before_failure: None,
                calls: Vec::new(),
            }),
            page_size: 4096,
        }
    }

    /// A `xres × yres` panel at `bits_per_pixel`, single-buffered, with no
    /// timings and no physical size, backed by enough memory for two
    /// buffers.
    pub fn panel(xres: u32, yres: u32, bits_per_pixel: u32) -> Self {
        let (red, green, blue) = if bits_per_pixel == 16 {
            (
                FbBitfield::new(11, 5),
                FbBitfield::new(5, 6),
                FbBitfield::new(0, 5),
            )
        } else {
            (
                FbBitfield::new(16, 8),
                FbBitfield::new(8, 8),
                FbBitfield::new(0, 8),
            )
        };
        let var = FbVarScreenInfo {
            xres,
            yres,
            xres_virtual: xres,
            yres_virtual: yres,
            bits_per_pixel,
            red,
            green,
            blue,
            ..FbVarScreenInfo::default()
        };
        let line_length = xres.saturating_mul(bits_per_pixel / 8);
        let mut fix = FbFixScreenInfo {
            line_length,
            smem_len: line_length.saturating_mul(yres).saturating_mul(2),
            ..FbFixScreenInfo::default()
        };
        fix.set_id("mockfb");
        Self::new(var, fix)
    }

    fn state_mut(&mut self) -> &mut DriverState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report these video timings (pixel clock in picoseconds).
    #[must_use]
    pub fn with_timings(mut self, pixclock: u32, left: u32, right: u32, upper: u32, lower: u32) -> Self {
        let var = &mut self.state_mut().var;
        var.pixclock = pixclock;
        var.left_margin = left;
        var.right_margin = right;
        var.upper_margin = upper;
        var.lower_margin = lower;
        self
    }

    /// Report a physical panel size in millimetres.
    #[must_use]
    pub fn with_physical_size(mut self, width_mm: u32, height_mm: u32) -> Self {
        let var = &mut self.state_mut().var;
        var.width = width_mm;
        var.height = height_mm;
        self
    }

    /// Override the stride.
    #[must_use]
    pub fn with_line_length(mut self, line_length: u32) -> Self {
        self.state_mut().fix.line_length = line_length;
        self
    }

    /// Override the reported memory length.
    #[must_use]
    pub fn with_smem_len(mut self, smem_len: u32) -> Self {
        self.state_mut().fix.smem_len = smem_len;
        self
    }

    /// Reject the next `count` variable-info writes, then accept.
    #[must_use]
    pub fn rejecting_puts(mut self, count: usize) -> Self {
        let script = &mut self.state_mut().put_script;
        script.extend(core::iter::repeat(PutOutcome::Reject).take(count));
        self
    }

    /// Append an explicit outcome sequence for variable-info writes.
    #[must_use]
    pub fn with_put_script(mut self, outcomes: &[PutOutcome]) -> Self {
        self.state_mut().put_script.extend(outcomes.iter().copied());
        self
    }

    /// Reject every variable-info write.
    #[must_use]
    pub fn rejecting_all_puts(mut self) -> Self {
        self.state_mut().reject_all_puts = true;
        self
    }

    /// Silently clamp accepted writes to this virtual height.
    #[must_use]
    pub fn with_max_yres_virtual(mut self, rows: u32) -> Self {
        self.state_mut().max_yres_virtual = Some(rows);
        self
    }

    /// Accept writes as given but report `rows` of virtual height on the
    /// next variable-info read, like a driver that settles late.
    #[must_use]
    pub fn settling_yres_virtual(mut self, rows: u32) -> Self {
        self.state_mut().settled_yres_virtual = Some(rows);
        self
    }

    /// Fail mappings longer than `bytes` with `ENOMEM`.
    #[must_use]
    pub fn with_map_limit(mut self, bytes: usize) -> Self {
        self.state_mut().map_limit = Some(bytes);
        self
    }

    /// Answer `reads` fixed-info queries, then fail with `EIO`.
    #[must_use]
    pub fn failing_fixed_info_after(mut self, reads: usize) -> Self {
        self.state_mut().fixed_reads_before_failure = Some(reads);
        self
    }

    /// Answer `reads` variable-info queries, then fail with `EIO`.
    #[must_use]
    pub fn failing_variable_info_after(mut self, reads: usize) -> Self {
        self.state_mut().variable_reads_before_failure = Some(reads);
        self
    }

    /// Report a different page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<DriverCall> {
        lock_state(&self.state).calls.clone()
    }

    /// Every variable-info write so far, as submitted.
    pub fn puts(&self) -> Vec<FbVarScreenInfo> {
        lock_state(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::PutVariableInfo(info) => Some(*info),
                _ => None,
            })
            .collect()
    }

    /// Every mapping length requested so far.
    pub fn map_attempts(&self) -> Vec<usize> {
        lock_state(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::Map(len) => Some(*len),
                _ => None,
            })
            .collect()
    }

    /// The variable info the driver currently holds.
    pub fn current_var(&self) -> FbVarScreenInfo {
        lock_state(&self.state).var
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        lock_state(&self.state).calls.clear();
    }
}

fn countdown(budget: &mut Option<usize>) -> bool {
    match budget {
        Some(0) => false,
        Some(n) => {
            *n = n.saturating_sub(1);
            true
        }
        None => true,
    }
}

impl FbDevice for MockFbDevice {
    type Memory = MockMemory;

    fn fixed_info(&self) -> Result<FbFixScreenInfo, DriverError> {
        let mut state = lock_state(&self.state);
        state.calls.push(DriverCall::GetFixedInfo);
        if countdown(&mut state.fixed_reads_before_failure) {
            Ok(state.fix)
        } else {
            Err(DriverError::new(DriverOp::GetFixedInfo, DriverError::EIO))
        }
    }

    fn variable_info(&self) -> Result<FbVarScreenInfo, DriverError> {
        let mut state = lock_state(&self.state);
        state.calls.push(DriverCall::GetVariableInfo);
        if countdown(&mut state.variable_reads_before_failure) {
            Ok(state.var)
        } else {
            Err(DriverError::new(DriverOp::GetVariableInfo, DriverError::EIO))
        }
    }

    fn put_variable_info(&self, info: &mut FbVarScreenInfo) -> Result<(), DriverError> {
        let mut state = lock_state(&self.state);
        state.calls.push(DriverCall::PutVariableInfo(*info));
        let outcome = state.put_script.pop_front().unwrap_or(PutOutcome::Accept);
        if state.reject_all_puts || outcome == PutOutcome::Reject {
            return Err(DriverError::new(DriverOp::PutVariableInfo, DriverError::EINVAL));
        }
        if let Some(max) = state.max_yres_virtual {
            info.yres_virtual = info.yres_virtual.min(max);
        }
        state.var = *info;
        if let Some(rows) = state.settled_yres_virtual {
            state.var.yres_virtual = rows;
        }
        Ok(())
    }

    fn map(&self, len: usize) -> Result<MockMemory, DriverError> {
        let mut state = lock_state(&self.state);
        state.calls.push(DriverCall::Map(len));
        if len == 0 || state.map_limit.is_some_and(|limit| len > limit) {
            return Err(DriverError::new(DriverOp::Map, DriverError::ENOMEM));
        }
        Ok(MockMemory::filled(len, 0xA5))
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

/// Heap-backed stand-in for an `mmap`ed framebuffer.
///
/// The bytes are held through a raw pointer, like a real mapping, so
/// allocators may write through addresses derived from [`FbMemory::base_addr`].
#[derive(Debug)]
pub struct MockMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: plain heap memory with no thread affinity; mutation through the
// safe API requires `&mut self`.
unsafe impl Send for MockMemory {}
// SAFETY: shared access only hands out `&[u8]`.
unsafe impl Sync for MockMemory {}

impl MockMemory {
    /// `len` bytes, every byte set to `fill`.
    pub fn filled(len: usize, fill: u8) -> Self {
        let raw = Box::into_raw(vec![fill; len].into_boxed_slice());
        let ptr = NonNull::new(raw.cast::<u8>()).unwrap_or(NonNull::dangling());
        Self { ptr, len }
    }
}

impl FbMemory for MockMemory {
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: `ptr` owns a live allocation of `len` bytes until drop.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` guarantees exclusivity.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    fn base_addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl Drop for MockMemory {
    fn drop(&mut self) {
        let slice = core::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        // SAFETY: `ptr`/`len` came from `Box::into_raw` in `filled` and are
        // released exactly once.
        drop(unsafe { Box::from_raw(slice) });
    }
}

/// Opener that hands out shared mock devices by path.
#[derive(Debug, Default)]
pub struct MockOpener {
    devices: HashMap<PathBuf, Arc<MockFbDevice>>,
    attempts: Mutex<Vec<PathBuf>>,
}

impl MockOpener {
    /// An opener where every path fails with `ENOENT`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `device` at `path`.
    #[must_use]
    pub fn with_device(mut self, path: impl Into<PathBuf>, device: Arc<MockFbDevice>) -> Self {
        self.devices.insert(path.into(), device);
        self
    }

    /// Every path an open was attempted on, in order.
    pub fn attempts(&self) -> Vec<PathBuf> {
        lock_state(&self.attempts).clone()
    }
}

impl DeviceOpener for MockOpener {
    type Device = Arc<MockFbDevice>;

    fn open(&self, path: &Path) -> Result<Arc<MockFbDevice>, DriverError> {
        lock_state(&self.attempts).push(path.to_path_buf());
        self.devices
            .get(path)
            .cloned()
            .ok_or(DriverError::new(DriverOp::Open, DriverError::ENOENT))
    }
}

// ── Allocator mock ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MapperState {
    buffers: HashMap<usize, Box<[u8]>>,
    locked: HashMap<usize, usize>,
    locks: Vec<(BufferHandle, BufferUsage)>,
    unlocks: usize,
    failing: Vec<usize>,
    validations: usize,
}

/// Mock gralloc-style allocator.
///
/// Client buffers are heap allocations keyed by their base address.
/// Framebuffer-flagged handles are locked by trusting their `base`/`size`,
/// as they point into a live display region.
#[derive(Debug, Default)]
pub struct MockBufferMapper {
    state: Mutex<MapperState>,
}

impl MockBufferMapper {
    /// An allocator with no buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed client buffer of `size` bytes.
    pub fn allocate(&self, size: usize) -> BufferHandle {
        let mut state = lock_state(&self.state);
        let bytes = vec![0u8; size.max(1)].into_boxed_slice();
        let base = bytes.as_ptr() as usize;
        state.buffers.insert(base, bytes);
        BufferHandle::client(size, base)
    }

    /// Copy `data` into the start of a client buffer.
    pub fn write(&self, handle: &BufferHandle, data: &[u8]) {
        let mut state = lock_state(&self.state);
        if let Some(buf) = state.buffers.get_mut(&handle.base) {
            let n = data.len().min(buf.len());
            if let (Some(dst), Some(src)) = (buf.get_mut(..n), data.get(..n)) {
                dst.copy_from_slice(src);
            }
        }
    }

    /// Snapshot of a client buffer's bytes.
    pub fn contents(&self, handle: &BufferHandle) -> Vec<u8> {
        lock_state(&self.state)
            .buffers
            .get(&handle.base)
            .map(|b| b.to_vec())
            .unwrap_or_default()
    }

    /// Free a client buffer; its handle stops validating.
    pub fn free(&self, handle: &BufferHandle) {
        lock_state(&self.state).buffers.remove(&handle.base);
    }

    /// Make every subsequent lock of `handle` fail.
    pub fn fail_locks_for(&self, handle: &BufferHandle) {
        lock_state(&self.state).failing.push(handle.base);
    }

    /// Locks taken and not yet released.
    pub fn outstanding_locks(&self) -> usize {
        lock_state(&self.state).locked.values().sum()
    }

    /// Every successful lock so far with its usage.
    pub fn locks(&self) -> Vec<(BufferHandle, BufferUsage)> {
        lock_state(&self.state).locks.clone()
    }

    /// Number of successful unlocks.
    pub fn unlock_count(&self) -> usize {
        lock_state(&self.state).unlocks
    }

    /// Number of `validate` calls.
    pub fn validation_count(&self) -> usize {
        lock_state(&self.state).validations
    }
}

impl BufferMapper for MockBufferMapper {
    fn validate(&self, handle: &BufferHandle) -> bool {
        let mut state = lock_state(&self.state);
        state.validations = state.validations.saturating_add(1);
        handle.has_valid_magic()
            && (handle.is_framebuffer() || state.buffers.contains_key(&handle.base))
    }

    fn lock(
        &self,
        handle: &BufferHandle,
        usage: BufferUsage,
        _rect: LockRect,
    ) -> Result<CpuMapping, AllocError> {
        let mut state = lock_state(&self.state);
        if !handle.has_valid_magic() {
            return Err(AllocError::InvalidHandle);
        }
        if state.failing.contains(&handle.base) {
            return Err(AllocError::LockFailed(DriverError::EIO));
        }
        let (ptr, len) = if handle.is_framebuffer() {
            (handle.base as *mut u8, handle.size)
        } else {
            let buf = state
                .buffers
                .get_mut(&handle.base)
                .ok_or(AllocError::InvalidHandle)?;
            (buf.as_mut_ptr(), handle.size.min(buf.len()))
        };
        let ptr = NonNull::new(ptr).ok_or(AllocError::InvalidHandle)?;
        let count = state.locked.entry(handle.base).or_insert(0);
        *count = count.saturating_add(1);
        state.locks.push((*handle, usage));
        // SAFETY: client buffers are boxed slices owned by `state` that are
        // only freed through `free`, which tests call after unlocking;
        // framebuffer handles point into the display region's live mapping
        // of at least `size` bytes.
        Ok(unsafe { CpuMapping::from_raw_parts(ptr, len) })
    }

    fn unlock(&self, handle: &BufferHandle) -> Result<(), AllocError> {
        let mut state = lock_state(&self.state);
        match state.locked.get_mut(&handle.base) {
            Some(count) if *count > 0 => {
                *count = count.saturating_sub(1);
                state.unlocks = state.unlocks.saturating_add(1);
                Ok(())
            }
            _ => Err(AllocError::NotLocked),
        }
    }
}
