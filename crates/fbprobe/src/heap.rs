//! Heap-backed buffer allocator for probing the blit path without a
//! graphics stack.
//!
//! Client buffers live on the heap. Framebuffer-flagged handles are mapped
//! directly, but only when they fall inside the region registered with
//! [`HeapMapper::with_framebuffer`].

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard};

use fb_platform::{AllocError, BufferHandle, BufferMapper, BufferUsage, CpuMapping, LockRect};

struct Allocation {
    // Owns the bytes `ptr` points at; never borrowed again until drop.
    storage: Vec<u8>,
    ptr: NonNull<u8>,
    locks: usize,
}

#[derive(Default)]
struct State {
    buffers: HashMap<usize, Allocation>,
    framebuffer_locks: HashMap<usize, usize>,
}

/// Minimal allocator: heap client buffers plus one registered framebuffer.
#[derive(Default)]
pub struct HeapMapper {
    framebuffer: Option<(usize, usize)>,
    state: Mutex<State>,
}

fn state(m: &Mutex<State>) -> MutexGuard<'_, State> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl HeapMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept framebuffer handles inside `[base, base + len)`.
    pub fn with_framebuffer(mut self, base: usize, len: usize) -> Self {
        self.framebuffer = Some((base, len));
        self
    }

    /// Allocate a zeroed client buffer of `size` bytes.
    pub fn allocate(&self, size: usize) -> BufferHandle {
        let mut storage = vec![0u8; size.max(1)];
        let ptr = NonNull::new(storage.as_mut_ptr()).unwrap_or(NonNull::dangling());
        let base = ptr.as_ptr() as usize;
        state(&self.state).buffers.insert(
            base,
            Allocation {
                storage,
                ptr,
                locks: 0,
            },
        );
        BufferHandle::client(size, base)
    }

    /// Release a client buffer. Refused while it is locked.
    pub fn free(&self, handle: &BufferHandle) -> bool {
        let mut state = state(&self.state);
        match state.buffers.get(&handle.base) {
            Some(a) if a.locks == 0 => state.buffers.remove(&handle.base).is_some(),
            _ => false,
        }
    }

    fn framebuffer_contains(&self, handle: &BufferHandle) -> bool {
        let Some((base, len)) = self.framebuffer else {
            return false;
        };
        let Some(end) = handle.base.checked_add(handle.size) else {
            return false;
        };
        handle.base >= base && base.checked_add(len).is_some_and(|limit| end <= limit)
    }
}

impl BufferMapper for HeapMapper {
    fn validate(&self, handle: &BufferHandle) -> bool {
        if !handle.has_valid_magic() {
            return false;
        }
        if handle.is_framebuffer() {
            return self.framebuffer_contains(handle);
        }
        state(&self.state).buffers.contains_key(&handle.base)
    }

    fn lock(
        &self,
        handle: &BufferHandle,
        _usage: BufferUsage,
        _rect: LockRect,
    ) -> Result<CpuMapping, AllocError> {
        if !self.validate(handle) {
            return Err(AllocError::InvalidHandle);
        }
        let mut state = state(&self.state);
        let (ptr, len) = if handle.is_framebuffer() {
            let count = state.framebuffer_locks.entry(handle.base).or_insert(0);
            *count = count.saturating_add(1);
            let ptr = NonNull::new(handle.base as *mut u8).ok_or(AllocError::InvalidHandle)?;
            (ptr, handle.size)
        } else {
            let alloc = state
                .buffers
                .get_mut(&handle.base)
                .ok_or(AllocError::InvalidHandle)?;
            alloc.locks = alloc.locks.saturating_add(1);
            (alloc.ptr, handle.size.min(alloc.storage.len()))
        };
        // SAFETY: client buffers stay allocated while locked because `free`
        // refuses locked buffers; framebuffer handles were checked to lie
        // inside the registered display mapping, which outlives the probe.
        Ok(unsafe { CpuMapping::from_raw_parts(ptr, len) })
    }

    fn unlock(&self, handle: &BufferHandle) -> Result<(), AllocError> {
        let mut state = state(&self.state);
        let count = if handle.is_framebuffer() {
            state.framebuffer_locks.get_mut(&handle.base)
        } else {
            state.buffers.get_mut(&handle.base).map(|a| &mut a.locks)
        };
        match count {
            Some(n) if *n > 0 => {
                *n = n.saturating_sub(1);
                Ok(())
            }
            _ => Err(AllocError::NotLocked),
        }
    }
}
