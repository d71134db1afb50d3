/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Memory backends: the allocation and transfer capabilities each
//! memory space is bound to.
//!
//! [`HostBackend`] uses the global allocator. [`SimDeviceBackend`]
//! simulates a device space: its memory physically lives on the host,
//! but the space it is bound to is not host accessible, so all access
//! goes through explicit transfers which the backend counts.

use std::alloc;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::token::MemorySpace;

/// Alignment of every backend allocation.
pub const ALIGNMENT: usize = 64;

/// Failures reported by a memory backend. These are propagated to
/// the caller unchanged.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AllocError {
    /// The allocator could not satisfy the request.
    #[error("out of memory allocating {bytes} bytes in {space}")]
    OutOfMemory { space: MemorySpace, bytes: usize },

    /// The request cannot be expressed as an allocation layout.
    #[error("invalid allocation of {bytes} bytes")]
    InvalidSize { bytes: usize },
}

/// Allocation and transfer capability for one memory space.
pub trait MemoryBackend: Send + Sync + fmt::Debug {
    /// The memory space this backend allocates in.
    fn space(&self) -> MemorySpace;

    /// Allocate `bytes` zero-initialized bytes aligned to
    /// [`ALIGNMENT`]. Zero-byte requests return a dangling pointer.
    fn allocate_zeroed(&self, bytes: usize) -> Result<NonNull<u8>, AllocError>;

    /// Release an allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate_zeroed` on this backend with the
    /// same `bytes`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize);

    /// Copy `bytes` from memory in this space to host memory.
    ///
    /// # Safety
    ///
    /// `src` must be valid for `bytes` reads in this space and `dst`
    /// valid for `bytes` host writes; the ranges must not overlap.
    unsafe fn copy_to_host(&self, src: *const u8, dst: *mut u8, bytes: usize);

    /// Copy `bytes` from host memory into this space.
    ///
    /// # Safety
    ///
    /// `src` must be valid for `bytes` host reads and `dst` valid for
    /// `bytes` writes in this space; the ranges must not overlap.
    unsafe fn copy_from_host(&self, src: *const u8, dst: *mut u8, bytes: usize);

    /// Block until all outstanding transfers have completed.
    fn fence(&self);
}

fn layout_for(bytes: usize) -> Result<alloc::Layout, AllocError> {
    alloc::Layout::from_size_align(bytes, ALIGNMENT).map_err(|_| AllocError::InvalidSize { bytes })
}

/// The host allocator.
#[derive(Debug, Clone, Copy)]
pub struct HostBackend {
    space: MemorySpace,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::for_space(MemorySpace::HostSpace)
    }

    /// A host allocator serving another host accessible space.
    pub fn for_space(space: MemorySpace) -> Self {
        HostBackend { space }
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend for HostBackend {
    fn space(&self) -> MemorySpace {
        self.space
    }

    fn allocate_zeroed(&self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        if bytes == 0 {
            return Ok(NonNull::dangling());
        }
        let layout = layout_for(bytes)?;
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or(AllocError::OutOfMemory {
            space: self.space,
            bytes,
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize) {
        if bytes == 0 {
            return;
        }
        if let Ok(layout) = layout_for(bytes) {
            // SAFETY: guaranteed by the caller.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }

    unsafe fn copy_to_host(&self, src: *const u8, dst: *mut u8, bytes: usize) {
        // SAFETY: guaranteed by the caller.
        unsafe { std::ptr::copy_nonoverlapping(src, dst, bytes) };
    }

    unsafe fn copy_from_host(&self, src: *const u8, dst: *mut u8, bytes: usize) {
        // SAFETY: guaranteed by the caller.
        unsafe { std::ptr::copy_nonoverlapping(src, dst, bytes) };
    }

    fn fence(&self) {}
}

/// Counters kept by a [`SimDeviceBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimDeviceStats {
    pub allocations: usize,
    pub deallocations: usize,
    pub bytes_to_host: usize,
    pub bytes_from_host: usize,
    pub fences: usize,
}

/// A simulated device memory space.
#[derive(Debug)]
pub struct SimDeviceBackend {
    space: MemorySpace,
    host: HostBackend,
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    bytes_to_host: AtomicUsize,
    bytes_from_host: AtomicUsize,
    fences: AtomicUsize,
}

impl SimDeviceBackend {
    pub fn new(space: MemorySpace) -> Self {
        SimDeviceBackend {
            space,
            host: HostBackend::for_space(space),
            allocations: AtomicUsize::new(0),
            deallocations: AtomicUsize::new(0),
            bytes_to_host: AtomicUsize::new(0),
            bytes_from_host: AtomicUsize::new(0),
            fences: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> SimDeviceStats {
        SimDeviceStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
            bytes_to_host: self.bytes_to_host.load(Ordering::Relaxed),
            bytes_from_host: self.bytes_from_host.load(Ordering::Relaxed),
            fences: self.fences.load(Ordering::Relaxed),
        }
    }
}

impl MemoryBackend for SimDeviceBackend {
    fn space(&self) -> MemorySpace {
        self.space
    }

    fn allocate_zeroed(&self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        let ptr = self.host.allocate_zeroed(bytes)?;
        self.allocations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("sim {}: allocated {} bytes", self.space, bytes);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize) {
        self.deallocations.fetch_add(1, Ordering::Relaxed);
        // SAFETY: guaranteed by the caller.
        unsafe { self.host.deallocate(ptr, bytes) };
    }

    unsafe fn copy_to_host(&self, src: *const u8, dst: *mut u8, bytes: usize) {
        self.bytes_to_host.fetch_add(bytes, Ordering::Relaxed);
        // SAFETY: guaranteed by the caller.
        unsafe { self.host.copy_to_host(src, dst, bytes) };
    }

    unsafe fn copy_from_host(&self, src: *const u8, dst: *mut u8, bytes: usize) {
        self.bytes_from_host.fetch_add(bytes, Ordering::Relaxed);
        // SAFETY: guaranteed by the caller.
        unsafe { self.host.copy_from_host(src, dst, bytes) };
    }

    fn fence(&self) {
        self.fences.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_allocate_zeroed() {
        let backend = HostBackend::new();
        let ptr = backend.allocate_zeroed(256).unwrap();
        assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);
        // SAFETY: freshly allocated 256 bytes.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 256) };
        assert!(bytes.iter().all(|&b| b == 0));
        // SAFETY: allocated above with the same size.
        unsafe { backend.deallocate(ptr, 256) };
    }

    #[test]
    fn test_zero_sized() {
        let backend = HostBackend::new();
        let ptr = backend.allocate_zeroed(0).unwrap();
        // SAFETY: zero-sized allocations are never dereferenced.
        unsafe { backend.deallocate(ptr, 0) };
    }

    #[test]
    fn test_oversized_is_an_error() {
        let backend = HostBackend::new();
        assert_eq!(
            backend.allocate_zeroed(usize::MAX),
            Err(AllocError::InvalidSize { bytes: usize::MAX })
        );
    }

    #[test]
    fn test_sim_device_counts() {
        let device = SimDeviceBackend::new(MemorySpace::CudaSpace);
        let ptr = device.allocate_zeroed(8).unwrap();
        let src = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut dst = [0u8; 8];
        // SAFETY: both ranges are 8 bytes and distinct.
        unsafe {
            device.copy_from_host(src.as_ptr(), ptr.as_ptr(), 8);
            device.copy_to_host(ptr.as_ptr(), dst.as_mut_ptr(), 8);
            device.deallocate(ptr, 8);
        }
        device.fence();
        assert_eq!(dst, src);
        assert_eq!(
            device.stats(),
            SimDeviceStats {
                allocations: 1,
                deallocations: 1,
                bytes_to_host: 8,
                bytes_from_host: 8,
                fences: 1,
            }
        );
    }
}
