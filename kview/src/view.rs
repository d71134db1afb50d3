/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Views: typed, strided handles onto an allocation in a memory
//! space.
//!
//! A [`View`] is a cheap handle. Clones share the same
//! [`Allocation`], which is released when the last view (or exported
//! buffer) referencing it drops. Owned allocations are returned to
//! the backend of their space; borrowed allocations only drop the
//! reference to their lender.

use std::any::Any;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use ndslice::Order;
use ndslice::Slice;
use ndslice::SliceError;
use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;

use crate::catalog::ConstructorHandle;
use crate::catalog::Rank;
use crate::context::Context;
use crate::context::Lifecycle;
use crate::error::Result;
use crate::error::ViewError;
use crate::memory::AllocError;
use crate::memory::MemoryBackend;
use crate::token::ElementType;
use crate::token::Layout;
use crate::token::MemorySpace;
use crate::token::MemoryTrait;

/// A dynamically typed element value.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Value {
    pub fn as_i64(self) -> i64 {
        match self {
            Value::Bool(b) => b as i64,
            Value::Int(i) => i,
            Value::UInt(u) => u as i64,
            Value::Float(f) => f as i64,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Value::Bool(b) => b as u64,
            Value::Int(i) => i as u64,
            Value::UInt(u) => u,
            Value::Float(f) => f as u64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Value::Bool(b) => b as u8 as f64,
            Value::Int(i) => i as f64,
            Value::UInt(u) => u as f64,
            Value::Float(f) => f,
        }
    }

    // Bool counts as 0 or 1; the result is narrowed when written back.
    fn wrapping_add(self, delta: Value) -> Value {
        match self {
            Value::Bool(b) => Value::Int((b as i64).wrapping_add(delta.as_i64())),
            Value::Int(i) => Value::Int(i.wrapping_add(delta.as_i64())),
            Value::UInt(u) => Value::UInt(u.wrapping_add(delta.as_u64())),
            Value::Float(f) => Value::Float(f + delta.as_f64()),
        }
    }

    fn wrapping_sub(self, delta: Value) -> Value {
        match self {
            Value::Bool(b) => Value::Int((b as i64).wrapping_sub(delta.as_i64())),
            Value::Int(i) => Value::Int(i.wrapping_sub(delta.as_i64())),
            Value::UInt(u) => Value::UInt(u.wrapping_sub(delta.as_u64())),
            Value::Float(f) => Value::Float(f - delta.as_f64()),
        }
    }

    /// Truthiness: any nonzero value is `true`.
    pub fn as_bool(self) -> bool {
        match self {
            Value::Bool(b) => b,
            Value::Int(i) => i != 0,
            Value::UInt(u) => u != 0,
            Value::Float(f) => f != 0.0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(x) => write!(f, "{}", x),
        }
    }
}

/// Rust scalar types that correspond to an [`ElementType`].
pub trait Scalar: Copy + Into<Value> + Send + Sync + 'static {
    const DTYPE: ElementType;

    /// Convert with numeric cast semantics.
    fn from_value(value: Value) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty => $dtype:ident, $variant:ident, $conv:ident;)*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value as _)
                }
            }

            impl Scalar for $ty {
                const DTYPE: ElementType = ElementType::$dtype;

                fn from_value(value: Value) -> Self {
                    value.$conv() as $ty
                }
            }
        )*
    };
}

impl_scalar! {
    i8 => Int8, Int, as_i64;
    i16 => Int16, Int, as_i64;
    i32 => Int32, Int, as_i64;
    i64 => Int64, Int, as_i64;
    u8 => Uint8, UInt, as_u64;
    u16 => Uint16, UInt, as_u64;
    u32 => Uint32, UInt, as_u64;
    u64 => Uint64, UInt, as_u64;
    f32 => Float32, Float, as_f64;
    f64 => Float64, Float, as_f64;
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl Scalar for bool {
    const DTYPE: ElementType = ElementType::Bool;

    fn from_value(value: Value) -> Self {
        value.as_bool()
    }
}

/// Read one element.
///
/// # Safety
///
/// `ptr` must be valid for reads of `dtype.size()` bytes.
pub(crate) unsafe fn read_value(dtype: ElementType, ptr: *const u8) -> Value {
    // SAFETY: guaranteed by the caller; unaligned reads tolerate
    // borrowed buffers with odd base addresses.
    unsafe {
        match dtype {
            ElementType::Int8 => Value::Int(ptr.cast::<i8>().read_unaligned() as i64),
            ElementType::Int16 => Value::Int(ptr.cast::<i16>().read_unaligned() as i64),
            ElementType::Int32 => Value::Int(ptr.cast::<i32>().read_unaligned() as i64),
            ElementType::Int64 => Value::Int(ptr.cast::<i64>().read_unaligned()),
            ElementType::Uint8 => Value::UInt(ptr.read() as u64),
            ElementType::Uint16 => Value::UInt(ptr.cast::<u16>().read_unaligned() as u64),
            ElementType::Uint32 => Value::UInt(ptr.cast::<u32>().read_unaligned() as u64),
            ElementType::Uint64 => Value::UInt(ptr.cast::<u64>().read_unaligned()),
            ElementType::Float32 => Value::Float(ptr.cast::<f32>().read_unaligned() as f64),
            ElementType::Float64 => Value::Float(ptr.cast::<f64>().read_unaligned()),
            ElementType::Bool => Value::Bool(ptr.read() != 0),
        }
    }
}

/// Write one element, converting `value` to `dtype`.
///
/// # Safety
///
/// `ptr` must be valid for writes of `dtype.size()` bytes.
pub(crate) unsafe fn write_value(dtype: ElementType, ptr: *mut u8, value: Value) {
    // SAFETY: guaranteed by the caller.
    unsafe {
        match dtype {
            ElementType::Int8 => ptr.cast::<i8>().write_unaligned(value.as_i64() as i8),
            ElementType::Int16 => ptr.cast::<i16>().write_unaligned(value.as_i64() as i16),
            ElementType::Int32 => ptr.cast::<i32>().write_unaligned(value.as_i64() as i32),
            ElementType::Int64 => ptr.cast::<i64>().write_unaligned(value.as_i64()),
            ElementType::Uint8 => ptr.write(value.as_u64() as u8),
            ElementType::Uint16 => ptr.cast::<u16>().write_unaligned(value.as_u64() as u16),
            ElementType::Uint32 => ptr.cast::<u32>().write_unaligned(value.as_u64() as u32),
            ElementType::Uint64 => ptr.cast::<u64>().write_unaligned(value.as_u64()),
            ElementType::Float32 => ptr.cast::<f32>().write_unaligned(value.as_f64() as f32),
            ElementType::Float64 => ptr.cast::<f64>().write_unaligned(value.as_f64()),
            ElementType::Bool => ptr.write(value.as_bool() as u8),
        }
    }
}

enum Ownership {
    /// Returned to the backend on drop.
    Owned(Arc<dyn MemoryBackend>),
    /// Kept alive by the lender; never freed here.
    Borrowed { _lender: Arc<dyn Any + Send + Sync> },
}

/// A region of memory in one space, shared by every view onto it.
pub struct Allocation {
    ptr: NonNull<u8>,
    bytes: usize,
    space: MemorySpace,
    label: Arc<str>,
    readonly: bool,
    ownership: Ownership,
    lifecycle: Arc<Lifecycle>,
    // Element reads and writes through views are serialized here.
    access: RwLock<()>,
}

// SAFETY: the memory is owned by the backend or kept alive by the
// lender, and all access through views holds `access`.
unsafe impl Send for Allocation {}
// SAFETY: as above.
unsafe impl Sync for Allocation {}

impl Allocation {
    pub fn space(&self) -> MemorySpace {
        self.space
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.ownership, Ownership::Owned(_))
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn as_non_null(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("label", &self.label)
            .field("space", &self.space)
            .field("bytes", &self.bytes)
            .field("owned", &self.is_owned())
            .finish()
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.lifecycle.release();
        if self.lifecycle.is_finalized() {
            tracing::error!(
                "allocation '{}' in {} released after kview was finalized",
                self.label,
                self.space
            );
        }
        if let Ownership::Owned(backend) = &self.ownership {
            // SAFETY: `ptr` was allocated by `backend` with `bytes`
            // and this is the last reference to it.
            unsafe { backend.deallocate(self.ptr, self.bytes) };
        }
    }
}

/// A typed, strided, ranked handle onto an allocation.
#[derive(Clone)]
pub struct View {
    context: Arc<Context>,
    view_type: ConstructorHandle,
    allocation: Arc<Allocation>,
    slice: Slice,
}

fn check_rank(view_type: &ConstructorHandle, shape: &[usize]) -> Result<()> {
    if let Rank::Fixed(rank) = view_type.key().rank {
        if rank != shape.len() {
            return Err(SliceError::InvalidDims {
                expected: rank,
                got: shape.len(),
            }
            .into());
        }
    }
    Ok(())
}

fn dense_slice(context: &Context, view_type: &ConstructorHandle, shape: &[usize]) -> Result<Slice> {
    check_rank(view_type, shape)?;
    let order = view_type
        .key()
        .layout
        .order()
        .ok_or_else(|| ViewError::UnsupportedVariant {
            name: view_type.name().to_string(),
            max_rank: context.features().max_rank(),
        })?;
    Ok(Slice::new(0, shape.to_vec(), order.strides(shape))?)
}

impl View {
    /// Allocate a zero-initialized view of `view_type` in its space.
    pub(crate) fn allocate(
        context: &Arc<Context>,
        view_type: ConstructorHandle,
        label: String,
        shape: &[usize],
    ) -> Result<View> {
        context.ensure_active()?;
        let slice = dense_slice(context, &view_type, shape)?;
        let key = *view_type.key();
        let bytes = slice
            .len()
            .checked_mul(key.dtype.size())
            .ok_or(AllocError::InvalidSize { bytes: usize::MAX })?;
        let backend = context.backend(key.space)?;
        let ptr = backend.allocate_zeroed(bytes)?;
        context.lifecycle().acquire();
        tracing::debug!(
            "allocated '{}' as {} ({} bytes in {})",
            label,
            view_type.name(),
            bytes,
            key.space
        );
        let allocation = Allocation {
            ptr,
            bytes,
            space: key.space,
            label: label.into(),
            readonly: false,
            ownership: Ownership::Owned(backend),
            lifecycle: context.lifecycle().clone(),
            access: RwLock::new(()),
        };
        Ok(View {
            context: context.clone(),
            view_type,
            allocation: Arc::new(allocation),
            slice,
        })
    }

    /// Wrap memory owned by `owner`, which must stay valid while
    /// `owner` is alive and be densely packed in the layout of
    /// `view_type`.
    pub(crate) fn borrowed(
        context: &Arc<Context>,
        view_type: ConstructorHandle,
        label: String,
        shape: &[usize],
        ptr: NonNull<u8>,
        readonly: bool,
        owner: Arc<dyn Any + Send + Sync>,
    ) -> Result<View> {
        context.ensure_active()?;
        let slice = dense_slice(context, &view_type, shape)?;
        let key = *view_type.key();
        context.lifecycle().acquire();
        tracing::debug!(
            "wrapped borrowed buffer as '{}' ({})",
            label,
            view_type.name()
        );
        let allocation = Allocation {
            ptr,
            bytes: slice.len() * key.dtype.size(),
            space: key.space,
            label: label.into(),
            readonly,
            ownership: Ownership::Borrowed { _lender: owner },
            lifecycle: context.lifecycle().clone(),
            access: RwLock::new(()),
        };
        Ok(View {
            context: context.clone(),
            view_type,
            allocation: Arc::new(allocation),
            slice,
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn view_type(&self) -> &ConstructorHandle {
        &self.view_type
    }

    pub(crate) fn allocation(&self) -> &Arc<Allocation> {
        &self.allocation
    }

    /// The canonical name of the concrete type.
    pub fn type_name(&self) -> &str {
        self.view_type.name()
    }

    pub fn label(&self) -> &str {
        self.allocation.label()
    }

    pub fn dtype(&self) -> ElementType {
        self.view_type.key().dtype
    }

    pub fn space(&self) -> MemorySpace {
        self.view_type.key().space
    }

    pub fn layout(&self) -> Layout {
        self.view_type.key().layout
    }

    pub fn memory_trait(&self) -> MemoryTrait {
        self.view_type.key().memory_trait
    }

    pub fn is_dynamic(&self) -> bool {
        self.view_type.key().rank == Rank::Dynamic
    }

    pub fn rank(&self) -> usize {
        self.slice.num_dim()
    }

    /// The extents.
    pub fn shape(&self) -> &[usize] {
        self.slice.sizes()
    }

    /// Strides in elements.
    pub fn strides(&self) -> &[usize] {
        self.slice.strides()
    }

    /// Strides in bytes.
    pub fn byte_strides(&self) -> Vec<isize> {
        let item_size = self.dtype().size() as isize;
        self.strides()
            .iter()
            .map(|&s| s as isize * item_size)
            .collect()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.slice.len()
    }

    pub fn slice(&self) -> &Slice {
        &self.slice
    }

    pub fn is_readonly(&self) -> bool {
        self.allocation.readonly
    }

    /// Address of the first element.
    pub fn as_ptr(&self) -> *const u8 {
        self.first_element().as_ptr()
    }

    pub(crate) fn first_element(&self) -> NonNull<u8> {
        // SAFETY: the slice offset addresses an element inside the
        // allocation.
        unsafe {
            self.allocation
                .as_non_null()
                .add(self.slice.offset() * self.dtype().size())
        }
    }

    /// Whether both views are handles on the same allocation with the
    /// same geometry.
    pub fn is_alias_of(&self, other: &View) -> bool {
        Arc::ptr_eq(&self.allocation, &other.allocation) && self.slice == other.slice
    }

    fn ensure_host_access(&self) -> Result<()> {
        self.allocation.lifecycle.ensure_active()?;
        if !self.space().host_accessible() {
            return Err(ViewError::SpaceNotHostAccessible(self.space()));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.allocation.readonly {
            return Err(ViewError::ReadOnly(self.label().to_string()));
        }
        Ok(())
    }

    // Missing trailing indices are zero.
    fn element_ptr(&self, index: &[usize]) -> Result<*mut u8> {
        if index.len() > self.rank() {
            return Err(SliceError::InvalidDims {
                expected: self.rank(),
                got: index.len(),
            }
            .into());
        }
        let mut coord = index.to_vec();
        coord.resize(self.rank(), 0);
        let location = self.slice.location(&coord)?;
        Ok(self
            .allocation
            .as_ptr()
            .wrapping_add(location * self.dtype().size()))
    }

    /// Read the element at `index`.
    pub fn get(&self, index: &[usize]) -> Result<Value> {
        self.ensure_host_access()?;
        let ptr = self.element_ptr(index)?;
        let _access = self.allocation.access.read();
        // SAFETY: `ptr` addresses an element of the slice, which lies
        // within the allocation.
        Ok(unsafe { read_value(self.dtype(), ptr) })
    }

    /// Read the element at `index` as `T`.
    pub fn get_as<T: Scalar>(&self, index: &[usize]) -> Result<T> {
        self.get(index).map(T::from_value)
    }

    /// Write `value`, converted to the element type, at `index`.
    pub fn set(&self, index: &[usize], value: impl Into<Value>) -> Result<()> {
        self.ensure_host_access()?;
        self.ensure_writable()?;
        let ptr = self.element_ptr(index)?;
        let _access = self.allocation.access.write();
        // SAFETY: as in `get`.
        unsafe { write_value(self.dtype(), ptr, value.into()) };
        Ok(())
    }

    /// Write `value` at `index`.
    pub fn set_as<T: Scalar>(&self, index: &[usize], value: T) -> Result<()> {
        self.set(index, value)
    }

    /// Add `delta` to the element at `index` and return the previous
    /// value. Only `Atomic` views support read-modify-write access; the
    /// update is indivisible with respect to every other access
    /// through views of the same allocation.
    pub fn fetch_add(&self, index: &[usize], delta: impl Into<Value>) -> Result<Value> {
        let delta = delta.into();
        self.update(index, |previous| previous.wrapping_add(delta))
    }

    /// Subtract `delta` from the element at `index` and return the
    /// previous value.
    pub fn fetch_sub(&self, index: &[usize], delta: impl Into<Value>) -> Result<Value> {
        let delta = delta.into();
        self.update(index, |previous| previous.wrapping_sub(delta))
    }

    pub fn inc(&self, index: &[usize]) -> Result<()> {
        self.fetch_add(index, 1i64).map(|_| ())
    }

    pub fn dec(&self, index: &[usize]) -> Result<()> {
        self.fetch_sub(index, 1i64).map(|_| ())
    }

    fn update(&self, index: &[usize], apply: impl FnOnce(Value) -> Value) -> Result<Value> {
        if self.memory_trait() != MemoryTrait::Atomic {
            return Err(ViewError::InvalidTraitUse {
                memory_trait: self.memory_trait(),
                reason: "read-modify-write access needs an Atomic view".to_string(),
            });
        }
        self.ensure_host_access()?;
        self.ensure_writable()?;
        let ptr = self.element_ptr(index)?;
        let _access = self.allocation.access.write();
        // SAFETY: as in `get`; the write lock is held across the read
        // and the write.
        let previous = unsafe { read_value(self.dtype(), ptr) };
        // SAFETY: as above.
        unsafe { write_value(self.dtype(), ptr, apply(previous)) };
        Ok(previous)
    }

    /// Every element in row-major coordinate order.
    pub fn to_vec<T: Scalar>(&self) -> Result<Vec<T>> {
        self.ensure_host_access()?;
        let packed = self.read_packed(Order::RowMajor)?;
        let item_size = self.dtype().size();
        Ok(packed
            .chunks_exact(item_size)
            // SAFETY: each chunk holds one element.
            .map(|chunk| T::from_value(unsafe { read_value(self.dtype(), chunk.as_ptr()) }))
            .collect())
    }

    /// Copy every element into a packed host buffer, visiting
    /// coordinates in `order`. Memory in spaces the host cannot
    /// access is staged through a host copy.
    pub(crate) fn read_packed(&self, order: Order) -> Result<Vec<u8>> {
        self.allocation.lifecycle.ensure_active()?;
        let item_size = self.dtype().size();
        let _access = self.allocation.access.read();

        let staged;
        let base: *const u8 = if self.space().host_accessible() {
            self.allocation.as_ptr()
        } else {
            let backend = self.context.backend(self.space())?;
            let mut staging = vec![0u8; self.allocation.bytes];
            // SAFETY: both regions are `bytes` long and distinct.
            unsafe {
                backend.copy_to_host(
                    self.allocation.as_ptr(),
                    staging.as_mut_ptr(),
                    self.allocation.bytes,
                )
            };
            backend.fence();
            staged = staging;
            staged.as_ptr()
        };

        let mut packed = Vec::with_capacity(self.size() * item_size);
        for location in walk(&self.slice, order).iter() {
            // SAFETY: every location of the slice lies within the
            // allocation (or its staged copy).
            let element =
                unsafe { std::slice::from_raw_parts(base.add(location * item_size), item_size) };
            packed.extend_from_slice(element);
        }
        Ok(packed)
    }

    /// Overwrite every element from a packed host buffer laid out as
    /// produced by [`View::read_packed`] with the same `order`.
    pub(crate) fn write_packed(&self, order: Order, packed: &[u8]) -> Result<()> {
        self.allocation.lifecycle.ensure_active()?;
        self.ensure_writable()?;
        let item_size = self.dtype().size();
        if packed.len() != self.size() * item_size {
            return Err(ViewError::ShapeMismatch {
                expected: self.shape().to_vec(),
                found: vec![packed.len() / item_size.max(1)],
            });
        }
        let _access = self.allocation.access.write();

        let scatter = |base: *mut u8| {
            for (location, element) in walk(&self.slice, order)
                .iter()
                .zip(packed.chunks_exact(item_size))
            {
                // SAFETY: every location of the slice lies within the
                // allocation (or its staged copy).
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        element.as_ptr(),
                        base.add(location * item_size),
                        item_size,
                    )
                };
            }
        };

        if self.space().host_accessible() {
            scatter(self.allocation.as_ptr());
        } else {
            let backend = self.context.backend(self.space())?;
            let bytes = self.allocation.bytes;
            let mut staging = vec![0u8; bytes];
            // SAFETY: both regions are `bytes` long and distinct.
            unsafe { backend.copy_to_host(self.allocation.as_ptr(), staging.as_mut_ptr(), bytes) };
            backend.fence();
            scatter(staging.as_mut_ptr());
            // SAFETY: as above.
            unsafe { backend.copy_from_host(staging.as_ptr(), self.allocation.as_ptr(), bytes) };
            backend.fence();
        }
        Ok(())
    }
}

// A slice whose row-major walk visits `slice` in `order`.
fn walk(slice: &Slice, order: Order) -> std::borrow::Cow<'_, Slice> {
    match order {
        Order::RowMajor => std::borrow::Cow::Borrowed(slice),
        Order::ColumnMajor => std::borrow::Cow::Owned(slice.reversed()),
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("type", &self.type_name())
            .field("label", &self.label())
            .field("shape", &self.shape())
            .finish()
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} '{}' shape={:?}>",
            self.view_type.description(),
            self.label(),
            self.shape()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ArrayArgs;

    fn context() -> Arc<Context> {
        let context = Context::new();
        context.initialize::<&str>(&[]).unwrap();
        context
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Float(-2.7).as_i64(), -2);
        assert_eq!(Value::Int(-1).as_u64(), u64::MAX);
        assert!(Value::Float(0.5).as_bool());
        assert!(!Value::UInt(0).as_bool());
        assert_eq!(i16::from_value(Value::Int(70000)), 70000i64 as i16);
        assert_eq!(Value::from(3u8), Value::UInt(3));
        assert_eq!(<f32 as Scalar>::DTYPE, ElementType::Float32);
    }

    #[test]
    fn test_padded_index() {
        let context = context();
        let view = context
            .array(vec![3, 2], ArrayArgs::default().dtype(ElementType::Int64))
            .unwrap();
        view.set(&[2], 7).unwrap();
        assert_eq!(view.get_as::<i64>(&[2, 0]).unwrap(), 7);
        view.set_as(&[1, 1], 2.9f32).unwrap();
        assert_eq!(view.get(&[1, 1]).unwrap(), Value::Int(2));
        assert!(matches!(
            view.get(&[0, 0, 0]),
            Err(ViewError::Index(SliceError::InvalidDims {
                expected: 2,
                got: 3
            }))
        ));
        assert!(matches!(
            view.get(&[3, 0]),
            Err(ViewError::Index(SliceError::IndexOutOfRange { .. }))
        ));
    }

    #[test]
    fn test_layout_strides() {
        let context = context();
        let right = context.array(vec![2, 3], ArrayArgs::default()).unwrap();
        let left = context
            .array(vec![2, 3], ArrayArgs::default().layout(Layout::LayoutLeft))
            .unwrap();
        assert_eq!(right.strides(), &[3, 1]);
        assert_eq!(left.strides(), &[1, 2]);
        assert_eq!(left.byte_strides(), vec![8, 16]);
        for (i, j) in [(0, 0), (0, 2), (1, 1)] {
            let value = (i * 10 + j) as f64;
            right.set(&[i, j], value).unwrap();
            left.set(&[i, j], value).unwrap();
        }
        assert_eq!(right.to_vec::<f64>().unwrap(), left.to_vec::<f64>().unwrap());
    }

    #[test]
    fn test_packed_roundtrip_in_both_orders() {
        let context = context();
        let view = context
            .array(vec![2, 3], ArrayArgs::default().dtype(ElementType::Int16))
            .unwrap();
        for i in 0..2 {
            for j in 0..3 {
                view.set(&[i, j], (i * 3 + j) as i16).unwrap();
            }
        }
        let column = view.read_packed(Order::ColumnMajor).unwrap();
        let values: Vec<i16> = column
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![0, 3, 1, 4, 2, 5]);

        let other = context
            .array(vec![2, 3], ArrayArgs::default().dtype(ElementType::Int16))
            .unwrap();
        other.write_packed(Order::ColumnMajor, &column).unwrap();
        assert_eq!(other.to_vec::<i16>().unwrap(), view.to_vec::<i16>().unwrap());
    }

    #[test]
    fn test_atomic_updates() {
        let context = context();
        let counts = context
            .array(
                vec![4],
                ArrayArgs::default()
                    .dtype(ElementType::Int8)
                    .memory_trait(MemoryTrait::Atomic),
            )
            .unwrap();
        assert_eq!(counts.fetch_add(&[1], 5).unwrap(), Value::Int(0));
        counts.inc(&[1]).unwrap();
        assert_eq!(counts.fetch_sub(&[1], 2).unwrap(), Value::Int(6));
        counts.dec(&[1]).unwrap();
        assert_eq!(counts.get_as::<i8>(&[1]).unwrap(), 3);
        counts.fetch_add(&[2], 127).unwrap();
        counts.inc(&[2]).unwrap();
        assert_eq!(counts.get_as::<i8>(&[2]).unwrap(), i8::MIN);

        let total = context
            .array(vec![1], ArrayArgs::default().memory_trait(MemoryTrait::Atomic))
            .unwrap();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let total = total.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        total.fetch_add(&[0], 0.5).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(total.get_as::<f64>(&[0]).unwrap(), 500.0);

        let managed = context.array(vec![1], ArrayArgs::default()).unwrap();
        assert!(matches!(
            managed.inc(&[0]),
            Err(ViewError::InvalidTraitUse {
                memory_trait: MemoryTrait::Managed,
                ..
            })
        ));
    }

    #[test]
    fn test_allocations_are_counted() {
        let context = context();
        assert_eq!(context.live_allocations(), 0);
        let view = context.array(vec![4], ArrayArgs::default()).unwrap();
        let alias = view.clone();
        assert_eq!(context.live_allocations(), 1);
        drop(view);
        assert_eq!(context.live_allocations(), 1);
        drop(alias);
        assert_eq!(context.live_allocations(), 0);
    }
}
