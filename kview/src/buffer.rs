/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Buffer-protocol interop.
//!
//! [`export_buffer`] exposes a host-accessible view as a strided
//! buffer descriptor without copying. The descriptor co-owns the
//! view's allocation, so the memory stays valid for as long as any
//! consumer holds it.
//!
//! [`ExternalBuffer`] is the other direction: a descriptor of memory
//! owned by someone else, plus an opaque owner that keeps it alive.
//! Views with the `Unmanaged` trait wrap it in place; every other
//! trait copies it into a fresh allocation.

use std::any::Any;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use ndslice::Order;
use ndslice::SliceError;
use ndslice::is_contiguous;

use crate::catalog::ConstructorHandle;
use crate::context::Context;
use crate::error::Result;
use crate::error::ViewError;
use crate::token::ElementType;
use crate::token::Layout;
use crate::token::MemoryTrait;
use crate::view::Allocation;
use crate::view::Scalar;
use crate::view::View;

/// A zero-copy, strided description of a view's memory.
pub struct ExportedBuffer {
    allocation: Arc<Allocation>,
    ptr: NonNull<u8>,
    dtype: ElementType,
    shape: Vec<usize>,
    strides: Vec<isize>,
    readonly: bool,
}

// SAFETY: `ptr` addresses memory owned by `allocation`, which is
// itself `Send + Sync`.
unsafe impl Send for ExportedBuffer {}
// SAFETY: as above.
unsafe impl Sync for ExportedBuffer {}

impl ExportedBuffer {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    pub fn item_size(&self) -> usize {
        self.dtype.size()
    }

    /// The buffer-protocol format code of the element type.
    pub fn format(&self) -> &'static str {
        self.dtype.format()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Strides in bytes.
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.shape.iter().product::<usize>() * self.item_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_c_contiguous(&self) -> bool {
        self.is_contiguous_in(Order::RowMajor)
    }

    pub fn is_f_contiguous(&self) -> bool {
        self.is_contiguous_in(Order::ColumnMajor)
    }

    fn is_contiguous_in(&self, order: Order) -> bool {
        let item_size = self.item_size() as isize;
        let strides: Vec<isize> = self.strides.iter().map(|s| s / item_size).collect();
        is_contiguous(&self.shape, &strides, order)
    }
}

impl fmt::Debug for ExportedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedBuffer")
            .field("format", &self.format())
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("readonly", &self.readonly)
            .finish()
    }
}

/// Export `view` as a strided buffer sharing its memory.
pub fn export_buffer(view: &View) -> Result<ExportedBuffer> {
    view.context().ensure_active()?;
    if !view.space().host_accessible() {
        return Err(ViewError::SpaceNotHostAccessible(view.space()));
    }
    let allocation = view.allocation().clone();
    let ptr = view.first_element();
    tracing::debug!("exporting '{}' ({})", view.label(), view.type_name());
    Ok(ExportedBuffer {
        allocation,
        ptr,
        dtype: view.dtype(),
        shape: view.shape().to_vec(),
        strides: view.byte_strides(),
        readonly: view.is_readonly(),
    })
}

/// Host memory lent by a producer, described in buffer-protocol
/// terms.
#[derive(Clone)]
pub struct ExternalBuffer {
    ptr: NonNull<u8>,
    format: String,
    item_size: usize,
    shape: Vec<usize>,
    strides: Vec<isize>,
    readonly: bool,
    order_hint: Option<Order>,
    owner: Arc<dyn Any + Send + Sync>,
}

// SAFETY: the memory is kept alive by `owner`, which is `Send + Sync`.
unsafe impl Send for ExternalBuffer {}
// SAFETY: as above.
unsafe impl Sync for ExternalBuffer {}

// A heap block handed out by pointer and reclaimed on drop.
struct HostBlock<T> {
    ptr: NonNull<T>,
    len: usize,
}

// SAFETY: the block is uniquely owned and `T` is `Send + Sync`.
unsafe impl<T: Send + Sync> Send for HostBlock<T> {}
// SAFETY: as above.
unsafe impl<T: Send + Sync> Sync for HostBlock<T> {}

impl<T> HostBlock<T> {
    fn new(data: Vec<T>) -> Self {
        let len = data.len();
        let ptr = NonNull::from(Box::leak(data.into_boxed_slice())).cast::<T>();
        Self { ptr, len }
    }
}

impl<T> Drop for HostBlock<T> {
    fn drop(&mut self) {
        // SAFETY: `ptr` and `len` came from a leaked boxed slice.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )))
        };
    }
}

impl ExternalBuffer {
    /// Describe foreign memory.
    ///
    /// # Safety
    ///
    /// Every element addressed by `shape` and the byte `strides`
    /// from `ptr` must be valid for reads (and for writes unless
    /// `readonly`) for as long as `owner` is alive.
    pub unsafe fn from_raw_parts(
        ptr: NonNull<u8>,
        format: impl Into<String>,
        item_size: usize,
        shape: Vec<usize>,
        strides: Vec<isize>,
        readonly: bool,
        owner: Arc<dyn Any + Send + Sync>,
    ) -> Result<Self> {
        if shape.len() != strides.len() {
            return Err(SliceError::InvalidDims {
                expected: shape.len(),
                got: strides.len(),
            }
            .into());
        }
        Ok(Self {
            ptr,
            format: format.into(),
            item_size,
            shape,
            strides,
            readonly,
            order_hint: None,
            owner,
        })
    }

    /// Lend `data`, densely packed in `order`.
    pub fn from_vec<T: Scalar>(data: Vec<T>, shape: &[usize], order: Order) -> Result<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return Err(ViewError::ShapeMismatch {
                expected: shape.to_vec(),
                found: vec![data.len()],
            });
        }
        let strides: Vec<isize> = order.strides(shape).into_iter().map(|s| s as isize).collect();
        Self::from_vec_strided(data, 0, shape, &strides)
    }

    /// Lend `data` viewed through element `strides`, with the
    /// element at the zero coordinate at `offset`.
    pub fn from_vec_strided<T: Scalar>(
        data: Vec<T>,
        offset: usize,
        shape: &[usize],
        strides: &[isize],
    ) -> Result<Self> {
        if shape.len() != strides.len() {
            return Err(SliceError::InvalidDims {
                expected: shape.len(),
                got: strides.len(),
            }
            .into());
        }
        if shape.iter().all(|&extent| extent > 0) {
            let (mut low, mut high) = (offset as isize, offset as isize);
            for (dim, (&extent, &stride)) in shape.iter().zip(strides).enumerate() {
                let reach = (extent as isize - 1) * stride;
                if reach < 0 {
                    low += reach;
                } else {
                    high += reach;
                }
                if low < 0 || high >= data.len() as isize {
                    return Err(SliceError::IndexOutOfRange {
                        dim,
                        index: if low < 0 { 0 } else { high as usize },
                        total: data.len(),
                    }
                    .into());
                }
            }
        }
        let item_size = std::mem::size_of::<T>();
        let block = HostBlock::new(data);
        // SAFETY: `offset` and every strided reach were checked to lie
        // within the block, which `owner` keeps alive.
        unsafe {
            let ptr = NonNull::new_unchecked(block.ptr.as_ptr().add(offset)).cast::<u8>();
            Self::from_raw_parts(
                ptr,
                T::DTYPE.format(),
                item_size,
                shape.to_vec(),
                strides.iter().map(|s| s * item_size as isize).collect(),
                false,
                Arc::new(block),
            )
        }
    }

    /// Declare the memory order the producer considers canonical.
    pub fn with_order_hint(mut self, order: Order) -> Self {
        self.order_hint = Some(order);
        self
    }

    /// Forbid writes through views wrapping this buffer.
    pub fn into_readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Strides in bytes.
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn order_hint(&self) -> Option<Order> {
        self.order_hint
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The element type named by the format code.
    pub fn dtype(&self) -> Result<ElementType> {
        ElementType::from_format(&self.format, self.item_size)
    }

    /// Strides in elements, if every byte stride is a whole number of
    /// elements.
    pub fn element_strides(&self) -> Option<Vec<isize>> {
        let item_size = self.item_size as isize;
        if item_size == 0 {
            return None;
        }
        self.strides
            .iter()
            .map(|&s| (s % item_size == 0).then_some(s / item_size))
            .collect()
    }

    /// The order the memory is densely packed in, preferring
    /// row-major when both apply.
    pub fn natural_order(&self) -> Option<Order> {
        let strides = self.element_strides()?;
        [Order::RowMajor, Order::ColumnMajor]
            .into_iter()
            .find(|&order| is_contiguous(&self.shape, &strides, order))
    }

    /// Copy every element into a packed host buffer, visiting
    /// coordinates in `order`.
    pub(crate) fn gather(&self, order: Order) -> Vec<u8> {
        let mut packed = Vec::with_capacity(self.len() * self.item_size);
        for_each_offset(&self.shape, &self.strides, order, |offset| {
            // SAFETY: the constructor contract guarantees every
            // strided element is readable.
            let element = unsafe {
                std::slice::from_raw_parts(self.ptr.as_ptr().offset(offset), self.item_size)
            };
            packed.extend_from_slice(element);
        });
        packed
    }
}

impl fmt::Debug for ExternalBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalBuffer")
            .field("format", &self.format)
            .field("item_size", &self.item_size)
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("readonly", &self.readonly)
            .field("order_hint", &self.order_hint)
            .finish()
    }
}

impl From<ExportedBuffer> for ExternalBuffer {
    fn from(exported: ExportedBuffer) -> Self {
        Self {
            ptr: exported.ptr,
            format: exported.format().to_string(),
            item_size: exported.item_size(),
            shape: exported.shape,
            strides: exported.strides,
            readonly: exported.readonly,
            order_hint: None,
            owner: exported.allocation,
        }
    }
}

// Visit the byte offset of every coordinate, `order` deciding which
// dimension varies fastest.
fn for_each_offset(shape: &[usize], strides: &[isize], order: Order, mut visit: impl FnMut(isize)) {
    if shape.contains(&0) {
        return;
    }
    let dims: Vec<usize> = match order {
        Order::RowMajor => (0..shape.len()).rev().collect(),
        Order::ColumnMajor => (0..shape.len()).collect(),
    };
    let mut coord = vec![0usize; shape.len()];
    let mut offset = 0isize;
    loop {
        visit(offset);
        let mut carried = true;
        for &dim in &dims {
            coord[dim] += 1;
            offset += strides[dim];
            if coord[dim] < shape[dim] {
                carried = false;
                break;
            }
            offset -= strides[dim] * shape[dim] as isize;
            coord[dim] = 0;
        }
        if carried {
            return;
        }
    }
}

// The view may reshape the buffer but never reach past it.
fn check_element_count(shape: &[usize], buffer: &ExternalBuffer) -> Result<()> {
    if shape.iter().product::<usize>() != buffer.len() {
        return Err(ViewError::ShapeMismatch {
            expected: buffer.shape().to_vec(),
            found: shape.to_vec(),
        });
    }
    Ok(())
}

fn layout_order(context: &Context, handle: &ConstructorHandle) -> Result<Order> {
    handle
        .key()
        .layout
        .order()
        .ok_or_else(|| ViewError::UnsupportedVariant {
            name: handle.name().to_string(),
            max_rank: context.features().max_rank(),
        })
}

/// Wrap `buffer` in place as a view of `handle`.
pub(crate) fn import_buffer(
    context: &Arc<Context>,
    handle: ConstructorHandle,
    label: String,
    shape: &[usize],
    buffer: ExternalBuffer,
) -> Result<View> {
    let key = *handle.key();
    if key.memory_trait != MemoryTrait::Unmanaged {
        return Err(ViewError::InvalidTraitUse {
            memory_trait: key.memory_trait,
            reason: "only Unmanaged views wrap external memory in place".to_string(),
        });
    }
    if !key.space.host_accessible() {
        return Err(ViewError::SpaceNotHostAccessible(key.space));
    }
    check_element_count(shape, &buffer)?;
    let found = buffer.dtype()?;
    if found != key.dtype {
        return Err(ViewError::TypeMismatch {
            expected: key.dtype,
            found,
        });
    }
    let order = layout_order(context, &handle)?;
    let non_contiguous = || ViewError::NonContiguous {
        shape: buffer.shape().to_vec(),
        strides: buffer.strides().to_vec(),
    };
    let strides = buffer.element_strides().ok_or_else(non_contiguous)?;
    if !is_contiguous(buffer.shape(), &strides, order) {
        return Err(match buffer.natural_order() {
            Some(found) => ViewError::LayoutMismatch {
                requested: key.layout,
                found: Layout::from_order(found),
            },
            None => non_contiguous(),
        });
    }
    View::borrowed(
        context,
        handle,
        label,
        shape,
        buffer.ptr,
        buffer.readonly,
        buffer.owner.clone(),
    )
}

/// Allocate a view of `handle` and copy `buffer` into it. Elements
/// are transferred in the layout's order, so a reshaped buffer is
/// reinterpreted in that order.
pub(crate) fn copy_from_buffer(
    context: &Arc<Context>,
    handle: ConstructorHandle,
    label: String,
    shape: &[usize],
    buffer: ExternalBuffer,
) -> Result<View> {
    let key = *handle.key();
    check_element_count(shape, &buffer)?;
    let found = buffer.dtype()?;
    if found != key.dtype {
        return Err(ViewError::TypeMismatch {
            expected: key.dtype,
            found,
        });
    }
    let order = layout_order(context, &handle)?;
    let view = View::allocate(context, handle, label, shape)?;
    view.write_packed(order, &buffer.gather(order))?;
    tracing::debug!("copied {} elements into '{}'", buffer.len(), view.label());
    Ok(view)
}
