/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Host mirrors and copies between views.
//!
//! These are the only operations that move data between memory
//! spaces. Each one completes, including any device fence, before it
//! returns.

use ndslice::Order;

use crate::catalog::ConcreteViewTypeKey;
use crate::error::Result;
use crate::error::ViewError;
use crate::token::MemorySpace;
use crate::token::MemoryTrait;
use crate::view::Value;
use crate::view::View;
use crate::view::read_value;
use crate::view::write_value;

/// Suffix appended to the label of a mirror.
pub const MIRROR_SUFFIX: &str = "_mirror";

/// Allocate a fresh `HostSpace` view with the shape, layout and
/// element type of `view`. With `copy` the current contents are
/// transferred; otherwise the mirror starts zeroed.
pub fn create_mirror(view: &View, copy: bool) -> Result<View> {
    let context = view.context();
    context.ensure_active()?;
    let source = view.view_type().key();
    let key = ConcreteViewTypeKey {
        space: MemorySpace::HostSpace,
        memory_trait: MemoryTrait::Managed,
        ..*source
    };
    let handle = context.resolve(&key)?;
    let mirror = View::allocate(
        context,
        handle,
        format!("{}{}", view.label(), MIRROR_SUFFIX),
        view.shape(),
    )?;
    tracing::debug!(
        "mirrored '{}' from {} ({})",
        view.label(),
        view.space(),
        if copy { "copied" } else { "uninitialized" }
    );
    if copy {
        deep_copy(&mirror, view)?;
    }
    Ok(mirror)
}

/// Like [`create_mirror`], but a view the host can already access is
/// returned as is.
pub fn create_mirror_view(view: &View, copy: bool) -> Result<View> {
    view.context().ensure_active()?;
    if view.space().host_accessible() {
        return Ok(view.clone());
    }
    create_mirror(view, copy)
}

/// Copy every element of `src` into `dst`. Extents must match
/// exactly; layouts and spaces may differ. Elements are converted
/// when the element types differ.
pub fn deep_copy(dst: &View, src: &View) -> Result<()> {
    dst.context().ensure_active()?;
    src.context().ensure_active()?;
    if dst.shape() != src.shape() {
        return Err(ViewError::ShapeMismatch {
            expected: dst.shape().to_vec(),
            found: src.shape().to_vec(),
        });
    }
    if dst.is_alias_of(src) {
        return Ok(());
    }
    // Walk the destination in its own order to keep its writes dense.
    let order = dst.layout().order().unwrap_or(Order::RowMajor);
    let packed = src.read_packed(order)?;
    let packed = if src.dtype() == dst.dtype() {
        packed
    } else {
        convert(&packed, src, dst)
    };
    dst.write_packed(order, &packed)?;
    tracing::debug!(
        "deep_copy '{}' ({}) -> '{}' ({})",
        src.label(),
        src.space(),
        dst.label(),
        dst.space()
    );
    Ok(())
}

fn convert(packed: &[u8], src: &View, dst: &View) -> Vec<u8> {
    let (from, to) = (src.dtype(), dst.dtype());
    let mut converted = vec![0u8; src.size() * to.size()];
    for (element, out) in packed
        .chunks_exact(from.size())
        .zip(converted.chunks_exact_mut(to.size()))
    {
        // SAFETY: each chunk holds exactly one element of its type.
        unsafe { write_value(to, out.as_mut_ptr(), read_value(from, element.as_ptr())) };
    }
    converted
}

/// Set every element of `view` to `value`.
pub fn fill(view: &View, value: impl Into<Value>) -> Result<()> {
    let dtype = view.dtype();
    let mut element = vec![0u8; dtype.size()];
    // SAFETY: `element` is sized for one element of `dtype`.
    unsafe { write_value(dtype, element.as_mut_ptr(), value.into()) };
    let packed = element.repeat(view.size());
    view.write_packed(Order::RowMajor, &packed)
}
