/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Strided index geometry for multidimensional views.
//!
//! A [`Slice`] describes how an n-dimensional coordinate maps onto a
//! linear element offset: `offset + dot(strides, coord)`. Slices are
//! built either from explicit strides or from an [`Order`], which
//! fixes whether the last (row-major) or first (column-major) index
//! varies fastest.

mod affine;
mod order;
mod slice;

#[cfg(test)]
mod strategy;

pub use affine::AffineMap;
pub use affine::AffineMapInverse;
pub use order::Order;
pub use order::is_contiguous;
pub use slice::Slice;
pub use slice::SliceError;
pub use slice::SliceIterator;
