/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use crate::slice::Slice;
use crate::slice::SliceError;

mod sealed {
    pub trait Sealed {}
}

/// Coordinate-to-element maps of the form
/// `offset + dot(strides, coord)`.
///
/// Every coordinate is bounds checked against the domain before it
/// is mapped.
pub trait AffineMap: sealed::Sealed {
    /// Number of dimensions.
    fn rank(&self) -> usize;

    /// Extent of each dimension.
    fn sizes(&self) -> &[usize];

    /// Element offset of `coord`.
    fn offset_of(&self, coord: &[usize]) -> Result<usize, SliceError>;
}

/// The inverse direction: which coordinate lands on an element
/// offset.
pub trait AffineMapInverse: sealed::Sealed {
    /// `None` when `offset` is not covered.
    fn coord_of(&self, offset: usize) -> Option<Vec<usize>>;
}

impl sealed::Sealed for Slice {}

impl AffineMap for Slice {
    fn rank(&self) -> usize {
        self.num_dim()
    }

    fn sizes(&self) -> &[usize] {
        Slice::sizes(self)
    }

    fn offset_of(&self, coord: &[usize]) -> Result<usize, SliceError> {
        if coord.len() != self.num_dim() {
            return Err(SliceError::InvalidDims {
                expected: self.num_dim(),
                got: coord.len(),
            });
        }

        let mut linear = self.offset();
        for (dim, ((&index, &size), &stride)) in coord
            .iter()
            .zip(Slice::sizes(self))
            .zip(self.strides())
            .enumerate()
        {
            if index >= size {
                return Err(SliceError::IndexOutOfRange {
                    dim,
                    index,
                    total: size,
                });
            }
            linear += index * stride;
        }
        Ok(linear)
    }
}

impl AffineMapInverse for Slice {
    fn coord_of(&self, value: usize) -> Option<Vec<usize>> {
        let mut pos = value.checked_sub(self.offset())?;
        let mut result = vec![0; self.num_dim()];

        // Dimensions of extent 1 never contribute to the offset.
        let mut dims: Vec<(usize, usize, usize)> = self
            .strides()
            .iter()
            .zip(Slice::sizes(self))
            .enumerate()
            .filter(|(_, (_, size))| **size > 1)
            .map(|(dim, (&stride, &size))| (dim, stride, size))
            .collect();
        dims.sort_by_key(|&(_, stride, _)| std::cmp::Reverse(stride));

        // Peel off the largest strides first.
        for (dim, stride, size) in dims {
            if stride == 0 {
                continue;
            }
            let index = pos / stride;
            if index >= size {
                return None;
            }
            result[dim] = index;
            pos -= index * stride;
        }

        (pos == 0).then_some(result)
    }
}
