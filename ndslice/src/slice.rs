/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use serde::Deserialize;
use serde::Serialize;

use crate::affine::AffineMap;
use crate::affine::AffineMapInverse;
use crate::order::Order;

/// The type of error for slice operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SliceError {
    /// The number of coordinates (or strides) does not match the
    /// number of dimensions.
    #[error("invalid dims: expected {expected}, got {got}")]
    InvalidDims { expected: usize, got: usize },

    /// A coordinate exceeds the extent of its dimension.
    #[error("index {index} out of range {total} in dimension {dim}")]
    IndexOutOfRange {
        dim: usize,
        index: usize,
        total: usize,
    },

    /// The linear offset is not addressed by any coordinate of the
    /// slice.
    #[error("value {value} not in slice")]
    ValueNotInSlice { value: usize },

    /// The number of elements described by the sizes does not fit in
    /// a `usize`.
    #[error("element count of {sizes:?} overflows")]
    SizeOverflow { sizes: Vec<usize> },
}

/// Slice is a compact representation of indices into the flat
/// representation of an n-dimensional array. Given an offset, sizes
/// of each dimension, and strides for each dimension, Slice can
/// compute indices into the flat array.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slice {
    offset: usize,
    sizes: Vec<usize>,
    strides: Vec<usize>,
}

impl Slice {
    /// Create a new Slice with the provided offset, sizes, and
    /// strides. Sizes and strides must have the same number of
    /// dimensions.
    pub fn new(offset: usize, sizes: Vec<usize>, strides: Vec<usize>) -> Result<Self, SliceError> {
        if sizes.len() != strides.len() {
            return Err(SliceError::InvalidDims {
                expected: sizes.len(),
                got: strides.len(),
            });
        }
        sizes
            .iter()
            .try_fold(1usize, |acc, &size| acc.checked_mul(size))
            .ok_or_else(|| SliceError::SizeOverflow {
                sizes: sizes.clone(),
            })?;
        Ok(Slice {
            offset,
            sizes,
            strides,
        })
    }

    /// Create a new slice of the given sizes in row-major order.
    pub fn new_row_major(sizes: impl Into<Vec<usize>>) -> Self {
        Self::new_with_order(sizes, Order::RowMajor)
    }

    /// Create a new slice of the given sizes in column-major order.
    pub fn new_column_major(sizes: impl Into<Vec<usize>>) -> Self {
        Self::new_with_order(sizes, Order::ColumnMajor)
    }

    /// Create a new dense slice of the given sizes whose strides
    /// follow `order`.
    pub fn new_with_order(sizes: impl Into<Vec<usize>>, order: Order) -> Self {
        let sizes = sizes.into();
        let strides = order.strides(&sizes);
        Slice {
            offset: 0,
            sizes,
            strides,
        }
    }

    /// The offset to the first element of the slice.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The number of elements in each dimension.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// The distance, in elements, between consecutive indices of
    /// each dimension.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// The number of dimensions.
    pub fn num_dim(&self) -> usize {
        self.sizes.len()
    }

    /// The total number of elements addressed by the slice.
    pub fn len(&self) -> usize {
        self.sizes.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of elements between the first addressed location
    /// and one past the last. A dense slice has `span() == len()`.
    pub fn span(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        1 + self
            .sizes
            .iter()
            .zip(&self.strides)
            .map(|(size, stride)| (size - 1) * stride)
            .sum::<usize>()
    }

    /// Return the location of the provided coordinates.
    pub fn location(&self, coord: &[usize]) -> Result<usize, SliceError> {
        self.offset_of(coord)
    }

    /// Return the coordinates of the provided location.
    pub fn coordinates(&self, value: usize) -> Result<Vec<usize>, SliceError> {
        self.coord_of(value)
            .ok_or(SliceError::ValueNotInSlice { value })
    }

    /// The order in which this slice is densely packed, if any.
    /// Slices of a single effective dimension are reported as
    /// row-major.
    pub fn order(&self) -> Option<Order> {
        let strides: Vec<isize> = self.strides.iter().map(|&s| s as isize).collect();
        [Order::RowMajor, Order::ColumnMajor]
            .into_iter()
            .find(|&order| crate::order::is_contiguous(&self.sizes, &strides, order))
    }

    /// The same locations with the dimensions listed in reverse. A
    /// row-major walk of the reversed slice visits the original in
    /// column-major coordinate order.
    pub fn reversed(&self) -> Slice {
        Slice {
            offset: self.offset,
            sizes: self.sizes.iter().rev().copied().collect(),
            strides: self.strides.iter().rev().copied().collect(),
        }
    }

    /// Iterator over the locations of the slice, visiting coordinates
    /// in row-major order.
    pub fn iter(&self) -> SliceIterator<'_> {
        SliceIterator {
            slice: self,
            coord: vec![0; self.num_dim()],
            done: self.is_empty(),
        }
    }
}

impl<'a> IntoIterator for &'a Slice {
    type Item = usize;
    type IntoIter = SliceIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterates over the locations of a [`Slice`].
pub struct SliceIterator<'a> {
    slice: &'a Slice,
    coord: Vec<usize>,
    done: bool,
}

impl Iterator for SliceIterator<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.done {
            return None;
        }
        let location = self.slice.offset
            + self
                .coord
                .iter()
                .zip(&self.slice.strides)
                .map(|(c, s)| c * s)
                .sum::<usize>();

        // Odometer step, last dimension fastest.
        let mut dim = self.coord.len();
        loop {
            if dim == 0 {
                self.done = true;
                break;
            }
            dim -= 1;
            self.coord[dim] += 1;
            if self.coord[dim] < self.slice.sizes[dim] {
                break;
            }
            self.coord[dim] = 0;
        }

        Some(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major() {
        let s = Slice::new_row_major(vec![2, 3, 4]);
        assert_eq!(s.strides(), &[12, 4, 1]);
        assert_eq!(s.len(), 24);
        assert_eq!(s.location(&[1, 2, 3]).unwrap(), 23);
        assert_eq!(s.coordinates(13).unwrap(), vec![1, 0, 1]);
        assert_eq!(s.iter().collect::<Vec<_>>(), (0..24).collect::<Vec<_>>());
        assert_eq!(s.order(), Some(Order::RowMajor));
    }

    #[test]
    fn test_column_major() {
        let s = Slice::new_column_major(vec![2, 3]);
        assert_eq!(s.strides(), &[1, 2]);
        assert_eq!(s.location(&[1, 0]).unwrap(), 1);
        assert_eq!(s.location(&[0, 1]).unwrap(), 2);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![0, 2, 4, 1, 3, 5]);
        assert_eq!(
            s.reversed().iter().collect::<Vec<_>>(),
            (0..6).collect::<Vec<_>>()
        );
        assert_eq!(s.order(), Some(Order::ColumnMajor));
    }

    #[test]
    fn test_out_of_range() {
        let s = Slice::new_row_major(vec![2, 2]);
        assert_eq!(
            s.location(&[2, 0]),
            Err(SliceError::IndexOutOfRange {
                dim: 0,
                index: 2,
                total: 2
            })
        );
        assert_eq!(
            s.location(&[0, 0, 0]),
            Err(SliceError::InvalidDims {
                expected: 2,
                got: 3
            })
        );
        assert_eq!(
            s.coordinates(4),
            Err(SliceError::ValueNotInSlice { value: 4 })
        );
    }

    #[test]
    fn test_new_validates() {
        assert!(matches!(
            Slice::new(0, vec![2, 2], vec![1]),
            Err(SliceError::InvalidDims {
                expected: 2,
                got: 1
            })
        ));
        assert!(matches!(
            Slice::new(0, vec![usize::MAX, 2], vec![2, 1]),
            Err(SliceError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn test_strided_span() {
        let s = Slice::new(1, vec![2, 3], vec![8, 2]).unwrap();
        assert_eq!(s.span(), 13);
        assert_eq!(s.order(), None);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![1, 3, 5, 9, 11, 13]);
        assert_eq!(s.coordinates(11).unwrap(), vec![1, 1]);
    }

    #[test]
    fn test_empty() {
        let s = Slice::new_row_major(vec![3, 0]);
        assert!(s.is_empty());
        assert_eq!(s.span(), 0);
        assert_eq!(s.iter().count(), 0);
    }
}
