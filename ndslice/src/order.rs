/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Memory layout order used to compute dense strides.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Order {
    /// Row-major layout (C-style): last index varies fastest.
    RowMajor,

    /// Column-major layout (Fortran-style): first index varies
    /// fastest.
    ColumnMajor,
}

impl Order {
    /// Dense element strides for `sizes` in this order.
    pub fn strides(self, sizes: &[usize]) -> Vec<usize> {
        let mut strides = vec![1usize; sizes.len()];
        match self {
            Order::RowMajor => {
                for i in (0..sizes.len().saturating_sub(1)).rev() {
                    strides[i] = strides[i + 1].saturating_mul(sizes[i + 1]);
                }
            }
            Order::ColumnMajor => {
                for i in 1..sizes.len() {
                    strides[i] = strides[i - 1].saturating_mul(sizes[i - 1]);
                }
            }
        }
        strides
    }

    /// Parse a numpy-style order flag: `"C"` or `"F"`, any case.
    pub fn from_flag(flag: &str) -> Option<Order> {
        match flag.trim() {
            "C" | "c" => Some(Order::RowMajor),
            "F" | "f" => Some(Order::ColumnMajor),
            _ => None,
        }
    }

    /// The numpy-style order flag.
    pub fn flag(self) -> char {
        match self {
            Order::RowMajor => 'C',
            Order::ColumnMajor => 'F',
        }
    }

    /// The other order.
    pub fn transposed(self) -> Order {
        match self {
            Order::RowMajor => Order::ColumnMajor,
            Order::ColumnMajor => Order::RowMajor,
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Order::RowMajor => write!(f, "row-major"),
            Order::ColumnMajor => write!(f, "column-major"),
        }
    }
}

/// Whether elements addressed by `sizes` and element `strides` are
/// densely packed in `order`. Dimensions of extent 1 are ignored and
/// an empty extent is trivially contiguous.
pub fn is_contiguous(sizes: &[usize], strides: &[isize], order: Order) -> bool {
    if sizes.len() != strides.len() {
        return false;
    }
    if sizes.iter().any(|&size| size == 0) {
        return true;
    }
    let dims: Box<dyn Iterator<Item = (&usize, &isize)>> = match order {
        Order::RowMajor => Box::new(sizes.iter().zip(strides).rev()),
        Order::ColumnMajor => Box::new(sizes.iter().zip(strides)),
    };
    let mut expected = 1isize;
    for (&size, &stride) in dims {
        if size == 1 {
            continue;
        }
        if stride != expected {
            return false;
        }
        expected = expected.saturating_mul(size as isize);
    }
    true
}
