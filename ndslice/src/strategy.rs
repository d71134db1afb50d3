/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Property-based generators for [`Slice`] and [`Order`].
//!
//! These strategies are used in `proptest`-based tests to construct
//! randomized shapes and layouts for checking the index geometry.
//!
//! This module is only included in test builds (`#[cfg(test)]`).

use proptest::prelude::*;

use crate::Order;
use crate::Slice;

/// Generates extents of rank `1..=max_rank`, each in
/// `1..=max_extent`.
pub fn gen_extents(max_rank: usize, max_extent: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1..=max_extent, 1..=max_rank)
}

/// Generates either order.
pub fn gen_order() -> impl Strategy<Value = Order> {
    prop_oneof![Just(Order::RowMajor), Just(Order::ColumnMajor)]
}

/// Generates a dense slice together with the order it was built in.
pub fn gen_slice(max_rank: usize, max_extent: usize) -> impl Strategy<Value = (Slice, Order)> {
    (gen_extents(max_rank, max_extent), gen_order())
        .prop_map(|(sizes, order)| (Slice::new_with_order(sizes, order), order))
}

mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::is_contiguous;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256, ..ProptestConfig::default()
        })]

        #[test]
        fn location_coordinates_roundtrip((slice, _order) in gen_slice(5, 4)) {
            for location in slice.iter() {
                let coord = slice.coordinates(location).unwrap();
                prop_assert_eq!(slice.location(&coord).unwrap(), location);
            }
        }

        // A dense slice addresses every location in `0..len` exactly
        // once, in either order.
        #[test]
        fn dense_slices_are_bijective((slice, _order) in gen_slice(5, 4)) {
            let seen: HashSet<usize> = slice.iter().collect();
            prop_assert_eq!(seen.len(), slice.len());
            prop_assert_eq!(slice.span(), slice.len());
            prop_assert!(seen.iter().all(|&l| l < slice.len()));
        }

        #[test]
        fn dense_slices_report_their_order((slice, order) in gen_slice(5, 4)) {
            let strides: Vec<isize> = slice.strides().iter().map(|&s| s as isize).collect();
            prop_assert!(is_contiguous(slice.sizes(), &strides, order));
            let detected = slice.order().unwrap();
            // Both orders may hold when at most one extent exceeds 1.
            if detected != order {
                prop_assert!(is_contiguous(slice.sizes(), &strides, detected));
            }
        }

        #[test]
        fn reversed_walks_column_major(sizes in gen_extents(4, 4)) {
            let slice = Slice::new_column_major(sizes);
            let walked: Vec<usize> = slice.reversed().iter().collect();
            prop_assert_eq!(walked, (0..slice.len()).collect::<Vec<_>>());
        }
    }
}
