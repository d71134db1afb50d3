/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The compiled feature set: which tokens this process can construct
//! views with. A [`FeatureSet`] is built once, before the context is
//! initialized, and never mutated afterwards.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::token::ElementType;
use crate::token::ExecutionSpace;
use crate::token::Layout;
use crate::token::MemorySpace;
use crate::token::MemoryTrait;
use crate::token::Token;

/// Largest rank any build instantiates fixed-rank views for.
pub const MAX_CONCRETE_RANK: usize = 8;

/// Token kinds whose availability is recorded in a [`FeatureSet`].
pub trait Feature: Token {
    #[doc(hidden)]
    fn enabled(features: &FeatureSet) -> &BTreeSet<Self>;
}

/// The set of enabled tokens and the maximum concrete rank.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    dtypes: BTreeSet<ElementType>,
    memory_spaces: BTreeSet<MemorySpace>,
    layouts: BTreeSet<Layout>,
    memory_traits: BTreeSet<MemoryTrait>,
    execution_spaces: BTreeSet<ExecutionSpace>,
    default_execution_space: ExecutionSpace,
    max_rank: usize,
}

impl FeatureSet {
    pub fn builder() -> FeatureSetBuilder {
        FeatureSetBuilder::default()
    }

    /// Whether `token` was enabled.
    pub fn is_available<T: Feature>(&self, token: T) -> bool {
        T::enabled(self).contains(&token)
    }

    /// Every enabled token of kind `T`, in index order.
    pub fn available<T: Feature>(&self) -> impl Iterator<Item = T> + '_ {
        T::enabled(self).iter().copied()
    }

    /// Whether host code may dereference memory in `space`.
    pub fn host_accessible(&self, space: MemorySpace) -> bool {
        space.host_accessible()
    }

    pub fn max_rank(&self) -> usize {
        self.max_rank
    }

    pub fn default_execution_space(&self) -> ExecutionSpace {
        self.default_execution_space
    }

    pub fn default_memory_space(&self) -> MemorySpace {
        self.default_execution_space.default_memory_space()
    }

    /// JSON rendering of the feature set.
    pub fn describe(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }
}

impl Default for FeatureSet {
    fn default() -> Self {
        FeatureSet::builder().build()
    }
}

impl Feature for ElementType {
    fn enabled(features: &FeatureSet) -> &BTreeSet<Self> {
        &features.dtypes
    }
}

impl Feature for MemorySpace {
    fn enabled(features: &FeatureSet) -> &BTreeSet<Self> {
        &features.memory_spaces
    }
}

impl Feature for Layout {
    fn enabled(features: &FeatureSet) -> &BTreeSet<Self> {
        &features.layouts
    }
}

impl Feature for MemoryTrait {
    fn enabled(features: &FeatureSet) -> &BTreeSet<Self> {
        &features.memory_traits
    }
}

impl Feature for ExecutionSpace {
    fn enabled(features: &FeatureSet) -> &BTreeSet<Self> {
        &features.execution_spaces
    }
}

/// Builds a [`FeatureSet`]. Starts from the host-only default: every
/// element type, `HostSpace`, `LayoutRight` and `LayoutLeft`, every
/// memory trait, the `Serial` execution space and rank
/// [`MAX_CONCRETE_RANK`].
#[derive(Debug, Clone)]
pub struct FeatureSetBuilder {
    features: FeatureSet,
}

impl Default for FeatureSetBuilder {
    fn default() -> Self {
        FeatureSetBuilder {
            features: FeatureSet {
                dtypes: ElementType::all().iter().copied().collect(),
                memory_spaces: BTreeSet::from([MemorySpace::HostSpace]),
                layouts: BTreeSet::from([Layout::LayoutRight, Layout::LayoutLeft]),
                memory_traits: MemoryTrait::all().iter().copied().collect(),
                execution_spaces: BTreeSet::from([ExecutionSpace::Serial]),
                default_execution_space: ExecutionSpace::Serial,
                max_rank: MAX_CONCRETE_RANK,
            },
        }
    }
}

impl FeatureSetBuilder {
    /// Enable a memory space.
    pub fn memory_space(mut self, space: MemorySpace) -> Self {
        self.features.memory_spaces.insert(space);
        self
    }

    /// Enable a layout. `LayoutStride` has no dense order and is
    /// never constructible, so it is ignored.
    pub fn layout(mut self, layout: Layout) -> Self {
        if layout.order().is_none() {
            tracing::warn!("ignoring non-constructible layout {}", layout);
            return self;
        }
        self.features.layouts.insert(layout);
        self
    }

    /// Restrict the enabled element types.
    pub fn dtypes(mut self, dtypes: impl IntoIterator<Item = ElementType>) -> Self {
        self.features.dtypes = dtypes.into_iter().collect();
        self
    }

    /// Restrict the enabled memory traits. `Managed` is always kept.
    pub fn memory_traits(mut self, traits: impl IntoIterator<Item = MemoryTrait>) -> Self {
        self.features.memory_traits = traits.into_iter().collect();
        self.features.memory_traits.insert(MemoryTrait::Managed);
        self
    }

    /// Enable an execution space and its default memory space, and
    /// make it the default execution space.
    pub fn execution_space(mut self, space: ExecutionSpace) -> Self {
        self.features.execution_spaces.insert(space);
        self.features
            .memory_spaces
            .insert(space.default_memory_space());
        self.features.default_execution_space = space;
        self
    }

    /// Set the maximum concrete rank, clamped to
    /// `1..=MAX_CONCRETE_RANK`.
    pub fn max_rank(mut self, rank: usize) -> Self {
        self.features.max_rank = rank.clamp(1, MAX_CONCRETE_RANK);
        self
    }

    pub fn build(self) -> FeatureSet {
        self.features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_host_only() {
        let features = FeatureSet::default();
        assert!(features.is_available(MemorySpace::HostSpace));
        assert!(!features.is_available(MemorySpace::CudaSpace));
        assert!(features.is_available(Layout::LayoutLeft));
        assert!(!features.is_available(Layout::LayoutStride));
        assert!(features.is_available(MemoryTrait::Unmanaged));
        assert!(features.is_available(ElementType::Bool));
        assert_eq!(features.max_rank(), MAX_CONCRETE_RANK);
        assert_eq!(features.default_memory_space(), MemorySpace::HostSpace);
        assert_eq!(
            features.available::<ExecutionSpace>().collect::<Vec<_>>(),
            vec![ExecutionSpace::Serial]
        );
    }

    #[test]
    fn test_builder() {
        let features = FeatureSet::builder()
            .execution_space(ExecutionSpace::Cuda)
            .memory_space(MemorySpace::CudaUVMSpace)
            .layout(Layout::LayoutStride)
            .memory_traits([MemoryTrait::Unmanaged])
            .max_rank(20)
            .build();
        assert!(features.is_available(MemorySpace::CudaSpace));
        assert!(features.is_available(MemorySpace::CudaUVMSpace));
        assert!(!features.is_available(Layout::LayoutStride));
        assert_eq!(
            features.available::<MemoryTrait>().collect::<Vec<_>>(),
            vec![MemoryTrait::Managed, MemoryTrait::Unmanaged]
        );
        assert_eq!(features.max_rank(), MAX_CONCRETE_RANK);
        assert_eq!(features.default_execution_space(), ExecutionSpace::Cuda);
        assert!(!features.host_accessible(MemorySpace::CudaSpace));
    }

    #[test]
    fn test_describe_roundtrips() {
        let features = FeatureSet::builder().max_rank(3).build();
        let parsed: FeatureSet = serde_json::from_str(&features.describe()).unwrap();
        assert_eq!(parsed, features);
    }
}
