/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The catalog of constructible view types.
//!
//! Every combination of enabled tokens (and, for fixed-rank views,
//! every rank up to the maximum) is registered once when the context
//! is initialized, under a canonical name. Resolution is a pure
//! lookup of that name.
//!
//! Canonical names join, with `_`: the prefix (`View` or
//! `DynRankView`), the element type, the memory space, the layout
//! unless it is `LayoutRight`, the memory trait unless it is
//! `Managed`, and the rank for fixed-rank views. For example
//! `View_float64_HostSpace_2` or
//! `DynRankView_int32_HostSpace_LayoutLeft_Atomic`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::error::ViewError;
use crate::registry::FeatureSet;
use crate::token::ElementType;
use crate::token::Layout;
use crate::token::MemorySpace;
use crate::token::MemoryTrait;
use crate::token::Token;

/// Prefix of fixed-rank view type names.
pub const VIEW_PREFIX: &str = "View";
/// Prefix of dynamic-rank view type names.
pub const DYN_RANK_VIEW_PREFIX: &str = "DynRankView";

const DEFAULT_LAYOUT: Layout = Layout::LayoutRight;
const DEFAULT_TRAIT: MemoryTrait = MemoryTrait::Managed;

/// Whether the rank is part of the type or carried at runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rank {
    Fixed(usize),
    Dynamic,
}

/// The canonical identity of a concrete view type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcreteViewTypeKey {
    pub dtype: ElementType,
    pub space: MemorySpace,
    pub layout: Layout,
    pub memory_trait: MemoryTrait,
    pub rank: Rank,
}

impl ConcreteViewTypeKey {
    /// The name the type is registered under.
    pub fn canonical_name(&self) -> String {
        let prefix = match self.rank {
            Rank::Fixed(_) => VIEW_PREFIX,
            Rank::Dynamic => DYN_RANK_VIEW_PREFIX,
        };
        let mut parts = vec![
            prefix.to_string(),
            self.dtype.label().to_string(),
            self.space.label().to_string(),
        ];
        if self.layout != DEFAULT_LAYOUT {
            parts.push(self.layout.label().to_string());
        }
        if self.memory_trait != DEFAULT_TRAIT {
            parts.push(self.memory_trait.label().to_string());
        }
        if let Rank::Fixed(rank) = self.rank {
            parts.push(rank.to_string());
        }
        parts.join("_")
    }

    /// A template-style description, e.g.
    /// `View<float64**, LayoutLeft, HostSpace, Atomic>`.
    pub fn description(&self) -> String {
        let (prefix, stars) = match self.rank {
            Rank::Fixed(rank) => (VIEW_PREFIX, "*".repeat(rank)),
            Rank::Dynamic => (DYN_RANK_VIEW_PREFIX, String::new()),
        };
        let mut description = format!(
            "{}<{}{}, {}, {}",
            prefix, self.dtype, stars, self.layout, self.space
        );
        if self.memory_trait != DEFAULT_TRAIT {
            description.push_str(", ");
            description.push_str(self.memory_trait.label());
        }
        description.push('>');
        description
    }
}

impl fmt::Display for ConcreteViewTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_name())
    }
}

/// A registered concrete view type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewType {
    key: ConcreteViewTypeKey,
    name: String,
    description: String,
}

impl ViewType {
    fn new(key: ConcreteViewTypeKey) -> Self {
        ViewType {
            name: key.canonical_name(),
            description: key.description(),
            key,
        }
    }

    pub fn key(&self) -> &ConcreteViewTypeKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Handle through which views of a registered type are constructed.
pub type ConstructorHandle = Arc<ViewType>;

/// Name-keyed table of every registered view type.
#[derive(Debug)]
pub struct Catalog {
    types: HashMap<String, ConstructorHandle>,
    max_rank: usize,
}

impl Catalog {
    /// Register every combination enabled in `features`. With
    /// `debug_output`, each registration is logged.
    pub fn build(features: &FeatureSet, debug_output: bool) -> Self {
        let mut types = HashMap::new();
        let ranks: Vec<Rank> = (1..=features.max_rank())
            .map(Rank::Fixed)
            .chain(std::iter::once(Rank::Dynamic))
            .collect();

        for dtype in features.available::<ElementType>() {
            for space in features.available::<MemorySpace>() {
                for layout in features.available::<Layout>() {
                    for memory_trait in features.available::<MemoryTrait>() {
                        for &rank in &ranks {
                            let view_type = ViewType::new(ConcreteViewTypeKey {
                                dtype,
                                space,
                                layout,
                                memory_trait,
                                rank,
                            });
                            if debug_output {
                                tracing::info!(
                                    "Registering {} as '{}'",
                                    view_type.description(),
                                    view_type.name()
                                );
                            }
                            types.insert(view_type.name.clone(), Arc::new(view_type));
                        }
                    }
                }
            }
        }

        tracing::debug!("registered {} view types", types.len());
        Catalog {
            types,
            max_rank: features.max_rank(),
        }
    }

    /// Look up the constructor for `key`.
    pub fn resolve(&self, key: &ConcreteViewTypeKey) -> Result<ConstructorHandle> {
        self.lookup(&key.canonical_name())
    }

    /// Look up a constructor by canonical name.
    pub fn lookup(&self, name: &str) -> Result<ConstructorHandle> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| ViewError::UnsupportedVariant {
                name: name.to_string(),
                max_rank: self.max_rank,
            })
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn max_rank(&self) -> usize {
        self.max_rank
    }
}
