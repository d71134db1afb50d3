/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use ndslice::SliceError;

use crate::memory::AllocError;
use crate::token::ElementType;
use crate::token::Layout;
use crate::token::MemorySpace;
use crate::token::MemoryTrait;

/// Errors surfaced by view resolution, construction and copies.
/// Every variant is a recoverable condition reported to the caller;
/// nothing is coerced silently.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ViewError {
    /// An enumerated value was not recognized.
    #[error("unknown {kind} token: '{value}'")]
    UnknownToken { kind: &'static str, value: String },

    /// The tokens are valid, but that combination was not
    /// instantiated.
    #[error(
        "view type '{name}' is not registered; this build instantiates ranks up to {max_rank} for its enabled spaces, layouts and traits"
    )]
    UnsupportedVariant { name: String, max_rank: usize },

    /// The shape could not be determined from the arguments.
    #[error("ambiguous construction: {0}")]
    AmbiguousConstruction(String),

    /// A memory trait was used where it is not permitted.
    #[error("invalid use of memory trait {memory_trait}: {reason}")]
    InvalidTraitUse {
        memory_trait: MemoryTrait,
        reason: String,
    },

    /// The requested rank is larger than the maximum concrete rank.
    #[error("rank {requested} exceeds the maximum concrete rank {max}")]
    RankExceeded { requested: usize, max: usize },

    /// An explicit element type conflicts with the one found in a
    /// buffer or view.
    #[error("element type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: ElementType,
        found: ElementType,
    },

    /// Extents differ where they must agree.
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// The host tried to touch memory in a space it cannot access.
    #[error("memory space {0} is not accessible from the host")]
    SpaceNotHostAccessible(MemorySpace),

    /// A borrowed buffer is packed in the other layout.
    #[error("layout mismatch: requested {requested}, buffer is packed as {found}")]
    LayoutMismatch { requested: Layout, found: Layout },

    /// A borrowed buffer is packed in no supported layout.
    #[error("buffer with shape {shape:?} and strides {strides:?} is not contiguous")]
    NonContiguous {
        shape: Vec<usize>,
        strides: Vec<isize>,
    },

    /// The buffer type code does not name a supported element type.
    #[error("unsupported buffer format '{format}' with item size {item_size}")]
    UnsupportedFormat { format: String, item_size: usize },

    /// A write was attempted through a view of read-only memory.
    #[error("view '{0}' is read-only")]
    ReadOnly(String),

    /// An element index is malformed or out of bounds.
    #[error(transparent)]
    Index(#[from] SliceError),

    /// The memory backend failed to allocate.
    #[error(transparent)]
    Allocation(#[from] AllocError),

    /// The runtime has not been initialized.
    #[error("kview has not been initialized")]
    NotInitialized,

    /// The runtime has been finalized.
    #[error("kview has already been finalized")]
    AlreadyFinalized,
}

pub type Result<T> = std::result::Result<T, ViewError>;
