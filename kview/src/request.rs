/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Normalization of polymorphic construction calls.
//!
//! A construction call takes one positional argument that may be a
//! label, a shape or a buffer, plus optional keyword arguments. The
//! positional argument is first classified into a [`Construction`],
//! then merged with the keywords into a single
//! [`ConstructionRequest`].
//!
//! Classification precedence:
//!
//! 1. text, when no explicit label was given, is the label;
//! 2. a flat integer sequence, when no explicit shape was given, is
//!    the shape;
//! 3. a buffer is wrapped (or copied), and supplies shape, element
//!    type and memory order.
//!
//! Text or integers that collide with the explicit keyword are
//! ambiguous.
//!
//! Layout precedence: an explicit `layout` wins, then an explicit
//! `order` flag, then the buffer's declared order, then the order its
//! strides are packed in, and finally `LayoutRight`.

use std::fmt;

use ndslice::Order;

use crate::buffer::ExternalBuffer;
use crate::catalog::ConcreteViewTypeKey;
use crate::catalog::Rank;
use crate::error::Result;
use crate::error::ViewError;
use crate::token::ElementType;
use crate::token::Layout;
use crate::token::MemorySpace;
use crate::token::MemoryTrait;

/// The first positional argument, as seen structurally by the caller.
#[derive(Clone, Debug)]
pub enum FirstArg {
    Text(String),
    Integers(Vec<usize>),
    Buffer(ExternalBuffer),
}

impl From<&str> for FirstArg {
    fn from(text: &str) -> Self {
        FirstArg::Text(text.to_string())
    }
}

impl From<String> for FirstArg {
    fn from(text: String) -> Self {
        FirstArg::Text(text)
    }
}

impl From<Vec<usize>> for FirstArg {
    fn from(shape: Vec<usize>) -> Self {
        FirstArg::Integers(shape)
    }
}

impl From<&[usize]> for FirstArg {
    fn from(shape: &[usize]) -> Self {
        FirstArg::Integers(shape.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for FirstArg {
    fn from(shape: [usize; N]) -> Self {
        FirstArg::Integers(shape.to_vec())
    }
}

impl From<ExternalBuffer> for FirstArg {
    fn from(buffer: ExternalBuffer) -> Self {
        FirstArg::Buffer(buffer)
    }
}

/// What the first positional argument means.
#[derive(Clone, Debug)]
pub enum Construction {
    Label(String),
    Shape(Vec<usize>),
    Buffer(ExternalBuffer),
}

/// Keyword arguments of a construction call. `None` means "not
/// given".
#[derive(Clone, Debug, Default)]
pub struct ArrayArgs {
    pub shape: Option<Vec<usize>>,
    pub label: Option<String>,
    pub dtype: Option<ElementType>,
    pub space: Option<MemorySpace>,
    pub layout: Option<Layout>,
    pub memory_trait: Option<MemoryTrait>,
    pub dynamic: bool,
    pub order: Option<String>,
}

impl ArrayArgs {
    pub fn shape(mut self, shape: impl Into<Vec<usize>>) -> Self {
        self.shape = Some(shape.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn dtype(mut self, dtype: ElementType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn space(mut self, space: MemorySpace) -> Self {
        self.space = Some(space);
        self
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn memory_trait(mut self, memory_trait: MemoryTrait) -> Self {
        self.memory_trait = Some(memory_trait);
        self
    }

    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }
}

/// Whether the rank is fixed by the type or carried at runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RankMode {
    Fixed,
    Dynamic,
}

/// A fully disambiguated construction request.
#[derive(Clone, Debug)]
pub struct ConstructionRequest {
    pub shape: Vec<usize>,
    pub label: Option<String>,
    pub dtype: ElementType,
    pub space: MemorySpace,
    pub layout: Layout,
    pub memory_trait: MemoryTrait,
    pub rank_mode: RankMode,
    pub source: Option<ExternalBuffer>,
}

impl ConstructionRequest {
    /// The concrete type this request resolves to.
    pub fn key(&self) -> ConcreteViewTypeKey {
        ConcreteViewTypeKey {
            dtype: self.dtype,
            space: self.space,
            layout: self.layout,
            memory_trait: self.memory_trait,
            rank: match self.rank_mode {
                RankMode::Fixed => Rank::Fixed(self.shape.len()),
                RankMode::Dynamic => Rank::Dynamic,
            },
        }
    }
}

impl fmt::Display for ConstructionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?}{}",
            self.key().description(),
            self.shape,
            if self.source.is_some() { " from buffer" } else { "" }
        )
    }
}

/// Decide what the first positional argument means.
pub fn classify(first: FirstArg, args: &ArrayArgs) -> Result<Construction> {
    match first {
        FirstArg::Text(text) => match &args.label {
            None => Ok(Construction::Label(text)),
            Some(label) => Err(ViewError::AmbiguousConstruction(format!(
                "label given both positionally ('{}') and by keyword ('{}')",
                text, label
            ))),
        },
        FirstArg::Integers(shape) => match &args.shape {
            None => Ok(Construction::Shape(shape)),
            Some(explicit) => Err(ViewError::AmbiguousConstruction(format!(
                "shape given both positionally ({:?}) and by keyword ({:?})",
                shape, explicit
            ))),
        },
        FirstArg::Buffer(buffer) => Ok(Construction::Buffer(buffer)),
    }
}

/// Classify `first` and normalize the call into a request.
pub fn normalize(first: FirstArg, args: ArrayArgs, max_rank: usize) -> Result<ConstructionRequest> {
    let construction = classify(first, &args)?;
    normalize_construction(construction, args, max_rank)
}

/// Normalize an `unmanaged_array` call. The trait defaults to
/// `Unmanaged` and may not be anything else.
pub fn normalize_unmanaged(
    buffer: ExternalBuffer,
    mut args: ArrayArgs,
    max_rank: usize,
) -> Result<ConstructionRequest> {
    match args.memory_trait {
        None | Some(MemoryTrait::Unmanaged) => {}
        Some(other) => {
            return Err(ViewError::InvalidTraitUse {
                memory_trait: other,
                reason: "unmanaged_array only constructs Unmanaged views".to_string(),
            });
        }
    }
    args.memory_trait = Some(MemoryTrait::Unmanaged);
    normalize_construction(Construction::Buffer(buffer), args, max_rank)
}

/// Merge a classified first argument with the keyword arguments.
pub fn normalize_construction(
    construction: Construction,
    args: ArrayArgs,
    max_rank: usize,
) -> Result<ConstructionRequest> {
    let (label, shape, source) = match construction {
        Construction::Label(label) => {
            let shape = args.shape.ok_or_else(|| {
                ViewError::AmbiguousConstruction(format!("no shape given for '{}'", label))
            })?;
            (Some(label), shape, None)
        }
        Construction::Shape(shape) => (args.label, shape, None),
        Construction::Buffer(buffer) => {
            let shape = match args.shape {
                Some(shape) if shape.iter().product::<usize>() != buffer.len() => {
                    return Err(ViewError::ShapeMismatch {
                        expected: buffer.shape().to_vec(),
                        found: shape,
                    });
                }
                Some(shape) => shape,
                None => buffer.shape().to_vec(),
            };
            (args.label, shape, Some(buffer))
        }
    };

    if shape.is_empty() {
        return Err(ViewError::AmbiguousConstruction(
            "a view needs at least one dimension".to_string(),
        ));
    }
    if shape.len() > max_rank {
        return Err(ViewError::RankExceeded {
            requested: shape.len(),
            max: max_rank,
        });
    }

    let memory_trait = args.memory_trait.unwrap_or(MemoryTrait::Managed);
    if memory_trait == MemoryTrait::Unmanaged && source.is_none() {
        return Err(ViewError::InvalidTraitUse {
            memory_trait,
            reason: "an Unmanaged view must wrap an existing buffer".to_string(),
        });
    }

    let dtype = match (&source, args.dtype) {
        (Some(buffer), explicit) => {
            let found = buffer.dtype()?;
            match explicit {
                Some(expected) if expected != found => {
                    return Err(ViewError::TypeMismatch { expected, found });
                }
                _ => found,
            }
        }
        (None, explicit) => explicit.unwrap_or(ElementType::Float64),
    };

    let layout = resolve_layout(args.layout, args.order.as_deref(), source.as_ref())?;

    let request = ConstructionRequest {
        shape,
        label,
        dtype,
        space: args.space.unwrap_or(MemorySpace::HostSpace),
        layout,
        memory_trait,
        rank_mode: if args.dynamic {
            RankMode::Dynamic
        } else {
            RankMode::Fixed
        },
        source,
    };
    tracing::debug!("normalized construction to {}", request);
    Ok(request)
}

fn resolve_layout(
    explicit: Option<Layout>,
    order: Option<&str>,
    source: Option<&ExternalBuffer>,
) -> Result<Layout> {
    if let Some(layout) = explicit {
        return Ok(layout);
    }
    if let Some(flag) = order {
        return Order::from_flag(flag)
            .map(Layout::from_order)
            .ok_or_else(|| ViewError::UnknownToken {
                kind: "order",
                value: flag.to_string(),
            });
    }
    let inferred = source.and_then(|buffer| buffer.order_hint().or_else(|| buffer.natural_order()));
    Ok(inferred.map_or(Layout::LayoutRight, Layout::from_order))
}
