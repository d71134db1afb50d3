/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Typed, ranked, multidimensional views over memory spaces.
//!
//! A view type is identified by five tokens: element type, memory
//! space, layout, memory trait and rank. The [`FeatureSet`] fixes
//! which of them are available; [`Context::initialize`] expands it
//! into a [`Catalog`] of concrete types. Construction calls are
//! normalized into a [`ConstructionRequest`], resolved against the
//! catalog and allocated (or wrapped) through the [`MemoryBackend`]
//! of the target space.
//!
//! Views interoperate with buffer-protocol producers through
//! [`export_buffer`] and [`ExternalBuffer`], and move between spaces
//! only through [`create_mirror`], [`create_mirror_view`] and
//! [`deep_copy`].
//!
//! ```ignore
//! let context = kview::Context::new();
//! context.initialize::<&str>(&[])?;
//! let view = context.array("x", ArrayArgs::default().shape([2, 2]))?;
//! view.set(&[1, 1], 5)?;
//! ```

pub mod buffer;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod mirror;
pub mod registry;
pub mod request;
pub mod telemetry;
pub mod token;
pub mod view;

pub use buffer::ExportedBuffer;
pub use buffer::ExternalBuffer;
pub use buffer::export_buffer;
pub use catalog::Catalog;
pub use catalog::ConcreteViewTypeKey;
pub use catalog::ConstructorHandle;
pub use catalog::Rank;
pub use catalog::ViewType;
pub use config::Config;
pub use context::Context;
pub use context::ContextBuilder;
pub use error::Result;
pub use error::ViewError;
pub use memory::AllocError;
pub use memory::HostBackend;
pub use memory::MemoryBackend;
pub use memory::SimDeviceBackend;
pub use mirror::create_mirror;
pub use mirror::create_mirror_view;
pub use mirror::deep_copy;
pub use mirror::fill;
pub use ndslice::Order;
pub use registry::FeatureSet;
pub use registry::MAX_CONCRETE_RANK;
pub use request::ArrayArgs;
pub use request::ConstructionRequest;
pub use request::FirstArg;
pub use token::ElementType;
pub use token::ExecutionSpace;
pub use token::Layout;
pub use token::MemorySpace;
pub use token::MemoryTrait;
pub use token::Token;
pub use view::Scalar;
pub use view::Value;
pub use view::View;

/// Construct a view in the process-wide context.
pub fn array(first: impl Into<FirstArg>, args: ArrayArgs) -> Result<View> {
    context::global::active()?.array(first, args)
}

/// Wrap `buffer` without copying in the process-wide context.
pub fn unmanaged_array(buffer: ExternalBuffer, args: ArrayArgs) -> Result<View> {
    context::global::active()?.unmanaged_array(buffer, args)
}

/// Initialize the process-wide context with command-line style
/// arguments.
pub fn initialize<S: AsRef<str>>(args: &[S]) -> Result<()> {
    context::global::initialize(args).map(|_| ())
}

pub fn finalize() -> Result<()> {
    context::global::finalize()
}

pub fn is_initialized() -> bool {
    context::global::is_initialized()
}

pub fn is_finalized() -> bool {
    context::global::is_finalized()
}
