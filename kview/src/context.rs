/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The runtime context: lifecycle, feature set, memory backends and
//! the type catalog.
//!
//! A context moves through `Uninitialized -> Active -> Finalized`
//! exactly once. The catalog is built on `initialize`; every
//! construction, copy, export and element access checks that the
//! context is `Active` and fails with
//! [`ViewError::NotInitialized`] or [`ViewError::AlreadyFinalized`]
//! otherwise.

use std::collections::HashMap;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::OnceLock;

use parking_lot::Mutex;
use parking_lot::RwLock;

use crate::buffer;
use crate::buffer::ExternalBuffer;
use crate::catalog::Catalog;
use crate::catalog::ConcreteViewTypeKey;
use crate::catalog::ConstructorHandle;
use crate::config;
use crate::config::Config;
use crate::config::InitArgs;
use crate::error::Result;
use crate::error::ViewError;
use crate::memory::HostBackend;
use crate::memory::MemoryBackend;
use crate::memory::SimDeviceBackend;
use crate::registry::FeatureSet;
use crate::request;
use crate::request::ArrayArgs;
use crate::request::ConstructionRequest;
use crate::request::FirstArg;
use crate::telemetry;
use crate::token::MemorySpace;
use crate::token::MemoryTrait;
use crate::view::View;

const UNINITIALIZED: u8 = 0;
const ACTIVE: u8 = 1;
const FINALIZED: u8 = 2;

/// Lifecycle state shared by a context and every allocation made
/// under it.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
    live: AtomicUsize,
}

impl Lifecycle {
    pub(crate) fn ensure_active(&self) -> Result<()> {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => Ok(()),
            FINALIZED => Err(ViewError::AlreadyFinalized),
            _ => Err(ViewError::NotInitialized),
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) != UNINITIALIZED
    }

    pub(crate) fn is_finalized(&self) -> bool {
        self.state.load(Ordering::Acquire) == FINALIZED
    }

    pub(crate) fn acquire(&self) {
        self.live.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn release(&self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

/// An explicit runtime handle. Contexts are shared through `Arc`;
/// views keep their context alive.
#[derive(Debug)]
pub struct Context {
    lifecycle: Arc<Lifecycle>,
    features: FeatureSet,
    backends: HashMap<MemorySpace, Arc<dyn MemoryBackend>>,
    catalog: OnceLock<Catalog>,
    config: RwLock<Config>,
    transition: Mutex<()>,
}

impl Context {
    /// An uninitialized host-only context.
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Start the context. Known options in `args` override the
    /// configuration. Initializing an active context is a no-op;
    /// initializing a finalized one fails.
    pub fn initialize<S: AsRef<str>>(&self, args: &[S]) -> Result<()> {
        let _transition = self.transition.lock();
        match self.lifecycle.ensure_active() {
            Ok(()) => {
                tracing::debug!("kview is already initialized");
                return Ok(());
            }
            Err(ViewError::AlreadyFinalized) => return Err(ViewError::AlreadyFinalized),
            Err(_) => {}
        }

        let config = {
            let mut config = self.config.write();
            config::merge(&mut config, &InitArgs::parse_lenient(args).into_config());
            config.clone()
        };
        if config.debug_output() {
            telemetry::initialize_logging_with_default("info");
        }

        let catalog = self
            .catalog
            .get_or_init(|| Catalog::build(&self.features, config.debug_output()));
        self.lifecycle.state.store(ACTIVE, Ordering::Release);
        tracing::info!(
            "kview initialized: {} view types, default execution space {}, {} thread(s), device {}",
            catalog.len(),
            self.features.default_execution_space(),
            config.num_threads(),
            config.device_id(),
        );
        Ok(())
    }

    /// Stop the context. Outstanding transfers are fenced first.
    pub fn finalize(&self) -> Result<()> {
        let _transition = self.transition.lock();
        self.lifecycle.ensure_active()?;
        for backend in self.backends.values() {
            backend.fence();
        }
        self.lifecycle.state.store(FINALIZED, Ordering::Release);

        let live = self.lifecycle.live();
        if live > 0 && !self.config.read().disable_warnings() {
            tracing::warn!("kview finalized with {} live allocation(s)", live);
        }
        tracing::info!("kview finalized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle.is_initialized()
    }

    pub fn is_finalized(&self) -> bool {
        self.lifecycle.is_finalized()
    }

    /// Fails unless the context is active.
    pub fn ensure_active(&self) -> Result<()> {
        self.lifecycle.ensure_active()
    }

    /// Number of allocations (owned or borrowed) still referenced by
    /// some view or exported buffer.
    pub fn live_allocations(&self) -> usize {
        self.lifecycle.live()
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    /// The catalog of constructible view types.
    pub fn catalog(&self) -> Result<&Catalog> {
        self.ensure_active()?;
        self.catalog.get().ok_or(ViewError::NotInitialized)
    }

    /// Look up the constructor of a concrete view type.
    pub fn resolve(&self, key: &ConcreteViewTypeKey) -> Result<ConstructorHandle> {
        let handle = self.catalog()?.resolve(key)?;
        tracing::debug!("resolved {} to {}", key.description(), handle.name());
        Ok(handle)
    }

    /// The backend bound to `space`.
    pub fn backend(&self, space: MemorySpace) -> Result<Arc<dyn MemoryBackend>> {
        self.backends
            .get(&space)
            .cloned()
            .ok_or_else(|| ViewError::UnsupportedVariant {
                name: space.to_string(),
                max_rank: self.features.max_rank(),
            })
    }

    pub(crate) fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Construct a view from a polymorphic call: the first argument
    /// is a label, a shape or a buffer, refined by `args`.
    pub fn array(self: &Arc<Self>, first: impl Into<FirstArg>, args: ArrayArgs) -> Result<View> {
        self.ensure_active()?;
        let request = request::normalize(first.into(), args, self.features.max_rank())?;
        self.construct(request)
    }

    /// Construct an `Unmanaged` view over `buffer` without copying.
    pub fn unmanaged_array(self: &Arc<Self>, buffer: ExternalBuffer, args: ArrayArgs) -> Result<View> {
        self.ensure_active()?;
        let request = request::normalize_unmanaged(buffer, args, self.features.max_rank())?;
        self.construct(request)
    }

    // Construct a view from a normalized request. Owning traits copy a
    // source buffer; `Unmanaged` must have one.
    pub(crate) fn construct(self: &Arc<Self>, request: ConstructionRequest) -> Result<View> {
        let max_rank = self.features.max_rank();
        if request.shape.len() > max_rank {
            return Err(ViewError::RankExceeded {
                requested: request.shape.len(),
                max: max_rank,
            });
        }
        if request.memory_trait == MemoryTrait::Unmanaged && request.source.is_none() {
            return Err(ViewError::InvalidTraitUse {
                memory_trait: request.memory_trait,
                reason: "an Unmanaged view must wrap an existing buffer".to_string(),
            });
        }
        let handle = self.resolve(&request.key())?;
        let label = request
            .label
            .unwrap_or_else(|| handle.description().to_string());
        match request.source {
            None => View::allocate(self, handle, label, &request.shape),
            Some(source) if !request.memory_trait.owns_memory() => {
                buffer::import_buffer(self, handle, label, &request.shape, source)
            }
            Some(source) => buffer::copy_from_buffer(self, handle, label, &request.shape, source),
        }
    }
}

/// Configures a [`Context`] before it is initialized.
#[derive(Default)]
pub struct ContextBuilder {
    features: Option<FeatureSet>,
    backends: HashMap<MemorySpace, Arc<dyn MemoryBackend>>,
    config: Option<Config>,
}

impl ContextBuilder {
    pub fn features(mut self, features: FeatureSet) -> Self {
        self.features = Some(features);
        self
    }

    /// Bind `backend` to the space it reports.
    pub fn backend(mut self, backend: Arc<dyn MemoryBackend>) -> Self {
        self.backends.insert(backend.space(), backend);
        self
    }

    /// Start from `config` instead of the global configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the context. Enabled spaces without an explicit backend
    /// get the host allocator when host accessible and a simulated
    /// device otherwise.
    pub fn build(self) -> Arc<Context> {
        let features = self.features.unwrap_or_default();
        let mut backends = self.backends;
        for space in features.available::<MemorySpace>() {
            backends.entry(space).or_insert_with(|| {
                if space.host_accessible() {
                    Arc::new(HostBackend::for_space(space))
                } else {
                    tracing::debug!("binding simulated device backend to {}", space);
                    Arc::new(SimDeviceBackend::new(space))
                }
            });
        }
        Arc::new(Context {
            lifecycle: Arc::new(Lifecycle::default()),
            features,
            backends,
            catalog: OnceLock::new(),
            config: RwLock::new(self.config.unwrap_or_else(config::global::get)),
            transition: Mutex::new(()),
        })
    }
}

/// The process-wide context used by the Python bindings.
pub mod global {
    use std::sync::LazyLock;

    use super::*;

    static CONTEXT: LazyLock<RwLock<Option<Arc<Context>>>> = LazyLock::new(|| RwLock::new(None));

    /// Initialize the process-wide context, creating a default one if
    /// none was installed.
    pub fn initialize<S: AsRef<str>>(args: &[S]) -> Result<Arc<Context>> {
        let context = CONTEXT.write().get_or_insert_with(Context::new).clone();
        context.initialize(args)?;
        Ok(context)
    }

    /// The process-wide context.
    pub fn get() -> Result<Arc<Context>> {
        CONTEXT.read().clone().ok_or(ViewError::NotInitialized)
    }

    /// The process-wide context, if it is active.
    pub fn active() -> Result<Arc<Context>> {
        let context = get()?;
        context.ensure_active()?;
        Ok(context)
    }

    pub fn finalize() -> Result<()> {
        get()?.finalize()
    }

    pub fn is_initialized() -> bool {
        CONTEXT.read().as_ref().is_some_and(|c| c.is_initialized())
    }

    pub fn is_finalized() -> bool {
        CONTEXT.read().as_ref().is_some_and(|c| c.is_finalized())
    }

    /// Replace the process-wide context, returning the previous one.
    pub fn install(context: Arc<Context>) -> Option<Arc<Context>> {
        CONTEXT.write().replace(context)
    }
}

#[cfg(test)]
mod tests {
    use ndslice::Order;

    use super::*;
    use crate::request::RankMode;
    use crate::token::ElementType;
    use crate::token::ExecutionSpace;
    use crate::token::Layout;

    #[test]
    fn test_lifecycle() {
        let context = Context::new();
        assert!(!context.is_initialized());
        assert!(matches!(context.catalog(), Err(ViewError::NotInitialized)));
        assert!(matches!(context.finalize(), Err(ViewError::NotInitialized)));

        context.initialize::<&str>(&[]).unwrap();
        assert!(context.is_initialized());
        assert!(!context.is_finalized());
        // Idempotent.
        context.initialize::<&str>(&[]).unwrap();
        assert!(context.catalog().unwrap().len() > 0);

        context.finalize().unwrap();
        assert!(context.is_finalized());
        assert!(matches!(context.finalize(), Err(ViewError::AlreadyFinalized)));
        assert!(matches!(
            context.initialize::<&str>(&[]),
            Err(ViewError::AlreadyFinalized)
        ));
        assert!(matches!(context.catalog(), Err(ViewError::AlreadyFinalized)));
    }

    #[test]
    fn test_initialize_applies_args() {
        let context = Context::builder().config(Config::default()).build();
        context
            .initialize(&["--num-threads", "3", "--disable-warnings"])
            .unwrap();
        let config = context.config();
        assert_eq!(config.num_threads(), 3);
        assert!(config.disable_warnings());
    }

    #[test]
    fn test_backends_bound_per_space() {
        let context = Context::builder()
            .features(
                FeatureSet::builder()
                    .execution_space(ExecutionSpace::Cuda)
                    .build(),
            )
            .build();
        assert_eq!(
            context.backend(MemorySpace::HostSpace).unwrap().space(),
            MemorySpace::HostSpace
        );
        assert_eq!(
            context.backend(MemorySpace::CudaSpace).unwrap().space(),
            MemorySpace::CudaSpace
        );
        assert!(context.backend(MemorySpace::HIPSpace).is_err());
    }

    fn request(shape: Vec<usize>, memory_trait: MemoryTrait) -> ConstructionRequest {
        ConstructionRequest {
            shape,
            label: None,
            dtype: ElementType::Float64,
            space: MemorySpace::HostSpace,
            layout: Layout::LayoutRight,
            memory_trait,
            rank_mode: RankMode::Fixed,
            source: None,
        }
    }

    #[test]
    fn test_construct_rechecks_requests() {
        let context = Context::new();
        context.initialize::<&str>(&[]).unwrap();

        let mut oversized = request(vec![1 << 20], MemoryTrait::Unmanaged);
        oversized.source =
            Some(ExternalBuffer::from_vec(vec![1.0f64, 2.0], &[2], Order::RowMajor).unwrap());
        assert!(matches!(
            context.construct(oversized.clone()),
            Err(ViewError::ShapeMismatch { .. })
        ));
        oversized.memory_trait = MemoryTrait::Managed;
        assert!(matches!(
            context.construct(oversized),
            Err(ViewError::ShapeMismatch { .. })
        ));

        assert!(matches!(
            context.construct(request(vec![2], MemoryTrait::Unmanaged)),
            Err(ViewError::InvalidTraitUse {
                memory_trait: MemoryTrait::Unmanaged,
                ..
            })
        ));

        let mut dynamic = request(vec![1; 12], MemoryTrait::Managed);
        dynamic.rank_mode = RankMode::Dynamic;
        assert!(matches!(
            context.construct(dynamic),
            Err(ViewError::RankExceeded {
                requested: 12,
                max: 8
            })
        ));
        assert_eq!(context.live_allocations(), 0);
    }
}
