/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Arc;

use indoc::indoc;
use kview::ArrayArgs;
use kview::ConcreteViewTypeKey;
use kview::Context;
use kview::ElementType;
use kview::ExternalBuffer;
use kview::FeatureSet;
use kview::Layout;
use kview::MemorySpace;
use kview::MemoryTrait;
use kview::Order;
use kview::Rank;
use kview::SimDeviceBackend;
use kview::Token;
use kview::Value;
use kview::View;
use kview::ViewError;
use kview::create_mirror;
use kview::create_mirror_view;
use kview::deep_copy;
use kview::export_buffer;
use proptest::prelude::*;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;

fn context() -> Arc<Context> {
    let context = Context::new();
    context.initialize::<&str>(&[]).unwrap();
    context
}

fn device_context() -> Arc<Context> {
    let context = Context::builder()
        .features(
            FeatureSet::builder()
                .memory_space(MemorySpace::CudaSpace)
                .build(),
        )
        .build();
    context.initialize::<&str>(&[]).unwrap();
    context
}

fn zeros(dtype: ElementType, shape: &[usize], order: Order) -> ExternalBuffer {
    let len = shape.iter().product();
    match dtype {
        ElementType::Int8 => ExternalBuffer::from_vec(vec![0i8; len], shape, order),
        ElementType::Int16 => ExternalBuffer::from_vec(vec![0i16; len], shape, order),
        ElementType::Int32 => ExternalBuffer::from_vec(vec![0i32; len], shape, order),
        ElementType::Int64 => ExternalBuffer::from_vec(vec![0i64; len], shape, order),
        ElementType::Uint8 => ExternalBuffer::from_vec(vec![0u8; len], shape, order),
        ElementType::Uint16 => ExternalBuffer::from_vec(vec![0u16; len], shape, order),
        ElementType::Uint32 => ExternalBuffer::from_vec(vec![0u32; len], shape, order),
        ElementType::Uint64 => ExternalBuffer::from_vec(vec![0u64; len], shape, order),
        ElementType::Float32 => ExternalBuffer::from_vec(vec![0f32; len], shape, order),
        ElementType::Float64 => ExternalBuffer::from_vec(vec![0f64; len], shape, order),
        ElementType::Bool => ExternalBuffer::from_vec(vec![false; len], shape, order),
    }
    .unwrap()
}

// Every coordinate of `shape` in row-major order.
fn indices(shape: &[usize]) -> Vec<Vec<usize>> {
    let mut all = vec![Vec::new()];
    for &extent in shape {
        all = all
            .into_iter()
            .flat_map(|prefix| {
                (0..extent).map(move |i| {
                    let mut index = prefix.clone();
                    index.push(i);
                    index
                })
            })
            .collect();
    }
    all
}

fn random_value(dtype: ElementType, rng: &mut SmallRng) -> Value {
    match dtype {
        ElementType::Bool => Value::Int(rng.gen_range(0..3)),
        dtype if dtype.is_float() => Value::Float(rng.gen_range(-400..400) as f64 / 4.0),
        dtype if dtype.is_signed() => Value::Int(rng.gen_range(-100..100)),
        _ => Value::UInt(rng.gen_range(0..200)),
    }
}

fn assert_same_elements(a: &View, b: &View) {
    assert_eq!(a.shape(), b.shape());
    for index in indices(a.shape()) {
        assert_eq!(a.get(&index).unwrap(), b.get(&index).unwrap(), "at {:?}", index);
    }
}

#[test]
fn test_every_registered_variant_reports_its_tokens() {
    let context = context();
    let catalog = context.catalog().unwrap();
    assert_eq!(catalog.len(), 11 * 2 * 5 * 9);
    for name in catalog.names() {
        let handle = catalog.lookup(&name).unwrap();
        let key = *handle.key();
        let (shape, dynamic) = match key.rank {
            Rank::Fixed(rank) => (vec![1; rank], false),
            Rank::Dynamic => (vec![2, 3], true),
        };
        let args = ArrayArgs::default()
            .label(name.clone())
            .space(key.space)
            .layout(key.layout)
            .dynamic(dynamic);
        let view = if key.memory_trait == MemoryTrait::Unmanaged {
            let order = key.layout.order().unwrap();
            context.unmanaged_array(zeros(key.dtype, &shape, order), args)
        } else {
            context.array(
                shape.clone(),
                args.dtype(key.dtype).memory_trait(key.memory_trait),
            )
        }
        .unwrap();
        assert_eq!(view.type_name(), name);
        assert_eq!(view.dtype(), key.dtype);
        assert_eq!(view.space(), key.space);
        assert_eq!(view.layout(), key.layout);
        assert_eq!(view.memory_trait(), key.memory_trait);
        assert_eq!(view.rank(), shape.len());
        assert_eq!(view.is_dynamic(), key.rank == Rank::Dynamic);
        assert_eq!(view.shape(), shape.as_slice());
    }
}

#[test]
fn test_canonical_names() {
    let key = ConcreteViewTypeKey {
        dtype: ElementType::Float64,
        space: MemorySpace::HostSpace,
        layout: Layout::LayoutLeft,
        memory_trait: MemoryTrait::Unmanaged,
        rank: Rank::Fixed(2),
    };
    assert_eq!(key.canonical_name(), "View_float64_HostSpace_LayoutLeft_Unmanaged_2");
    assert_eq!(
        key.description(),
        "View<float64**, LayoutLeft, HostSpace, Unmanaged>"
    );
    let dynamic = ConcreteViewTypeKey {
        layout: Layout::LayoutRight,
        memory_trait: MemoryTrait::Managed,
        rank: Rank::Dynamic,
        ..key
    };
    assert_eq!(dynamic.canonical_name(), "DynRankView_float64_HostSpace");
}

#[test]
fn test_rank_limits() {
    let context = context();
    assert!(matches!(
        context.array(vec![1; 9], ArrayArgs::default()),
        Err(ViewError::RankExceeded {
            requested: 9,
            max: 8
        })
    ));
    assert!(context.array(vec![1; 8], ArrayArgs::default()).is_ok());

    let limited = Context::builder()
        .features(FeatureSet::builder().max_rank(3).build())
        .build();
    limited.initialize::<&str>(&[]).unwrap();
    assert!(matches!(
        limited.array(vec![1; 4], ArrayArgs::default()),
        Err(ViewError::RankExceeded {
            requested: 4,
            max: 3
        })
    ));
}

#[test]
fn test_unsupported_variant_names_the_combination() {
    let context = context();
    match context.array(vec![4], ArrayArgs::default().space(MemorySpace::CudaSpace)) {
        Err(ViewError::UnsupportedVariant { name, max_rank }) => {
            assert_eq!(name, "View_float64_CudaSpace_1");
            assert_eq!(max_rank, 8);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_unknown_tokens() {
    assert!(matches!(
        "float128".parse::<ElementType>(),
        Err(ViewError::UnknownToken { kind: "dtype", .. })
    ));
    assert!(matches!(
        "LayoutDiagonal".parse::<Layout>(),
        Err(ViewError::UnknownToken { kind: "layout", .. })
    ));
    assert_eq!("double".parse::<ElementType>().unwrap(), ElementType::Float64);
    assert_eq!("F".parse::<Layout>().unwrap(), Layout::LayoutLeft);
    assert_eq!(MemorySpace::all().len(), 11);
}

#[test]
fn test_int32_scenario() {
    let context = context();
    let view = context
        .array(
            "a",
            ArrayArgs::default()
                .shape([2, 2])
                .dtype(ElementType::Int32),
        )
        .unwrap();
    assert_eq!(view.type_name(), "View_int32_HostSpace_2");
    view.set(&[1, 1], 5).unwrap();

    let exported = export_buffer(&view).unwrap();
    assert_eq!(exported.format(), "i");
    assert_eq!(exported.item_size(), 4);
    assert_eq!(exported.shape(), &[2, 2]);
    assert_eq!(exported.strides(), &[8, 4]);
    // SAFETY: (1, 1) lies 12 bytes into the exported memory.
    let value = unsafe { exported.as_ptr().add(12).cast::<i32>().read_unaligned() };
    assert_eq!(value, 5);
}

#[test]
fn test_export_import_aliases_memory() {
    let context = context();
    let view = context
        .array(vec![3, 4], ArrayArgs::default().layout(Layout::LayoutLeft))
        .unwrap();
    let imported = context
        .unmanaged_array(export_buffer(&view).unwrap().into(), ArrayArgs::default())
        .unwrap();
    assert_eq!(imported.layout(), Layout::LayoutLeft);
    assert_eq!(imported.memory_trait(), MemoryTrait::Unmanaged);
    assert_eq!(imported.as_ptr(), view.as_ptr());

    imported.set(&[2, 3], 1.25).unwrap();
    assert_eq!(view.get_as::<f64>(&[2, 3]).unwrap(), 1.25);
    view.set(&[0, 1], -4.0).unwrap();
    assert_eq!(imported.get_as::<f64>(&[0, 1]).unwrap(), -4.0);

    // The import alone keeps the original allocation alive.
    drop(view);
    assert_eq!(imported.get_as::<f64>(&[2, 3]).unwrap(), 1.25);
}

#[test]
fn test_order_hint_against_explicit_layout() {
    let context = context();
    let hinted = ExternalBuffer::from_vec(vec![1i64, 2, 3, 4], &[4], Order::RowMajor)
        .unwrap()
        .with_order_hint(Order::ColumnMajor);
    let inferred = context
        .unmanaged_array(hinted.clone(), ArrayArgs::default())
        .unwrap();
    assert_eq!(inferred.layout(), Layout::LayoutLeft);
    let explicit = context
        .unmanaged_array(hinted, ArrayArgs::default().layout(Layout::LayoutRight))
        .unwrap();
    assert_eq!(explicit.layout(), Layout::LayoutRight);
    assert_eq!(explicit.to_vec::<i64>().unwrap(), vec![1, 2, 3, 4]);

    let f = ExternalBuffer::from_vec((0..6).map(|i| i as f32).collect(), &[2, 3], Order::ColumnMajor)
        .unwrap()
        .with_order_hint(Order::ColumnMajor);
    assert!(matches!(
        context.unmanaged_array(f.clone(), ArrayArgs::default().layout(Layout::LayoutRight)),
        Err(ViewError::LayoutMismatch { .. })
    ));
    let copied = context
        .array(f.clone(), ArrayArgs::default().layout(Layout::LayoutRight))
        .unwrap();
    let wrapped = context.unmanaged_array(f, ArrayArgs::default()).unwrap();
    assert_same_elements(&copied, &wrapped);
    assert_ne!(copied.as_ptr(), wrapped.as_ptr());
}

#[test]
fn test_cross_space_copies_are_fenced() {
    let device = Arc::new(SimDeviceBackend::new(MemorySpace::CudaSpace));
    let context = Context::builder()
        .features(
            FeatureSet::builder()
                .memory_space(MemorySpace::CudaSpace)
                .build(),
        )
        .backend(device.clone())
        .build();
    context.initialize::<&str>(&[]).unwrap();

    let remote = context
        .array(
            vec![2, 3],
            ArrayArgs::default()
                .dtype(ElementType::Int32)
                .space(MemorySpace::CudaSpace),
        )
        .unwrap();
    let start = device.stats();
    assert_eq!(start.allocations, 1);

    // An uncopied mirror never touches the device.
    let host = create_mirror(&remote, false).unwrap();
    assert_eq!(device.stats(), start);

    host.set(&[1, 2], 7).unwrap();
    deep_copy(&remote, &host).unwrap();
    let uploaded = device.stats();
    assert_eq!(uploaded.bytes_from_host, start.bytes_from_host + 24);
    assert!(uploaded.fences > start.fences);

    let back = create_mirror(&remote, true).unwrap();
    let downloaded = device.stats();
    assert!(downloaded.bytes_to_host > uploaded.bytes_to_host);
    assert!(downloaded.fences > uploaded.fences);
    assert_eq!(back.get_as::<i32>(&[1, 2]).unwrap(), 7);
    assert_eq!(downloaded.allocations, 1);

    drop(remote);
    assert_eq!(device.stats().deallocations, 1);
}

#[test]
fn test_device_views_need_a_mirror() {
    let context = device_context();
    let device = context
        .array(vec![2, 2], ArrayArgs::default().space(MemorySpace::CudaSpace))
        .unwrap();
    assert!(matches!(
        export_buffer(&device),
        Err(ViewError::SpaceNotHostAccessible(MemorySpace::CudaSpace))
    ));
    assert!(matches!(
        device.set(&[0, 0], 1.0),
        Err(ViewError::SpaceNotHostAccessible(_))
    ));

    let host = create_mirror_view(&device, true).unwrap();
    assert!(!host.is_alias_of(&device));
    host.set(&[1, 0], 3.0).unwrap();
    deep_copy(&device, &host).unwrap();
    let exported = export_buffer(&create_mirror(&device, true).unwrap()).unwrap();
    assert_eq!(exported.shape(), &[2, 2]);
    // SAFETY: (1, 0) lies 16 bytes into the exported memory.
    let value = unsafe { exported.as_ptr().add(16).cast::<f64>().read_unaligned() };
    assert_eq!(value, 3.0);
}

#[test]
fn test_mirror_view_of_host_view_is_an_alias() {
    let context = context();
    let view = context.array(vec![5], ArrayArgs::default()).unwrap();
    let mirror = create_mirror_view(&view, false).unwrap();
    assert!(mirror.is_alias_of(&view));
    mirror.set(&[4], 8.0).unwrap();
    assert_eq!(view.get_as::<f64>(&[4]).unwrap(), 8.0);

    let fresh = create_mirror(&view, false).unwrap();
    assert!(!fresh.is_alias_of(&view));
    assert_eq!(fresh.label(), format!("{}_mirror", view.label()));
}

#[test]
fn test_deep_copy_every_dtype() {
    let context = context();
    let mut rng = SmallRng::seed_from_u64(0x6b76);
    for &dtype in ElementType::all() {
        let src = context
            .array(vec![3, 4], ArrayArgs::default().dtype(dtype))
            .unwrap();
        let dst = context
            .array(
                vec![3, 4],
                ArrayArgs::default()
                    .dtype(dtype)
                    .layout(Layout::LayoutLeft),
            )
            .unwrap();
        for index in indices(src.shape()) {
            src.set(&index, random_value(dtype, &mut rng)).unwrap();
        }
        deep_copy(&dst, &src).unwrap();
        assert_same_elements(&dst, &src);

        let wrong = context
            .array(vec![4, 3], ArrayArgs::default().dtype(dtype))
            .unwrap();
        assert!(matches!(
            deep_copy(&wrong, &src),
            Err(ViewError::ShapeMismatch { .. })
        ));
    }
}

#[test]
fn test_bool_truthiness() {
    let context = context();
    let src = context
        .array(vec![4], ArrayArgs::default().dtype(ElementType::Int16))
        .unwrap();
    for (i, value) in [0i16, 1, 7, 0].into_iter().enumerate() {
        src.set(&[i], value).unwrap();
    }
    let dst = context
        .array(vec![4], ArrayArgs::default().dtype(ElementType::Bool))
        .unwrap();
    deep_copy(&dst, &src).unwrap();
    assert_eq!(dst.to_vec::<bool>().unwrap(), vec![false, true, true, false]);
}

#[test]
fn test_lifecycle_guards() {
    let context = Context::new();
    assert!(matches!(
        context.array(vec![2], ArrayArgs::default()),
        Err(ViewError::NotInitialized)
    ));
    context.initialize(&["--kokkos-num-threads=2"]).unwrap();
    assert_eq!(context.config().num_threads(), 2);
    let view = context.array(vec![2], ArrayArgs::default()).unwrap();
    context.finalize().unwrap();
    assert!(matches!(view.get(&[0]), Err(ViewError::AlreadyFinalized)));
    assert!(matches!(
        create_mirror(&view, true),
        Err(ViewError::AlreadyFinalized)
    ));
    assert!(matches!(
        context.array(vec![2], ArrayArgs::default()),
        Err(ViewError::AlreadyFinalized)
    ));
}

#[test]
fn test_process_wide_context() {
    kview::initialize(&["--disable-warnings"]).unwrap();
    assert!(kview::is_initialized());
    let view = kview::array("g", ArrayArgs::default().shape([2])).unwrap();
    assert_eq!(view.label(), "g");
    kview::finalize().unwrap();
    assert!(kview::is_finalized());
    assert!(matches!(
        kview::array("h", ArrayArgs::default().shape([2])),
        Err(ViewError::AlreadyFinalized)
    ));
}

#[test]
fn test_describe_features() {
    let features = FeatureSet::builder()
        .dtypes([ElementType::Int32, ElementType::Bool])
        .build();
    let described: serde_json::Value = serde_json::from_str(&features.describe()).unwrap();
    let expected: serde_json::Value = serde_json::from_str(indoc! {r#"
        {
            "dtypes": ["int32", "bool"],
            "memory_spaces": ["HostSpace"],
            "layouts": ["LayoutRight", "LayoutLeft"],
            "memory_traits": ["Managed", "Unmanaged", "Atomic", "RandomAccess", "Restrict"],
            "execution_spaces": ["Serial"],
            "default_execution_space": "Serial",
            "max_rank": 8
        }
    "#})
    .unwrap();
    assert_eq!(described, expected);
}

proptest! {
    #[test]
    fn prop_mirror_copy_matches_source(
        shape in prop::collection::vec(1usize..4, 1..4),
        left in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let context = device_context();
        let layout = if left { Layout::LayoutLeft } else { Layout::LayoutRight };
        let host = context
            .array(shape.clone(), ArrayArgs::default().layout(layout).dtype(ElementType::Int32))
            .unwrap();
        let mut rng = SmallRng::seed_from_u64(seed);
        for index in indices(&shape) {
            host.set(&index, random_value(ElementType::Int32, &mut rng)).unwrap();
        }
        let device = context
            .array(
                shape.clone(),
                ArrayArgs::default()
                    .space(MemorySpace::CudaSpace)
                    .dtype(ElementType::Int32),
            )
            .unwrap();
        deep_copy(&device, &host).unwrap();
        let mirror = create_mirror(&device, true).unwrap();
        prop_assert_eq!(mirror.layout(), Layout::LayoutRight);
        for index in indices(&shape) {
            prop_assert_eq!(mirror.get(&index).unwrap(), host.get(&index).unwrap());
        }
    }

    #[test]
    fn prop_exported_strides_match_layout(
        shape in prop::collection::vec(1usize..5, 1..5),
        left in any::<bool>(),
    ) {
        let context = context();
        let layout = if left { Layout::LayoutLeft } else { Layout::LayoutRight };
        let view = context
            .array(shape.clone(), ArrayArgs::default().layout(layout).dtype(ElementType::Uint16))
            .unwrap();
        let exported = export_buffer(&view).unwrap();
        prop_assert_eq!(exported.len(), shape.iter().product::<usize>() * 2);
        if left {
            prop_assert!(exported.is_f_contiguous());
        } else {
            prop_assert!(exported.is_c_contiguous());
        }
        let roundtrip = context
            .unmanaged_array(exported.into(), ArrayArgs::default())
            .unwrap();
        prop_assert_eq!(roundtrip.shape(), view.shape());
        prop_assert_eq!(roundtrip.as_ptr(), view.as_ptr());
        for (i, index) in indices(&shape).into_iter().enumerate() {
            view.set(&index, i as u16).unwrap();
        }
        prop_assert_eq!(roundtrip.to_vec::<u16>().unwrap(), view.to_vec::<u16>().unwrap());
    }
}
