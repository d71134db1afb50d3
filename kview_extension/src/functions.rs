/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use kview::ArrayArgs;
use kview::ElementType;
use kview::ExecutionSpace;
use kview::FeatureSet;
use kview::FirstArg;
use kview::Layout;
use kview::MemorySpace;
use kview::MemoryTrait;
use kview::Token;
use kview::context::global;
use kview::registry::Feature;
use pyo3::exceptions::PyTypeError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3::types::PyInt;
use pyo3::types::PyList;
use pyo3::types::PyModule;
use pyo3::types::PyString;
use pyo3::types::PyTuple;

use crate::buffer;
use crate::convert::IntoPyResult;
use crate::convert::extract_optional_token;
use crate::convert::extract_token;
use crate::convert::extract_value;
use crate::view::PyView;

fn first_arg(first: &Bound<'_, PyAny>) -> PyResult<FirstArg> {
    if let Ok(text) = first.downcast::<PyString>() {
        return Ok(FirstArg::Text(text.to_str()?.to_string()));
    }
    if first.is_instance_of::<PyInt>() {
        return Ok(FirstArg::Integers(vec![first.extract()?]));
    }
    if first.is_instance_of::<PyList>() || first.is_instance_of::<PyTuple>() {
        return Ok(FirstArg::Integers(first.extract()?));
    }
    buffer::import(first).map(FirstArg::Buffer)
}

// Keywords shared by `array` and `unmanaged_array`. `trait` is a Rust
// keyword, so it arrives through `**kwargs`.
#[allow(clippy::too_many_arguments)]
fn array_args(
    shape: Option<Vec<usize>>,
    label: Option<String>,
    dtype: Option<&Bound<'_, PyAny>>,
    space: Option<&Bound<'_, PyAny>>,
    layout: Option<&Bound<'_, PyAny>>,
    dynamic: bool,
    order: Option<String>,
    kwargs: Option<&Bound<'_, PyDict>>,
) -> PyResult<ArrayArgs> {
    let mut memory_trait = None;
    if let Some(kwargs) = kwargs {
        for (key, value) in kwargs {
            match key.extract::<String>()?.as_str() {
                "trait" | "memory_trait" => {
                    memory_trait = Some(extract_token::<MemoryTrait>(&value)?);
                }
                other => {
                    return Err(PyTypeError::new_err(format!(
                        "unexpected keyword argument '{}'",
                        other
                    )));
                }
            }
        }
    }
    Ok(ArrayArgs {
        shape,
        label,
        dtype: extract_optional_token::<ElementType>(dtype)?,
        space: extract_optional_token::<MemorySpace>(space)?,
        layout: extract_optional_token::<Layout>(layout)?,
        memory_trait,
        dynamic,
        order,
    })
}

/// Construct a view. `first` is a label, a shape, or an object
/// supporting the buffer protocol.
#[pyfunction]
#[pyo3(signature = (first, shape=None, label=None, dtype=None, space=None, layout=None, dynamic=false, order=None, **kwargs))]
#[allow(clippy::too_many_arguments)]
fn array(
    first: &Bound<'_, PyAny>,
    shape: Option<Vec<usize>>,
    label: Option<String>,
    dtype: Option<&Bound<'_, PyAny>>,
    space: Option<&Bound<'_, PyAny>>,
    layout: Option<&Bound<'_, PyAny>>,
    dynamic: bool,
    order: Option<String>,
    kwargs: Option<&Bound<'_, PyDict>>,
) -> PyResult<PyView> {
    let args = array_args(shape, label, dtype, space, layout, dynamic, order, kwargs)?;
    let first = first_arg(first)?;
    kview::array(first, args).map(PyView::from).into_py_result()
}

/// Wrap `buffer` in an `Unmanaged` view without copying.
#[pyfunction]
#[pyo3(signature = (buffer, shape=None, label=None, dtype=None, space=None, layout=None, dynamic=false, order=None, **kwargs))]
#[allow(clippy::too_many_arguments)]
fn unmanaged_array(
    buffer: &Bound<'_, PyAny>,
    shape: Option<Vec<usize>>,
    label: Option<String>,
    dtype: Option<&Bound<'_, PyAny>>,
    space: Option<&Bound<'_, PyAny>>,
    layout: Option<&Bound<'_, PyAny>>,
    dynamic: bool,
    order: Option<String>,
    kwargs: Option<&Bound<'_, PyDict>>,
) -> PyResult<PyView> {
    let args = array_args(shape, label, dtype, space, layout, dynamic, order, kwargs)?;
    let buffer = buffer::import(buffer)?;
    kview::unmanaged_array(buffer, args)
        .map(PyView::from)
        .into_py_result()
}

#[pyfunction]
#[pyo3(signature = (view, copy=false))]
fn create_mirror(view: &PyView, copy: bool) -> PyResult<PyView> {
    kview::create_mirror(&view.inner, copy)
        .map(PyView::from)
        .into_py_result()
}

#[pyfunction]
#[pyo3(signature = (view, copy=false))]
fn create_mirror_view(view: &PyView, copy: bool) -> PyResult<PyView> {
    kview::create_mirror_view(&view.inner, copy)
        .map(PyView::from)
        .into_py_result()
}

/// Copy `src` into `dst`. A scalar `src` fills `dst`.
#[pyfunction]
fn deep_copy(dst: &PyView, src: &Bound<'_, PyAny>) -> PyResult<()> {
    if let Ok(src) = src.downcast::<PyView>() {
        return kview::deep_copy(&dst.inner, &src.get().inner).into_py_result();
    }
    kview::fill(&dst.inner, extract_value(src)?).into_py_result()
}

#[pyfunction]
fn fill(view: &PyView, value: &Bound<'_, PyAny>) -> PyResult<()> {
    kview::fill(&view.inner, extract_value(value)?).into_py_result()
}

/// Initialize the runtime. `args` are command-line style settings;
/// unknown ones are ignored.
#[pyfunction]
#[pyo3(signature = (args=None))]
fn initialize(args: Option<Vec<String>>) -> PyResult<()> {
    kview::initialize(&args.unwrap_or_default()).into_py_result()
}

#[pyfunction]
fn finalize() -> PyResult<()> {
    kview::finalize().into_py_result()
}

#[pyfunction]
fn is_initialized() -> bool {
    kview::is_initialized()
}

#[pyfunction]
fn is_finalized() -> bool {
    kview::is_finalized()
}

// The features of the process-wide context, or the defaults before
// one exists.
fn current_features() -> FeatureSet {
    global::get()
        .map(|context| context.features().clone())
        .unwrap_or_default()
}

fn labels<T: Token>() -> Vec<&'static str> {
    T::all().iter().map(|t| t.label()).collect()
}

fn available<T: Feature>() -> Vec<&'static str> {
    current_features().available::<T>().map(|t| t.label()).collect()
}

// Per token kind: the canonical label of one token, whether it is
// enabled, and the lists of all and of enabled tokens.
macro_rules! token_queries {
    ($token:ty, $get:ident, $get_available:ident, $list:ident, $list_available:ident) => {
        #[pyfunction]
        fn $get(x: &Bound<'_, PyAny>) -> PyResult<&'static str> {
            Ok(extract_token::<$token>(x)?.label())
        }

        #[pyfunction]
        fn $get_available(x: &Bound<'_, PyAny>) -> PyResult<bool> {
            Ok(current_features().is_available(extract_token::<$token>(x)?))
        }

        #[pyfunction]
        fn $list() -> Vec<&'static str> {
            labels::<$token>()
        }

        #[pyfunction]
        fn $list_available() -> Vec<&'static str> {
            available::<$token>()
        }
    };
}

token_queries!(
    ElementType,
    get_dtype,
    get_dtype_available,
    get_dtypes,
    get_dtypes_available
);
token_queries!(
    MemorySpace,
    get_memory_space,
    get_memory_space_available,
    get_memory_spaces,
    get_memory_spaces_available
);
token_queries!(
    Layout,
    get_layout,
    get_layout_available,
    get_layouts,
    get_layouts_available
);
token_queries!(
    MemoryTrait,
    get_memory_trait,
    get_memory_trait_available,
    get_memory_traits,
    get_memory_traits_available
);
token_queries!(
    ExecutionSpace,
    get_execution_space,
    get_execution_space_available,
    get_execution_spaces,
    get_execution_spaces_available
);

// A Python `IntEnum` whose members are the tokens of `T`, valued by
// index.
fn token_enum<'py, T: Token>(py: Python<'py>, name: &str) -> PyResult<Bound<'py, PyAny>> {
    let members: Vec<(&'static str, usize)> =
        T::all().iter().map(|t| (t.label(), t.index())).collect();
    py.import("enum")?.getattr("IntEnum")?.call1((name, members))
}

#[pyfunction]
fn get_host_accessible(space: &Bound<'_, PyAny>) -> PyResult<bool> {
    Ok(extract_token::<MemorySpace>(space)?.host_accessible())
}

#[pyfunction]
fn get_default_memory_space() -> &'static str {
    current_features().default_memory_space().label()
}

#[pyfunction]
fn get_default_execution_space() -> &'static str {
    current_features().default_execution_space().label()
}

/// The numpy name of a dtype token.
#[pyfunction]
fn convert_dtype(dtype: &Bound<'_, PyAny>) -> PyResult<&'static str> {
    Ok(extract_token::<ElementType>(dtype)?.numpy_name())
}

#[pyfunction]
fn max_concrete_rank() -> usize {
    current_features().max_rank()
}

/// JSON description of the enabled features.
#[pyfunction]
fn features() -> String {
    current_features().describe()
}

/// Names of every registered view type.
#[pyfunction]
fn registered_types() -> PyResult<Vec<String>> {
    let context = global::active().into_py_result()?;
    Ok(context.catalog().into_py_result()?.names())
}

pub fn register_python_bindings(module: &Bound<'_, PyModule>) -> PyResult<()> {
    let module = crate::python_registration::get_or_add_new_module(module, "kview")?;

    module.add_function(wrap_pyfunction!(array, &module)?)?;
    module.add_function(wrap_pyfunction!(unmanaged_array, &module)?)?;
    module.add_function(wrap_pyfunction!(create_mirror, &module)?)?;
    module.add_function(wrap_pyfunction!(create_mirror_view, &module)?)?;
    module.add_function(wrap_pyfunction!(deep_copy, &module)?)?;
    module.add_function(wrap_pyfunction!(fill, &module)?)?;
    module.add_function(wrap_pyfunction!(initialize, &module)?)?;
    module.add_function(wrap_pyfunction!(finalize, &module)?)?;
    module.add_function(wrap_pyfunction!(is_initialized, &module)?)?;
    module.add_function(wrap_pyfunction!(is_finalized, &module)?)?;
    module.add_function(wrap_pyfunction!(get_dtype, &module)?)?;
    module.add_function(wrap_pyfunction!(get_dtype_available, &module)?)?;
    module.add_function(wrap_pyfunction!(get_dtypes, &module)?)?;
    module.add_function(wrap_pyfunction!(get_dtypes_available, &module)?)?;
    module.add_function(wrap_pyfunction!(get_memory_space, &module)?)?;
    module.add_function(wrap_pyfunction!(get_memory_space_available, &module)?)?;
    module.add_function(wrap_pyfunction!(get_memory_spaces, &module)?)?;
    module.add_function(wrap_pyfunction!(get_memory_spaces_available, &module)?)?;
    module.add_function(wrap_pyfunction!(get_layout, &module)?)?;
    module.add_function(wrap_pyfunction!(get_layout_available, &module)?)?;
    module.add_function(wrap_pyfunction!(get_layouts, &module)?)?;
    module.add_function(wrap_pyfunction!(get_layouts_available, &module)?)?;
    module.add_function(wrap_pyfunction!(get_memory_trait, &module)?)?;
    module.add_function(wrap_pyfunction!(get_memory_trait_available, &module)?)?;
    module.add_function(wrap_pyfunction!(get_memory_traits, &module)?)?;
    module.add_function(wrap_pyfunction!(get_memory_traits_available, &module)?)?;
    module.add_function(wrap_pyfunction!(get_execution_space, &module)?)?;
    module.add_function(wrap_pyfunction!(get_execution_space_available, &module)?)?;
    module.add_function(wrap_pyfunction!(get_execution_spaces, &module)?)?;
    module.add_function(wrap_pyfunction!(get_execution_spaces_available, &module)?)?;
    module.add_function(wrap_pyfunction!(get_host_accessible, &module)?)?;
    module.add_function(wrap_pyfunction!(get_default_memory_space, &module)?)?;
    module.add_function(wrap_pyfunction!(get_default_execution_space, &module)?)?;
    module.add_function(wrap_pyfunction!(convert_dtype, &module)?)?;
    module.add_function(wrap_pyfunction!(max_concrete_rank, &module)?)?;
    module.add_function(wrap_pyfunction!(features, &module)?)?;
    module.add_function(wrap_pyfunction!(registered_types, &module)?)?;

    let py = module.py();
    module.add("dtype", token_enum::<ElementType>(py, "dtype")?)?;
    module.add("memory_space", token_enum::<MemorySpace>(py, "memory_space")?)?;
    module.add("layout", token_enum::<Layout>(py, "layout")?)?;
    module.add("memory_trait", token_enum::<MemoryTrait>(py, "memory_trait")?)?;
    module.add(
        "execution_space",
        token_enum::<ExecutionSpace>(py, "execution_space")?,
    )?;

    Ok(())
}
