/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Conversions between Python objects and kview types.

use kview::Token;
use kview::Value;
use kview::ViewError;
use kview::token::resolve_index;
use kview::token::resolve_token;
use pyo3::IntoPyObjectExt;
use pyo3::exceptions::PyBufferError;
use pyo3::exceptions::PyIndexError;
use pyo3::exceptions::PyMemoryError;
use pyo3::exceptions::PyRuntimeError;
use pyo3::exceptions::PyTypeError;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyBool;
use pyo3::types::PyFloat;
use pyo3::types::PyInt;
use pyo3::types::PyString;

pub(crate) fn to_py_err(error: ViewError) -> PyErr {
    let message = error.to_string();
    match error {
        ViewError::TypeMismatch { .. } => PyTypeError::new_err(message),
        ViewError::Index(_) => PyIndexError::new_err(message),
        ViewError::NonContiguous { .. }
        | ViewError::UnsupportedFormat { .. }
        | ViewError::LayoutMismatch { .. }
        | ViewError::ReadOnly(_) => PyBufferError::new_err(message),
        ViewError::Allocation(_) => PyMemoryError::new_err(message),
        ViewError::SpaceNotHostAccessible(_)
        | ViewError::NotInitialized
        | ViewError::AlreadyFinalized => PyRuntimeError::new_err(message),
        _ => PyValueError::new_err(message),
    }
}

/// Lift a kview result into a Python result.
pub(crate) trait IntoPyResult<T> {
    fn into_py_result(self) -> PyResult<T>;
}

impl<T> IntoPyResult<T> for kview::Result<T> {
    fn into_py_result(self) -> PyResult<T> {
        self.map_err(to_py_err)
    }
}

/// Resolve a token given as its label, an alias, its index, or an
/// object naming it through `name` or `__name__` (numpy dtypes and
/// scalar types).
pub(crate) fn extract_token<T: Token>(value: &Bound<'_, PyAny>) -> PyResult<T> {
    if let Ok(index) = value.extract::<usize>() {
        return resolve_index(index).into_py_result();
    }
    if let Ok(text) = value.downcast::<PyString>() {
        return resolve_token(text.to_str()?).into_py_result();
    }
    for attr in ["name", "__name__"] {
        if let Ok(name) = value.getattr(attr).and_then(|n| n.extract::<String>()) {
            return resolve_token(&name).into_py_result();
        }
    }
    resolve_token(&value.str()?.to_string()).into_py_result()
}

pub(crate) fn extract_optional_token<T: Token>(
    value: Option<&Bound<'_, PyAny>>,
) -> PyResult<Option<T>> {
    value.map(|v| extract_token(v)).transpose()
}

/// An element index: an int or a sequence of ints.
pub(crate) fn extract_index(index: &Bound<'_, PyAny>) -> PyResult<Vec<usize>> {
    if let Ok(i) = index.extract::<usize>() {
        return Ok(vec![i]);
    }
    index
        .extract::<Vec<usize>>()
        .map_err(|_| PyIndexError::new_err("view indices must be non-negative integers"))
}

pub(crate) fn extract_value(value: &Bound<'_, PyAny>) -> PyResult<Value> {
    if let Ok(b) = value.downcast::<PyBool>() {
        return Ok(Value::Bool(b.is_true()));
    }
    if value.is_instance_of::<PyInt>() {
        if let Ok(i) = value.extract::<i64>() {
            return Ok(Value::Int(i));
        }
        return Ok(Value::UInt(value.extract::<u64>()?));
    }
    if value.is_instance_of::<PyFloat>() {
        return Ok(Value::Float(value.extract::<f64>()?));
    }
    // numpy scalars and other numbers.
    if let Ok(f) = value.extract::<f64>() {
        return Ok(Value::Float(f));
    }
    Err(PyTypeError::new_err(format!(
        "cannot store {} in a view",
        value.get_type().name()?
    )))
}

pub(crate) fn value_into_py(py: Python<'_>, value: Value) -> PyResult<PyObject> {
    match value {
        Value::Bool(b) => b.into_py_any(py),
        Value::Int(i) => i.into_py_any(py),
        Value::UInt(u) => u.into_py_any(py),
        Value::Float(f) => f.into_py_any(py),
    }
}
