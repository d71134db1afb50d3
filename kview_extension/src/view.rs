/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::ffi::c_int;

use kview::Token;
use kview::View;
use kview::export_buffer;
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::PyModule;

use crate::buffer;
use crate::convert::IntoPyResult;
use crate::convert::extract_index;
use crate::convert::extract_value;
use crate::convert::value_into_py;

#[pyclass(name = "View", module = "kview._rust_bindings.kview", frozen)]
pub struct PyView {
    pub(crate) inner: View,
}

impl From<View> for PyView {
    fn from(inner: View) -> Self {
        Self { inner }
    }
}

#[pymethods]
impl PyView {
    #[getter]
    fn shape(&self) -> Vec<usize> {
        self.inner.shape().to_vec()
    }

    /// Strides in elements.
    #[getter]
    fn strides(&self) -> Vec<usize> {
        self.inner.strides().to_vec()
    }

    #[getter]
    fn label(&self) -> String {
        self.inner.label().to_string()
    }

    #[getter]
    fn dtype(&self) -> &'static str {
        self.inner.dtype().numpy_name()
    }

    #[getter]
    fn space(&self) -> &'static str {
        self.inner.space().label()
    }

    #[getter]
    fn memory_space(&self) -> &'static str {
        self.space()
    }

    #[getter]
    fn layout(&self) -> &'static str {
        self.inner.layout().label()
    }

    #[getter]
    #[pyo3(name = "trait")]
    fn memory_trait_label(&self) -> &'static str {
        self.inner.memory_trait().label()
    }

    #[getter]
    fn memory_trait(&self) -> &'static str {
        self.memory_trait_label()
    }

    #[getter]
    fn dynamic(&self) -> bool {
        self.inner.is_dynamic()
    }

    #[getter]
    fn rank(&self) -> usize {
        self.inner.rank()
    }

    #[getter]
    fn size(&self) -> usize {
        self.inner.size()
    }

    #[getter]
    fn type_name(&self) -> String {
        self.inner.type_name().to_string()
    }

    fn __len__(&self) -> usize {
        self.inner.shape().first().copied().unwrap_or(0)
    }

    fn __getitem__(&self, py: Python<'_>, index: &Bound<'_, PyAny>) -> PyResult<PyObject> {
        let value = self.inner.get(&extract_index(index)?).into_py_result()?;
        value_into_py(py, value)
    }

    fn __setitem__(&self, index: &Bound<'_, PyAny>, value: &Bound<'_, PyAny>) -> PyResult<()> {
        self.inner
            .set(&extract_index(index)?, extract_value(value)?)
            .into_py_result()
    }

    /// Add to an element of an Atomic view, returning the previous
    /// value.
    fn fetch_add(
        &self,
        py: Python<'_>,
        index: &Bound<'_, PyAny>,
        value: &Bound<'_, PyAny>,
    ) -> PyResult<PyObject> {
        let previous = self
            .inner
            .fetch_add(&extract_index(index)?, extract_value(value)?)
            .into_py_result()?;
        value_into_py(py, previous)
    }

    fn fetch_sub(
        &self,
        py: Python<'_>,
        index: &Bound<'_, PyAny>,
        value: &Bound<'_, PyAny>,
    ) -> PyResult<PyObject> {
        let previous = self
            .inner
            .fetch_sub(&extract_index(index)?, extract_value(value)?)
            .into_py_result()?;
        value_into_py(py, previous)
    }

    fn inc(&self, index: &Bound<'_, PyAny>) -> PyResult<()> {
        self.inner.inc(&extract_index(index)?).into_py_result()
    }

    fn dec(&self, index: &Bound<'_, PyAny>) -> PyResult<()> {
        self.inner.dec(&extract_index(index)?).into_py_result()
    }

    fn __repr__(&self) -> String {
        self.inner.to_string()
    }

    #[pyo3(signature = (copy=false))]
    fn create_mirror(&self, copy: bool) -> PyResult<PyView> {
        kview::create_mirror(&self.inner, copy)
            .map(PyView::from)
            .into_py_result()
    }

    #[pyo3(signature = (copy=false))]
    fn create_mirror_view(&self, copy: bool) -> PyResult<PyView> {
        kview::create_mirror_view(&self.inner, copy)
            .map(PyView::from)
            .into_py_result()
    }

    /// Every element, in row-major order.
    fn tolist(&self, py: Python<'_>) -> PyResult<Vec<PyObject>> {
        let rank = self.inner.rank();
        let mut index = vec![0usize; rank];
        let mut values = Vec::with_capacity(self.inner.size());
        if self.inner.size() == 0 {
            return Ok(values);
        }
        loop {
            values.push(value_into_py(py, self.inner.get(&index).into_py_result()?)?);
            let mut dim = rank;
            loop {
                if dim == 0 {
                    return Ok(values);
                }
                dim -= 1;
                index[dim] += 1;
                if index[dim] < self.inner.shape()[dim] {
                    break;
                }
                index[dim] = 0;
            }
        }
    }

    unsafe fn __getbuffer__(
        slf: Bound<'_, Self>,
        view: *mut ffi::Py_buffer,
        flags: c_int,
    ) -> PyResult<()> {
        let exported = export_buffer(&slf.get().inner).into_py_result()?;
        buffer::fill(view, flags, exported, slf.into_any())
    }

    unsafe fn __releasebuffer__(&self, view: *mut ffi::Py_buffer) {
        buffer::release(view)
    }
}

pub fn register_python_bindings(module: &Bound<'_, PyModule>) -> PyResult<()> {
    let module = crate::python_registration::get_or_add_new_module(module, "kview")?;
    module.add_class::<PyView>()?;
    Ok(())
}
