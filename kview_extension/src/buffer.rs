/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The Python buffer protocol in both directions.

use std::ffi::CStr;
use std::ffi::CString;
use std::ffi::c_int;
use std::ffi::c_void;
use std::mem::MaybeUninit;
use std::ptr;
use std::ptr::NonNull;
use std::sync::Arc;

use kview::ExportedBuffer;
use kview::ExternalBuffer;
use kview::Order;
use pyo3::exceptions::PyBufferError;
use pyo3::ffi;
use pyo3::prelude::*;

use crate::convert::IntoPyResult;

// A buffer acquired from a Python exporter, released when the last
// view wrapping it drops.
struct ImportedBuffer {
    raw: Box<ffi::Py_buffer>,
}

// SAFETY: the Py_buffer is only released, under the GIL, on drop.
unsafe impl Send for ImportedBuffer {}
// SAFETY: as above; the struct is never read after construction.
unsafe impl Sync for ImportedBuffer {}

impl Drop for ImportedBuffer {
    fn drop(&mut self) {
        Python::with_gil(|_| {
            // SAFETY: `raw` was filled by a successful
            // PyObject_GetBuffer and is released exactly once.
            unsafe { ffi::PyBuffer_Release(&mut *self.raw) }
        });
    }
}

/// Acquire `object`'s buffer as an [`ExternalBuffer`]. An `order`
/// attribute of "C" or "F" on the object becomes its order hint.
pub(crate) fn import(object: &Bound<'_, PyAny>) -> PyResult<ExternalBuffer> {
    let py = object.py();
    let mut raw: Box<MaybeUninit<ffi::Py_buffer>> = Box::new(MaybeUninit::uninit());
    // SAFETY: `raw` is writable storage for one Py_buffer; the exporter
    // fills it on success.
    if unsafe { ffi::PyObject_GetBuffer(object.as_ptr(), raw.as_mut_ptr(), ffi::PyBUF_RECORDS_RO) }
        == -1
    {
        return Err(PyErr::fetch(py));
    }
    // SAFETY: initialized by the successful call above.
    let raw: Box<ffi::Py_buffer> = unsafe { Box::from_raw(Box::into_raw(raw).cast()) };
    let imported = ImportedBuffer { raw };
    let view = &*imported.raw;

    let ndim = usize::try_from(view.ndim).unwrap_or(0);
    // SAFETY: PyBUF_RECORDS_RO asks for shape and strides, which hold
    // `ndim` entries each.
    let (shape, strides) = unsafe {
        if ndim == 0 || view.shape.is_null() {
            (Vec::new(), Vec::new())
        } else {
            let shape = std::slice::from_raw_parts(view.shape, ndim);
            let strides = if view.strides.is_null() {
                Vec::new()
            } else {
                std::slice::from_raw_parts(view.strides, ndim).to_vec()
            };
            (shape.iter().map(|&s| s as usize).collect::<Vec<_>>(), strides)
        }
    };
    let strides = if strides.len() == shape.len() {
        strides
    } else {
        Order::RowMajor
            .strides(&shape)
            .into_iter()
            .map(|s| (s as isize) * view.itemsize)
            .collect()
    };
    let format = if view.format.is_null() {
        "B".to_string()
    } else {
        // SAFETY: a non-null format is a NUL-terminated string owned
        // by the exporter until release.
        unsafe { CStr::from_ptr(view.format) }
            .to_string_lossy()
            .into_owned()
    };
    let ptr = NonNull::new(view.buf.cast::<u8>()).unwrap_or(NonNull::dangling());
    let item_size = view.itemsize as usize;
    let readonly = view.readonly != 0;

    // SAFETY: the exporter guarantees the described memory stays
    // valid until PyBuffer_Release, which `ImportedBuffer` defers
    // until the last owner drops.
    let mut buffer = unsafe {
        ExternalBuffer::from_raw_parts(
            ptr,
            format,
            item_size,
            shape,
            strides,
            readonly,
            Arc::new(imported),
        )
    }
    .into_py_result()?;

    if let Ok(order) = object.getattr("order").and_then(|o| o.extract::<String>()) {
        if let Some(order) = Order::from_flag(&order) {
            buffer = buffer.with_order_hint(order);
        }
    }
    Ok(buffer)
}

// State behind an exported Py_buffer: the export keeps the allocation
// alive and owns the arrays the Py_buffer points into.
struct ExportState {
    exported: ExportedBuffer,
    format: CString,
    shape: Vec<ffi::Py_ssize_t>,
    strides: Vec<ffi::Py_ssize_t>,
}

fn has(flags: c_int, flag: c_int) -> bool {
    flags & flag == flag
}

/// Fill `view` from `exported`. `owner` is the Python object whose
/// reference the Py_buffer keeps.
///
/// # Safety
///
/// `view` must be a Py_buffer handed to `__getbuffer__`.
pub(crate) unsafe fn fill(
    view: *mut ffi::Py_buffer,
    flags: c_int,
    exported: ExportedBuffer,
    owner: Bound<'_, PyAny>,
) -> PyResult<()> {
    if view.is_null() {
        return Err(PyBufferError::new_err("Py_buffer is null"));
    }
    if has(flags, ffi::PyBUF_WRITABLE) && exported.readonly() {
        return Err(PyBufferError::new_err("view is read-only"));
    }
    let c_contiguous = exported.is_c_contiguous();
    let f_contiguous = exported.is_f_contiguous();
    if (has(flags, ffi::PyBUF_C_CONTIGUOUS) && !c_contiguous)
        || (has(flags, ffi::PyBUF_F_CONTIGUOUS) && !f_contiguous)
        || (has(flags, ffi::PyBUF_ANY_CONTIGUOUS) && !(c_contiguous || f_contiguous))
        || (!has(flags, ffi::PyBUF_STRIDES) && !c_contiguous)
    {
        return Err(PyBufferError::new_err(format!(
            "buffer with strides {:?} does not satisfy the requested contiguity",
            exported.strides()
        )));
    }

    let mut state = Box::new(ExportState {
        format: CString::new(exported.format())
            .map_err(|e| PyBufferError::new_err(e.to_string()))?,
        shape: exported.shape().iter().map(|&s| s as ffi::Py_ssize_t).collect(),
        strides: exported.strides().to_vec(),
        exported,
    });

    (*view).obj = owner.into_ptr();
    (*view).buf = state.exported.as_ptr().cast::<c_void>();
    (*view).len = state.exported.len() as ffi::Py_ssize_t;
    (*view).readonly = state.exported.readonly() as c_int;
    (*view).itemsize = state.exported.item_size() as ffi::Py_ssize_t;
    (*view).format = if has(flags, ffi::PyBUF_FORMAT) {
        state.format.as_ptr().cast_mut()
    } else {
        ptr::null_mut()
    };
    (*view).ndim = state.shape.len() as c_int;
    (*view).shape = if has(flags, ffi::PyBUF_ND) {
        state.shape.as_mut_ptr()
    } else {
        ptr::null_mut()
    };
    (*view).strides = if has(flags, ffi::PyBUF_STRIDES) {
        state.strides.as_mut_ptr()
    } else {
        ptr::null_mut()
    };
    (*view).suboffsets = ptr::null_mut();
    (*view).internal = Box::into_raw(state).cast::<c_void>();
    Ok(())
}

/// Undo [`fill`].
///
/// # Safety
///
/// `view` must have been filled by [`fill`] and not yet released.
pub(crate) unsafe fn release(view: *mut ffi::Py_buffer) {
    if !(*view).internal.is_null() {
        drop(Box::from_raw((*view).internal.cast::<ExportState>()));
        (*view).internal = ptr::null_mut();
    }
}
