/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

#![allow(unsafe_op_in_unsafe_fn)]

mod buffer;
mod convert;
mod functions;
mod python_registration;
mod view;

use pyo3::prelude::*;

#[pymodule]
#[pyo3(name = "_rust_bindings")]
pub fn mod_init(module: &Bound<'_, PyModule>) -> PyResult<()> {
    kview::telemetry::initialize_logging();

    view::register_python_bindings(module)?;
    functions::register_python_bindings(module)?;

    Ok(())
}
