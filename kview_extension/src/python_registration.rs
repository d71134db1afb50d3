/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use pyo3::prelude::*;
use pyo3::types::PyModule;

/// Fetch the dotted submodule `module_name` of `module`, creating any
/// missing parts. New submodules are also entered in `sys.modules` so
/// they import as if the extension were a package.
pub fn get_or_add_new_module<'py>(
    module: &Bound<'py, PyModule>,
    module_name: &str,
) -> PyResult<Bound<'py, PyModule>> {
    let mut current_module = module.clone();
    let mut parts = Vec::new();
    for part in module_name.split('.') {
        parts.push(part);
        if let Ok(submodule) = current_module.getattr(part) {
            current_module = submodule.downcast_into()?;
            continue;
        }
        let new_module = PyModule::new(current_module.py(), part)?;
        current_module.add_submodule(&new_module)?;
        current_module
            .py()
            .import("sys")?
            .getattr("modules")?
            .set_item(
                format!("kview._rust_bindings.{}", parts.join(".")),
                new_module.clone(),
            )?;
        current_module = new_module;
    }
    Ok(current_module)
}
