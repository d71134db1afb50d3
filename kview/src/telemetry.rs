/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "KVIEW_LOG";

/// Install a formatting subscriber filtered by `KVIEW_LOG`, falling
/// back to `warn`. Safe to call more than once.
pub fn initialize_logging() {
    initialize_logging_with_default("warn");
}

/// Like [`initialize_logging`], with `default` as the filter when
/// `KVIEW_LOG` is unset or invalid.
pub fn initialize_logging_with_default(default: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
    {
        tracing::debug!("logging already initialized: {}", e);
    }
}
