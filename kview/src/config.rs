/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Configuration for kview.
//!
//! Settings come from three places, later ones taking precedence:
//! defaults, `KVIEW_*` environment variables, and the argument list
//! passed to `initialize`. Unset fields fall back to their defaults
//! through the getters on [`Config`].

use std::env;

use clap::Parser;
use serde::Deserialize;
use serde::Serialize;

/// Environment variable enabling registration output.
pub const DEBUG_OUTPUT_ENV: &str = "KVIEW_DEBUG_OUTPUT";
/// Environment variable setting the host thread count.
pub const NUM_THREADS_ENV: &str = "KVIEW_NUM_THREADS";
/// Environment variable selecting the device.
pub const DEVICE_ID_ENV: &str = "KVIEW_DEVICE_ID";
/// Environment variable silencing warnings.
pub const DISABLE_WARNINGS_ENV: &str = "KVIEW_DISABLE_WARNINGS";

/// Runtime settings. `None` means "not set here".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub debug_output: Option<bool>,
    pub num_threads: Option<usize>,
    pub device_id: Option<usize>,
    pub disable_warnings: Option<bool>,
}

impl Config {
    /// Whether each registered view type is logged.
    pub fn debug_output(&self) -> bool {
        self.debug_output.unwrap_or(false)
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads.unwrap_or(1)
    }

    pub fn device_id(&self) -> usize {
        self.device_id.unwrap_or(0)
    }

    pub fn disable_warnings(&self) -> bool {
        self.disable_warnings.unwrap_or(false)
    }
}

/// Parse a boolean setting. Accepts `on`/`true`/`yes`/`1` and
/// `off`/`false`/`no`/`0`, ignoring case; anything else is `None`.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Load configuration from environment variables
pub fn from_env() -> Config {
    from_lookup(|name| env::var(name).ok())
}

/// Load configuration from `KVIEW_*` variables resolved by `lookup`.
pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Config {
    let mut config = Config::default();

    if let Some(val) = lookup(DEBUG_OUTPUT_ENV) {
        config.debug_output = parse_flag(&val);
    }
    if let Some(val) = lookup(NUM_THREADS_ENV) {
        config.num_threads = val.trim().parse().ok();
    }
    if let Some(val) = lookup(DEVICE_ID_ENV) {
        config.device_id = val.trim().parse().ok();
    }
    if let Some(val) = lookup(DISABLE_WARNINGS_ENV) {
        config.disable_warnings = parse_flag(&val);
    }

    config
}

/// Merge with another configuration, with the other taking precedence
pub fn merge(config: &mut Config, other: &Config) {
    if other.debug_output.is_some() {
        config.debug_output = other.debug_output;
    }
    if other.num_threads.is_some() {
        config.num_threads = other.num_threads;
    }
    if other.device_id.is_some() {
        config.device_id = other.device_id;
    }
    if other.disable_warnings.is_some() {
        config.disable_warnings = other.disable_warnings;
    }
}

/// Arguments accepted by `initialize`. Arguments this parser does not
/// know are dropped before parsing, so a full program argv may be
/// passed through.
#[derive(Parser, Debug, Default, PartialEq, Eq)]
#[command(name = "kview", no_binary_name = true, disable_help_flag = true)]
pub struct InitArgs {
    /// Number of host threads.
    #[arg(long, alias = "kokkos-num-threads", alias = "threads")]
    pub num_threads: Option<usize>,

    /// Device to bind.
    #[arg(long, alias = "kokkos-device-id")]
    pub device_id: Option<usize>,

    /// Silence warnings.
    #[arg(long, alias = "kokkos-disable-warnings")]
    pub disable_warnings: bool,

    /// Log every registered view type.
    #[arg(long)]
    pub debug_output: bool,
}

const VALUE_FLAGS: &[&str] = &[
    "num-threads",
    "kokkos-num-threads",
    "threads",
    "device-id",
    "kokkos-device-id",
];
const SWITCH_FLAGS: &[&str] = &["disable-warnings", "kokkos-disable-warnings", "debug-output"];

impl InitArgs {
    /// Parse the known arguments out of `args`, ignoring the rest.
    /// Malformed values are logged and leave the defaults in place.
    pub fn parse_lenient<S: AsRef<str>>(args: &[S]) -> Self {
        let mut known = Vec::new();
        let mut iter = args.iter().map(AsRef::as_ref);
        while let Some(arg) = iter.next() {
            let Some(flag) = arg.strip_prefix("--") else {
                continue;
            };
            let name = flag.split('=').next().unwrap_or(flag);
            if SWITCH_FLAGS.contains(&name) {
                known.push(arg.to_string());
            } else if VALUE_FLAGS.contains(&name) {
                known.push(arg.to_string());
                if !flag.contains('=') {
                    if let Some(value) = iter.next() {
                        known.push(value.to_string());
                    }
                }
            }
        }
        match InitArgs::try_parse_from(&known) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("ignoring malformed initialize arguments {:?}: {}", known, e);
                InitArgs::default()
            }
        }
    }

    /// The settings given explicitly on the command line.
    pub fn into_config(self) -> Config {
        Config {
            debug_output: self.debug_output.then_some(true),
            num_threads: self.num_threads,
            device_id: self.device_id,
            disable_warnings: self.disable_warnings.then_some(true),
        }
    }
}

/// Global configuration functions
pub mod global {
    use std::sync::Arc;
    use std::sync::LazyLock;

    use parking_lot::Mutex;
    use parking_lot::MutexGuard;
    use parking_lot::RwLock;

    use super::*;

    /// Global configuration instance, initialized from environment variables.
    static CONFIG: LazyLock<Arc<RwLock<Config>>> =
        LazyLock::new(|| Arc::new(RwLock::new(from_env())));

    static TEST_LOCK: Mutex<()> = Mutex::new(());

    /// A snapshot of the global configuration.
    pub fn get() -> Config {
        CONFIG.read().clone()
    }

    /// Merge `config` into the global configuration.
    pub fn set(config: &Config) {
        merge(&mut CONFIG.write(), config);
    }

    /// Reset the global configuration to defaults (for testing only)
    pub fn reset_to_defaults() {
        *CONFIG.write() = Config::default();
    }

    /// Acquire the global configuration lock for testing.
    pub fn lock() -> ConfigLock {
        ConfigLock {
            _guard: TEST_LOCK.lock(),
        }
    }

    /// Exclusive access to the global configuration for a test.
    pub struct ConfigLock {
        _guard: MutexGuard<'static, ()>,
    }

    impl ConfigLock {
        /// Temporarily merge `config` into the global configuration.
        /// The previous configuration is restored when the returned
        /// guard drops.
        pub fn override_with(&self, config: &Config) -> ConfigOverrideGuard {
            let previous = get();
            set(config);
            ConfigOverrideGuard { previous }
        }
    }

    /// Restores the configuration captured by
    /// [`ConfigLock::override_with`].
    pub struct ConfigOverrideGuard {
        previous: Config,
    }

    impl Drop for ConfigOverrideGuard {
        fn drop(&mut self) {
            *CONFIG.write() = self.previous.clone();
        }
    }
}
