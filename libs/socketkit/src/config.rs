//! Serializable runtime settings, usually loaded as the `sockets` section of the app config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::throttle::{ThrottleOptions, ThrottleSpec};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocketKitConfig {
    /// Validate incoming payloads against declared data parameters.
    pub data_validation: bool,
    /// Build handler parameters from parameter metadata. `false` keeps raw positional arguments.
    pub argument_injection: bool,
    pub throttle: ThrottleConfig,
}

impl Default for SocketKitConfig {
    fn default() -> Self {
        Self {
            data_validation: true,
            argument_injection: true,
            throttle: ThrottleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThrottleConfig {
    /// Global per-window limit; `None` disables the global default.
    pub limit: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            limit: None,
            window: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl ThrottleConfig {
    pub fn rate_limit(&self) -> Option<ThrottleSpec> {
        self.limit.map(|limit| ThrottleSpec::new(limit, self.window))
    }

    /// Copy these settings onto `options`, keeping its store and client identifier.
    pub fn apply(&self, options: &mut ThrottleOptions) {
        options.rate_limit = self.rate_limit();
        options.cleanup_interval = self.cleanup_interval;
    }
}
