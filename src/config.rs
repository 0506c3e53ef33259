// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Run-time configuration, read once from the device tree node of the trusted OS.

use log::info;

/// Property controlling whether the node, and so the driver, is enabled.
pub const STATUS_PROPERTY: &str = "status";
/// Property which, when present, enables relaying the trusted OS log.
pub const SECURE_LOG_PROPERTY: &str = "nvidia,secure-log";

/// Source of device tree properties for the driver's node.
pub trait PropertySource {
    /// Returns the raw value of the named property, if present.
    fn property(&self, name: &str) -> Option<&[u8]>;
}

/// Driver configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DriverConfig {
    /// Whether the driver should register itself at all.
    pub enabled: bool,
    /// Whether to register a log buffer with the trusted OS and relay its contents.
    pub secure_log: bool,
}

impl DriverConfig {
    /// Reads the configuration from the given node.
    pub fn from_properties(node: &impl PropertySource) -> Self {
        let enabled = node.property(STATUS_PROPERTY).is_none_or(status_okay);
        let secure_log = node.property(SECURE_LOG_PROPERTY).is_some();
        info!("TLK driver config: enabled={enabled} secure_log={secure_log}");
        Self {
            enabled,
            secure_log,
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            secure_log: false,
        }
    }
}

/// Returns whether a `status` value means the node is available.
fn status_okay(value: &[u8]) -> bool {
    let value = value.strip_suffix(b"\0").unwrap_or(value);
    matches!(value, b"okay" | b"ok")
}
