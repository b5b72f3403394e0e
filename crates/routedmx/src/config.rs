// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Demultiplexer configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration.
//!
//! ```toml
//! atsc3_lls = true
//! interface = "eth0"
//! dispatch = "progressive"
//! tune = { id = 5004 }
//!
//! [[services]]
//! id = 1
//! protocol = "flute"
//! address = "239.255.1.1"
//! port = 3000
//! ```

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::dispatch::DispatchPolicy;
use crate::lct::LctLimits;
use crate::topology::{Protocol, ServiceSelector};

/// Default receive buffer requested on every multicast socket.
pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 0x80000;
/// Largest object accepted: 65535 source blocks of 16384 bytes.
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 65535 * 16384;
/// Default reorder timeout before an incomplete object is forced out.
pub const DEFAULT_REORDER_TIMEOUT_MS: u64 = 5000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A statically declared service (FLUTE sessions, or ROUTE without LLS).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service identifier reported in events.
    pub id: u32,

    /// Delivery protocol of the bootstrap session.
    #[serde(default)]
    pub protocol: Protocol,

    /// Bootstrap multicast group.
    pub address: Ipv4Addr,

    /// Bootstrap UDP port.
    pub port: u16,
}

impl ServiceConfig {
    /// Bootstrap endpoint of the service.
    pub fn endpoint(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }
}

/// Demultiplexer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemuxConfig {
    /// Listen to the ATSC 3.0 low-level signaling bootstrap (224.0.23.60:4937).
    #[serde(default)]
    pub atsc3_lls: bool,

    /// Interface used to join multicast groups (name or IPv4 address).
    #[serde(default)]
    pub interface: Option<String>,

    /// Receive buffer size requested on every socket.
    #[serde(default = "default_socket_buffer_size")]
    pub socket_buffer_size: usize,

    /// Object dispatch policy.
    #[serde(default)]
    pub dispatch: DispatchPolicy,

    /// Reorder timeout in milliseconds (0 disables timed flushing).
    #[serde(default = "default_reorder_timeout_ms")]
    pub reorder_timeout_ms: u64,

    /// Ignore in-order delivery hints from signaling.
    #[serde(default)]
    pub force_reorder: bool,

    /// Largest accepted object size in bytes.
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,

    /// Maximum number of code points kept per channel.
    #[serde(default = "default_max_codepoints")]
    pub max_codepoints: usize,

    /// Maximum number of LCT header extensions per packet.
    #[serde(default = "default_max_header_extensions")]
    pub max_header_extensions: usize,

    /// Only process this TSI (debug aid).
    #[serde(default)]
    pub debug_tsi: Option<u32>,

    /// Which services are tuned once discovered.
    #[serde(default)]
    pub tune: ServiceSelector,

    /// Keep signaling of untuned services flowing.
    #[serde(default)]
    pub tune_all_sls: bool,

    /// Statically declared services.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

fn default_socket_buffer_size() -> usize {
    DEFAULT_SOCKET_BUFFER_SIZE
}

fn default_reorder_timeout_ms() -> u64 {
    DEFAULT_REORDER_TIMEOUT_MS
}

fn default_max_object_size() -> u64 {
    DEFAULT_MAX_OBJECT_SIZE
}

fn default_max_codepoints() -> usize {
    8
}

fn default_max_header_extensions() -> usize {
    16
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            atsc3_lls: false,
            interface: None,
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            dispatch: DispatchPolicy::default(),
            reorder_timeout_ms: DEFAULT_REORDER_TIMEOUT_MS,
            force_reorder: false,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            max_codepoints: default_max_codepoints(),
            max_header_extensions: default_max_header_extensions(),
            debug_tsi: None,
            tune: ServiceSelector::All,
            tune_all_sls: false,
            services: Vec::new(),
        }
    }
}

impl DemuxConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// ATSC 3.0 receiver listening to LLS.
    pub fn atsc3() -> Self {
        Self {
            atsc3_lls: true,
            ..Default::default()
        }
    }

    /// Receiver for a single statically declared service.
    pub fn single_service(id: u32, protocol: Protocol, endpoint: SocketAddrV4) -> Self {
        Self::default().with_service(id, protocol, endpoint)
    }

    /// Add a statically declared service.
    pub fn with_service(mut self, id: u32, protocol: Protocol, endpoint: SocketAddrV4) -> Self {
        self.services.push(ServiceConfig {
            id,
            protocol,
            address: *endpoint.ip(),
            port: endpoint.port(),
        });
        self
    }

    /// Set the multicast interface.
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Set the dispatch policy.
    pub fn with_dispatch(mut self, policy: DispatchPolicy) -> Self {
        self.dispatch = policy;
        self
    }

    /// Set reorder behavior.
    pub fn with_reorder(mut self, force_reorder: bool, timeout_ms: u64) -> Self {
        self.force_reorder = force_reorder;
        self.reorder_timeout_ms = timeout_ms;
        self
    }

    /// Set the tune selection.
    pub fn with_tune(mut self, selector: ServiceSelector, tune_all_sls: bool) -> Self {
        self.tune = selector;
        self.tune_all_sls = tune_all_sls;
        self
    }

    /// Restrict processing to one TSI.
    pub fn with_debug_tsi(mut self, tsi: u32) -> Self {
        self.debug_tsi = Some(tsi);
        self
    }

    /// Reorder timeout as a duration (`None` when disabled).
    pub fn reorder_timeout(&self) -> Option<Duration> {
        (self.reorder_timeout_ms > 0).then(|| Duration::from_millis(self.reorder_timeout_ms))
    }

    pub(crate) fn limits(&self) -> LctLimits {
        LctLimits {
            max_object_size: self.max_object_size,
            max_header_extensions: self.max_header_extensions,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.atsc3_lls && self.services.is_empty() {
            return Err(ConfigError::Invalid(
                "No bootstrap: enable atsc3_lls or declare services".into(),
            ));
        }
        if self.socket_buffer_size == 0 {
            return Err(ConfigError::Invalid("socket_buffer_size must be > 0".into()));
        }
        if self.max_object_size == 0 {
            return Err(ConfigError::Invalid("max_object_size must be > 0".into()));
        }
        if self.max_codepoints == 0 || self.max_codepoints > 255 {
            return Err(ConfigError::Invalid(format!(
                "max_codepoints must be in 1..=255 (got {})",
                self.max_codepoints
            )));
        }
        if self.max_header_extensions == 0 {
            return Err(ConfigError::Invalid(
                "max_header_extensions must be > 0".into(),
            ));
        }

        for (i, svc) in self.services.iter().enumerate() {
            if svc.port == 0 {
                return Err(ConfigError::Invalid(format!(
                    "Service {} (id {}) has no port",
                    i, svc.id
                )));
            }
            if svc.address.is_unspecified() {
                return Err(ConfigError::Invalid(format!(
                    "Service {} (id {}) has an unspecified address",
                    i, svc.id
                )));
            }
            if self.services[..i].iter().any(|other| other.id == svc.id) {
                return Err(ConfigError::Invalid(format!(
                    "Service id {} declared twice",
                    svc.id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = DemuxConfig::default();
        assert_eq!(config.socket_buffer_size, 0x80000);
        assert_eq!(config.reorder_timeout_ms, 5000);
        assert_eq!(config.max_object_size, 65535 * 16384);
        assert_eq!(config.max_codepoints, 8);
        assert_eq!(config.dispatch, DispatchPolicy::EndOnly);
        assert_eq!(config.tune, ServiceSelector::All);
        assert!(!config.force_reorder);
    }

    #[test]
    fn test_default_needs_bootstrap() {
        assert!(DemuxConfig::default().validate().is_err());
        assert!(DemuxConfig::atsc3().validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
atsc3_lls = true
dispatch = "progressive"
reorder_timeout_ms = 0
tune = { id = 5004 }

[[services]]
id = 7
protocol = "flute"
address = "239.255.1.1"
port = 3000
"#;
        let config = DemuxConfig::from_toml(toml).unwrap();
        assert_eq!(config.dispatch, DispatchPolicy::Progressive);
        assert_eq!(config.reorder_timeout(), None);
        assert_eq!(config.tune, ServiceSelector::Id(5004));
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].protocol, Protocol::Flute);
        assert_eq!(
            config.services[0].endpoint(),
            "239.255.1.1:3000".parse().unwrap()
        );
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let ep: SocketAddrV4 = "239.255.1.1:3000".parse().unwrap();
        let config = DemuxConfig::default()
            .with_service(1, Protocol::Route, ep)
            .with_service(1, Protocol::Flute, ep);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_codepoint_limit() {
        let mut config = DemuxConfig::atsc3();
        config.max_codepoints = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_file() {
        let ep: SocketAddrV4 = "239.1.2.3:4000".parse().unwrap();
        let config = DemuxConfig::single_service(3, Protocol::Route, ep)
            .with_dispatch(DispatchPolicy::Eager)
            .with_tune(ServiceSelector::First, true);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demux.toml");
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = DemuxConfig::from_file(&path).unwrap();
        assert_eq!(loaded.services, config.services);
        assert_eq!(loaded.dispatch, DispatchPolicy::Eager);
        assert_eq!(loaded.tune, ServiceSelector::First);
        assert!(loaded.tune_all_sls);
    }
}
