//! Init parameters, the optional JSON plugin config file, and the
//! environment variables the original library reads at startup (spec §6,
//! §10.4 of the expanded spec).
//!
//! SPDX-License-Identifier: MPL-2.0

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One entry of the optional plugins array (spec §6: "Config file").
/// Loading the named shared object is a dynamic codec plugin loader concern
/// and out of scope here (spec §1); this type only carries the parsed
/// intent so an external loader can act on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEntry {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub name: Option<String>,
    pub path: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl PluginEntry {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && (self.name.is_none() || self.path.is_none()) {
            return Err(ConfigError::IncompletePluginEntry(
                "plugin entries require both `name` and `path` when enabled".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

impl PluginConfig {
    /// Parses the JSON config at `path`. Unlike the original's lenient
    /// `json-c` parse-and-skip-missing-fields, invalid entries surface as a
    /// `ConfigError` at load time rather than being silently dropped.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        let cfg: PluginConfig = serde_json::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })?;
        for entry in &cfg.plugins {
            entry.validate()?;
        }
        Ok(cfg)
    }

    pub fn enabled_plugins(&self) -> impl Iterator<Item = &PluginEntry> {
        self.plugins.iter().filter(|p| p.enabled)
    }
}

/// PMD (poll-mode driver) selection for a port. `Auto` lets the NIC port
/// abstraction probe for the best available driver; the concrete userspace
/// drivers themselves are outside this core (spec §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmdType {
    Auto,
    KernelSocket,
    DpdkPoll,
}

/// Per-port init parameters (spec §6 "Init parameters").
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// PCI BDF or interface name, depending on `pmd`.
    pub port: String,
    pub source_ip: std::net::Ipv4Addr,
    pub pmd: PmdType,
    pub header_split_queues: u16,
}

/// Top-level init parameters passed when constructing the library handle
/// (spec §6, §9 "owned singleton inside the top-level library handle").
#[derive(Debug, Clone)]
pub struct InitConfig {
    pub ports: Vec<PortConfig>,
    pub max_tx_sessions: usize,
    pub max_rx_sessions: usize,
    pub lcore_mask: Vec<usize>,
    pub ebu_enable: bool,
    pub numa_bind: bool,
    pub auto_start: bool,
    pub rx_pool_data_size: usize,
    pub udp_payload_size: usize,
}

impl Default for InitConfig {
    fn default() -> Self {
        InitConfig {
            ports: Vec::new(),
            max_tx_sessions: 16,
            max_rx_sessions: 16,
            lcore_mask: Vec::new(),
            ebu_enable: false,
            numa_bind: false,
            auto_start: true,
            rx_pool_data_size: 2048,
            udp_payload_size: 1460,
        }
    }
}

/// Environment variables read at startup (spec §6).
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub st_port_p: Option<String>,
    pub st_port_r: Option<String>,
    pub yuvfile: Option<PathBuf>,
    pub kahawai_cfg_path: Option<PathBuf>,
}

impl EnvOverrides {
    pub fn from_environment() -> Self {
        EnvOverrides {
            st_port_p: std::env::var("ST_PORT_P").ok(),
            st_port_r: std::env::var("ST_PORT_R").ok(),
            yuvfile: std::env::var_os("YUVFILE").map(PathBuf::from),
            kahawai_cfg_path: std::env::var_os("KAHAWAI_CFG_PATH").map(PathBuf::from),
        }
    }

    /// Resolves the config file path: `$KAHAWAI_CFG_PATH` if set, otherwise
    /// `./kahawai.json` (spec §6), and loads it if that path exists. Absence
    /// of the file is not an error -- config is optional.
    pub fn load_plugin_config(&self) -> Result<Option<PluginConfig>, ConfigError> {
        let path = self.kahawai_cfg_path.clone().unwrap_or_else(|| PathBuf::from("kahawai.json"));
        if !path.exists() {
            return Ok(None);
        }
        PluginConfig::load(&path).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_plugin_without_path_is_rejected() {
        let json = r#"{"plugins": [{"enabled": true, "name": "jpegxs"}]}"#;
        let dir = std::env::temp_dir().join(format!("st2110-core-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        std::fs::write(&path, json).unwrap();

        let err = PluginConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::IncompletePluginEntry(_)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn disabled_plugin_skips_validation_even_without_path() {
        let json = r#"{"plugins": [{"enabled": false, "name": "jpegxs"}]}"#;
        let cfg: PluginConfig = serde_json::from_str(json).unwrap();
        for entry in &cfg.plugins {
            entry.validate().unwrap();
        }
        assert_eq!(cfg.enabled_plugins().count(), 0);
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let overrides = EnvOverrides { kahawai_cfg_path: Some(PathBuf::from("/nonexistent/path/kahawai.json")), ..Default::default() };
        assert!(overrides.load_plugin_config().unwrap().is_none());
    }
}
