//! TOML-loaded configuration for the fabric demo.
//!
//! Mirrors the `forwarder` service's convention: a `Raw*` TOML shape with
//! every field `Option`, converted into a validated domain type with
//! defaults filled in. There is no environment-variable override layer —
//! a single optional TOML path argument is the whole configuration surface.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct FabricConfig {
    pub node_a: NodeConfig,
    pub node_b: NodeConfig,
    pub max_delay_ms: u32,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub talker_name: String,
    pub channel: Option<u8>,
}

impl Default for FabricConfig {
    fn default() -> Self {
        FabricConfig {
            node_a: NodeConfig {
                talker_name: "alpha".to_owned(),
                channel: None,
            },
            node_b: NodeConfig {
                talker_name: "beta".to_owned(),
                channel: None,
            },
            max_delay_ms: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    max_delay_ms: Option<u32>,
    node_a: Option<RawNodeConfig>,
    node_b: Option<RawNodeConfig>,
}

#[derive(Debug, Deserialize)]
struct RawNodeConfig {
    talker_name: Option<String>,
    channel: Option<u8>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

pub fn load_config_from_path(path: &Path) -> Result<FabricConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<FabricConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let defaults = FabricConfig::default();
    let node_a = match raw.node_a {
        Some(n) => convert_node(n, defaults.node_a),
        None => defaults.node_a,
    };
    let node_b = match raw.node_b {
        Some(n) => convert_node(n, defaults.node_b),
        None => defaults.node_b,
    };
    Ok(FabricConfig {
        node_a,
        node_b,
        max_delay_ms: raw.max_delay_ms.unwrap_or(defaults.max_delay_ms),
    })
}

fn convert_node(raw: RawNodeConfig, default: NodeConfig) -> NodeConfig {
    NodeConfig {
        talker_name: raw.talker_name.unwrap_or(default.talker_name),
        channel: raw.channel.or(default.channel),
    }
}
