//! # vigil descriptor
//!
//! The supervised process descriptor: a static record describing how to
//! launch, restart and log one managed program.
//!
//! Descriptors are loaded once from an ecosystem file (YAML or JSON, with the
//! apps listed under `apps`), validated, and then shared immutably with the
//! supervisor for its whole lifetime. Any change requires a reload.
//!
//! ```yaml
//! apps:
//!   - name: voice-resolver
//!     script: ./main
//!     cwd: /srv/voice_resolver
//!     max_memory_restart: 500M
//!     min_uptime: 10s
//!     max_restarts: 10
//!     env:
//!       PORT: 5000
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use vigil_common::{ConfigError, ConfigResult};

pub mod env;
pub mod launch;
pub mod units;
pub mod validation;

pub use launch::LaunchSpec;
pub use units::ByteSize;

use env::env_serde;
use units::{count_serde, duration_serde, option_duration_serde};

/// Top-level ecosystem file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcosystemConfig {
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    pub apps: Vec<ProcessDescriptor>,
}

/// Settings for the supervisor itself (optional section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(default = "default_memory_check_interval", with = "duration_serde")]
    pub memory_check_interval: Duration,
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            home: None,
            memory_check_interval: default_memory_check_interval(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Supervised process descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub name: String,
    #[serde(alias = "script")]
    pub executable_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, alias = "cwd", skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub interpreter: Interpreter,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interpreter_args: Vec<String>,
    #[serde(default = "default_instances", deserialize_with = "count_serde::deserialize")]
    pub instances: u32,
    #[serde(default)]
    pub exec_mode: ExecMode,
    #[serde(default = "default_true")]
    pub autorestart: bool,
    #[serde(default = "default_true")]
    pub autostart: bool,
    #[serde(default)]
    pub watch: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_watch: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_restart: Option<ByteSize>,
    #[serde(default, with = "env_serde")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_date_format: Option<String>,
    #[serde(default)]
    pub merge_logs: bool,
    #[serde(default = "default_min_uptime", with = "duration_serde")]
    pub min_uptime: Duration,
    #[serde(default = "default_max_restarts", deserialize_with = "count_serde::deserialize")]
    pub max_restarts: u32,
    #[serde(default, with = "duration_serde")]
    pub restart_delay: Duration,
    #[serde(
        default,
        with = "option_duration_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp_backoff_restart_delay: Option<Duration>,
    #[serde(default = "default_kill_timeout", with = "duration_serde")]
    pub kill_timeout: Duration,
}

/// How the executable is run: directly, or through a language runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Interpreter {
    #[default]
    None,
    Program(String),
}

impl From<String> for Interpreter {
    fn from(value: String) -> Self {
        match value.trim() {
            "" | "none" => Interpreter::None,
            program => Interpreter::Program(program.to_string()),
        }
    }
}

impl From<Interpreter> for String {
    fn from(value: Interpreter) -> Self {
        match value {
            Interpreter::None => "none".to_string(),
            Interpreter::Program(program) => program,
        }
    }
}

/// Process topology.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    #[default]
    #[serde(alias = "fork_mode")]
    Fork,
    #[serde(alias = "cluster_mode")]
    Cluster,
}

/// Serialization front end for ecosystem files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

impl EcosystemConfig {
    /// Load an ecosystem file, picking the format from its extension.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Loading ecosystem file: {}", path.display());
        Self::load_from_str(&content, format)
    }

    /// Parse and validate an ecosystem document.
    pub fn load_from_str(content: &str, format: ConfigFormat) -> ConfigResult<Self> {
        let config: EcosystemConfig = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        validation::validate_config(self)
    }

    pub fn app(&self, name: &str) -> Option<&ProcessDescriptor> {
        self.apps.iter().find(|app| app.name == name)
    }

    /// Apps launched when the supervisor starts.
    pub fn autostart_apps(&self) -> impl Iterator<Item = &ProcessDescriptor> {
        self.apps.iter().filter(|app| app.autostart)
    }

    pub fn to_string_as(&self, format: ConfigFormat) -> ConfigResult<String> {
        serialize_as(self, format)
    }
}

impl ProcessDescriptor {
    /// Parse and validate a single descriptor document.
    pub fn load_from_str(content: &str, format: ConfigFormat) -> ConfigResult<Self> {
        let descriptor: ProcessDescriptor = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };

        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        validation::validate_descriptor(self)
    }

    pub fn to_string_as(&self, format: ConfigFormat) -> ConfigResult<String> {
        serialize_as(self, format)
    }

    /// Memory ceiling in bytes, if one is configured.
    pub fn memory_ceiling(&self) -> Option<u64> {
        self.max_memory_restart.map(ByteSize::as_u64)
    }

    /// SHA-256 over the fields that change what gets launched, stable across
    /// builds so PID files from an earlier run can be compared.
    pub fn config_hash(&self) -> String {
        let fields = LaunchFields {
            name: &self.name,
            executable_path: &self.executable_path,
            args: &self.args,
            working_directory: self.working_directory.as_deref(),
            interpreter: &self.interpreter,
            interpreter_args: &self.interpreter_args,
            exec_mode: self.exec_mode,
            env: &self.env,
        };

        // Struct fields serialize in declaration order and the env map is sorted
        let canonical = match serde_json::to_vec(&fields) {
            Ok(json) => json,
            Err(e) => {
                debug!("Falling back to the debug rendering for {}: {}", self.name, e);
                format!("{:?}", fields).into_bytes()
            }
        };

        format!("sha256:{:x}", Sha256::digest(canonical))
    }
}

#[derive(Debug, Serialize)]
struct LaunchFields<'a> {
    name: &'a str,
    executable_path: &'a str,
    args: &'a [String],
    working_directory: Option<&'a str>,
    interpreter: &'a Interpreter,
    interpreter_args: &'a [String],
    exec_mode: ExecMode,
    env: &'a BTreeMap<String, String>,
}

fn serialize_as<T: Serialize>(value: &T, format: ConfigFormat) -> ConfigResult<String> {
    match format {
        ConfigFormat::Yaml => Ok(serde_yaml::to_string(value)?),
        ConfigFormat::Json => Ok(serde_json::to_string_pretty(value)?),
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_memory_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_instances() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_min_uptime() -> Duration {
    Duration::from_secs(1)
}

fn default_max_restarts() -> u32 {
    16
}

fn default_kill_timeout() -> Duration {
    Duration::from_millis(1600)
}
