use crate::executor::{CommandExecutorConfig, InputDelivery};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SessionSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Fixed seed for the session RNG. Unset means a fresh random seed.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

pub fn default_max_iterations() -> u64 {
    5000
}

fn default_timeout_ms() -> u64 {
    500
}

pub fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".")
}

impl SessionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_ms: default_timeout_ms(),
            artifact_dir: default_artifact_dir(),
            rng_seed: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExecutorSettings {
    #[serde(default)]
    pub input_delivery: InputDelivery,
    /// Extra arguments passed to the target before any input file argument.
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ExecutorSettings {
    pub fn command_config(&self, binary: &Path, timeout: Duration) -> CommandExecutorConfig {
        let mut command = vec![binary.to_string_lossy().into_owned()];
        command.extend(self.args.iter().cloned());
        CommandExecutorConfig {
            command,
            input_delivery: self.input_delivery.clone(),
            timeout,
            working_dir: self.working_dir.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SplinterConfig {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
}

impl SplinterConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        Self::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file {:?}: {}", path, e))
    }

    pub fn from_toml(content: &str) -> Result<Self, anyhow::Error> {
        let config: SplinterConfig = toml::from_str(content)?;
        Ok(config)
    }
}
