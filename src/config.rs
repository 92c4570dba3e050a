//! Runtime configuration (§10.3): the mutable globals the original design
//! notes call out — version strings, port constants, directory names — made
//! into one explicit struct threaded through the orchestrator instead of
//! scattered constants.

use crate::prompt::PromptLevel;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_root: PathBuf,
    pub state_file: PathBuf,
    pub history_dir: PathBuf,
    pub lock_file: PathBuf,
    pub binary_cache_dir: PathBuf,
    pub port_base: u16,
    pub prompt_level: PromptLevel,
    pub hook_timeout: Duration,
    pub health_check_timeout: Duration,
}

impl Config {
    pub fn new(cluster_root: impl Into<PathBuf>) -> Self {
        let cluster_root = cluster_root.into();
        Self {
            state_file: cluster_root.join("upgrade-state.yaml"),
            history_dir: cluster_root.join("upgrade-history"),
            lock_file: cluster_root.join(".mup.lock"),
            binary_cache_dir: cluster_root.join(".binary-cache"),
            port_base: 19000,
            prompt_level: PromptLevel::None,
            hook_timeout: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(30),
            cluster_root,
        }
    }

    /// Layer values from an optional `mup.toml` at the cluster root over the
    /// defaults. Silent no-op if the file does not exist.
    pub fn load_overlay(mut self) -> anyhow::Result<Self> {
        let overlay_path = self.cluster_root.join("mup.toml");
        if !overlay_path.exists() {
            return Ok(self);
        }
        let raw = std::fs::read_to_string(&overlay_path)?;
        let overlay: ConfigOverlay = toml::from_str(&raw)?;

        if let Some(level) = overlay.prompt_level {
            self.prompt_level = level;
        }
        if let Some(secs) = overlay.hook_timeout_secs {
            self.hook_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = overlay.health_check_timeout_secs {
            self.health_check_timeout = Duration::from_secs(secs);
        }
        if let Some(port) = overlay.port_base {
            self.port_base = port;
        }
        Ok(self)
    }
}

#[derive(Debug, Deserialize, Default)]
struct ConfigOverlay {
    prompt_level: Option<PromptLevel>,
    hook_timeout_secs: Option<u64>,
    health_check_timeout_secs: Option<u64>,
    port_base: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_derives_every_path_under_cluster_root() {
        let config = Config::new("/clusters/c0");
        assert_eq!(config.state_file, PathBuf::from("/clusters/c0/upgrade-state.yaml"));
        assert_eq!(config.history_dir, PathBuf::from("/clusters/c0/upgrade-history"));
        assert_eq!(config.lock_file, PathBuf::from("/clusters/c0/.mup.lock"));
    }

    #[test]
    fn load_overlay_is_a_no_op_without_mup_toml() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path()).load_overlay().unwrap();
        assert_eq!(config.port_base, 19000);
    }

    #[test]
    fn load_overlay_applies_present_fields_only() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("mup.toml"), "prompt_level = \"node\"\nport_base = 20000\n").unwrap();
        let config = Config::new(dir.path()).load_overlay().unwrap();
        assert_eq!(config.prompt_level, PromptLevel::Node);
        assert_eq!(config.port_base, 20000);
        assert_eq!(config.hook_timeout, Duration::from_secs(30));
    }
}
