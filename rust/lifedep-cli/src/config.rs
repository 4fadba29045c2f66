//! Configuration file parsing for `lifedep.toml`.
//!
//! Searches the current directory then ancestors, falling back to
//! `~/.config/lifedep/lifedep.toml` if no project-level file is found.

use lifedep_checker::CheckOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE: &str = "lifedep.toml";

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct LifedepConfig {
    #[serde(default)]
    pub check: CheckOptions,
}

impl LifedepConfig {
    /// Load config from `lifedep.toml`, searching current dir then parents.
    /// Returns `Default` when no file is found, and an error when the file
    /// that was found cannot be read or parsed.
    pub fn load() -> Result<Self, String> {
        match Self::find_and_load()? {
            Some((path, cfg)) => {
                debug!(path = %path.display(), "loaded config");
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }

    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
        toml::from_str(&content).map_err(|e| format!("invalid toml in '{}': {}", path.display(), e))
    }

    fn find_and_load() -> Result<Option<(PathBuf, Self)>, String> {
        let mut dir = std::env::current_dir()
            .map_err(|e| format!("cannot determine current directory: {}", e))?;
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load_from(&config_path).map(|cfg| Some((config_path, cfg)));
            }
            if !dir.pop() {
                break;
            }
        }
        match home_dir().map(|home| home.join(".config").join("lifedep").join(CONFIG_FILE)) {
            Some(global) if global.exists() => Self::load_from(&global).map(|cfg| Some((global, cfg))),
            _ => Ok(None),
        }
    }

    /// Parse a TOML string directly.
    pub fn parse(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Generate a default `lifedep.toml` template.
    pub fn default_template() -> &'static str {
        r#"# Lifedep Configuration

[check]
# "trusted": dependsOn(immortal) is accepted as written.
# "strict":  also warn when an immortal value is built from a transient global.
immortal_mode = "trusted"

# Check declarations concurrently.
parallel = true

# Worker threads for parallel checking (default: one per core).
# jobs = 4
"#
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
