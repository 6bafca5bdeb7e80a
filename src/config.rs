//! Engine configuration: the UID/GID clamp ceilings above which a
//! projected owner is rewritten to 0.
//!
//! Loaded either by explicit construction or from an optional TOML file via
//! `serde` + `toml`. The library exposes a typed loader even though no
//! binary in this crate currently wires command-line flags to it — flag
//! parsing is left to an external front-end, not this config layer.

use std::path::Path;

use serde::Deserialize;

/// Ceilings above which a projected owner is clamped to `0`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_uid: u32,
    pub max_gid: u32,
}

impl Default for EngineConfig {
    /// No configured ceilings means no clamping.
    fn default() -> Self {
        Self { max_uid: u32::MAX, max_gid: u32::MAX }
    }
}

/// On-disk shape of an optional TOML config file. Both fields are optional;
/// an absent field keeps the corresponding [`EngineConfig`] default.
#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    max_uid: Option<u32>,
    max_gid: Option<u32>,
}

impl EngineConfig {
    pub fn new(max_uid: u32, max_gid: u32) -> Self {
        Self { max_uid, max_gid }
    }

    /// Load from a TOML file, falling back to [`Default`] for any field the
    /// file does not set.
    pub fn from_toml_file(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let raw: RawConfig = toml::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let default = Self::default();
        Ok(Self {
            max_uid: raw.max_uid.unwrap_or(default.max_uid),
            max_gid: raw.max_gid.unwrap_or(default.max_gid),
        })
    }
}
