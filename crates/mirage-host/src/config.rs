//! Host configuration, loaded from an optional TOML file and
//! overridable by CLI flags (mirrors `cosmic-rdp-server::config`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default `_mirage._tcp` control port (§6).
pub const DEFAULT_CONTROL_PORT: u16 = 9847;
/// Default data port; `0` means ephemeral.
pub const DEFAULT_DATA_PORT: u16 = 9848;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub bind: SocketAddr,
    pub data_port: u16,
    pub capture: CaptureConfig,
    pub encode: EncodeConfig,
    pub session: SessionConfig,
    pub app_stream: AppStreamConfig,
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub target_fps: u32,
    pub queue_depth: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    pub min_bitrate_bps: u32,
    pub max_bitrate_bps: u32,
    pub keyframe_interval: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_unlock_retries: u32,
    pub approval_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppStreamConfig {
    pub window_cooldown_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_CONTROL_PORT)),
            data_port: DEFAULT_DATA_PORT,
            capture: CaptureConfig::default(),
            encode: EncodeConfig::default(),
            session: SessionConfig::default(),
            app_stream: AppStreamConfig::default(),
            state_dir: None,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            queue_depth: 3,
        }
    }
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            min_bitrate_bps: 500_000,
            max_bitrate_bps: 12_000_000,
            keyframe_interval: 120,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_unlock_retries: 5,
            approval_timeout_secs: 30,
        }
    }
}

impl Default for AppStreamConfig {
    fn default() -> Self {
        Self {
            window_cooldown_secs: 10,
        }
    }
}

impl HostConfig {
    /// Load from a TOML file, falling back to defaults for absent
    /// fields (and for the whole file if `path` doesn't exist).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    }

    /// Resolve the directory persisted state (trusted-device list,
    /// encode-benchmark record) should live under.
    #[must_use]
    pub fn resolve_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("mirage")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = HostConfig::load(Path::new("/nonexistent/mirage.toml")).unwrap();
        assert_eq!(config.bind.port(), DEFAULT_CONTROL_PORT);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let dir = std::env::temp_dir().join(format!("mirage-cfg-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("mirage.toml");
        std::fs::write(&path, "data_port = 12345\n").unwrap();
        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.data_port, 12345);
        assert_eq!(config.capture.target_fps, 60);
        std::fs::remove_dir_all(&dir).ok();
    }
}
