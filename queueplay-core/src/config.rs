use std::{ path::Path, time::Duration };

use serde::{ Deserialize, Serialize };

use crate::error::{ PlayerError, PlayerResult };

/// Player construction options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Bind the first loaded item without starting it
    #[serde(default)]
    pub start_paused: bool,
    /// Desired playback rate at start
    #[serde(default = "default_rate")]
    pub initial_rate: f32,
    /// Past this position `previous` restarts the current item instead of going back
    #[serde(default = "default_restart_threshold_ms")]
    pub previous_restart_threshold_ms: u64,
    /// Buffer size of the status broadcast channel
    #[serde(default = "default_status_capacity")]
    pub status_capacity: usize,
    /// Progress report interval of the simulated engine
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

fn default_rate() -> f32 {
    1.0
}

fn default_restart_threshold_ms() -> u64 {
    1000
}

fn default_status_capacity() -> usize {
    64
}

fn default_progress_interval_ms() -> u64 {
    250
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            start_paused: false,
            initial_rate: default_rate(),
            previous_restart_threshold_ms: default_restart_threshold_ms(),
            status_capacity: default_status_capacity(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

impl PlayerConfig {
    pub fn from_json(content: &str) -> PlayerResult<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| PlayerError::Internal(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> PlayerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PlayerError::Internal(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> PlayerResult<()> {
        if !self.initial_rate.is_finite() || self.initial_rate < 0.0 {
            return Err(PlayerError::Internal(format!(
                "initial_rate must be a non-negative number, got {}",
                self.initial_rate
            )));
        }
        if self.status_capacity == 0 {
            return Err(PlayerError::Internal("status_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn previous_restart_threshold(&self) -> Duration {
        Duration::from_millis(self.previous_restart_threshold_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}
