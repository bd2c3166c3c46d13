use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

/// Top-level kiosk configuration, loaded from YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Configuration {
    /// Root picture directory. Sibling directories sharing this directory's
    /// name prefix are treated as additional library parts.
    pub library_path: PathBuf,

    /// Time each image stays on screen before the next transition.
    #[serde(with = "humantime_serde", default = "Configuration::default_frame_interval")]
    pub frame_interval: Duration,

    /// Idle time before the monitor is allowed to sleep. Ignored with
    /// `stay-on: true`.
    #[serde(with = "humantime_serde", default = "Configuration::default_time_to_sleep")]
    pub time_to_sleep: Duration,

    /// Keep the monitor on forever.
    #[serde(default)]
    pub stay_on: bool,

    /// Brightness factor for the blurred letterbox fill, `0` disables it.
    #[serde(default = "Configuration::default_blur_border")]
    pub blur_border: f32,

    /// Manual fade step count; `fade_alpha` ramps over `[0, fade-limit]`.
    #[serde(default = "Configuration::default_fade_limit")]
    pub fade_limit: u8,

    /// Frames per precomputed transition ramp.
    #[serde(default = "Configuration::default_transition_frames")]
    pub transition_frames: usize,

    /// Downscale divisor for the small blending copy of each frame.
    #[serde(default = "Configuration::default_small_div")]
    pub small_div: u32,

    /// Retry budget before a recently-shown pick is accepted anyway.
    #[serde(default = "Configuration::default_new_pick_retries")]
    pub new_pick_retries: u32,

    /// The repeat-avoidance window is `max(5, total-files) / divisor`.
    #[serde(default = "Configuration::default_repeat_window_divisor")]
    pub repeat_window_divisor: u32,

    /// Ring bound on navigation history.
    #[serde(default = "Configuration::default_history_limit")]
    pub history_limit: usize,

    /// Pause between idle ticks; sets the clock redraw cadence.
    #[serde(with = "humantime_serde", default = "Configuration::default_idle_pause")]
    pub idle_pause: Duration,
}

impl Configuration {
    /// All-defaults configuration for a given library root, used when no
    /// config file is present.
    pub fn with_library(library_path: PathBuf) -> Self {
        Self {
            library_path,
            frame_interval: Self::default_frame_interval(),
            time_to_sleep: Self::default_time_to_sleep(),
            stay_on: false,
            blur_border: Self::default_blur_border(),
            fade_limit: Self::default_fade_limit(),
            transition_frames: Self::default_transition_frames(),
            small_div: Self::default_small_div(),
            new_pick_retries: Self::default_new_pick_retries(),
            repeat_window_divisor: Self::default_repeat_window_divisor(),
            history_limit: Self::default_history_limit(),
            idle_pause: Self::default_idle_pause(),
        }
    }

    fn default_frame_interval() -> Duration {
        Duration::from_secs(60)
    }

    fn default_time_to_sleep() -> Duration {
        Duration::from_secs(300)
    }

    fn default_blur_border() -> f32 {
        0.6
    }

    fn default_fade_limit() -> u8 {
        9
    }

    fn default_transition_frames() -> usize {
        15
    }

    fn default_small_div() -> u32 {
        4
    }

    fn default_new_pick_retries() -> u32 {
        10
    }

    fn default_repeat_window_divisor() -> u32 {
        3
    }

    fn default_history_limit() -> usize {
        512
    }

    fn default_idle_pause() -> Duration {
        Duration::from_secs(5)
    }

    /// Check invariants the deserializer cannot express.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.library_path.as_os_str().is_empty(),
            "library-path must not be empty"
        );
        ensure!(self.fade_limit >= 1, "fade-limit must be at least 1");
        ensure!(
            self.transition_frames >= 2,
            "transition-frames must be at least 2"
        );
        ensure!(self.small_div >= 1, "small-div must be at least 1");
        ensure!(
            self.repeat_window_divisor >= 1,
            "repeat-window-divisor must be at least 1"
        );
        ensure!(self.history_limit >= 2, "history-limit must hold at least 2 entries");
        ensure!(
            (0.0..=1.0).contains(&self.blur_border),
            "blur-border must be within [0, 1]"
        );
        Ok(())
    }
}

/// Load and deserialize a YAML configuration file.
pub fn from_yaml_file(path: &Path) -> Result<Configuration> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let cfg: Configuration = serde_yaml::from_str(&text)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_yaml_uses_defaults() {
        let cfg: Configuration = serde_yaml::from_str("library-path: /pictures\n").unwrap();
        assert_eq!(cfg.library_path, PathBuf::from("/pictures"));
        assert_eq!(cfg.frame_interval, Duration::from_secs(60));
        assert_eq!(cfg.fade_limit, 9);
        assert_eq!(cfg.small_div, 4);
        assert!(!cfg.stay_on);
        cfg.validate().unwrap();
    }

    #[test]
    fn humantime_durations_parse() {
        let cfg: Configuration = serde_yaml::from_str(
            "library-path: /pictures\nframe-interval: 2m\ntime-to-sleep: 10m\n",
        )
        .unwrap();
        assert_eq!(cfg.frame_interval, Duration::from_secs(120));
        assert_eq!(cfg.time_to_sleep, Duration::from_secs(600));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = serde_yaml::from_str::<Configuration>("library-path: /p\nbogus: 1\n");
        assert!(err.is_err());
    }

    #[test]
    fn out_of_range_blur_border_fails_validation() {
        let cfg: Configuration =
            serde_yaml::from_str("library-path: /p\nblur-border: 1.5\n").unwrap();
        assert!(cfg.validate().is_err());
    }
}
