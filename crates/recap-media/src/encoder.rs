//! Host encoder probing and selection.
//!
//! Resolution order: explicit codec override (an empty override disables
//! hardware outright), then the hardware-disable flag, then a probe of
//! `ffmpeg -encoders` against a platform-ordered preference list. The
//! result is memoized for the lifetime of the selector, which is scoped
//! to one render process.

use std::collections::HashSet;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use recap_models::{EncoderChoice, EncoderId, EncodingConfig};

use crate::error::{MediaError, MediaResult};

/// Encoder id override; set-but-empty selects the software encoder.
pub const ENV_CODEC: &str = "RECAP_FFMPEG_CODEC";
/// Truthy value disables hardware probing.
pub const ENV_DISABLE_HW: &str = "RECAP_DISABLE_HW";
/// libx264 speed preset override.
pub const ENV_PRESET: &str = "RECAP_FFMPEG_PRESET";
/// libx264 CRF override (clamped to 0-51).
pub const ENV_CRF: &str = "RECAP_FFMPEG_CRF";

/// Snapshot of the environment-driven overrides, read once per process.
#[derive(Debug, Clone, Default)]
pub struct EncoderOverrides {
    /// Explicit encoder id; `Some("")` means "software only".
    pub codec: Option<String>,
    /// Skip hardware probing entirely.
    pub disable_hw: bool,
    /// Software preset override.
    pub preset: Option<String>,
    /// Software CRF override.
    pub crf: Option<String>,
}

impl EncoderOverrides {
    /// Read overrides from the environment.
    pub fn from_env() -> Self {
        Self {
            codec: std::env::var(ENV_CODEC).ok(),
            disable_hw: std::env::var(ENV_DISABLE_HW)
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
            preset: std::env::var(ENV_PRESET).ok(),
            crf: std::env::var(ENV_CRF).ok(),
        }
    }

    fn encoding_config(&self) -> EncodingConfig {
        EncodingConfig::from_overrides(self.preset.as_deref(), self.crf.as_deref())
    }
}

/// Lazily-initialized, read-only encoder selection for one render process.
#[derive(Debug)]
pub struct EncoderSelector {
    overrides: EncoderOverrides,
    choice: OnceCell<EncoderChoice>,
}

impl EncoderSelector {
    /// Create a selector with explicit overrides (tests use this).
    pub fn new(overrides: EncoderOverrides) -> Self {
        Self {
            overrides,
            choice: OnceCell::new(),
        }
    }

    /// Create a selector from the process environment.
    pub fn from_env() -> Self {
        Self::new(EncoderOverrides::from_env())
    }

    /// The baseline software choice under the current overrides.
    pub fn software_choice(&self) -> EncoderChoice {
        EncoderChoice::software(self.overrides.encoding_config())
    }

    /// Resolve the encoder, probing the host at most once.
    pub async fn select(&self) -> EncoderChoice {
        self.choice
            .get_or_init(|| async { self.resolve().await })
            .await
            .clone()
    }

    async fn resolve(&self) -> EncoderChoice {
        let config = self.overrides.encoding_config();

        if let Some(name) = self.overrides.codec.as_deref() {
            let name = name.trim();
            if name.is_empty() {
                info!("encoder override is empty, using software encoder");
                return EncoderChoice::software(config);
            }
            match EncoderId::from_name(name) {
                Some(id) => {
                    info!(encoder = name, "encoder forced by override");
                    return EncoderChoice::new(id, config);
                }
                None => {
                    warn!(encoder = name, "unknown encoder override, using software encoder");
                    return EncoderChoice::software(config);
                }
            }
        }

        if self.overrides.disable_hw {
            info!("hardware encoding disabled, using software encoder");
            return EncoderChoice::software(config);
        }

        match list_encoders().await {
            Ok(available) => {
                for id in EncoderId::hardware_preference() {
                    if available.contains(id.as_str()) {
                        info!(encoder = id.as_str(), "selected hardware encoder");
                        return EncoderChoice::new(*id, config);
                    }
                }
                debug!("no hardware encoder available, using software encoder");
                EncoderChoice::software(config)
            }
            Err(e) => {
                warn!(error = %e, "encoder probe failed, using software encoder");
                EncoderChoice::software(config)
            }
        }
    }
}

/// Probe the host's ffmpeg for its video encoder list.
pub async fn list_encoders() -> MediaResult<HashSet<String>> {
    let ffmpeg = which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ffmpeg_failed(
            "encoder probe failed",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
            output.status.code(),
        ));
    }

    Ok(parse_encoder_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `ffmpeg -encoders` output into the set of video encoder names.
fn parse_encoder_list(text: &str) -> HashSet<String> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            // Video encoders carry a leading 'V' in the capability column.
            if flags.starts_with('V') {
                Some(name.to_string())
            } else {
                None
            }
        })
        .collect()
}
