//! Encoder identities and encoding configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Baseline software encoder.
pub const SOFTWARE_ENCODER: &str = "libx264";
/// Default libx264 speed preset.
pub const DEFAULT_PRESET: &str = "fast";
/// Default CRF for the software encoder (quality, 0-51, lower is better).
pub const DEFAULT_CRF: u8 = 28;
/// Upper bound of the CRF scale.
pub const MAX_CRF: u8 = 51;
/// Default quality target for hardware rate control.
pub const DEFAULT_HW_QUALITY: u8 = 23;

/// Valid libx264 speed presets, fastest first.
pub const X264_PRESETS: &[&str] = &[
    "ultrafast", "superfast", "veryfast", "faster", "fast", "medium", "slow", "slower", "veryslow",
    "placebo",
];

/// A video encoder ffmpeg may offer on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderId {
    /// NVIDIA NVENC.
    H264Nvenc,
    /// Intel QuickSync.
    H264Qsv,
    /// AMD VCE/AMF.
    H264Amf,
    /// Apple VideoToolbox.
    H264VideoToolbox,
    /// CPU baseline.
    Libx264,
}

impl EncoderId {
    /// The ffmpeg encoder name.
    pub fn as_str(self) -> &'static str {
        match self {
            EncoderId::H264Nvenc => "h264_nvenc",
            EncoderId::H264Qsv => "h264_qsv",
            EncoderId::H264Amf => "h264_amf",
            EncoderId::H264VideoToolbox => "h264_videotoolbox",
            EncoderId::Libx264 => SOFTWARE_ENCODER,
        }
    }

    /// Parse an ffmpeg encoder name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "h264_nvenc" => Some(EncoderId::H264Nvenc),
            "h264_qsv" => Some(EncoderId::H264Qsv),
            "h264_amf" => Some(EncoderId::H264Amf),
            "h264_videotoolbox" => Some(EncoderId::H264VideoToolbox),
            "libx264" => Some(EncoderId::Libx264),
            _ => None,
        }
    }

    /// Whether this encoder runs on dedicated hardware.
    pub fn is_hardware(self) -> bool {
        !matches!(self, EncoderId::Libx264)
    }

    /// Hardware encoders in platform preference order, fastest first.
    pub fn hardware_preference() -> &'static [EncoderId] {
        &[
            EncoderId::H264Nvenc,
            EncoderId::H264Qsv,
            EncoderId::H264Amf,
            EncoderId::H264VideoToolbox,
        ]
    }
}

impl fmt::Display for EncoderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Software encoder knobs, read once from overridable settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// libx264 speed preset.
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Constant Rate Factor (quality, 0-51, lower is better).
    #[serde(default = "default_crf")]
    pub crf: u8,
}

fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            preset: DEFAULT_PRESET.to_string(),
            crf: DEFAULT_CRF,
        }
    }
}

impl EncodingConfig {
    /// Build a config from raw override strings, validating ranges.
    ///
    /// Unknown presets fall back to the default; CRF is clamped to the
    /// documented 0-51 scale.
    pub fn from_overrides(preset: Option<&str>, crf: Option<&str>) -> Self {
        let preset = preset
            .filter(|p| X264_PRESETS.contains(p))
            .unwrap_or(DEFAULT_PRESET)
            .to_string();
        let crf = crf
            .and_then(|s| s.parse::<i64>().ok())
            .map(|v| v.clamp(0, MAX_CRF as i64) as u8)
            .unwrap_or(DEFAULT_CRF);
        Self { preset, crf }
    }
}

/// An encoder plus its fixed tuning argument set. Derived once per render
/// process and treated as a value from then on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderChoice {
    /// Which encoder to invoke.
    pub id: EncoderId,
    /// Software knobs; also used as the quality target for hardware
    /// rate control where the encoder takes one.
    pub config: EncodingConfig,
}

impl EncoderChoice {
    /// The baseline software choice.
    pub fn software(config: EncodingConfig) -> Self {
        Self {
            id: EncoderId::Libx264,
            config,
        }
    }

    /// Choice for a specific encoder.
    pub fn new(id: EncoderId, config: EncodingConfig) -> Self {
        Self { id, config }
    }

    /// Codec-specific output arguments (`-c:v` plus rate-control tuning).
    pub fn video_args(&self) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.id.as_str().to_string()];
        match self.id {
            EncoderId::H264Nvenc => {
                args.extend_from_slice(&[
                    "-rc".to_string(),
                    "vbr".to_string(),
                    "-cq".to_string(),
                    DEFAULT_HW_QUALITY.to_string(),
                ]);
            }
            EncoderId::H264Qsv => {
                args.extend_from_slice(&[
                    "-preset".to_string(),
                    "fast".to_string(),
                    "-global_quality".to_string(),
                    DEFAULT_HW_QUALITY.to_string(),
                ]);
            }
            EncoderId::H264Amf => {
                args.extend_from_slice(&[
                    "-quality".to_string(),
                    "balanced".to_string(),
                    "-rc".to_string(),
                    "vbr_peak".to_string(),
                ]);
            }
            EncoderId::H264VideoToolbox => {
                args.extend_from_slice(&["-q:v".to_string(), "55".to_string()]);
            }
            EncoderId::Libx264 => {
                args.extend_from_slice(&[
                    "-preset".to_string(),
                    self.config.preset.clone(),
                    "-crf".to_string(),
                    self.config.crf.to_string(),
                ]);
            }
        }
        args
    }
}
