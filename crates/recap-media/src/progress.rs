//! FFmpeg machine-readable progress parsing.

use serde::{Deserialize, Serialize};

/// Progress information from FFmpeg's `-progress` stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncodeProgress {
    /// Current frame number.
    pub frame: u64,
    /// Current encoding FPS.
    pub fps: f64,
    /// Output time in microseconds.
    pub out_time_us: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime).
    pub speed: f64,
    /// Whether the invocation reported `progress=end`.
    pub is_complete: bool,
}

impl EncodeProgress {
    /// Percent complete against a known total duration in seconds.
    pub fn percentage(&self, total_duration_secs: f64) -> f64 {
        if total_duration_secs <= 0.0 {
            return 0.0;
        }
        ((self.out_time_us as f64 / 1e6) / total_duration_secs * 100.0).min(100.0)
    }

    /// Estimated seconds remaining, when speed is known.
    pub fn eta_seconds(&self, total_duration_secs: f64) -> Option<f64> {
        if self.speed <= 0.0 || self.out_time_us <= 0 {
            return None;
        }
        let remaining = total_duration_secs - self.out_time_us as f64 / 1e6;
        if remaining <= 0.0 {
            return Some(0.0);
        }
        Some(remaining / self.speed)
    }
}

/// Parse one `key=value` line from the progress stream.
///
/// Returns a snapshot to report when the line closes a progress block
/// (the `progress=` key).
pub fn parse_progress_line(line: &str, current: &mut EncodeProgress) -> Option<EncodeProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            "out_time_us" | "out_time_ms" => {
                // ffmpeg emits the same microsecond value under both keys.
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_us = us;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                if value != "N/A" {
                    if let Some(speed_str) = value.strip_suffix('x') {
                        if let Ok(speed) = speed_str.parse() {
                            current.speed = speed;
                        }
                    }
                }
            }
            "progress" => {
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(EncodeProgress) + Send + 'static>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        let progress = EncodeProgress {
            out_time_us: 5_000_000,
            ..Default::default()
        };

        assert!((progress.percentage(10.0) - 50.0).abs() < 0.01);
        assert!((progress.percentage(5.0) - 100.0).abs() < 0.01);
        // Reported time past the declared duration clamps at 100.
        assert!((progress.percentage(2.0) - 100.0).abs() < 0.01);
        assert_eq!(progress.percentage(0.0), 0.0);
    }

    #[test]
    fn test_parse_block() {
        let mut progress = EncodeProgress::default();

        assert!(parse_progress_line("frame=42", &mut progress).is_none());
        assert!(parse_progress_line("out_time_us=1500000", &mut progress).is_none());
        assert!(parse_progress_line("speed=1.5x", &mut progress).is_none());

        let snap = parse_progress_line("progress=continue", &mut progress).unwrap();
        assert_eq!(snap.frame, 42);
        assert_eq!(snap.out_time_us, 1_500_000);
        assert!((snap.speed - 1.5).abs() < 0.01);
        assert!(!snap.is_complete);

        let snap = parse_progress_line("progress=end", &mut progress).unwrap();
        assert!(snap.is_complete);
    }

    #[test]
    fn test_eta() {
        let progress = EncodeProgress {
            out_time_us: 5_000_000,
            speed: 2.0,
            ..Default::default()
        };
        let eta = progress.eta_seconds(10.0).unwrap();
        assert!((eta - 2.5).abs() < 0.01);
    }

    #[test]
    fn test_na_speed_ignored() {
        let mut progress = EncodeProgress::default();
        parse_progress_line("speed=N/A", &mut progress);
        assert_eq!(progress.speed, 0.0);
    }
}
