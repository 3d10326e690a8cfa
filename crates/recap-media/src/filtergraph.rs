//! Per-clip composition expression builder.
//!
//! Pure string construction: given a clip's kind, source dimensions and
//! the target canvas, produce the `filter_complex` expression for one
//! encode invocation. Two compositions exist: plain cover (scale to fill
//! plus center crop) and contain over a blurred cover background for
//! portrait material. Cross-fades are baked into the same expression.

use recap_models::{MediaKind, Resolution};

/// Fades shorter than this are suppressed entirely.
pub const MIN_FADE_SECONDS: f64 = 0.01;
/// Background-layer resolution fraction override for the blur pass.
pub const ENV_FILTER_SCALE: &str = "RECAP_FILTER_SCALE";
/// Default background-layer resolution fraction.
pub const DEFAULT_FILTER_SCALE: f64 = 0.5;

/// Everything needed to compose one clip.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    /// Photo or video.
    pub kind: MediaKind,
    /// Probed source dimensions, when available.
    pub source_dims: Option<(u32, u32)>,
    /// Output canvas.
    pub target: Resolution,
    /// Planned clip duration in seconds.
    pub duration: f64,
    /// Requested cross-fade length.
    pub transition_seconds: f64,
    /// Cap on fade length as a ratio of clip duration.
    pub fade_max_ratio: f64,
    /// Background blur radius; <= 0 disables the blur composition.
    pub blur_radius: f64,
    /// Force the blur composition for landscape videos too.
    pub video_blur: bool,
    /// Background layer processed at this fraction of the canvas before
    /// blurring, then scaled back up. Performance knob, not a contract.
    pub filter_scale: f64,
    /// Output frame rate.
    pub fps: u32,
    /// First clip of the timeline (no fade-in).
    pub is_first: bool,
    /// Last clip of the timeline (no fade-out).
    pub is_last: bool,
}

/// Effective fade length for a clip: `min(transition, ratio * duration)`,
/// suppressed below [`MIN_FADE_SECONDS`].
pub fn fade_length(transition_seconds: f64, fade_max_ratio: f64, duration: f64) -> f64 {
    let fade = transition_seconds.min(fade_max_ratio * duration).max(0.0);
    if fade < MIN_FADE_SECONDS {
        0.0
    } else {
        fade
    }
}

/// Read the background-scale override, clamped to a sane range.
pub fn filter_scale_from_env() -> f64 {
    std::env::var(ENV_FILTER_SCALE)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .map(|v| v.clamp(0.1, 1.0))
        .unwrap_or(DEFAULT_FILTER_SCALE)
}

/// Build the composition expression for one clip.
///
/// The expression reads `[0:v]` and yields `[vout]`.
pub fn build_clip_filter(spec: &FilterSpec) -> String {
    if uses_blur_background(spec) {
        build_contain_blur(spec)
    } else {
        build_cover(spec)
    }
}

/// Whether the clip gets the contain-over-blur composition.
fn uses_blur_background(spec: &FilterSpec) -> bool {
    if spec.blur_radius <= 0.0 {
        return false;
    }
    if spec.target.is_portrait() {
        return true;
    }
    if let Some((w, h)) = spec.source_dims {
        if h > w {
            return true;
        }
    }
    spec.kind.is_video() && spec.video_blur
}

/// Cover: scale to fully cover the canvas, center-crop to exact size.
fn build_cover(spec: &FilterSpec) -> String {
    let Resolution { width, height } = spec.target;
    format!(
        "[0:v]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1{fades},fps={fps},format=yuv420p[vout]",
        w = width,
        h = height,
        fades = fade_chain(spec),
        fps = spec.fps,
    )
}

/// Contain over a blurred cover background, foreground never upscaled.
fn build_contain_blur(spec: &FilterSpec) -> String {
    let Resolution { width, height } = spec.target;
    let (bg_w, bg_h) = background_dims(spec.target, spec.filter_scale);

    format!(
        "[0:v]split=2[bg][fg];\
         [bg]scale={bw}:{bh}:force_original_aspect_ratio=increase,crop={bw}:{bh},gblur=sigma={blur}{upscale},setsar=1[bgv];\
         [fg]{fg_scale},setsar=1[fgv];\
         [bgv][fgv]overlay=(W-w)/2:(H-h)/2{fades},fps={fps},format=yuv420p[vout]",
        bw = bg_w,
        bh = bg_h,
        blur = spec.blur_radius,
        upscale = if (bg_w, bg_h) == (width, height) {
            String::new()
        } else {
            format!(",scale={}:{}", width, height)
        },
        fg_scale = foreground_scale(spec),
        fades = fade_chain(spec),
        fps = spec.fps,
    )
}

/// Background layer size for the downscale-blur-upscale trick.
fn background_dims(target: Resolution, filter_scale: f64) -> (u32, u32) {
    let scale = filter_scale.clamp(0.1, 1.0);
    (
        even_dim((target.width as f64 * scale).round() as u32),
        even_dim((target.height as f64 * scale).round() as u32),
    )
}

/// Contain-scale the foreground without upscaling past native resolution.
fn foreground_scale(spec: &FilterSpec) -> String {
    let Resolution { width, height } = spec.target;
    match spec.source_dims {
        Some((sw, sh)) if sw > 0 && sh > 0 => {
            let fit = (width as f64 / sw as f64)
                .min(height as f64 / sh as f64)
                .min(1.0);
            let fg_w = even_dim((sw as f64 * fit).floor() as u32);
            let fg_h = even_dim((sh as f64 * fit).floor() as u32);
            format!("scale={}:{}", fg_w, fg_h)
        }
        // Dimensions unknown: let ffmpeg fit at runtime, clamped to
        // native size so the foreground never enlarges.
        _ => format!(
            "scale='min(iw,{w})':'min(ih,{h})':force_original_aspect_ratio=decrease",
            w = width,
            h = height
        ),
    }
}

/// Fade filters for the clip, empty when suppressed.
fn fade_chain(spec: &FilterSpec) -> String {
    let fade = fade_length(spec.transition_seconds, spec.fade_max_ratio, spec.duration);
    if fade == 0.0 {
        return String::new();
    }

    let mut chain = String::new();
    if !spec.is_first {
        chain.push_str(&format!(",fade=t=in:st=0:d={:.3}", fade));
    }
    if !spec.is_last {
        let start = (spec.duration - fade).max(0.0);
        chain.push_str(&format!(",fade=t=out:st={:.3}:d={:.3}", start, fade));
    }
    chain
}

/// Audio mixing graph for the mux stage with background music.
///
/// Reads the concatenated program audio as `[1:a]` and the (looped)
/// music input as `[2:a]`; yields `[aout]`. Program audio is unscaled,
/// music is scaled by `gain`; fades run against the total duration and
/// a limiter guards against clipping before truncation.
pub fn build_bgm_mix_filter(total_seconds: f64, gain: f64, fade: f64) -> String {
    let mut graph = format!(
        "[1:a]aresample=48000,aformat=sample_fmts=fltp:channel_layouts=stereo[prog];\
         [2:a]aresample=48000,aformat=sample_fmts=fltp:channel_layouts=stereo,volume={gain:.3}[bgm];\
         [prog][bgm]amix=inputs=2:duration=first:dropout_transition=0:normalize=0",
    );
    if fade >= MIN_FADE_SECONDS {
        graph.push_str(&format!(",afade=t=in:st=0:d={:.3}", fade));
        let out_start = (total_seconds - fade).max(0.0);
        graph.push_str(&format!(",afade=t=out:st={:.3}:d={:.3}", out_start, fade));
    }
    graph.push_str(&format!(
        ",alimiter=limit=0.98,atrim=0:{:.3}[aout]",
        total_seconds
    ));
    graph
}

fn even_dim(n: u32) -> u32 {
    (n & !1).max(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> FilterSpec {
        FilterSpec {
            kind: MediaKind::Photo,
            source_dims: Some((1920, 1080)),
            target: Resolution::new(1280, 720),
            duration: 3.0,
            transition_seconds: 0.3,
            fade_max_ratio: 1.0,
            blur_radius: 6.0,
            video_blur: false,
            filter_scale: 0.5,
            fps: 30,
            is_first: false,
            is_last: false,
        }
    }

    #[test]
    fn test_landscape_photo_uses_cover() {
        let filter = build_clip_filter(&base_spec());
        assert!(filter.contains("force_original_aspect_ratio=increase"));
        assert!(filter.contains("crop=1280:720"));
        assert!(!filter.contains("gblur"));
        assert!(filter.ends_with("[vout]"));
    }

    #[test]
    fn test_portrait_source_gets_blur_background() {
        let spec = FilterSpec {
            source_dims: Some((800, 1200)),
            ..base_spec()
        };
        let filter = build_clip_filter(&spec);
        assert!(filter.contains("gblur=sigma=6"));
        assert!(filter.contains("overlay=(W-w)/2:(H-h)/2"));
        // fit = min(1280/800, 720/1200, 1.0) = 0.6 -> 480x720
        assert!(filter.contains("scale=480:720"));
    }

    #[test]
    fn test_foreground_never_upscales() {
        // Tiny source on a big canvas stays at native resolution.
        let spec = FilterSpec {
            source_dims: Some((320, 480)),
            ..base_spec()
        };
        let filter = build_clip_filter(&spec);
        assert!(filter.contains("scale=320:480"));
    }

    #[test]
    fn test_unknown_dims_clamped_expression() {
        let spec = FilterSpec {
            source_dims: None,
            target: Resolution::new(1080, 1920),
            ..base_spec()
        };
        let filter = build_clip_filter(&spec);
        assert!(filter.contains("'min(iw,1080)'"));
        assert!(filter.contains("force_original_aspect_ratio=decrease"));
    }

    #[test]
    fn test_portrait_canvas_forces_blur() {
        let spec = FilterSpec {
            target: Resolution::new(1080, 1920),
            source_dims: Some((1920, 1080)),
            ..base_spec()
        };
        assert!(build_clip_filter(&spec).contains("gblur"));
    }

    #[test]
    fn test_landscape_video_plain_unless_video_blur() {
        let spec = FilterSpec {
            kind: MediaKind::Video,
            ..base_spec()
        };
        assert!(!build_clip_filter(&spec).contains("gblur"));

        let spec = FilterSpec {
            video_blur: true,
            ..spec
        };
        assert!(build_clip_filter(&spec).contains("gblur"));
    }

    #[test]
    fn test_zero_blur_radius_disables_blur() {
        let spec = FilterSpec {
            blur_radius: 0.0,
            source_dims: Some((800, 1200)),
            ..base_spec()
        };
        assert!(!build_clip_filter(&spec).contains("gblur"));
    }

    #[test]
    fn test_fade_suppression_at_ends() {
        let first = FilterSpec {
            is_first: true,
            ..base_spec()
        };
        let filter = build_clip_filter(&first);
        assert!(!filter.contains("fade=t=in"));
        assert!(filter.contains("fade=t=out"));

        let last = FilterSpec {
            is_last: true,
            ..base_spec()
        };
        let filter = build_clip_filter(&last);
        assert!(filter.contains("fade=t=in"));
        assert!(!filter.contains("fade=t=out"));
    }

    #[test]
    fn test_fade_length_rules() {
        assert!((fade_length(0.3, 1.0, 3.0) - 0.3).abs() < 1e-9);
        // Ratio caps the fade on short clips.
        assert!((fade_length(0.5, 0.25, 1.0) - 0.25).abs() < 1e-9);
        // Below threshold the fade disappears.
        assert_eq!(fade_length(0.005, 1.0, 3.0), 0.0);
        assert_eq!(fade_length(0.0, 1.0, 3.0), 0.0);
    }

    #[test]
    fn test_background_dims_even_and_scaled() {
        let (w, h) = background_dims(Resolution::new(1280, 720), 0.5);
        assert_eq!((w, h), (640, 360));
        let (w, h) = background_dims(Resolution::new(1280, 718), 0.25);
        assert_eq!(w % 2, 0);
        assert_eq!(h % 2, 0);
    }

    #[test]
    fn test_full_scale_background_skips_upscale() {
        let spec = FilterSpec {
            filter_scale: 1.0,
            source_dims: Some((800, 1200)),
            ..base_spec()
        };
        let filter = build_clip_filter(&spec);
        assert!(!filter.contains("gblur=sigma=6,scale=1280:720"));
    }

    #[test]
    fn test_bgm_mix_graph() {
        let graph = build_bgm_mix_filter(60.0, 0.1, 0.5);
        assert!(graph.contains("volume=0.100"));
        // Input normalization would halve the program audio and the
        // music gain; it must stay off.
        assert!(graph.contains("amix=inputs=2:duration=first:dropout_transition=0:normalize=0"));
        assert!(graph.contains("afade=t=in:st=0:d=0.500"));
        assert!(graph.contains("afade=t=out:st=59.500:d=0.500"));
        assert!(graph.contains("alimiter=limit=0.98"));
        assert!(graph.contains("atrim=0:60.000"));
        assert!(graph.ends_with("[aout]"));
    }

    #[test]
    fn test_bgm_mix_graph_no_fade() {
        let graph = build_bgm_mix_filter(10.0, 0.2, 0.0);
        assert!(!graph.contains("afade"));
        assert!(graph.contains("alimiter"));
    }
}
