//! Duration allocation: split a fixed target runtime across media items.
//!
//! Pure module, no I/O. Video durations are probed by the orchestrator
//! beforehand and passed in as a map; absent entries fall back to the
//! configured per-video cap. Item order is supplied by the caller and
//! never changed, only truncated.

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

use recap_models::{
    ClipPlan, MediaDescriptor, MediaKind, TimelineMode, TimelineParams, TimelineSummary,
    MIN_CLIP_SECONDS,
};

/// Tolerance for the sum-equals-target invariant.
pub const SUM_EPSILON: f64 = 1e-6;

/// Probed video durations keyed by source path.
pub type VideoDurations = HashMap<PathBuf, f64>;

/// Allocation failures.
#[derive(Debug, Error, PartialEq)]
pub enum TimelineError {
    #[error("target duration must be positive, got {0}")]
    InvalidTarget(f64),

    #[error("video weight must be positive, got {0}")]
    InvalidWeight(f64),

    #[error("allocated durations drift from target by {0}")]
    DriftExceeded(f64),
}

/// Allocate on-screen durations so the plans sum exactly to the target.
///
/// Returns an empty plan list when `items` is empty or when the target is
/// too short to represent even a single clip.
pub fn build_timeline(
    items: &[MediaDescriptor],
    params: &TimelineParams,
    video_durations: &VideoDurations,
) -> Result<Vec<ClipPlan>, TimelineError> {
    if params.target_seconds <= 0.0 {
        return Err(TimelineError::InvalidTarget(params.target_seconds));
    }
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let mut plans = match params.mode {
        TimelineMode::Even => allocate_even(items, params, video_durations),
        TimelineMode::Weighted => allocate_weighted(items, params, video_durations)?,
        TimelineMode::PreserveVideos => allocate_preserving(items, params, video_durations),
    };

    close_to_target(&mut plans, params.target_seconds)?;
    Ok(plans)
}

/// Known (probed) duration for a video, falling back to the cap.
fn known_duration(
    item: &MediaDescriptor,
    params: &TimelineParams,
    video_durations: &VideoDurations,
) -> f64 {
    video_durations
        .get(&item.path)
        .copied()
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(params.video_max_seconds)
}

fn seed_plan(
    item: &MediaDescriptor,
    params: &TimelineParams,
    video_durations: &VideoDurations,
) -> ClipPlan {
    let duration = match item.kind {
        MediaKind::Photo => params.photo_seconds,
        MediaKind::Video => params
            .video_max_seconds
            .min(known_duration(item, params, video_durations)),
    };
    ClipPlan::new(item.path.clone(), item.kind, duration)
}

/// Even mode: fixed seeds per kind, then trim or redistribute.
fn allocate_even(
    items: &[MediaDescriptor],
    params: &TimelineParams,
    video_durations: &VideoDurations,
) -> Vec<ClipPlan> {
    let target = params.target_seconds;
    let mut plans: Vec<ClipPlan> = items
        .iter()
        .map(|i| seed_plan(i, params, video_durations))
        .collect();

    let total: f64 = plans.iter().map(|p| p.duration).sum();

    if total > target + SUM_EPSILON {
        trim_to_target(&mut plans, target);
        return plans;
    }

    if total < target - SUM_EPSILON {
        grow_videos(&mut plans, items, params, video_durations, target);

        let video_total: f64 = plans
            .iter()
            .filter(|p| p.kind.is_video())
            .map(|p| p.duration)
            .sum();
        let photo_count = plans.iter().filter(|p| p.kind.is_photo()).count();

        if photo_count > 0 {
            // Photos absorb whatever the videos leave; an equal share per
            // photo, deliberately uncapped in this mode.
            let per_photo = (target - video_total) / photo_count as f64;
            for plan in plans.iter_mut().filter(|p| p.kind.is_photo()) {
                plan.duration = per_photo;
            }
        } else if let Some(last) = plans.last_mut() {
            // All-video timeline shorter than the target: slack lands
            // on the last clip. Its segment still ends when the source
            // runs out, so the rendered output may come in short.
            last.duration += target - video_total;
        }
    }

    plans
}

/// Grow videos toward their true durations in equal rounds until the
/// deficit is gone or every video is at its real length.
fn grow_videos(
    plans: &mut [ClipPlan],
    items: &[MediaDescriptor],
    params: &TimelineParams,
    video_durations: &VideoDurations,
    target: f64,
) {
    let limits: Vec<Option<f64>> = items
        .iter()
        .map(|i| {
            if i.kind.is_video() {
                Some(known_duration(i, params, video_durations))
            } else {
                None
            }
        })
        .collect();

    loop {
        let total: f64 = plans.iter().map(|p| p.duration).sum();
        let deficit = target - total;
        if deficit <= SUM_EPSILON {
            return;
        }

        let eligible: Vec<usize> = plans
            .iter()
            .enumerate()
            .filter(|(i, p)| matches!(limits[*i], Some(limit) if limit - p.duration > SUM_EPSILON))
            .map(|(i, _)| i)
            .collect();
        if eligible.is_empty() {
            return;
        }

        let share = deficit / eligible.len() as f64;
        for i in eligible {
            let limit = limits[i].unwrap_or(params.video_max_seconds);
            plans[i].duration = limit.min(plans[i].duration + share);
        }
    }
}

/// Even-mode over-target rule: drop whole trailing clips while the
/// timeline still overshoots and more than one remains, then hand the
/// surviving last clip the exact remainder.
fn trim_to_target(plans: &mut Vec<ClipPlan>, target: f64) {
    while plans.len() > 1
        && plans.iter().map(|p| p.duration).sum::<f64>() > target + SUM_EPSILON
    {
        plans.pop();
    }
    set_exact_remainder(plans, target);
}

/// Walk from the end: the last surviving clip takes the exact remainder,
/// clips whose remainder would be unrepresentable are dropped.
fn set_exact_remainder(plans: &mut Vec<ClipPlan>, target: f64) {
    while !plans.is_empty() {
        let without_last: f64 = plans[..plans.len() - 1].iter().map(|p| p.duration).sum();
        let remainder = target - without_last;
        if remainder >= MIN_CLIP_SECONDS {
            if let Some(last) = plans.last_mut() {
                last.duration = remainder;
            }
            return;
        }
        plans.pop();
    }
}

/// Weighted mode: distribute the target proportionally to per-item
/// weights, iteratively pinning items that hit their per-kind caps.
fn allocate_weighted(
    items: &[MediaDescriptor],
    params: &TimelineParams,
    video_durations: &VideoDurations,
) -> Result<Vec<ClipPlan>, TimelineError> {
    if params.video_weight <= 0.0 {
        return Err(TimelineError::InvalidWeight(params.video_weight));
    }

    let weights: Vec<f64> = items
        .iter()
        .map(|i| match i.kind {
            MediaKind::Photo => 1.0,
            MediaKind::Video => params.video_weight,
        })
        .collect();
    let caps: Vec<f64> = items
        .iter()
        .map(|i| match i.kind {
            MediaKind::Photo => params.photo_max_seconds,
            MediaKind::Video => params
                .video_max_seconds
                .min(known_duration(i, params, video_durations)),
        })
        .collect();

    let mut fixed: Vec<Option<f64>> = vec![None; items.len()];
    loop {
        let pinned: f64 = fixed.iter().flatten().sum();
        let remaining = params.target_seconds - pinned;
        let pool_weight: f64 = weights
            .iter()
            .zip(&fixed)
            .filter(|(_, f)| f.is_none())
            .map(|(w, _)| w)
            .sum();
        if pool_weight <= 0.0 {
            break;
        }

        let mut pinned_this_round = false;
        for i in 0..items.len() {
            if fixed[i].is_some() {
                continue;
            }
            let share = remaining * weights[i] / pool_weight;
            if share > caps[i] + SUM_EPSILON {
                fixed[i] = Some(caps[i]);
                pinned_this_round = true;
            }
        }
        if pinned_this_round {
            continue;
        }

        for i in 0..items.len() {
            if fixed[i].is_none() {
                fixed[i] = Some(remaining * weights[i] / pool_weight);
            }
        }
        break;
    }

    Ok(items
        .iter()
        .zip(fixed)
        .map(|(item, duration)| {
            ClipPlan::new(
                item.path.clone(),
                item.kind,
                duration.unwrap_or(MIN_CLIP_SECONDS),
            )
        })
        .collect())
}

/// Preserve-videos mode: videos keep their true durations, photos share
/// the rest. Over-target timelines drop photos and trim videos from the
/// end.
fn allocate_preserving(
    items: &[MediaDescriptor],
    params: &TimelineParams,
    video_durations: &VideoDurations,
) -> Vec<ClipPlan> {
    let target = params.target_seconds;

    let mut videos: Vec<ClipPlan> = items
        .iter()
        .filter(|i| i.kind.is_video())
        .map(|i| {
            ClipPlan::new(
                i.path.clone(),
                i.kind,
                known_duration(i, params, video_durations),
            )
        })
        .collect();
    let video_total: f64 = videos.iter().map(|p| p.duration).sum();

    if !videos.is_empty() && video_total >= target - SUM_EPSILON {
        // Video material alone covers the target; photos are excluded
        // outright rather than squeezed to nothing. Videos keep their
        // true lengths except the last survivor, which takes the exact
        // remainder.
        set_exact_remainder(&mut videos, target);
        return videos;
    }

    let photo_count = items.iter().filter(|i| i.kind.is_photo()).count();
    if photo_count == 0 {
        if let Some(last) = videos.last_mut() {
            last.duration += target - video_total;
        }
        return videos;
    }

    let per_photo = ((target - video_total) / photo_count as f64).min(params.photo_max_seconds);
    let mut plans: Vec<ClipPlan> = items
        .iter()
        .map(|i| match i.kind {
            MediaKind::Photo => ClipPlan::new(i.path.clone(), i.kind, per_photo),
            MediaKind::Video => ClipPlan::new(
                i.path.clone(),
                i.kind,
                known_duration(i, params, video_durations),
            ),
        })
        .collect();

    // Cap leftover (photos hit photo_max) lands on the last clip.
    let total: f64 = plans.iter().map(|p| p.duration).sum();
    if let Some(last) = plans.last_mut() {
        last.duration += target - total;
    }
    plans
}

/// Push float residue onto the last clip and verify the sum invariant.
fn close_to_target(plans: &mut Vec<ClipPlan>, target: f64) -> Result<(), TimelineError> {
    if plans.is_empty() {
        return Ok(());
    }

    let total: f64 = plans.iter().map(|p| p.duration).sum();
    let residual = target - total;
    if residual.abs() > SUM_EPSILON {
        if let Some(last) = plans.last_mut() {
            if last.duration + residual >= MIN_CLIP_SECONDS {
                last.duration += residual;
            }
        }
    }

    let total: f64 = plans.iter().map(|p| p.duration).sum();
    let drift = (total - target).abs();
    if drift >= SUM_EPSILON {
        return Err(TimelineError::DriftExceeded(drift));
    }
    Ok(())
}

/// Aggregate view of an allocated timeline, for logging.
pub fn summarize_timeline(plans: &[ClipPlan], target_seconds: f64) -> TimelineSummary {
    let photo: Vec<f64> = plans
        .iter()
        .filter(|p| p.kind.is_photo())
        .map(|p| p.duration)
        .collect();
    let video: Vec<f64> = plans
        .iter()
        .filter(|p| p.kind.is_video())
        .map(|p| p.duration)
        .collect();

    let avg = |v: &[f64]| {
        if v.is_empty() {
            0.0
        } else {
            v.iter().sum::<f64>() / v.len() as f64
        }
    };

    TimelineSummary {
        target_seconds,
        total_planned: plans.iter().map(|p| p.duration).sum(),
        photo_count: photo.len(),
        video_count: video.len(),
        per_photo: avg(&photo),
        per_video: avg(&video),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn photo(name: &str) -> MediaDescriptor {
        MediaDescriptor {
            path: PathBuf::from(format!("/media/{name}")),
            kind: MediaKind::Photo,
            captured_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    fn video(name: &str) -> MediaDescriptor {
        MediaDescriptor {
            path: PathBuf::from(format!("/media/{name}")),
            kind: MediaKind::Video,
            captured_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    fn durations(entries: &[(&MediaDescriptor, f64)]) -> VideoDurations {
        entries
            .iter()
            .map(|(m, d)| (m.path.clone(), *d))
            .collect()
    }

    fn total(plans: &[ClipPlan]) -> f64 {
        plans.iter().map(|p| p.duration).sum()
    }

    #[test]
    fn test_empty_input_empty_plan() {
        let plans = build_timeline(
            &[],
            &TimelineParams::with_target(60.0),
            &VideoDurations::new(),
        )
        .unwrap();
        assert!(plans.is_empty());
    }

    #[test]
    fn test_invalid_target() {
        let err = build_timeline(
            &[photo("a.jpg")],
            &TimelineParams::with_target(0.0),
            &VideoDurations::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TimelineError::InvalidTarget(_)));
    }

    #[test]
    fn test_even_ten_photos_stretch_to_six_seconds() {
        let items: Vec<_> = (0..10).map(|i| photo(&format!("p{i}.jpg"))).collect();
        let plans = build_timeline(
            &items,
            &TimelineParams::with_target(60.0),
            &VideoDurations::new(),
        )
        .unwrap();

        assert_eq!(plans.len(), 10);
        for plan in &plans {
            assert!((plan.duration - 6.0).abs() < 1e-6);
        }
        assert!((total(&plans) - 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_even_thirteen_videos_trim_to_twelve() {
        let items: Vec<_> = (0..13).map(|i| video(&format!("v{i}.mp4"))).collect();
        let map: VideoDurations = items.iter().map(|i| (i.path.clone(), 5.0)).collect();
        let plans = build_timeline(&items, &TimelineParams::with_target(60.0), &map).unwrap();

        // 13 x 5s seeds overshoot; the 13th clip's remainder is zero so
        // it gets dropped rather than kept at an unrepresentable length.
        assert_eq!(plans.len(), 12);
        for plan in &plans {
            assert!((plan.duration - 5.0).abs() < 1e-6);
        }
        assert!((total(&plans) - 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_even_trim_sets_exact_remainder() {
        let items: Vec<_> = (0..30).map(|i| photo(&format!("p{i}.jpg"))).collect();
        let plans = build_timeline(
            &items,
            &TimelineParams::with_target(61.0),
            &VideoDurations::new(),
        )
        .unwrap();

        // Trailing seeds are popped whole until 24 clips fit under the
        // target; the survivor then stretches to the 3.5s remainder.
        assert_eq!(plans.len(), 24);
        assert!((plans.last().unwrap().duration - 3.5).abs() < 1e-6);
        assert!((total(&plans) - 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_even_trim_drops_oversized_trailing_clip() {
        let v1 = video("a.mp4");
        let v2 = video("b.mp4");
        let map = durations(&[(&v1, 3.0), (&v2, 9.0)]);
        let mut params = TimelineParams::with_target(10.0);
        params.video_max_seconds = 20.0;

        // Seeds [3, 9] overshoot by 2s: the 9s clip is dropped whole,
        // never kept shortened, and the survivor takes the full target.
        let plans = build_timeline(&[v1.clone(), v2], &params, &map).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].path, v1.path);
        assert!((plans[0].duration - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_even_videos_grow_before_photos() {
        let v1 = video("long.mp4");
        let p1 = photo("a.jpg");
        let items = vec![v1.clone(), p1];
        let map = durations(&[(&v1, 12.0)]);
        let params = TimelineParams::with_target(20.0);
        let plans = build_timeline(&items, &params, &map).unwrap();

        // Video seeds at the 5s cap, grows to its true 12s, photo takes
        // the remaining 8s even though that exceeds the photo seed.
        assert!((plans[0].duration - 12.0).abs() < 1e-6);
        assert!((plans[1].duration - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_even_videos_only_slack_on_last() {
        let v1 = video("a.mp4");
        let v2 = video("b.mp4");
        let map = durations(&[(&v1, 3.0), (&v2, 3.0)]);
        let plans =
            build_timeline(&[v1, v2], &TimelineParams::with_target(10.0), &map).unwrap();

        assert!((plans[0].duration - 3.0).abs() < 1e-6);
        assert!((plans[1].duration - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_weighted_ratio_holds_uncapped() {
        let items = vec![photo("a.jpg"), video("v.mp4"), photo("b.jpg")];
        let v_path = items[1].path.clone();
        let mut map = VideoDurations::new();
        map.insert(v_path, 100.0);

        let mut params = TimelineParams::with_target(5.0).with_mode(TimelineMode::Weighted);
        params.video_weight = 3.0;
        let plans = build_timeline(&items, &params, &map).unwrap();

        // Pool weight 5: photos get 1s each, the video three times that.
        assert!((plans[0].duration - 1.0).abs() < 1e-6);
        assert!((plans[1].duration - 3.0).abs() < 1e-6);
        assert!((plans[2].duration - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_weighted_caps_redistribute() {
        let items = vec![video("v.mp4"), photo("a.jpg"), photo("b.jpg")];
        let map = durations(&[(&items[0], 100.0)]);
        let mut params = TimelineParams::with_target(15.0).with_mode(TimelineMode::Weighted);
        params.video_weight = 10.0;
        let plans = build_timeline(&items, &params, &map).unwrap();

        // Raw share would give the video 12.5s; it pins at the 5s cap
        // and the photos split the remaining 10s.
        assert!((plans[0].duration - 5.0).abs() < 1e-6);
        assert!((plans[1].duration - 5.0).abs() < 1e-6);
        assert!((plans[2].duration - 5.0).abs() < 1e-6);
        assert!((total(&plans) - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_weighted_rejects_nonpositive_weight() {
        let mut params = TimelineParams::with_target(10.0).with_mode(TimelineMode::Weighted);
        params.video_weight = 0.0;
        let err =
            build_timeline(&[photo("a.jpg")], &params, &VideoDurations::new()).unwrap_err();
        assert!(matches!(err, TimelineError::InvalidWeight(_)));
    }

    #[test]
    fn test_preserve_videos_over_target_drops_photos_and_trims() {
        let v1 = video("a.mp4");
        let v2 = video("b.mp4");
        let items = vec![v1.clone(), photo("p.jpg"), v2.clone()];
        let map = durations(&[(&v1, 40.0), (&v2, 40.0)]);

        let params =
            TimelineParams::with_target(60.0).with_mode(TimelineMode::PreserveVideos);
        let plans = build_timeline(&items, &params, &map).unwrap();

        assert_eq!(plans.len(), 2);
        assert!(plans.iter().all(|p| p.kind.is_video()));
        assert!((plans[0].duration - 40.0).abs() < 1e-6);
        assert!((plans[1].duration - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_preserve_videos_photos_share_remainder() {
        let v = video("a.mp4");
        let items = vec![v.clone(), photo("p1.jpg"), photo("p2.jpg")];
        let map = durations(&[(&v, 10.0)]);

        let params =
            TimelineParams::with_target(20.0).with_mode(TimelineMode::PreserveVideos);
        let plans = build_timeline(&items, &params, &map).unwrap();

        assert!((plans[0].duration - 10.0).abs() < 1e-6);
        assert!((plans[1].duration - 5.0).abs() < 1e-6);
        assert!((plans[2].duration - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_preserve_videos_photo_cap_leftover_to_last() {
        let v = video("a.mp4");
        let items = vec![v.clone(), photo("p1.jpg"), photo("p2.jpg")];
        let map = durations(&[(&v, 10.0)]);

        // 20s remain for 2 photos but the cap is 6s; the 8s surplus
        // lands on the last clip.
        let params =
            TimelineParams::with_target(30.0).with_mode(TimelineMode::PreserveVideos);
        let plans = build_timeline(&items, &params, &map).unwrap();

        assert!((plans[1].duration - 6.0).abs() < 1e-6);
        assert!((plans[2].duration - 14.0).abs() < 1e-6);
        assert!((total(&plans) - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_video_duration_uses_cap() {
        let items = vec![video("mystery.mp4")];
        let plans = build_timeline(
            &items,
            &TimelineParams::with_target(5.0),
            &VideoDurations::new(),
        )
        .unwrap();
        assert!((plans[0].duration - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_idempotent() {
        let items: Vec<_> = (0..7)
            .map(|i| {
                if i % 2 == 0 {
                    photo(&format!("p{i}.jpg"))
                } else {
                    video(&format!("v{i}.mp4"))
                }
            })
            .collect();
        let map: VideoDurations = items
            .iter()
            .filter(|i| i.kind.is_video())
            .map(|i| (i.path.clone(), 4.2))
            .collect();
        let params = TimelineParams::with_target(33.0);

        let first = build_timeline(&items, &params, &map).unwrap();
        let second = build_timeline(&items, &params, &map).unwrap();
        assert_eq!(first, second);
        assert!((total(&first) - 33.0).abs() < 1e-6);
    }

    #[test]
    fn test_sum_closure_across_modes() {
        let items: Vec<_> = (0..5)
            .map(|i| {
                if i < 3 {
                    photo(&format!("p{i}.jpg"))
                } else {
                    video(&format!("v{i}.mp4"))
                }
            })
            .collect();
        let map: VideoDurations = items
            .iter()
            .filter(|i| i.kind.is_video())
            .map(|i| (i.path.clone(), 7.7))
            .collect();

        for mode in [
            TimelineMode::Even,
            TimelineMode::Weighted,
            TimelineMode::PreserveVideos,
        ] {
            let params = TimelineParams::with_target(23.0).with_mode(mode);
            let plans = build_timeline(&items, &params, &map).unwrap();
            assert!(
                (total(&plans) - 23.0).abs() < 1e-6,
                "mode {mode} drifted: {}",
                total(&plans)
            );
            assert!(plans.iter().all(|p| p.duration > 0.0));
        }
    }

    #[test]
    fn test_summary() {
        let plans = vec![
            ClipPlan::new("/a.jpg", MediaKind::Photo, 2.0),
            ClipPlan::new("/b.jpg", MediaKind::Photo, 4.0),
            ClipPlan::new("/c.mp4", MediaKind::Video, 6.0),
        ];
        let summary = summarize_timeline(&plans, 12.0);
        assert_eq!(summary.photo_count, 2);
        assert_eq!(summary.video_count, 1);
        assert!((summary.per_photo - 3.0).abs() < 1e-9);
        assert!((summary.per_video - 6.0).abs() < 1e-9);
        assert!((summary.total_planned - 12.0).abs() < 1e-9);
    }
}
