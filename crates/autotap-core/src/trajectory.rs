//! Swipe trajectory compression and replay reconstruction.
//!
//! Capture side: Douglas-Peucker simplification with a length-derived epsilon,
//! capped at 8 points. Replay side: a stored trajectory is turned back into a
//! short list of straight device swipes (one, two, or nine Bézier segments).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on stored points per trajectory.
pub const MAX_POINTS: usize = 8;
/// Samples taken along the Bézier curve for long trajectories.
pub const BEZIER_SAMPLES: usize = 10;
/// Pause between Bézier segments, keeps the device command queue from saturating.
pub const SEGMENT_PAUSE: Duration = Duration::from_millis(2);

const EPSILON_RATIO: f64 = 0.03;
const MIN_EPSILON: f64 = 10.0;
const MAX_EPSILON: f64 = 100.0;

/// One sampled point: position and capture time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(i32, i32, i64)", into = "(i32, i32, i64)")]
pub struct TrajectoryPoint {
    pub x: i32,
    pub y: i32,
    pub t_ms: i64,
}

impl TrajectoryPoint {
    pub fn new(x: i32, y: i32, t_ms: i64) -> Self {
        Self { x, y, t_ms }
    }

    pub fn distance_to(&self, other: &TrajectoryPoint) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        dx.hypot(dy)
    }
}

impl From<(i32, i32, i64)> for TrajectoryPoint {
    fn from((x, y, t_ms): (i32, i32, i64)) -> Self {
        Self { x, y, t_ms }
    }
}

impl From<TrajectoryPoint> for (i32, i32, i64) {
    fn from(p: TrajectoryPoint) -> Self {
        (p.x, p.y, p.t_ms)
    }
}

/// Distance from `point` to the line through `start` and `end`.
fn perpendicular_distance(
    point: &TrajectoryPoint,
    start: &TrajectoryPoint,
    end: &TrajectoryPoint,
) -> f64 {
    if start.x == end.x && start.y == end.y {
        return point.distance_to(start);
    }
    let (x0, y0) = (point.x as f64, point.y as f64);
    let (x1, y1) = (start.x as f64, start.y as f64);
    let (x2, y2) = (end.x as f64, end.y as f64);

    let numerator = ((y2 - y1) * x0 - (x2 - x1) * y0 + x2 * y1 - y2 * x1).abs();
    let denominator = (y2 - y1).hypot(x2 - x1);
    numerator / denominator
}

/// Total polyline length in pixels.
pub fn path_length(points: &[TrajectoryPoint]) -> f64 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}

/// Epsilon used when none is given: 3% of the path length, within [10, 100] px.
pub fn auto_epsilon(points: &[TrajectoryPoint]) -> f64 {
    (path_length(points) * EPSILON_RATIO).clamp(MIN_EPSILON, MAX_EPSILON)
}

/// Plain recursive Douglas-Peucker.
pub fn douglas_peucker(points: &[TrajectoryPoint], epsilon: f64) -> Vec<TrajectoryPoint> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let first = &points[0];
    let last = &points[points.len() - 1];

    let mut index = 0;
    let mut dmax = 0.0;
    for (i, point) in points.iter().enumerate().take(points.len() - 1).skip(1) {
        let d = perpendicular_distance(point, first, last);
        if d > dmax {
            index = i;
            dmax = d;
        }
    }

    if dmax > epsilon {
        let mut left = douglas_peucker(&points[..=index], epsilon);
        let right = douglas_peucker(&points[index..], epsilon);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![*first, *last]
    }
}

/// Capture-time simplification.
///
/// Keeps at most [`MAX_POINTS`] points, and never fewer than three when the
/// raw input had three or more: a collapsed result gets the raw point nearest
/// the temporal midpoint back.
pub fn simplify(raw: &[TrajectoryPoint], epsilon: Option<f64>) -> Vec<TrajectoryPoint> {
    if raw.len() <= 2 {
        return raw.to_vec();
    }
    let epsilon = epsilon.unwrap_or_else(|| auto_epsilon(raw));
    let simplified = douglas_peucker(raw, epsilon);

    if simplified.len() > MAX_POINTS {
        return resample(&simplified, MAX_POINTS);
    }
    if simplified.len() < 3 {
        let first = raw[0];
        let last = raw[raw.len() - 1];
        return vec![first, temporal_midpoint(raw), last];
    }
    simplified
}

/// Fixed-stride selection of `count` points, endpoints included.
fn resample(points: &[TrajectoryPoint], count: usize) -> Vec<TrajectoryPoint> {
    let last = points.len() - 1;
    let gaps = count - 1;
    (0..count).map(|k| points[k * last / gaps]).collect()
}

/// Interior raw point whose timestamp is closest to the middle of the span.
fn temporal_midpoint(raw: &[TrajectoryPoint]) -> TrajectoryPoint {
    let start = raw[0].t_ms;
    let end = raw[raw.len() - 1].t_ms;
    if end <= start {
        return raw[raw.len() / 2];
    }
    let mid = start + (end - start) / 2;
    raw[1..raw.len() - 1]
        .iter()
        .min_by_key(|p| (p.t_ms - mid).abs())
        .copied()
        .unwrap_or(raw[raw.len() / 2])
}

/// Binomial coefficient as f64 (n stays tiny here).
fn binomial(n: usize, k: usize) -> f64 {
    let k = k.min(n - k);
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

/// Point on the Bézier curve defined by `control` at parameter `t` in [0, 1].
pub fn bezier_point(control: &[(f64, f64)], t: f64) -> (f64, f64) {
    let Some(n) = control.len().checked_sub(1) else {
        return (0.0, 0.0);
    };
    control.iter().enumerate().fold((0.0, 0.0), |(bx, by), (i, &(px, py))| {
        let weight = binomial(n, i) * (1.0 - t).powi((n - i) as i32) * t.powi(i as i32);
        (bx + weight * px, by + weight * py)
    })
}

/// One straight device swipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwipeSegment {
    pub from: (i32, i32),
    pub to: (i32, i32),
    pub duration_ms: u64,
}

/// Device swipes reproducing a stored trajectory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SwipePlan {
    pub segments: Vec<SwipeSegment>,
    /// Sleep between consecutive segments.
    pub pause: Duration,
}

impl SwipePlan {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Expand a stored trajectory into device swipes lasting about `duration_ms`.
pub fn reconstruct(points: &[TrajectoryPoint], duration_ms: u64) -> SwipePlan {
    match points.len() {
        0 | 1 => SwipePlan::default(),
        2 => SwipePlan {
            segments: vec![segment(&points[0], &points[1], duration_ms)],
            pause: Duration::ZERO,
        },
        3 => {
            let total = points[2].t_ms - points[0].t_ms;
            let first_ms = if total > 0 {
                let span = (points[1].t_ms - points[0].t_ms).clamp(0, total);
                (duration_ms as f64 * span as f64 / total as f64).round() as u64
            } else {
                duration_ms / 2
            };
            SwipePlan {
                segments: vec![
                    segment(&points[0], &points[1], first_ms),
                    segment(&points[1], &points[2], duration_ms.saturating_sub(first_ms)),
                ],
                pause: Duration::ZERO,
            }
        }
        n => {
            let mut indices = vec![0, n / 4, n / 2, 3 * n / 4, n - 1];
            indices.dedup();
            let control: Vec<(f64, f64)> = indices
                .iter()
                .map(|&i| (points[i].x as f64, points[i].y as f64))
                .collect();

            let samples: Vec<(i32, i32)> = (0..BEZIER_SAMPLES)
                .map(|i| {
                    let t = i as f64 / (BEZIER_SAMPLES - 1) as f64;
                    let (x, y) = bezier_point(&control, t);
                    (x.round() as i32, y.round() as i32)
                })
                .collect();

            let per_segment = (duration_ms / (BEZIER_SAMPLES as u64 - 1)).max(1);
            SwipePlan {
                segments: samples
                    .windows(2)
                    .map(|w| SwipeSegment {
                        from: w[0],
                        to: w[1],
                        duration_ms: per_segment,
                    })
                    .collect(),
                pause: SEGMENT_PAUSE,
            }
        }
    }
}

fn segment(from: &TrajectoryPoint, to: &TrajectoryPoint, duration_ms: u64) -> SwipeSegment {
    SwipeSegment {
        from: (from.x, from.y),
        to: (to.x, to.y),
        duration_ms,
    }
}
