//! Post-processing stages over a chronological fix sequence.
//!
//! Neither stage runs inside the tracker; callers apply them to a history
//! snapshot when they want a cleaner track.

use tracing::debug;

use super::Fix;
use crate::geo::distance;

pub const DEFAULT_MAX_SPEED_MPS: f64 = 50.0;
pub const DEFAULT_SMOOTHING_WINDOW: usize = 3;

/// Drop fixes implying a speed above `max_speed_mps` from the previous kept fix.
///
/// Causal and single-pass: the first fix is always kept, each later fix is
/// compared only against the last fix already kept, and a dropped fix never
/// becomes the reference. A fix whose timestamp does not advance past the
/// reference cannot yield a speed and is dropped as well.
pub fn filter_outliers(history: &[Fix], max_speed_mps: f64) -> Vec<Fix> {
    let mut kept: Vec<Fix> = Vec::with_capacity(history.len());

    for fix in history {
        let Some(prev) = kept.last() else {
            kept.push(fix.clone());
            continue;
        };

        let elapsed_s = (fix.timestamp_ms - prev.timestamp_ms) as f64 / 1000.0;
        if elapsed_s <= 0.0 {
            debug!(timestamp_ms = fix.timestamp_ms, "outlier: timestamp did not advance");
            continue;
        }

        let speed = distance(prev.coordinate(), fix.coordinate()) / elapsed_s;
        if speed > max_speed_mps {
            debug!(
                timestamp_ms = fix.timestamp_ms,
                speed_mps = speed,
                max_speed_mps,
                "outlier: implied speed too high"
            );
            continue;
        }
        kept.push(fix.clone());
    }

    kept
}

/// Trailing moving average over `window_size` fixes.
///
/// Emits one fix per full window, averaging latitude, longitude and accuracy;
/// every other field comes from the newest fix of the window. Sequences
/// shorter than the window come back unchanged.
pub fn smooth(fixes: &[Fix], window_size: usize) -> Vec<Fix> {
    if window_size == 0 || fixes.len() < window_size {
        return fixes.to_vec();
    }

    let n = window_size as f64;
    fixes
        .windows(window_size)
        .map(|window| {
            let (lat, lon, acc) = window.iter().fold((0.0, 0.0, 0.0), |(lat, lon, acc), f| {
                (lat + f.latitude, lon + f.longitude, acc + f.accuracy_meters)
            });
            let newest = &window[window_size - 1];
            Fix {
                latitude: lat / n,
                longitude: lon / n,
                accuracy_meters: acc / n,
                ..newest.clone()
            }
        })
        .collect()
}
