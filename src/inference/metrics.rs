//! Latency metrics derived from inference timestamps

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Per-request latency breakdown
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceMetrics {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub prefill_time_ms: f64,
    pub decode_time_ms: f64,
    pub ttft_ms: f64,
}

/// Compute metrics from start/end timestamps in seconds.
///
/// The output is not streamed, so `ttft_ms` is the whole call. `prefill_time_ms`
/// needs a second start sample and is 0 otherwise.
pub fn calculate_metrics(
    start_times: &[f64],
    end_times: &[f64],
    input_tokens: usize,
    output_tokens: usize,
) -> InferenceMetrics {
    let prefill = match start_times {
        [first, second, ..] => (second - first) * 1000.0,
        _ => 0.0,
    };

    let (ttft, decode) = match (
        start_times.first(),
        end_times.first(),
        start_times.last(),
        end_times.last(),
    ) {
        (Some(first_start), Some(first_end), Some(last_start), Some(last_end)) => (
            (first_end - first_start) * 1000.0,
            (last_end - last_start) * 1000.0,
        ),
        _ => (0.0, 0.0),
    };

    InferenceMetrics {
        input_tokens,
        output_tokens,
        prefill_time_ms: round2(prefill),
        decode_time_ms: round2(decode),
        ttft_ms: round2(ttft),
    }
}

/// Whitespace-separated word count, used as the output token estimate
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Wall-clock time in seconds since the Unix epoch
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
