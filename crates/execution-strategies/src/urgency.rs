use execution_types::ExecutionPhase;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct UrgencyWeights {
    pub time: f64,
    pub fill: f64,
    pub phase: f64,
}

impl Default for UrgencyWeights {
    fn default() -> Self {
        Self { time: 0.5, fill: 0.3, phase: 0.2 }
    }
}

impl UrgencyWeights {
    /// Normalizes to sum to 1 if the caller's weights don't already.
    pub fn normalized(self) -> Self {
        let sum = self.time + self.fill + self.phase;
        if sum <= 0.0 || (sum - 1.0).abs() < 1e-9 {
            self
        } else {
            Self { time: self.time / sum, fill: self.fill / sum, phase: self.phase / sum }
        }
    }
}

/// Retained alongside the execution for observability, mirroring the
/// original scorer's debug-oriented factors dataclass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UrgencyBreakdown {
    pub time_urgency: f64,
    pub fill_urgency: f64,
    pub phase_urgency: f64,
    pub combined: f64,
}

/// Session-progress-driven urgency: linear to 0.5 over the first 80% of the
/// session, exponential ramp to 1.0 over the final 20% with exponent `e`
/// (default 2.5, configurable per the original scorer's constructor param).
pub fn time_urgency(elapsed_seconds: f64, total_seconds: f64, ramp_exponent: f64) -> f64 {
    if total_seconds <= 0.0 {
        return 1.0;
    }
    if elapsed_seconds <= 0.0 {
        return 0.0;
    }
    let p = (elapsed_seconds / total_seconds).clamp(0.0, 1.0);
    if p <= 0.8 {
        (p / 0.8) * 0.5
    } else {
        0.5 + 0.5 * ((p - 0.8) / 0.2).powf(ramp_exponent)
    }
}

/// Deficit between an expected-linear-fill baseline and actual progress.
pub fn fill_urgency(elapsed_seconds: f64, total_seconds: f64, filled_ratio: f64) -> f64 {
    if total_seconds <= 0.0 {
        return if filled_ratio >= 1.0 { 0.0 } else { 1.0 };
    }
    let p = (elapsed_seconds / total_seconds).clamp(0.0, 1.0);
    let deficit = p - filled_ratio;
    if deficit <= 0.0 {
        0.0
    } else {
        (deficit * 2.0).min(1.0)
    }
}

pub fn phase_urgency(phase: ExecutionPhase) -> f64 {
    crate::phases::phase_urgency(phase)
}

pub fn combined_urgency(
    elapsed_seconds: f64,
    total_seconds: f64,
    filled_ratio: f64,
    phase: ExecutionPhase,
    ramp_exponent: f64,
    weights: UrgencyWeights,
) -> UrgencyBreakdown {
    let weights = weights.normalized();
    let time = time_urgency(elapsed_seconds, total_seconds, ramp_exponent);
    let fill = fill_urgency(elapsed_seconds, total_seconds, filled_ratio);
    let phase_score = phase_urgency(phase);
    let combined = (weights.time * time + weights.fill * fill + weights.phase * phase_score).clamp(0.0, 1.0);
    UrgencyBreakdown { time_urgency: time, fill_urgency: fill, phase_urgency: phase_score, combined }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_urgency_is_zero_before_session_start() {
        assert_eq!(time_urgency(0.0, 1000.0, 2.5), 0.0);
    }

    #[test]
    fn time_urgency_is_linear_before_80_percent() {
        let u = time_urgency(400.0, 1000.0, 2.5);
        assert!((u - 0.25).abs() < 1e-9);
    }

    #[test]
    fn time_urgency_reaches_one_at_deadline() {
        let u = time_urgency(1000.0, 1000.0, 2.5);
        assert!((u - 1.0).abs() < 1e-9);
    }

    #[test]
    fn time_urgency_is_full_once_deadline_passed() {
        assert_eq!(time_urgency(100.0, 0.0, 2.5), 1.0);
    }

    #[test]
    fn fill_urgency_is_zero_when_ahead_of_schedule() {
        assert_eq!(fill_urgency(500.0, 1000.0, 0.8), 0.0);
    }

    #[test]
    fn fill_urgency_scales_with_deficit() {
        let u = fill_urgency(500.0, 1000.0, 0.3);
        assert!((u - 0.4).abs() < 1e-9);
    }

    #[test]
    fn fill_urgency_is_one_when_deadline_passed_and_incomplete() {
        assert_eq!(fill_urgency(100.0, 0.0, 0.9), 1.0);
        assert_eq!(fill_urgency(100.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn weights_normalize_when_they_dont_sum_to_one() {
        let w = UrgencyWeights { time: 1.0, fill: 1.0, phase: 1.0 }.normalized();
        assert!((w.time + w.fill + w.phase - 1.0).abs() < 1e-9);
    }

    #[test]
    fn combined_score_is_clamped_to_unit_interval() {
        let breakdown = combined_urgency(1000.0, 1000.0, 0.0, ExecutionPhase::DeadlineClose, 2.5, UrgencyWeights::default());
        assert!(breakdown.combined <= 1.0);
        assert!(breakdown.combined >= 0.0);
    }
}
