use chrono::NaiveTime;
use execution_types::{ExecutionPhase, PegType};

/// Which intraday phase a wall-clock exchange-local time falls into.
/// Half-day closes are not modeled here; callers feed an already-adjusted
/// session end when the exchange closes early.
pub fn phase_for_time(time: NaiveTime, open: NaiveTime, close: NaiveTime) -> ExecutionPhase {
    if time < open || time >= close {
        return ExecutionPhase::MarketClosed;
    }
    let urgency_ramp_start = open + chrono::Duration::minutes(300);
    let deadline_close_start = close - chrono::Duration::minutes(30);
    let passive_start = open + chrono::Duration::minutes(60);

    if time < passive_start {
        ExecutionPhase::OpenAvoidance
    } else if time < urgency_ramp_start {
        ExecutionPhase::PassiveAccumulation
    } else if time < deadline_close_start {
        ExecutionPhase::UrgencyRamp
    } else {
        ExecutionPhase::DeadlineClose
    }
}

pub fn default_peg(phase: ExecutionPhase) -> PegType {
    match phase {
        ExecutionPhase::OpenAvoidance => PegType::FarTouch,
        ExecutionPhase::PassiveAccumulation => PegType::Mid,
        ExecutionPhase::UrgencyRamp => PegType::NearTouch,
        ExecutionPhase::DeadlineClose => PegType::Inside75,
        ExecutionPhase::MarketClosed => PegType::Mid,
    }
}

/// Pegs the phase allows, in the fixed passive-to-aggressive order from
/// `PegType::RANKED`, filtered down to what this phase permits.
pub fn allowed_pegs(phase: ExecutionPhase) -> Vec<PegType> {
    PegType::RANKED
        .iter()
        .copied()
        .filter(|peg| phase_allows_peg(phase, *peg))
        .collect()
}

fn phase_allows_peg(phase: ExecutionPhase, peg: PegType) -> bool {
    let crosses = matches!(peg, PegType::Cross | PegType::Market);
    match phase {
        ExecutionPhase::OpenAvoidance => !crosses && peg != PegType::Market,
        ExecutionPhase::PassiveAccumulation => !crosses,
        ExecutionPhase::UrgencyRamp => !crosses,
        ExecutionPhase::DeadlineClose => true,
        ExecutionPhase::MarketClosed => false,
    }
}

pub fn max_adv_fraction(phase: ExecutionPhase) -> Option<f64> {
    match phase {
        ExecutionPhase::OpenAvoidance => Some(0.02),
        ExecutionPhase::PassiveAccumulation => Some(0.10),
        ExecutionPhase::UrgencyRamp => Some(0.25),
        ExecutionPhase::DeadlineClose => None,
        ExecutionPhase::MarketClosed => Some(0.0),
    }
}

pub fn phase_urgency(phase: ExecutionPhase) -> f64 {
    match phase {
        ExecutionPhase::OpenAvoidance => 0.0,
        ExecutionPhase::PassiveAccumulation => 0.2,
        ExecutionPhase::UrgencyRamp => 0.5,
        ExecutionPhase::DeadlineClose => 0.9,
        ExecutionPhase::MarketClosed => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn session() -> (NaiveTime, NaiveTime) {
        (t(9, 30), t(16, 0))
    }

    #[test]
    fn open_avoidance_runs_first_hour() {
        let (open, close) = session();
        assert_eq!(phase_for_time(t(9, 45), open, close), ExecutionPhase::OpenAvoidance);
    }

    #[test]
    fn passive_accumulation_covers_midday() {
        let (open, close) = session();
        assert_eq!(phase_for_time(t(12, 0), open, close), ExecutionPhase::PassiveAccumulation);
    }

    #[test]
    fn deadline_close_covers_last_half_hour() {
        let (open, close) = session();
        assert_eq!(phase_for_time(t(15, 45), open, close), ExecutionPhase::DeadlineClose);
    }

    #[test]
    fn outside_session_is_market_closed() {
        let (open, close) = session();
        assert_eq!(phase_for_time(t(8, 0), open, close), ExecutionPhase::MarketClosed);
        assert_eq!(phase_for_time(t(16, 30), open, close), ExecutionPhase::MarketClosed);
    }

    #[test]
    fn open_avoidance_disallows_crossing_pegs() {
        let pegs = allowed_pegs(ExecutionPhase::OpenAvoidance);
        assert!(!pegs.contains(&PegType::Cross));
        assert!(!pegs.contains(&PegType::Market));
        assert!(pegs.contains(&PegType::FarTouch));
    }

    #[test]
    fn deadline_close_allows_everything() {
        let pegs = allowed_pegs(ExecutionPhase::DeadlineClose);
        assert_eq!(pegs.len(), PegType::RANKED.len());
    }
}
