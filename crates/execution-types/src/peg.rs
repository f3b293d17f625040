use serde::{Deserialize, Serialize};

/// Named pricing strategy relative to the NBBO, ordered from most passive to
/// most aggressive. Order matters: index into the allowed-peg list is driven
/// by this ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PegType {
    FarTouch,
    Mid,
    NearTouch,
    Inside25,
    Inside50,
    Inside75,
    Inside90,
    Cross,
    Market,
}

impl PegType {
    /// Full ranking, most passive first.
    pub const RANKED: [PegType; 9] = [
        PegType::FarTouch,
        PegType::Mid,
        PegType::NearTouch,
        PegType::Inside25,
        PegType::Inside50,
        PegType::Inside75,
        PegType::Inside90,
        PegType::Cross,
        PegType::Market,
    ];

    /// Ratio `r` into [bid, ask] used for peg pricing: `price = bid + (ask -
    /// bid) * r` for BUY, symmetric for SELL. `None` for `Market`, which
    /// skips limit pricing entirely.
    pub fn price_ratio(self) -> Option<f64> {
        match self {
            PegType::FarTouch => Some(0.0),
            PegType::Mid => Some(0.5),
            PegType::NearTouch => Some(1.0),
            PegType::Inside25 => Some(0.25),
            PegType::Inside50 => Some(0.50),
            PegType::Inside75 => Some(0.75),
            PegType::Inside90 => Some(0.90),
            PegType::Cross => Some(1.0),
            PegType::Market => None,
        }
    }
}
