//! Recovery maneuver recommendation from history plus a directional heuristic.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::core::types::{Pos, RecoveryHistory, Strategy};

/// Returned when every maneuver has failed here; forward progress is still attempted.
pub const SAFE_DEFAULT: Strategy = Strategy::ReverseAndTurnRight;

/// Where a recommendation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceSource {
    /// Earliest recorded success at this exact location.
    Proven,
    /// Directional preference or first viable candidate.
    Heuristic,
    /// Preferred direction is a known failure; picked among viable ones.
    Randomized,
    /// All maneuvers have failed here.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub strategy: Strategy,
    pub source: AdviceSource,
    /// Known failures at this location, in recorded order.
    pub forbidden: Vec<Strategy>,
}

/// Maneuver preferred for the net movement still required.
///
/// North wins over east, east over west. Southbound-only travel has no preference.
pub fn directional_preference(location: Pos, target: Pos) -> Option<Strategy> {
    let dx = target.x - location.x;
    let dy = target.y - location.y;
    if dy > 0 {
        Some(Strategy::ReverseOnly)
    } else if dx > 0 {
        Some(Strategy::ReverseAndTurnRight)
    } else if dx < 0 {
        Some(Strategy::ReverseAndTurnLeft)
    } else {
        None
    }
}

pub fn recommend<R: Rng + ?Sized>(
    history: &RecoveryHistory,
    location: Pos,
    target: Pos,
    rng: &mut R,
) -> Recommendation {
    let forbidden = history.failures.clone();

    if let Some(&proven) = history.successes.first() {
        return Recommendation {
            strategy: proven,
            source: AdviceSource::Proven,
            forbidden,
        };
    }

    let viable: Vec<Strategy> = Strategy::CANDIDATES
        .into_iter()
        .filter(|strategy| !history.has_failed(*strategy))
        .collect();
    let Some(&first_viable) = viable.first() else {
        return Recommendation {
            strategy: SAFE_DEFAULT,
            source: AdviceSource::Fallback,
            forbidden,
        };
    };

    let (strategy, source) = match directional_preference(location, target) {
        Some(preferred) if !history.has_failed(preferred) => (preferred, AdviceSource::Heuristic),
        Some(_) => {
            let picked = viable.choose(rng).copied().unwrap_or(first_viable);
            (picked, AdviceSource::Randomized)
        }
        None => (first_viable, AdviceSource::Heuristic),
    };

    Recommendation {
        strategy,
        source,
        forbidden,
    }
}
