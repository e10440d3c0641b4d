//! Feature count cross-checks against known ground truth.

use tracing::warn;

use crate::config::CountConfig;
use crate::reference::KnownCount;
use crate::types::ValidationResult;

/// Compare a discovered count with the known count for the jurisdiction.
///
/// A missing ground-truth entry only degrades confidence. Implausibly low or
/// high counts are flagged whether or not an entry exists.
pub fn check_count(
    jurisdiction: &str,
    discovered: usize,
    known: Option<&KnownCount>,
    config: &CountConfig,
) -> ValidationResult {
    let mut result = ValidationResult::pass();

    match known {
        Some(known) => {
            let difference = discovered.abs_diff(known.count);
            if difference > config.tolerance {
                warn!(
                    jurisdiction = %jurisdiction,
                    discovered,
                    expected = known.count,
                    "Feature count mismatch"
                );
                result.fail(
                    format!(
                        "{} has {} features but {} lists {} (tolerance {})",
                        jurisdiction, discovered, known.source, known.count, config.tolerance
                    ),
                    0,
                );
            } else if difference > 0 {
                result.warn(
                    format!(
                        "{} has {} features, {} lists {}",
                        jurisdiction, discovered, known.source, known.count
                    ),
                    90,
                );
            }
        }
        None => result.warn(
            format!("no known feature count for {}", jurisdiction),
            80,
        ),
    }

    if discovered < config.low_threshold {
        result.warn(
            format!(
                "only {} features; jurisdiction may elect at large",
                discovered
            ),
            70,
        );
    } else if discovered > config.high_threshold {
        result.warn(
            format!(
                "{} features is unusually high; layer may be the wrong granularity",
                discovered
            ),
            50,
        );
    }

    result
}
