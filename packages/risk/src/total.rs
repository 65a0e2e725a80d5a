//! Total plot risk from its direct and movement labels.

use crate::{RiskLevel, mean};

/// Averages the direct, inbound and outbound labels. Labels outside
/// `BAJO/MEDIO/ALTO` count as low.
#[must_use]
pub fn total_risk(direct: &str, inbound: &str, outbound: &str) -> RiskLevel {
    let score = mean(
        [direct, inbound, outbound]
            .into_iter()
            .map(|label| f64::from(RiskLevel::graded_value(label).unwrap_or(1))),
    );
    RiskLevel::classify_graded(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_three_labels() {
        assert_eq!(total_risk("ALTO", "ALTO", "MEDIO"), RiskLevel::High);
        assert_eq!(total_risk("ALTO", "MEDIO", "BAJO"), RiskLevel::Medium);
        assert_eq!(total_risk("MEDIO", "BAJO", "BAJO"), RiskLevel::Low);
    }

    #[test]
    fn unknown_labels_count_as_low() {
        assert_eq!(total_risk("BAJO", "", "SIN_RIESGO"), RiskLevel::Low);
        assert_eq!(total_risk("alto", "alto", "?"), RiskLevel::Medium);
    }
}
