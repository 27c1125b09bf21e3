use std::collections::HashSet;

use crate::task::ConfidenceSource;

use super::capability::CapabilityResponse;

// Cap for outputs that read like a failure report.
const ERROR_MARKER_CEILING: f64 = 0.3;
const COVERAGE_WEIGHT: f64 = 0.3;
const MIN_TERM_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceScore {
    pub value: f64,
    pub source: ConfidenceSource,
}

/// Scores capability output.
#[derive(Debug, Clone)]
pub struct ConfidenceEvaluator {
    heuristic_base: f64,
    error_markers: Vec<String>,
}

impl ConfidenceEvaluator {
    pub fn new<I, S>(heuristic_base: f64, error_markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            heuristic_base: clamp_unit(heuristic_base),
            error_markers: error_markers
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// Uses the self-report when it is a number, else the heuristic. Always
    /// within `[0, 1]`.
    pub fn evaluate_confidence(
        &self,
        response: &CapabilityResponse,
        expected_output: Option<&str>,
    ) -> ConfidenceScore {
        match response.confidence.filter(|c| !c.is_nan()) {
            Some(reported) => ConfidenceScore {
                value: clamp_unit(reported),
                source: ConfidenceSource::SelfReported,
            },
            None => ConfidenceScore {
                value: self.heuristic(&response.output, expected_output),
                source: ConfidenceSource::Heuristic,
            },
        }
    }

    /// Empty output scores 0. Output containing an error marker is capped
    /// low. Otherwise the base score rises with how many significant terms
    /// of the expected output appear.
    pub fn heuristic(&self, output: &str, expected_output: Option<&str>) -> f64 {
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return 0.0;
        }

        let lower = trimmed.to_lowercase();
        if self.error_markers.iter().any(|m| lower.contains(m.as_str())) {
            return self.heuristic_base.min(ERROR_MARKER_CEILING);
        }

        let coverage = expected_output.map(|e| term_coverage(&lower, e)).unwrap_or(0.0);
        clamp_unit(self.heuristic_base + COVERAGE_WEIGHT * coverage)
    }
}

fn term_coverage(output_lower: &str, expected: &str) -> f64 {
    let expected = expected.to_lowercase();
    let terms: HashSet<&str> = expected
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= MIN_TERM_LEN)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let present: HashSet<&str> = output_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let hits = terms.iter().filter(|t| present.contains(*t)).count();
    hits as f64 / terms.len() as f64
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> ConfidenceEvaluator {
        ConfidenceEvaluator::new(0.7, ["error:", "traceback"])
    }

    #[test]
    fn test_self_report_is_clamped() {
        let e = evaluator();
        let score = e.evaluate_confidence(&CapabilityResponse::output("x").with_confidence(1.7), None);
        assert_eq!(score.value, 1.0);
        assert_eq!(score.source, ConfidenceSource::SelfReported);

        let score = e.evaluate_confidence(&CapabilityResponse::output("x").with_confidence(-0.2), None);
        assert_eq!(score.value, 0.0);
    }

    #[test]
    fn test_nan_self_report_falls_back_to_heuristic() {
        let score = evaluator()
            .evaluate_confidence(&CapabilityResponse::output("done").with_confidence(f64::NAN), None);
        assert_eq!(score.source, ConfidenceSource::Heuristic);
        assert_eq!(score.value, 0.7);
    }

    #[test]
    fn test_heuristic() {
        let e = evaluator();
        assert_eq!(e.heuristic("   ", None), 0.0);
        assert_eq!(e.heuristic("Traceback (most recent call last)", None), 0.3);
        assert_eq!(e.heuristic("Endpoints: GET /users", None), 0.7);

        let full = e.heuristic(
            "GET /users returns users; POST /users creates one",
            Some("users endpoints creates"),
        );
        assert!((full - (0.7 + 0.3 * (2.0 / 3.0))).abs() < 1e-9, "{full}");
    }
}
