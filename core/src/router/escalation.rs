use crate::profile::ProfileKey;
use crate::task::{ConfidenceBand, EscalationReason, EscalationResponse, Task, TaskResult};

/// Everything a policy may look at when deciding an escalation.
#[derive(Debug, Clone, Copy)]
pub struct EscalationContext<'a> {
    pub task: &'a Task,
    pub reason: EscalationReason,
    pub result: Option<&'a TaskResult>,
    /// Attempts made so far, this one included.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Untried candidates, best first, default profile last.
    pub alternates: &'a [ProfileKey],
    pub retry_on_low_confidence: bool,
    pub detail: Option<&'a str>,
}

impl EscalationContext<'_> {
    pub fn band(&self) -> Option<ConfidenceBand> {
        self.result.and_then(|r| r.confidence_band)
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts && !self.alternates.is_empty()
    }

    fn retry_or_surface(&self) -> EscalationResponse {
        match self.alternates.first() {
            Some(next) if self.attempt < self.max_attempts => {
                EscalationResponse::RetryWithProfile(next.clone())
            }
            _ => EscalationResponse::SurfaceToHuman,
        }
    }
}

/// Chooses what happens to a task that did not complete with confidence.
///
/// `None` means the policy had no answer; the router reports that as a
/// failure instead of dropping the escalation.
pub trait EscalationPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn respond(&self, ctx: &EscalationContext<'_>) -> Option<EscalationResponse>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardEscalationPolicy;

impl EscalationPolicy for StandardEscalationPolicy {
    fn name(&self) -> &str {
        "standard"
    }

    fn respond(&self, ctx: &EscalationContext<'_>) -> Option<EscalationResponse> {
        let response = match ctx.reason {
            EscalationReason::NoMatchingProfile => EscalationResponse::Abandon,
            EscalationReason::ExecutionError | EscalationReason::Timeout => ctx.retry_or_surface(),
            EscalationReason::LowConfidence => match ctx.band() {
                Some(ConfidenceBand::Review) => EscalationResponse::SurfaceToHuman,
                _ if ctx.retry_on_low_confidence => ctx.retry_or_surface(),
                _ => EscalationResponse::SurfaceToHuman,
            },
        };
        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ConfidenceSource, ResultStatus};

    fn result(band: ConfidenceBand) -> TaskResult {
        TaskResult {
            task_id: "t".into(),
            rep_used: ProfileKey::new("A", "1.0.0".parse().unwrap()),
            output: "out".into(),
            confidence: 0.4,
            status: ResultStatus::Escalated,
            execution_time_ms: 1,
            error: None,
            failure: None,
            confidence_band: Some(band),
            confidence_source: ConfidenceSource::Heuristic,
            context: None,
            attempt: 1,
        }
    }

    fn ctx<'a>(
        task: &'a Task,
        reason: EscalationReason,
        result: Option<&'a TaskResult>,
        alternates: &'a [ProfileKey],
        attempt: u32,
    ) -> EscalationContext<'a> {
        EscalationContext {
            task,
            reason,
            result,
            attempt,
            max_attempts: 2,
            alternates,
            retry_on_low_confidence: true,
            detail: None,
        }
    }

    #[test]
    fn test_standard_policy() {
        let policy = StandardEscalationPolicy;
        let task = Task::with_id("t", "x");
        let alt = [ProfileKey::new("GENERIC", "1.0.0".parse().unwrap())];

        let r = ctx(&task, EscalationReason::NoMatchingProfile, None, &alt, 1);
        assert_eq!(policy.respond(&r), Some(EscalationResponse::Abandon));

        let r = ctx(&task, EscalationReason::Timeout, None, &alt, 1);
        assert_eq!(
            policy.respond(&r),
            Some(EscalationResponse::RetryWithProfile(alt[0].clone()))
        );

        let r = ctx(&task, EscalationReason::ExecutionError, None, &alt, 2);
        assert_eq!(policy.respond(&r), Some(EscalationResponse::SurfaceToHuman));

        let r = ctx(&task, EscalationReason::ExecutionError, None, &[], 1);
        assert_eq!(policy.respond(&r), Some(EscalationResponse::SurfaceToHuman));
    }

    #[test]
    fn test_low_confidence_bands() {
        let policy = StandardEscalationPolicy;
        let task = Task::with_id("t", "x");
        let alt = [ProfileKey::new("GENERIC", "1.0.0".parse().unwrap())];

        let review = result(ConfidenceBand::Review);
        let r = ctx(&task, EscalationReason::LowConfidence, Some(&review), &alt, 1);
        assert_eq!(policy.respond(&r), Some(EscalationResponse::SurfaceToHuman));

        let low = result(ConfidenceBand::Low);
        let mut r = ctx(&task, EscalationReason::LowConfidence, Some(&low), &alt, 1);
        assert_eq!(
            policy.respond(&r),
            Some(EscalationResponse::RetryWithProfile(alt[0].clone()))
        );
        r.retry_on_low_confidence = false;
        assert_eq!(policy.respond(&r), Some(EscalationResponse::SurfaceToHuman));
    }
}
