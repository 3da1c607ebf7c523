use crate::workflow::markers::ReviewVerdict;

/// What the driver should do after a review pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    /// No issues reported; the loop is done.
    Converged,
    /// Run the fix step, then review again.
    Fix,
    /// Review again without fixing.
    Retry,
    /// Iteration cap reached with issues outstanding; the loop is done.
    Exhausted,
}

/// Review/fix loop state. Any verdict observed at `iteration == max`
/// terminates the loop, so at most `max` reviews run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewLoop {
    max: u32,
    iteration: u32,
    terminated: bool,
}

impl ReviewLoop {
    /// `max` is clamped to at least one iteration.
    pub fn new(max: u32) -> Self {
        Self {
            max: max.max(1),
            iteration: 0,
            terminated: false,
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Start the next iteration, returning its 1-based index.
    pub fn begin_iteration(&mut self) -> Option<u32> {
        if self.terminated {
            return None;
        }
        if self.iteration >= self.max {
            self.terminated = true;
            return None;
        }
        self.iteration += 1;
        Some(self.iteration)
    }

    pub fn observe(&mut self, verdict: ReviewVerdict) -> LoopDecision {
        let last = self.iteration >= self.max;
        let decision = match verdict {
            ReviewVerdict::Clean => LoopDecision::Converged,
            ReviewVerdict::IssuesFound if last => LoopDecision::Exhausted,
            ReviewVerdict::IssuesFound => LoopDecision::Fix,
            ReviewVerdict::Inconclusive if last => LoopDecision::Exhausted,
            ReviewVerdict::Inconclusive => LoopDecision::Retry,
        };
        if matches!(decision, LoopDecision::Converged | LoopDecision::Exhausted) {
            self.terminated = true;
        }
        decision
    }
}
