/// Summarization batch states
///
/// A batch moves `Pending -> Mapping -> Reducing -> Complete`. `Failed` is
/// reachable from `Mapping` and `Reducing`.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Created, no provider call issued yet
    Pending,

    /// Per-chunk summaries are being produced
    Mapping,

    /// Partial summaries are being combined, possibly recursively
    Reducing,

    // ===== Terminal States =====
    Complete,

    Failed,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether a batch in this state may move to `next`
    pub fn can_transition_to(&self, next: EngineState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Mapping)
                | (Self::Mapping, Self::Reducing)
                | (Self::Mapping, Self::Failed)
                | (Self::Reducing, Self::Complete)
                | (Self::Reducing, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Mapping => "mapping",
            Self::Reducing => "reducing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
