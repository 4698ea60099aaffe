/// Lifecycle state definitions for a reporter within one cover
use std::fmt;

/// Represents the current state of a reporter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Reporter exists but has not started its fetch
    Created,

    /// HTTP request in flight
    Fetching,

    /// Item available (fetched, or preloaded from intel)
    Fetched,

    /// Transport error or non-200 response; no item
    FetchFailed,

    /// Children are being selected and dispatched
    Dispatching,

    /// Subtree drained
    Done,
}

impl NodeState {
    /// Returns true if the reporter may move from `self` to `next`
    pub fn can_transition_to(&self, next: NodeState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Fetching)
                | (Self::Created, Self::Fetched)
                | (Self::Fetching, Self::Fetched)
                | (Self::Fetching, Self::FetchFailed)
                | (Self::FetchFailed, Self::Fetching)
                | (Self::Fetched, Self::Dispatching)
                | (Self::FetchFailed, Self::Dispatching)
                | (Self::Dispatching, Self::Done)
        )
    }

    /// Returns true once the reporter's subtree is drained
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true if the fetch step has finished, successfully or not
    pub fn has_fetched(&self) -> bool {
        !matches!(self, Self::Created | Self::Fetching)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Fetching => "fetching",
            Self::Fetched => "fetched",
            Self::FetchFailed => "fetch_failed",
            Self::Dispatching => "dispatching",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let path = [
            NodeState::Created,
            NodeState::Fetching,
            NodeState::Fetched,
            NodeState::Dispatching,
            NodeState::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failed_fetch_still_dispatches() {
        assert!(NodeState::Fetching.can_transition_to(NodeState::FetchFailed));
        assert!(NodeState::FetchFailed.can_transition_to(NodeState::Dispatching));
    }

    #[test]
    fn test_failed_fetch_may_retry() {
        assert!(NodeState::FetchFailed.can_transition_to(NodeState::Fetching));
    }

    #[test]
    fn test_intel_skips_fetch() {
        assert!(NodeState::Created.can_transition_to(NodeState::Fetched));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!NodeState::Done.can_transition_to(NodeState::Fetching));
        assert!(!NodeState::Created.can_transition_to(NodeState::Dispatching));
        assert!(!NodeState::Fetched.can_transition_to(NodeState::Fetching));
        assert!(!NodeState::Dispatching.can_transition_to(NodeState::Fetched));
    }

    #[test]
    fn test_is_terminal() {
        assert!(NodeState::Done.is_terminal());
        assert!(!NodeState::Dispatching.is_terminal());
        assert!(!NodeState::FetchFailed.is_terminal());
    }

    #[test]
    fn test_has_fetched() {
        assert!(!NodeState::Created.has_fetched());
        assert!(!NodeState::Fetching.has_fetched());
        assert!(NodeState::Fetched.has_fetched());
        assert!(NodeState::FetchFailed.has_fetched());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", NodeState::FetchFailed), "fetch_failed");
        assert_eq!(format!("{}", NodeState::Done), "done");
    }
}
