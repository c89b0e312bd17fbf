use std::time::Duration;

use crate::types::PollStatus;

/// Result type for Picknic operations
pub type PicknicResult<T> = Result<T, PicknicError>;

/// Errors that can occur while talking to the backend or driving a poll card
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PicknicError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Network request failed: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cannot vote: {0}")]
    Eligibility(#[from] EligibilityError),

    #[error("Notification store failed: {0}")]
    Store(String),
}

impl PicknicError {
    /// Whether the failure came from the transport rather than from the request itself
    pub fn is_transient(&self) -> bool {
        matches!(self, PicknicError::Network(_) | PicknicError::Timeout(_))
    }
}

/// Reasons a vote is refused before any request goes out
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EligibilityError {
    #[error("already voted on this poll")]
    AlreadyVoted,

    #[error("poll is {0}")]
    NotActive(PollStatus),

    #[error("a vote for this poll is already in flight")]
    VoteInFlight,

    #[error("option {0} does not belong to this poll")]
    UnknownOption(String),

    #[error("poll {0} is not in this feed")]
    UnknownPoll(String),

    #[error("results unlock once the vote has settled")]
    StatsLocked,
}

impl From<reqwest::Error> for PicknicError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            PicknicError::Validation(format!("Malformed response: {}", e))
        } else {
            PicknicError::Network(e.to_string())
        }
    }
}
