//! Vote submission service.
//!
//! [`VoteService`] is the contract the poll card and the feed depend on.
//! [`HttpVoteService`] implements it against the Picknic REST backend;
//! [`InMemoryVoteService`] keeps everything in process for offline use and tests.

mod http;
mod memory;

use async_trait::async_trait;

use crate::error::PicknicResult;
use crate::types::*;

pub use http::{ApiEnvelope, HttpVoteService, WireOption, WirePoll, WireResults};
pub(crate) use http::string_or_number;
pub use memory::{InMemoryVoteService, CREATE_POINTS, VOTE_POINTS};

/// Backend operations the client depends on. Failures are surfaced to the caller, never retried.
#[async_trait]
pub trait VoteService: Send + Sync {
    async fn list_polls(&self, filter: &PollFilter) -> PicknicResult<Vec<Poll>>;

    async fn get_poll(&self, poll_id: &str) -> PicknicResult<Poll>;

    /// Returns the authoritative poll after the vote was recorded
    async fn cast_vote(&self, poll_id: &str, option_id: &str) -> PicknicResult<Poll>;

    /// Detailed per-option results
    async fn get_results(&self, poll_id: &str) -> PicknicResult<PollResults>;

    async fn create_poll(&self, draft: &PollDraft) -> PicknicResult<Poll>;

    async fn delete_poll(&self, poll_id: &str) -> PicknicResult<()>;

    async fn close_poll(&self, poll_id: &str) -> PicknicResult<Poll>;

    /// Flip the hot flag (system accounts only). Marking hot triggers the broadcast notification.
    async fn toggle_hot(&self, poll_id: &str) -> PicknicResult<Poll>;

    async fn get_daily_limit(&self) -> PicknicResult<DailyLimit>;

    async fn get_point_balance(&self) -> PicknicResult<PointBalance>;
}

