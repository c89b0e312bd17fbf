//! Per-poll voting interaction.
//!
//! A [`PollCard`] owns one poll and walks it through
//! `Idle -> Submitting -> AwaitingCommitWindow -> Resolved`. The
//! `Submitting` edge only advances once the server accepted the vote *and*
//! the cast animation had its minimum time; a rejected vote rolls the card
//! back to exactly what it showed before the click.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::LifecycleTimings;
use crate::display::{self, ColorScheme, OptionRow};
use crate::error::{EligibilityError, PicknicError, PicknicResult};
use crate::service::VoteService;
use crate::types::{OptionId, Poll, PollId, PollOption, PollResults, PollStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardPhase {
    /// Nothing selected, results hidden
    Idle,
    /// Selection locked in, server call and animation running
    Submitting { option_id: OptionId },
    /// Server acknowledged; stats stay locked until the backend read path catches up
    AwaitingCommitWindow,
    /// Results visible, no further voting
    Resolved,
}

/// Notifications a view layer can subscribe to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardEvent {
    Selected { poll_id: PollId, option_id: OptionId },
    Committed { poll_id: PollId, option_id: OptionId },
    RolledBack { poll_id: PollId, reason: String },
    Resolved { poll_id: PollId },
}

/// Everything a failed vote must restore
#[derive(Debug, Clone)]
struct Snapshot {
    poll: Poll,
    phase: CardPhase,
    selected: Option<OptionId>,
}

pub struct PollCard {
    poll: Poll,
    phase: CardPhase,
    selected: Option<OptionId>,
    committed_at: Option<Instant>,
    timings: LifecycleTimings,
    events: broadcast::Sender<CardEvent>,
}

impl std::fmt::Debug for PollCard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollCard")
            .field("poll_id", &self.poll.id)
            .field("phase", &self.phase)
            .field("selected", &self.selected)
            .finish()
    }
}

impl PollCard {
    pub fn new(poll: Poll, timings: LifecycleTimings) -> Self {
        let (events, _rx) = broadcast::channel(16);
        let phase = if poll.has_voted() || poll.status.is_finished() {
            CardPhase::Resolved
        } else {
            CardPhase::Idle
        };

        Self {
            selected: poll.user_voted.clone(),
            poll,
            phase,
            committed_at: None,
            timings,
            events,
        }
    }

    pub fn poll(&self) -> &Poll {
        &self.poll
    }

    pub fn id(&self) -> &str {
        &self.poll.id
    }

    pub fn phase(&self) -> &CardPhase {
        &self.phase
    }

    /// Option highlighted on the card, set as soon as it is clicked
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn has_voted(&self) -> bool {
        self.poll.has_voted()
    }

    pub fn can_vote(&self) -> bool {
        self.phase == CardPhase::Idle && !self.has_voted() && self.poll.status == PollStatus::Active
    }

    pub fn show_results(&self) -> bool {
        display::show_results(self.has_voted(), self.poll.status)
    }

    /// Detailed stats unlock only once the commit window elapsed
    pub fn can_view_stats(&self) -> bool {
        match self.phase {
            CardPhase::Resolved => true,
            CardPhase::AwaitingCommitWindow => self.window_elapsed(),
            _ => false,
        }
    }

    /// When the commit window of a confirmed vote ends
    pub fn settles_at(&self) -> Option<Instant> {
        match (&self.phase, self.committed_at) {
            (CardPhase::AwaitingCommitWindow, Some(at)) => Some(at + self.timings.commit_window),
            _ => None,
        }
    }

    fn window_elapsed(&self) -> bool {
        self.settles_at().map_or(true, |at| Instant::now() >= at)
    }

    /// Fetch detailed results, refused while the commit window is still open
    pub async fn results(&self, service: &dyn VoteService) -> PicknicResult<PollResults> {
        if !self.can_view_stats() {
            return Err(EligibilityError::StatsLocked.into());
        }
        service.get_results(&self.poll.id).await
    }

    pub fn percentage(&self, option_id: &str) -> u32 {
        self.poll
            .option(option_id)
            .map(|o| display::percentage(o.votes, self.poll.total_votes))
            .unwrap_or(0)
    }

    /// Leading option; None while results are hidden or on a tie
    pub fn winning_option(&self) -> Option<&PollOption> {
        if !self.show_results() {
            return None;
        }
        display::winning_option(&self.poll)
    }

    pub fn option_rows(&self) -> Vec<OptionRow> {
        display::option_rows(&self.poll, self.selected(), self.show_results())
    }

    pub fn colors(&self) -> ColorScheme {
        display::category_colors(&self.poll.category)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CardEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CardEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Cast a vote and wait out the commit window before returning.
    ///
    /// On any failure the card is restored and the error returned. Dropping
    /// the future before the server answered also restores the card; dropping
    /// it during the window leaves the card to settle on its own.
    pub async fn vote(&mut self, service: &dyn VoteService, option_id: &str) -> PicknicResult<()> {
        self.submit(service, option_id).await?;
        if let Some(at) = self.settles_at() {
            tokio::time::sleep_until(at).await;
        }
        self.settle();
        Ok(())
    }

    /// Optimistic selection and the server call raced against the animation
    /// delay. Returns once the vote is confirmed, with the card in its commit
    /// window (or resolved if the poll already finished).
    pub async fn submit(&mut self, service: &dyn VoteService, option_id: &str) -> PicknicResult<()> {
        let snapshot = self.select(option_id)?;
        let poll_id = self.poll.id.clone();
        let animation = self.timings.vote_animation;

        let pending = PendingVote {
            card: &mut *self,
            snapshot: Some(snapshot),
        };

        let (result, ()) = futures::future::join(
            service.cast_vote(&poll_id, option_id),
            tokio::time::sleep(animation),
        )
        .await;

        match result {
            Ok(confirmed) => pending.commit(confirmed, option_id),
            Err(e) => {
                pending.rollback(&e);
                Err(e)
            }
        }
    }

    /// `Idle -> Submitting`. Records the selection and bumps the counts
    /// optimistically, returning what to restore on failure.
    fn select(&mut self, option_id: &str) -> PicknicResult<Snapshot> {
        if matches!(self.phase, CardPhase::Submitting { .. }) {
            return Err(EligibilityError::VoteInFlight.into());
        }
        if self.has_voted() {
            return Err(EligibilityError::AlreadyVoted.into());
        }
        if self.phase != CardPhase::Idle || self.poll.status != PollStatus::Active {
            return Err(EligibilityError::NotActive(self.poll.status).into());
        }
        let option = self
            .poll
            .option(option_id)
            .ok_or_else(|| EligibilityError::UnknownOption(option_id.to_string()))?;
        let (Some(votes), Some(total_votes)) = (
            option.votes.checked_add(1),
            self.poll.total_votes.checked_add(1),
        ) else {
            return Err(PicknicError::Validation(format!(
                "vote count of poll {} is at its maximum",
                self.poll.id
            )));
        };

        let snapshot = Snapshot {
            poll: self.poll.clone(),
            phase: self.phase.clone(),
            selected: self.selected.clone(),
        };

        if let Some(option) = self.poll.option_mut(option_id) {
            option.votes = votes;
        }
        self.poll.total_votes = total_votes;
        self.selected = Some(option_id.to_string());
        self.phase = CardPhase::Submitting {
            option_id: option_id.to_string(),
        };

        tracing::debug!("Poll {}: selected option {}", self.poll.id, option_id);
        self.emit(CardEvent::Selected {
            poll_id: self.poll.id.clone(),
            option_id: option_id.to_string(),
        });
        Ok(snapshot)
    }

    fn restore(&mut self, snapshot: Snapshot, reason: String) {
        self.poll = snapshot.poll;
        self.phase = snapshot.phase;
        self.selected = snapshot.selected;
        self.committed_at = None;

        tracing::warn!("Poll {}: vote rolled back ({})", self.poll.id, reason);
        self.emit(CardEvent::RolledBack {
            poll_id: self.poll.id.clone(),
            reason,
        });
    }

    /// `AwaitingCommitWindow -> Resolved` once the window elapsed.
    /// Returns whether the card is resolved afterwards.
    pub fn settle(&mut self) -> bool {
        if self.phase == CardPhase::AwaitingCommitWindow && self.window_elapsed() {
            self.resolve();
        }
        self.phase == CardPhase::Resolved
    }

    fn resolve(&mut self) {
        if self.phase != CardPhase::Resolved {
            self.phase = CardPhase::Resolved;
            self.emit(CardEvent::Resolved {
                poll_id: self.poll.id.clone(),
            });
        }
    }

    /// Apply a status pushed from outside. Closing or expiring resolves the card.
    pub fn apply_status(&mut self, status: PollStatus) {
        self.poll.status = status;
        if status.is_finished() && !matches!(self.phase, CardPhase::Submitting { .. }) {
            tracing::debug!("Poll {} is now {}", self.poll.id, status);
            self.resolve();
        }
    }

    /// Replace the poll wholesale with a fresh server copy.
    /// A vote already cast is never forgotten even if the copy omits it.
    pub fn refresh(&mut self, mut poll: Poll) -> PicknicResult<()> {
        if poll.id != self.poll.id {
            return Err(PicknicError::Validation(format!(
                "Cannot refresh poll {} with poll {}",
                self.poll.id, poll.id
            )));
        }
        if matches!(self.phase, CardPhase::Submitting { .. }) {
            return Err(EligibilityError::VoteInFlight.into());
        }

        if poll.user_voted.is_none() {
            if let Some(voted) = self.poll.user_voted.clone() {
                if poll.option(&voted).is_some() {
                    poll.user_voted = Some(voted);
                }
            }
        }
        poll.check_totals()?;

        if poll.user_voted.is_some() {
            self.selected = poll.user_voted.clone();
        }
        self.poll = poll;

        self.settle();
        if self.poll.status.is_finished() || (self.phase == CardPhase::Idle && self.has_voted()) {
            self.resolve();
        }
        Ok(())
    }
}

/// A vote between selection and server confirmation. Dropping it without
/// committing puts the card back the way it was.
struct PendingVote<'a> {
    card: &'a mut PollCard,
    snapshot: Option<Snapshot>,
}

impl PendingVote<'_> {
    /// `Submitting -> AwaitingCommitWindow` with the server's poll
    fn commit(mut self, mut confirmed: Poll, option_id: &str) -> PicknicResult<()> {
        if confirmed.id != self.card.poll.id {
            return Err(PicknicError::Validation(format!(
                "Vote on poll {} answered with poll {}",
                self.card.poll.id, confirmed.id
            )));
        }
        if confirmed.user_voted.is_none() {
            confirmed.user_voted = Some(option_id.to_string());
        }
        // Errors return with the snapshot still held, so drop rolls back
        confirmed.check_totals()?;

        self.snapshot = None;
        let card = &mut *self.card;
        card.selected = confirmed.user_voted.clone();
        card.poll = confirmed;
        card.phase = CardPhase::AwaitingCommitWindow;
        card.committed_at = Some(Instant::now());

        tracing::info!("Poll {}: vote for {} committed", card.poll.id, option_id);
        card.emit(CardEvent::Committed {
            poll_id: card.poll.id.clone(),
            option_id: option_id.to_string(),
        });

        if card.poll.status.is_finished() {
            card.resolve();
        }
        Ok(())
    }

    fn rollback(mut self, error: &PicknicError) {
        if let Some(snapshot) = self.snapshot.take() {
            self.card.restore(snapshot, error.to_string());
        }
    }
}

impl Drop for PendingVote<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.card
                .restore(snapshot, "vote abandoned before confirmation".to_string());
        }
    }
}
