//! Session-level poll feed.
//!
//! One authoritative list of cards per session. The hot, school and
//! participated tabs are filters over it, never separate copies.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::LifecycleTimings;
use crate::error::{EligibilityError, PicknicError, PicknicResult};
use crate::lifecycle::{CardPhase, PollCard};
use crate::service::VoteService;
use crate::types::*;

/// What a vote did to the viewer's account, as re-read from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    pub points_earned: u64,
    pub daily_limit: Option<DailyLimit>,
}

pub struct PollFeed {
    service: Arc<dyn VoteService>,
    timings: LifecycleTimings,
    filter: PollFilter,
    cards: Vec<PollCard>,
    daily_limit: Option<DailyLimit>,
    points: Option<PointBalance>,
}

impl PollFeed {
    pub fn new(service: Arc<dyn VoteService>, timings: LifecycleTimings) -> Self {
        Self {
            service,
            timings,
            filter: PollFilter::default(),
            cards: Vec::new(),
            daily_limit: None,
            points: None,
        }
    }

    /// Fetch polls and rebuild the list. Cards already on screen keep their lifecycle.
    pub async fn load(&mut self, filter: PollFilter) -> PicknicResult<usize> {
        let polls = self.service.list_polls(&filter).await?;
        self.filter = filter;

        let mut existing: HashMap<PollId, PollCard> = self
            .cards
            .drain(..)
            .map(|card| (card.id().to_string(), card))
            .collect();

        self.cards = polls
            .into_iter()
            .map(|poll| match existing.remove(&poll.id) {
                Some(mut card) => match card.refresh(poll.clone()) {
                    Ok(()) => card,
                    Err(e) => {
                        tracing::warn!("Replacing card {}: {}", poll.id, e);
                        PollCard::new(poll, self.timings)
                    }
                },
                None => PollCard::new(poll, self.timings),
            })
            .collect();

        self.settle();
        tracing::debug!("Loaded {} polls", self.cards.len());
        self.refresh_account().await;
        Ok(self.cards.len())
    }

    /// Re-run the last load
    pub async fn reload(&mut self) -> PicknicResult<usize> {
        let filter = self.filter.clone();
        self.load(filter).await
    }

    pub fn cards(&self) -> &[PollCard] {
        &self.cards
    }

    pub fn card(&self, poll_id: &str) -> Option<&PollCard> {
        self.cards.iter().find(|c| c.id() == poll_id)
    }

    fn card_mut(&mut self, poll_id: &str) -> PicknicResult<&mut PollCard> {
        self.cards
            .iter_mut()
            .find(|c| c.id() == poll_id)
            .ok_or_else(|| EligibilityError::UnknownPoll(poll_id.to_string()).into())
    }

    pub fn hot(&self) -> impl Iterator<Item = &PollCard> {
        self.cards.iter().filter(|c| c.poll().is_hot)
    }

    /// Polls tagged with a school; a specific school when `name` is given
    pub fn school<'a>(&'a self, name: Option<&'a str>) -> impl Iterator<Item = &'a PollCard> {
        self.cards.iter().filter(move |c| match (&c.poll().school_name, name) {
            (Some(school), Some(wanted)) => school == wanted,
            (Some(_), None) => true,
            (None, _) => false,
        })
    }

    pub fn participated(&self) -> impl Iterator<Item = &PollCard> {
        self.cards.iter().filter(|c| c.has_voted())
    }

    pub fn in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a PollCard> {
        self.cards.iter().filter(move |c| c.poll().category == category)
    }

    pub fn daily_limit(&self) -> Option<&DailyLimit> {
        self.daily_limit.as_ref()
    }

    pub fn points(&self) -> Option<u64> {
        self.points.map(|p| p.total_points)
    }

    /// Vote through the card's lifecycle, then re-read points and daily limit.
    /// Award amounts depend on server-side limits, so nothing is incremented locally.
    ///
    /// Returns once the server confirmed; the card then sits in its commit
    /// window and unlocks stats on its own.
    pub async fn vote(&mut self, poll_id: &str, option_id: &str) -> PicknicResult<VoteOutcome> {
        let service = Arc::clone(&self.service);
        let points_before = self.points();

        self.card_mut(poll_id)?
            .submit(service.as_ref(), option_id)
            .await?;

        self.refresh_account().await;
        Ok(self.outcome_since(points_before))
    }

    /// Vote on several cards at once. Each ballot gets its own result, in order;
    /// a second ballot for the same poll is refused as in flight.
    pub async fn vote_all(
        &mut self,
        ballots: &[(&str, &str)],
    ) -> (Vec<PicknicResult<()>>, VoteOutcome) {
        let service = Arc::clone(&self.service);
        let points_before = self.points();

        let mut results: Vec<PicknicResult<()>> = ballots
            .iter()
            .map(|(poll_id, _)| {
                Err(PicknicError::from(EligibilityError::UnknownPoll(
                    poll_id.to_string(),
                )))
            })
            .collect();
        let mut wanted: HashMap<&str, (usize, &str)> = HashMap::new();
        for (i, (poll_id, option_id)) in ballots.iter().enumerate() {
            if wanted.contains_key(poll_id) {
                results[i] = Err(EligibilityError::VoteInFlight.into());
            } else {
                wanted.insert(*poll_id, (i, *option_id));
            }
        }

        let submissions = self
            .cards
            .iter_mut()
            .filter_map(|card| {
                let (i, option_id) = *wanted.get(card.id())?;
                Some((i, card, option_id))
            })
            .map(|(i, card, option_id)| {
                let service = service.as_ref();
                async move { (i, card.submit(service, option_id).await) }
            });

        for (i, result) in futures::future::join_all(submissions).await {
            results[i] = result;
        }

        if results.iter().any(Result::is_ok) {
            self.refresh_account().await;
        }
        let outcome = self.outcome_since(points_before);
        (results, outcome)
    }

    fn outcome_since(&self, points_before: Option<u64>) -> VoteOutcome {
        let points_earned = match (points_before, self.points()) {
            (Some(before), Some(after)) => after.saturating_sub(before),
            _ => 0,
        };
        VoteOutcome {
            points_earned,
            daily_limit: self.daily_limit,
        }
    }

    /// Resolve every card whose commit window has passed. Returns how many did.
    pub fn settle(&mut self) -> usize {
        self.cards
            .iter_mut()
            .filter(|c| c.phase() == &CardPhase::AwaitingCommitWindow)
            .map(|c| c.settle())
            .filter(|&resolved| resolved)
            .count()
    }

    /// Wait until every pending commit window has passed, then settle
    pub async fn wait_settled(&mut self) {
        if let Some(at) = self.cards.iter().filter_map(PollCard::settles_at).max() {
            tokio::time::sleep_until(at).await;
        }
        self.settle();
    }

    /// Detailed results of one poll, refused while its commit window is open
    pub async fn results(&self, poll_id: &str) -> PicknicResult<PollResults> {
        let card = self
            .card(poll_id)
            .ok_or_else(|| EligibilityError::UnknownPoll(poll_id.to_string()))?;
        card.results(self.service.as_ref()).await
    }

    /// Re-read daily limit and point balance together. Failures keep the old values.
    pub async fn refresh_account(&mut self) {
        let (limit, points) = futures::future::join(
            self.service.get_daily_limit(),
            self.service.get_point_balance(),
        )
        .await;

        match limit {
            Ok(limit) => self.daily_limit = Some(limit),
            Err(e) => tracing::warn!("Failed to refresh daily limit: {}", e),
        }
        match points {
            Ok(points) => self.points = Some(points),
            Err(e) => tracing::warn!("Failed to refresh points: {}", e),
        }
    }

    /// Create a poll and put it at the top of the feed
    pub async fn create(&mut self, draft: &PollDraft) -> PicknicResult<&PollCard> {
        draft.validate()?;
        let poll = self.service.create_poll(draft).await?;
        self.cards.insert(0, PollCard::new(poll, self.timings));
        self.refresh_account().await;
        Ok(&self.cards[0])
    }

    pub async fn delete(&mut self, poll_id: &str) -> PicknicResult<()> {
        self.service.delete_poll(poll_id).await?;
        self.cards.retain(|c| c.id() != poll_id);
        Ok(())
    }

    pub async fn close(&mut self, poll_id: &str) -> PicknicResult<()> {
        let service = Arc::clone(&self.service);
        let card = self.card_mut(poll_id)?;
        let poll = service.close_poll(poll_id).await?;
        card.refresh(poll)?;
        card.apply_status(PollStatus::Closed);
        Ok(())
    }

    pub async fn toggle_hot(&mut self, poll_id: &str) -> PicknicResult<bool> {
        let service = Arc::clone(&self.service);
        let card = self.card_mut(poll_id)?;
        let poll = service.toggle_hot(poll_id).await?;
        let is_hot = poll.is_hot;
        card.refresh(poll)?;
        Ok(is_hot)
    }

    /// Fetch one poll again, e.g. after a stats view
    pub async fn reload_poll(&mut self, poll_id: &str) -> PicknicResult<()> {
        let service = Arc::clone(&self.service);
        let card = self.card_mut(poll_id)?;
        let poll = service.get_poll(poll_id).await?;
        if poll.id != poll_id {
            return Err(PicknicError::Validation(format!(
                "Asked for poll {}, got {}",
                poll_id, poll.id
            )));
        }
        card.refresh(poll)
    }
}
