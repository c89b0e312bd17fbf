use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::VoteService;
use crate::display::time_left_label;
use crate::error::{EligibilityError, PicknicError, PicknicResult};
use crate::notify::HotVoteMessage;
use crate::types::*;

/// Points awarded per vote while under the daily vote limit
pub const VOTE_POINTS: u64 = 1;
/// Points awarded per created poll while under the daily create limit
pub const CREATE_POINTS: u64 = 10;

const VOTE_DAILY_LIMIT: u32 = 20;
const CREATE_DAILY_LIMIT: u32 = 5;

struct StoredPoll {
    poll: Poll,
    expires_at: Option<NaiveDateTime>,
    is_active: bool,
    ballots: HashMap<UserId, OptionId>,
}

impl StoredPoll {
    fn status(&self, now: NaiveDateTime) -> PollStatus {
        if !self.is_active {
            PollStatus::Closed
        } else if self.expires_at.is_some_and(|at| at <= now) {
            PollStatus::Expired
        } else {
            PollStatus::Active
        }
    }

    /// The poll as the given viewer sees it
    fn view(&self, viewer: &str) -> Poll {
        let now = Local::now().naive_local();
        Poll {
            status: self.status(now),
            time_left: self.expires_at.map(|at| time_left_label(at - now)),
            user_voted: self.ballots.get(viewer).cloned(),
            ..self.poll.clone()
        }
    }
}

#[derive(Default)]
struct Ledger {
    polls: Vec<StoredPoll>,
    next_id: u64,
    points: u64,
    votes_today: u32,
    creates_today: u32,
    hot_events: Vec<HotVoteMessage>,
}

impl Ledger {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn find(&self, poll_id: &str) -> PicknicResult<&StoredPoll> {
        self.polls
            .iter()
            .find(|p| p.poll.id == poll_id)
            .ok_or_else(|| not_found(poll_id))
    }

    fn find_mut(&mut self, poll_id: &str) -> PicknicResult<&mut StoredPoll> {
        self.polls
            .iter_mut()
            .find(|p| p.poll.id == poll_id)
            .ok_or_else(|| not_found(poll_id))
    }
}

fn not_found(poll_id: &str) -> PicknicError {
    PicknicError::Validation(format!("Poll {} not found", poll_id))
}

/// In-process [`VoteService`] with the backend's rules: one vote per viewer,
/// no votes on closed or expired polls, daily limits that gate points only.
pub struct InMemoryVoteService {
    viewer: UserId,
    system_account: bool,
    ledger: RwLock<Ledger>,
}

impl InMemoryVoteService {
    pub fn new(viewer: impl Into<UserId>) -> Self {
        Self {
            viewer: viewer.into(),
            system_account: false,
            ledger: RwLock::new(Ledger::default()),
        }
    }

    /// A system account may toggle hot and delete any poll
    pub fn system(viewer: impl Into<UserId>) -> Self {
        Self {
            system_account: true,
            ..Self::new(viewer)
        }
    }

    /// Insert an existing poll. Its counts are kept as the baseline.
    pub async fn seed(&self, poll: Poll, expires_at: Option<NaiveDateTime>) -> PicknicResult<()> {
        poll.check_totals()?;
        let mut ledger = self.ledger.write().await;
        let mut ballots = HashMap::new();
        if let Some(option_id) = &poll.user_voted {
            ballots.insert(self.viewer.clone(), option_id.clone());
        }
        ledger.polls.push(StoredPoll {
            is_active: poll.status != PollStatus::Closed,
            expires_at: match poll.status {
                PollStatus::Expired => Some(expires_at.unwrap_or_else(|| Local::now().naive_local())),
                _ => expires_at,
            },
            poll: Poll {
                user_voted: None,
                ..poll
            },
            ballots,
        });
        Ok(())
    }

    /// Hot events published so far, oldest first
    pub async fn hot_events(&self) -> Vec<HotVoteMessage> {
        self.ledger.read().await.hot_events.clone()
    }
}

#[async_trait]
impl VoteService for InMemoryVoteService {
    async fn list_polls(&self, filter: &PollFilter) -> PicknicResult<Vec<Poll>> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .polls
            .iter()
            .rev()
            .map(|p| p.view(&self.viewer))
            .filter(|p| filter.status.map_or(true, |s| s == p.status))
            .filter(|p| {
                filter
                    .creator_id
                    .as_ref()
                    .map_or(true, |c| p.creator_id.as_ref() == Some(c))
            })
            .collect())
    }

    async fn get_poll(&self, poll_id: &str) -> PicknicResult<Poll> {
        let ledger = self.ledger.read().await;
        Ok(ledger.find(poll_id)?.view(&self.viewer))
    }

    async fn cast_vote(&self, poll_id: &str, option_id: &str) -> PicknicResult<Poll> {
        let mut ledger = self.ledger.write().await;
        let viewer = self.viewer.clone();

        let stored = ledger.find_mut(poll_id)?;
        let status = stored.status(Local::now().naive_local());
        if status != PollStatus::Active {
            return Err(EligibilityError::NotActive(status).into());
        }
        if stored.ballots.contains_key(&viewer) {
            return Err(EligibilityError::AlreadyVoted.into());
        }
        let next_total = stored.poll.total_votes.checked_add(1);
        let option = stored.poll.option_mut(option_id).ok_or_else(|| {
            PicknicError::Validation(format!("Option {} not in poll {}", option_id, poll_id))
        })?;

        let (Some(votes), Some(total)) = (
            option.votes.checked_add(1),
            next_total,
        ) else {
            return Err(PicknicError::Validation(format!(
                "Vote count of poll {} is at its maximum",
                poll_id
            )));
        };
        option.votes = votes;
        stored.poll.total_votes = total;
        stored.ballots.insert(viewer.clone(), option_id.to_string());
        let view = stored.view(&viewer);

        ledger.votes_today += 1;
        if ledger.votes_today <= VOTE_DAILY_LIMIT {
            ledger.points += VOTE_POINTS;
        } else {
            tracing::debug!("Daily vote limit reached for {}, no points", viewer);
        }

        Ok(view)
    }

    async fn get_results(&self, poll_id: &str) -> PicknicResult<PollResults> {
        let ledger = self.ledger.read().await;
        let stored = ledger.find(poll_id)?;
        Ok(PollResults {
            poll_id: stored.poll.id.clone(),
            title: stored.poll.title.clone(),
            total_votes: stored.poll.total_votes,
            is_active: stored.is_active,
            expires_at: stored
                .expires_at
                .map(|at| at.format("%Y-%m-%dT%H:%M:%S").to_string()),
            options: stored.poll.options.clone(),
        })
    }

    async fn create_poll(&self, draft: &PollDraft) -> PicknicResult<Poll> {
        draft.validate()?;
        let mut ledger = self.ledger.write().await;

        let id = ledger.next_id();
        let options = draft
            .options
            .iter()
            .map(|text| PollOption {
                id: format!("{}-{}", id, ledger.next_id()),
                text: text.trim().to_string(),
                emoji: None,
                image: None,
                votes: 0,
            })
            .collect::<Vec<_>>();

        let poll = Poll {
            id,
            kind: draft.poll_type(),
            title: draft.title.trim().to_string(),
            description: draft.description.clone(),
            image: draft.image_url.clone(),
            options,
            total_votes: 0,
            category: if draft.category.trim().is_empty() {
                DEFAULT_CATEGORY.to_string()
            } else {
                draft.category.clone()
            },
            time_left: None,
            points: Some(VOTE_POINTS as u32),
            school_name: None,
            status: PollStatus::Active,
            creator_id: Some(self.viewer.clone()),
            is_hot: false,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            user_voted: None,
        };

        let stored = StoredPoll {
            poll,
            expires_at: draft.expires_at,
            is_active: true,
            ballots: HashMap::new(),
        };
        let view = stored.view(&self.viewer);
        ledger.polls.push(stored);

        ledger.creates_today += 1;
        if ledger.creates_today <= CREATE_DAILY_LIMIT {
            ledger.points += CREATE_POINTS;
        }

        tracing::info!("Created poll {} ({:?})", view.id, view.kind);
        Ok(view)
    }

    async fn delete_poll(&self, poll_id: &str) -> PicknicResult<()> {
        let mut ledger = self.ledger.write().await;
        let stored = ledger.find(poll_id)?;
        if !self.system_account && stored.poll.creator_id.as_ref() != Some(&self.viewer) {
            return Err(PicknicError::Validation(
                "Only the creator or a system account can delete a poll".to_string(),
            ));
        }
        ledger.polls.retain(|p| p.poll.id != poll_id);
        Ok(())
    }

    async fn close_poll(&self, poll_id: &str) -> PicknicResult<Poll> {
        let mut ledger = self.ledger.write().await;
        let stored = ledger.find_mut(poll_id)?;
        if stored.poll.creator_id.as_ref() != Some(&self.viewer) {
            return Err(PicknicError::Validation(
                "Only the creator can close a poll".to_string(),
            ));
        }
        stored.is_active = false;
        Ok(stored.view(&self.viewer))
    }

    async fn toggle_hot(&self, poll_id: &str) -> PicknicResult<Poll> {
        if !self.system_account {
            return Err(PicknicError::Validation(
                "Only a system account can mark polls hot".to_string(),
            ));
        }

        let mut ledger = self.ledger.write().await;
        let stored = ledger.find_mut(poll_id)?;
        stored.poll.is_hot = !stored.poll.is_hot;
        let view = stored.view(&self.viewer);

        // Only marking publishes; unmarking is silent
        if view.is_hot {
            ledger.hot_events.push(HotVoteMessage::hot_vote(
                view.id.clone(),
                view.title.clone(),
                view.category.clone(),
            ));
        }
        Ok(view)
    }

    async fn get_daily_limit(&self) -> PicknicResult<DailyLimit> {
        let ledger = self.ledger.read().await;
        Ok(DailyLimit {
            vote_remaining: VOTE_DAILY_LIMIT.saturating_sub(ledger.votes_today),
            vote_limit: VOTE_DAILY_LIMIT,
            create_remaining: CREATE_DAILY_LIMIT.saturating_sub(ledger.creates_today),
            create_limit: CREATE_DAILY_LIMIT,
        })
    }

    async fn get_point_balance(&self) -> PicknicResult<PointBalance> {
        Ok(PointBalance {
            total_points: self.ledger.read().await.points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::{option, poll};

    async fn service_with_p1() -> InMemoryVoteService {
        let service = InMemoryVoteService::new("viewer@picknic.kr");
        service
            .seed(poll("p1", vec![option("a", 3), option("b", 7)]), None)
            .await
            .unwrap();
        service
    }

    #[tokio::test]
    async fn test_cast_vote_updates_counts_and_points() {
        let service = service_with_p1().await;

        let updated = service.cast_vote("p1", "a").await.unwrap();
        assert_eq!(updated.user_voted.as_deref(), Some("a"));
        assert_eq!(updated.option("a").unwrap().votes, 4);
        assert_eq!(updated.total_votes, 11);
        assert!(updated.check_totals().is_ok());

        let balance = service.get_point_balance().await.unwrap();
        assert_eq!(balance.total_points, VOTE_POINTS);

        let limit = service.get_daily_limit().await.unwrap();
        assert_eq!(limit.vote_remaining, VOTE_DAILY_LIMIT - 1);
    }

    #[tokio::test]
    async fn test_cast_vote_twice_is_rejected() {
        let service = service_with_p1().await;
        service.cast_vote("p1", "a").await.unwrap();

        let result = service.cast_vote("p1", "b").await;
        assert_eq!(
            result.unwrap_err(),
            PicknicError::Eligibility(EligibilityError::AlreadyVoted)
        );
        assert_eq!(service.get_poll("p1").await.unwrap().total_votes, 11);
    }

    #[tokio::test]
    async fn test_cast_vote_on_closed_or_unknown() {
        let service = InMemoryVoteService::new("me");
        let mut closed = poll("c1", vec![option("a", 0), option("b", 0)]);
        closed.status = PollStatus::Closed;
        service.seed(closed, None).await.unwrap();

        let result = service.cast_vote("c1", "a").await;
        assert_eq!(
            result.unwrap_err(),
            PicknicError::Eligibility(EligibilityError::NotActive(PollStatus::Closed))
        );

        assert!(matches!(
            service.cast_vote("nope", "a").await,
            Err(PicknicError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_points_stop_after_daily_limit() {
        let service = InMemoryVoteService::new("me");
        for i in 0..(VOTE_DAILY_LIMIT + 2) {
            let id = format!("p{}", i);
            service
                .seed(poll(&id, vec![option("a", 0), option("b", 0)]), None)
                .await
                .unwrap();
            service.cast_vote(&id, "a").await.unwrap();
        }

        let balance = service.get_point_balance().await.unwrap();
        assert_eq!(balance.total_points, u64::from(VOTE_DAILY_LIMIT) * VOTE_POINTS);
        let limit = service.get_daily_limit().await.unwrap();
        assert!(!limit.can_earn_vote_points());
    }

    #[tokio::test]
    async fn test_create_and_filter_by_creator() {
        let service = InMemoryVoteService::new("maker");
        let draft = PollDraft {
            title: "  민초 vs 반민초 ".to_string(),
            description: None,
            image_url: None,
            category: "음식".to_string(),
            options: vec!["민초".to_string(), "반민초".to_string()],
            expires_at: None,
        };
        let created = service.create_poll(&draft).await.unwrap();
        assert_eq!(created.title, "민초 vs 반민초");
        assert_eq!(created.kind, PollType::Balance);
        assert_eq!(created.options.len(), 2);
        assert_ne!(created.options[0].id, created.options[1].id);
        assert_eq!(created.status, PollStatus::Active);

        service
            .seed(poll("other", vec![option("a", 0), option("b", 0)]), None)
            .await
            .unwrap();

        let mine = service
            .list_polls(&PollFilter {
                status: None,
                creator_id: Some("maker".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, created.id);

        let points = service.get_point_balance().await.unwrap();
        assert_eq!(points.total_points, CREATE_POINTS);
    }

    #[tokio::test]
    async fn test_close_and_delete_permissions() {
        let service = InMemoryVoteService::new("maker");
        let mut other = poll("o1", vec![option("a", 0), option("b", 0)]);
        other.creator_id = Some("someone-else".to_string());
        service.seed(other, None).await.unwrap();

        assert!(service.close_poll("o1").await.is_err());
        assert!(service.delete_poll("o1").await.is_err());

        let admin = InMemoryVoteService::system("admin");
        admin
            .seed(poll("o2", vec![option("a", 0), option("b", 0)]), None)
            .await
            .unwrap();
        admin.delete_poll("o2").await.unwrap();
        assert!(admin.get_poll("o2").await.is_err());
    }

    #[tokio::test]
    async fn test_toggle_hot_publishes_only_when_marking() {
        let service = InMemoryVoteService::system("admin");
        service
            .seed(poll("h1", vec![option("a", 0), option("b", 0)]), None)
            .await
            .unwrap();

        assert!(service.toggle_hot("h1").await.unwrap().is_hot);
        assert!(!service.toggle_hot("h1").await.unwrap().is_hot);

        let events = service.hot_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].vote_id, "h1");

        let regular = InMemoryVoteService::new("me");
        assert!(regular.toggle_hot("h1").await.is_err());
    }

    #[tokio::test]
    async fn test_results_follow_votes() {
        let service = service_with_p1().await;
        service.cast_vote("p1", "a").await.unwrap();

        let results = service.get_results("p1").await.unwrap();
        assert_eq!(results.total_votes, 11);
        assert_eq!(results.percentage("a"), 36);
        assert_eq!(results.winning_option().map(|o| o.id.as_str()), Some("b"));
        assert!(results.is_active);
        assert!(service.get_results("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_expired_poll_status() {
        let service = InMemoryVoteService::new("me");
        let past = Local::now().naive_local() - chrono::Duration::minutes(5);
        service
            .seed(poll("e1", vec![option("a", 1), option("b", 2)]), Some(past))
            .await
            .unwrap();

        let viewed = service.get_poll("e1").await.unwrap();
        assert_eq!(viewed.status, PollStatus::Expired);
        assert_eq!(viewed.time_left.as_deref(), Some("마감됨"));

        let active = service.list_polls(&PollFilter::active()).await.unwrap();
        assert!(active.is_empty());
    }
}
