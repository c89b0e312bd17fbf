use serde::{Deserialize, Serialize};

use crate::error::{PicknicError, PicknicResult};

/// Opaque ID types for type safety
pub type PollId = String;
pub type OptionId = String;
pub type UserId = String;
pub type NotificationId = String;

/// Category used when the server does not send one
pub const DEFAULT_CATEGORY: &str = "일상";

/// Bounds on the number of options a new poll may carry
pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PollType {
    Balance,
    Multiple,
    Ox,
}

impl PollType {
    /// Derive the type from option texts when the server leaves it out.
    /// Exactly "O" and "X" is an O/X poll, any other pair is a balance game.
    pub fn infer<'a>(option_texts: impl IntoIterator<Item = &'a str>) -> Self {
        let texts: Vec<&str> = option_texts.into_iter().map(str::trim).collect();
        match texts.as_slice() {
            [a, b] if (*a == "O" && *b == "X") || (*a == "X" && *b == "O") => PollType::Ox,
            [_, _] => PollType::Balance,
            _ => PollType::Multiple,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    #[default]
    Active,
    Closed,
    Expired,
}

impl PollStatus {
    /// Closed and expired polls no longer accept votes
    pub fn is_finished(self) -> bool {
        matches!(self, PollStatus::Closed | PollStatus::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PollStatus::Active => "active",
            PollStatus::Closed => "closed",
            PollStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for PollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub id: OptionId,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub votes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: PollId,
    #[serde(rename = "type")]
    pub kind: PollType,
    pub title: String,
    pub description: Option<String>,
    pub image: Option<String>,
    /// Display order is the order of this vector
    pub options: Vec<PollOption>,
    pub total_votes: u32,
    pub category: String,
    pub time_left: Option<String>,
    pub points: Option<u32>,
    pub school_name: Option<String>,
    pub status: PollStatus,
    pub creator_id: Option<UserId>,
    #[serde(default)]
    pub is_hot: bool,
    pub created_at: Option<String>,
    /// Option this viewer already picked, if any
    pub user_voted: Option<OptionId>,
}

impl Poll {
    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    pub fn option_mut(&mut self, option_id: &str) -> Option<&mut PollOption> {
        self.options.iter_mut().find(|o| o.id == option_id)
    }

    pub fn has_voted(&self) -> bool {
        self.user_voted.is_some()
    }

    /// Sum of per-option counts
    pub fn counted_votes(&self) -> u32 {
        self.options
            .iter()
            .fold(0u32, |sum, o| sum.saturating_add(o.votes))
    }

    /// Check that the option counts add up to the total and that option ids are unique
    pub fn check_totals(&self) -> PicknicResult<()> {
        let counted: u64 = self.options.iter().map(|o| u64::from(o.votes)).sum();
        if counted != u64::from(self.total_votes) {
            return Err(PicknicError::Validation(format!(
                "poll {} reports {} total votes but its options sum to {}",
                self.id, self.total_votes, counted
            )));
        }

        for (i, option) in self.options.iter().enumerate() {
            if self.options[..i].iter().any(|o| o.id == option.id) {
                return Err(PicknicError::Validation(format!(
                    "poll {} has duplicate option id {}",
                    self.id, option.id
                )));
            }
        }

        if let Some(voted) = &self.user_voted {
            if self.option(voted).is_none() {
                return Err(PicknicError::Validation(format!(
                    "poll {} marks unknown option {} as voted",
                    self.id, voted
                )));
            }
        }

        Ok(())
    }
}

/// Server-maintained per-user daily caps on point-earning actions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyLimit {
    pub vote_remaining: u32,
    pub vote_limit: u32,
    pub create_remaining: u32,
    pub create_limit: u32,
}

impl DailyLimit {
    /// Voting still works once this is false, it just stops paying out
    pub fn can_earn_vote_points(&self) -> bool {
        self.vote_remaining > 0
    }

    pub fn can_earn_create_points(&self) -> bool {
        self.create_remaining > 0
    }

    pub fn votes_used(&self) -> u32 {
        self.vote_limit.saturating_sub(self.vote_remaining)
    }

    pub fn creates_used(&self) -> u32 {
        self.create_limit.saturating_sub(self.create_remaining)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PointBalance {
    pub total_points: u64,
}

/// Detailed results of a poll, readable once the viewer's vote settled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    pub poll_id: PollId,
    pub title: String,
    pub total_votes: u32,
    pub is_active: bool,
    pub expires_at: Option<String>,
    pub options: Vec<PollOption>,
}

impl PollResults {
    pub fn percentage(&self, option_id: &str) -> u32 {
        self.options
            .iter()
            .find(|o| o.id == option_id)
            .map(|o| crate::display::percentage(o.votes, self.total_votes))
            .unwrap_or(0)
    }

    /// Unique leader; the backend's own pick is not trusted on ties
    pub fn winning_option(&self) -> Option<&PollOption> {
        crate::display::leading_option(&self.options)
    }
}

/// Query filter for listing polls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollFilter {
    pub status: Option<PollStatus>,
    pub creator_id: Option<UserId>,
}

impl PollFilter {
    pub fn active() -> Self {
        Self {
            status: Some(PollStatus::Active),
            creator_id: None,
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if let Some(creator) = &self.creator_id {
            pairs.push(("creatorId", creator.clone()));
        }
        pairs
    }
}

/// User-provided details to create a poll
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollDraft {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub category: String,
    /// Just the text of each option
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::NaiveDateTime>,
}

impl PollDraft {
    pub fn validate(&self) -> PicknicResult<()> {
        if self.title.trim().is_empty() {
            return Err(PicknicError::Validation("title is required".to_string()));
        }

        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&self.options.len()) {
            return Err(PicknicError::Validation(format!(
                "a poll needs between {} and {} options, got {}",
                MIN_OPTIONS,
                MAX_OPTIONS,
                self.options.len()
            )));
        }

        if let Some(i) = self.options.iter().position(|o| o.trim().is_empty()) {
            return Err(PicknicError::Validation(format!(
                "option {} is empty",
                i + 1
            )));
        }

        if let Some(expires_at) = self.expires_at {
            if expires_at <= chrono::Local::now().naive_local() {
                return Err(PicknicError::Validation(
                    "expiry must be in the future".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Type the server will assign once the poll exists
    pub fn poll_type(&self) -> PollType {
        PollType::infer(self.options.iter().map(String::as_str))
    }
}

/// A stored notification row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub vote_id: Option<PollId>,
    pub is_read: bool,
    pub created_at: String,
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_infer_poll_type() {
        assert_eq!(PollType::infer(["O", "X"]), PollType::Ox);
        assert_eq!(PollType::infer([" X ", "O"]), PollType::Ox);
        assert_eq!(PollType::infer(["짜장", "짬뽕"]), PollType::Balance);
        assert_eq!(PollType::infer(["a", "b", "c"]), PollType::Multiple);
    }

    #[test]
    fn test_status_roundtrip_names() {
        let status: PollStatus = serde_json::from_str("\"expired\"").unwrap();
        assert_eq!(status, PollStatus::Expired);
        assert!(status.is_finished());
        assert!(!PollStatus::Active.is_finished());
        assert_eq!(PollStatus::Closed.to_string(), "closed");
    }

    #[test]
    fn test_check_totals() {
        let mut p = poll("p1", vec![option("a", 3), option("b", 7)]);
        assert!(p.check_totals().is_ok());

        p.total_votes = 11;
        let err = p.check_totals().unwrap_err();
        assert!(err.to_string().contains("sum to 10"));
    }

    #[test]
    fn test_check_totals_with_counts_past_u32() {
        let mut p = poll("p1", vec![option("a", u32::MAX)]);
        p.options.push(option("b", 1));
        p.total_votes = 0;
        assert!(p.check_totals().is_err());
        assert_eq!(p.counted_votes(), u32::MAX);
    }

    #[test]
    fn test_check_totals_rejects_unknown_voted_option() {
        let mut p = poll("p1", vec![option("a", 1), option("b", 0)]);
        p.user_voted = Some("zzz".to_string());
        assert!(p.check_totals().is_err());
    }

    #[test]
    fn test_check_totals_rejects_duplicate_options() {
        let p = poll("p1", vec![option("a", 1), option("a", 0)]);
        assert!(p.check_totals().is_err());
    }

    #[test]
    fn test_daily_limit_helpers() {
        let limit = DailyLimit {
            vote_remaining: 0,
            vote_limit: 20,
            create_remaining: 3,
            create_limit: 5,
        };
        assert!(!limit.can_earn_vote_points());
        assert!(limit.can_earn_create_points());
        assert_eq!(limit.votes_used(), 20);
        assert_eq!(limit.creates_used(), 2);
    }

    #[test]
    fn test_filter_query_pairs() {
        let filter = PollFilter {
            status: Some(PollStatus::Closed),
            creator_id: Some("user@picknic.kr".to_string()),
        };
        assert_eq!(
            filter.query_pairs(),
            vec![
                ("status", "closed".to_string()),
                ("creatorId", "user@picknic.kr".to_string())
            ]
        );
        assert!(PollFilter::default().query_pairs().is_empty());
    }

    #[test]
    fn test_draft_validation() {
        let mut draft = PollDraft {
            title: "Best lunch?".to_string(),
            description: None,
            image_url: None,
            category: "음식".to_string(),
            options: vec!["O".to_string(), "X".to_string()],
            expires_at: None,
        };
        assert!(draft.validate().is_ok());
        assert_eq!(draft.poll_type(), PollType::Ox);

        draft.title = "   ".to_string();
        assert!(matches!(draft.validate(), Err(PicknicError::Validation(_))));

        draft.title = "Best lunch?".to_string();
        draft.options = vec!["only one".to_string()];
        assert!(draft.validate().is_err());

        draft.options = vec!["a".to_string(), " ".to_string()];
        let err = draft.validate().unwrap_err();
        assert!(err.to_string().contains("option 2"));

        draft.options = (0..11).map(|i| i.to_string()).collect();
        assert!(draft.validate().is_err());
    }

    #[test]
    fn test_draft_rejects_past_expiry() {
        let draft = PollDraft {
            title: "t".to_string(),
            description: None,
            image_url: None,
            category: "게임".to_string(),
            options: vec!["a".to_string(), "b".to_string()],
            expires_at: Some(chrono::Local::now().naive_local() - chrono::Duration::hours(1)),
        };
        assert!(draft.validate().is_err());
    }
}
