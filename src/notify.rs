//! Hot-poll notification fan-out.
//!
//! Marking a poll hot publishes a [`HotVoteMessage`]. The notifier receives
//! it wrapped in an SNS event and writes one notification per known user.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{PicknicError, PicknicResult};
use crate::service::string_or_number;
use crate::types::{Notification, PollId, UserId};

pub const HOT_VOTE: &str = "HOT_VOTE";
pub const HOT_TITLE: &str = "🔥 HOT";

/// Payload published when a poll is marked hot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotVoteMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub vote_id: PollId,
    #[serde(default)]
    pub vote_title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl HotVoteMessage {
    pub fn hot_vote(vote_id: PollId, vote_title: String, category: String) -> Self {
        Self {
            kind: HOT_VOTE.to_string(),
            vote_id,
            vote_title,
            category,
            timestamp: Some(
                chrono::Local::now()
                    .naive_local()
                    .format("%Y-%m-%dT%H:%M:%S")
                    .to_string(),
            ),
        }
    }

    pub fn is_hot_vote(&self) -> bool {
        self.kind == HOT_VOTE
    }

    /// Notification body shown to every user
    pub fn notification_text(&self) -> String {
        format!(
            "{} - {} 투표가 HOT으로 선정되었습니다!",
            self.vote_title, self.category
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnsEvent {
    #[serde(rename = "Records")]
    pub records: Vec<SnsRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnsRecord {
    #[serde(rename = "Sns")]
    pub sns: SnsPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnsPayload {
    /// JSON-encoded [`HotVoteMessage`]
    #[serde(rename = "Message")]
    pub message: String,
}

impl SnsEvent {
    /// Wrap a message the way SNS delivers it
    pub fn wrap(message: &HotVoteMessage) -> PicknicResult<Self> {
        let message = serde_json::to_string(message)
            .map_err(|e| PicknicError::Validation(format!("Unencodable message: {}", e)))?;
        Ok(Self {
            records: vec![SnsRecord {
                sns: SnsPayload { message },
            }],
        })
    }

    /// Decode the first record's message. Further records are not looked at.
    pub fn first_message(&self) -> PicknicResult<HotVoteMessage> {
        decode_message(self.first_value()?)
    }

    /// First record's message as loose JSON, before any field is checked
    fn first_value(&self) -> PicknicResult<serde_json::Value> {
        let record = self
            .records
            .first()
            .ok_or_else(|| PicknicError::Validation("Event has no records".to_string()))?;
        serde_json::from_str(&record.sns.message)
            .map_err(|e| PicknicError::Validation(format!("Invalid message: {}", e)))
    }
}

/// Where users and their notifications live
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn list_users(&self) -> PicknicResult<Vec<UserId>>;

    /// Returns false when the user was already known
    async fn register_user(&self, user_id: &str) -> PicknicResult<bool>;

    async fn insert(&self, notification: Notification) -> PicknicResult<()>;

    /// Newest first
    async fn notifications_for(&self, user_id: &str) -> PicknicResult<Vec<Notification>>;
}

#[derive(Default)]
struct StoreInner {
    users: Vec<UserId>,
    notifications: Vec<Notification>,
}

#[derive(Default)]
pub struct InMemoryNotificationStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UserId>,
    {
        let mut inner = StoreInner::default();
        for user in users {
            let user = user.into();
            if !inner.users.contains(&user) {
                inner.users.push(user);
            }
        }
        Self {
            inner: RwLock::new(inner),
        }
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn list_users(&self) -> PicknicResult<Vec<UserId>> {
        Ok(self.inner.read().await.users.clone())
    }

    async fn register_user(&self, user_id: &str) -> PicknicResult<bool> {
        if user_id.trim().is_empty() {
            return Err(PicknicError::Validation("User id is required".to_string()));
        }
        let mut inner = self.inner.write().await;
        if inner.users.iter().any(|u| u == user_id) {
            return Ok(false);
        }
        inner.users.push(user_id.to_string());
        Ok(true)
    }

    async fn insert(&self, notification: Notification) -> PicknicResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains(&notification.user_id) {
            return Err(PicknicError::Store(format!(
                "No user {} for notification",
                notification.user_id
            )));
        }
        inner.notifications.push(notification);
        Ok(())
    }

    async fn notifications_for(&self, user_id: &str) -> PicknicResult<Vec<Notification>> {
        let inner = self.inner.read().await;
        Ok(inner
            .notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanOut {
    /// Message type other than HOT_VOTE
    Ignored { kind: String },
    Delivered {
        vote_id: PollId,
        notified: usize,
        failures: usize,
    },
}

/// Write one notification per known user. A failed insert is logged and
/// counted; the remaining users are still notified.
pub async fn fan_out(
    store: &dyn NotificationStore,
    message: &HotVoteMessage,
) -> PicknicResult<FanOut> {
    if !message.is_hot_vote() {
        tracing::info!("Ignoring {} message", message.kind);
        return Ok(FanOut::Ignored {
            kind: message.kind.clone(),
        });
    }

    let users = store.list_users().await?;
    tracing::debug!("Notifying {} users about poll {}", users.len(), message.vote_id);

    let text = message.notification_text();
    let mut notified = 0;
    let mut failures = 0;

    for user_id in users {
        let notification = Notification {
            id: ulid::Ulid::new().to_string(),
            user_id: user_id.clone(),
            kind: HOT_VOTE.to_string(),
            title: HOT_TITLE.to_string(),
            message: text.clone(),
            vote_id: Some(message.vote_id.clone()),
            is_read: false,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        match store.insert(notification).await {
            Ok(()) => notified += 1,
            Err(e) => {
                tracing::error!("Failed to notify {}: {}", user_id, e);
                failures += 1;
            }
        }
    }

    tracing::info!(
        "Poll {} hot: {} notified, {} failures",
        message.vote_id,
        notified,
        failures
    );
    Ok(FanOut::Delivered {
        vote_id: message.vote_id.clone(),
        notified,
        failures,
    })
}

/// Decode a raw SNS event body and fan its first message out
pub async fn process_sns_event(store: &dyn NotificationStore, body: &[u8]) -> PicknicResult<FanOut> {
    let event: SnsEvent = serde_json::from_slice(body)
        .map_err(|e| PicknicError::Validation(format!("Invalid SNS event: {}", e)))?;
    if event.records.len() > 1 {
        tracing::warn!(
            "SNS event carries {} records, only the first is processed",
            event.records.len()
        );
    }

    // Only HOT_VOTE payloads have to match the message schema
    let value = event.first_value()?;
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    if kind != HOT_VOTE {
        tracing::info!("Ignoring {:?} message", kind);
        return Ok(FanOut::Ignored {
            kind: kind.to_string(),
        });
    }

    let message = decode_message(value)?;
    fan_out(store, &message).await
}

fn decode_message(value: serde_json::Value) -> PicknicResult<HotVoteMessage> {
    serde_json::from_value(value)
        .map_err(|e| PicknicError::Validation(format!("Invalid message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store that refuses inserts for one user
    struct FlakyStore {
        inner: InMemoryNotificationStore,
        broken_user: UserId,
    }

    #[async_trait]
    impl NotificationStore for FlakyStore {
        async fn list_users(&self) -> PicknicResult<Vec<UserId>> {
            self.inner.list_users().await
        }
        async fn register_user(&self, user_id: &str) -> PicknicResult<bool> {
            self.inner.register_user(user_id).await
        }
        async fn insert(&self, notification: Notification) -> PicknicResult<()> {
            if notification.user_id == self.broken_user {
                return Err(PicknicError::Store("connection lost".to_string()));
            }
            self.inner.insert(notification).await
        }
        async fn notifications_for(&self, user_id: &str) -> PicknicResult<Vec<Notification>> {
            self.inner.notifications_for(user_id).await
        }
    }

    fn hot(vote_id: &str) -> HotVoteMessage {
        HotVoteMessage::hot_vote(
            vote_id.to_string(),
            "짜장 vs 짬뽕".to_string(),
            "음식".to_string(),
        )
    }

    #[tokio::test]
    async fn test_fan_out_notifies_every_user() {
        let store = InMemoryNotificationStore::with_users(["a@picknic.kr", "b@picknic.kr"]);

        let outcome = fan_out(&store, &hot("42")).await.unwrap();
        assert_eq!(
            outcome,
            FanOut::Delivered {
                vote_id: "42".to_string(),
                notified: 2,
                failures: 0
            }
        );

        let inbox = store.notifications_for("a@picknic.kr").await.unwrap();
        assert_eq!(inbox.len(), 1);
        let n = &inbox[0];
        assert_eq!(n.kind, HOT_VOTE);
        assert_eq!(n.title, "🔥 HOT");
        assert_eq!(n.message, "짜장 vs 짬뽕 - 음식 투표가 HOT으로 선정되었습니다!");
        assert_eq!(n.vote_id.as_deref(), Some("42"));
        assert!(!n.is_read);
    }

    #[tokio::test]
    async fn test_fan_out_continues_past_failures() {
        let store = FlakyStore {
            inner: InMemoryNotificationStore::with_users(["a", "b", "c"]),
            broken_user: "b".to_string(),
        };

        let outcome = fan_out(&store, &hot("7")).await.unwrap();
        assert_eq!(
            outcome,
            FanOut::Delivered {
                vote_id: "7".to_string(),
                notified: 2,
                failures: 1
            }
        );
        assert_eq!(store.notifications_for("c").await.unwrap().len(), 1);
        assert!(store.notifications_for("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_message_types_are_ignored() {
        let store = InMemoryNotificationStore::with_users(["a"]);
        let body = serde_json::json!({
            "Records": [{ "Sns": { "Message": r#"{"type":"VOTE_CLOSED","voteId":3}"# } }]
        });

        let outcome = process_sns_event(&store, body.to_string().as_bytes())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            FanOut::Ignored {
                kind: "VOTE_CLOSED".to_string()
            }
        );
        assert!(store.notifications_for("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_numeric_vote_id_and_first_record_only() {
        let store = InMemoryNotificationStore::with_users(["a"]);
        let body = serde_json::json!({
            "Records": [
                { "Sns": { "Message": r#"{"type":"HOT_VOTE","voteId":12,"voteTitle":"부먹 vs 찍먹","category":"음식","timestamp":"2025-11-02T10:00:00"}"# } },
                { "Sns": { "Message": r#"{"type":"HOT_VOTE","voteId":13,"voteTitle":"x","category":"y"}"# } }
            ]
        });

        let outcome = process_sns_event(&store, body.to_string().as_bytes())
            .await
            .unwrap();
        assert!(matches!(outcome, FanOut::Delivered { ref vote_id, notified: 1, .. } if vote_id == "12"));
        assert_eq!(store.notifications_for("a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_events() {
        let store = InMemoryNotificationStore::with_users(["a"]);

        for body in [
            "not json".to_string(),
            serde_json::json!({ "Records": [] }).to_string(),
            serde_json::json!({ "Records": [{ "Sns": { "Message": "{oops" } }] }).to_string(),
        ] {
            let result = process_sns_event(&store, body.as_bytes()).await;
            assert!(matches!(result, Err(PicknicError::Validation(_))), "{}", body);
        }
    }

    #[tokio::test]
    async fn test_other_kinds_skip_schema_checks() {
        let store = InMemoryNotificationStore::with_users(["a"]);

        for (message, kind) in [
            (serde_json::json!({ "voteId": 3 }), ""),
            (serde_json::json!({ "type": "OTHER", "voteId": 1.5 }), "OTHER"),
            (serde_json::json!({ "type": 7 }), ""),
        ] {
            let body = serde_json::json!({
                "Records": [{ "Sns": { "Message": message.to_string() } }]
            });
            let result = process_sns_event(&store, body.to_string().as_bytes()).await;
            assert_eq!(
                result.unwrap(),
                FanOut::Ignored {
                    kind: kind.to_string()
                }
            );
        }
        assert!(store.notifications_for("a").await.unwrap().is_empty());

        // A hot-vote payload is still held to the schema
        let body = serde_json::json!({
            "Records": [{ "Sns": { "Message":
                serde_json::json!({ "type": HOT_VOTE, "voteId": 1.5 }).to_string() } }]
        });
        let result = process_sns_event(&store, body.to_string().as_bytes()).await;
        assert!(matches!(result, Err(PicknicError::Validation(_))));
    }

    #[tokio::test]
    async fn test_store_users_and_ordering() {
        let store = InMemoryNotificationStore::new();
        assert!(store.register_user("a").await.unwrap());
        assert!(!store.register_user("a").await.unwrap());
        assert!(store.register_user("  ").await.is_err());

        fan_out(&store, &hot("1")).await.unwrap();
        fan_out(&store, &hot("2")).await.unwrap();

        let inbox = store.notifications_for("a").await.unwrap();
        let ids: Vec<_> = inbox.iter().filter_map(|n| n.vote_id.as_deref()).collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert_ne!(inbox[0].id, inbox[1].id);
    }

    #[test]
    fn test_wrap_round_trips_through_sns_shape() {
        let message = hot("9");
        let event = SnsEvent::wrap(&message).unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["Records"][0]["Sns"]["Message"].is_string());
        assert_eq!(event.first_message().unwrap(), message);
    }
}
