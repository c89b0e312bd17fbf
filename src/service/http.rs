use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::{Duration, Instant};

use super::VoteService;
use crate::config::ClientConfig;
use crate::error::{EligibilityError, PicknicError, PicknicResult};
use crate::types::*;

// ========== Wire format ==========

/// Envelope wrapping every backend response
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Ids arrive as JSON numbers from the backend but are opaque strings on the client
pub(crate) fn string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
    }
    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOption {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub option_text: String,
    pub vote_count: u32,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePoll {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    pub total_votes: u32,
    pub options: Vec<WireOption>,
    #[serde(default)]
    pub has_voted: bool,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub user_selected_option_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<PollType>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub school_name: Option<String>,
    #[serde(default)]
    pub time_left: Option<String>,
    #[serde(default)]
    pub points: Option<u32>,
    #[serde(default)]
    pub status: PollStatus,
    #[serde(default)]
    pub is_hot: bool,
}

impl TryFrom<WirePoll> for Poll {
    type Error = PicknicError;

    fn try_from(wire: WirePoll) -> PicknicResult<Self> {
        let kind = wire.kind.unwrap_or_else(|| {
            PollType::infer(wire.options.iter().map(|o| o.option_text.as_str()))
        });

        let user_voted = if wire.has_voted {
            Some(wire.user_selected_option_id.ok_or_else(|| {
                PicknicError::Validation(format!(
                    "poll {} is marked voted without a selected option",
                    wire.id
                ))
            })?)
        } else {
            None
        };

        let poll = Poll {
            id: wire.id,
            kind,
            title: wire.title,
            description: wire.description,
            image: wire.image_url,
            options: wire
                .options
                .into_iter()
                .map(|o| PollOption {
                    id: o.id,
                    text: o.option_text,
                    emoji: o.emoji,
                    image: o.image_url,
                    votes: o.vote_count,
                })
                .collect(),
            total_votes: wire.total_votes,
            category: wire
                .category
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            time_left: wire.time_left,
            points: wire.points,
            school_name: wire.school_name,
            status: wire.status,
            creator_id: wire.creator_id,
            is_hot: wire.is_hot,
            created_at: wire.created_at,
            user_voted,
        };

        poll.check_totals()?;
        Ok(poll)
    }
}

/// `GET /votes/{id}/results` payload. Per-option percentages and the
/// server's winner pick are ignored and derived locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResults {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    pub total_votes: u32,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub options: Vec<WireOption>,
}

fn default_active() -> bool {
    true
}

impl TryFrom<WireResults> for PollResults {
    type Error = PicknicError;

    fn try_from(wire: WireResults) -> PicknicResult<Self> {
        let counted: u64 = wire.options.iter().map(|o| u64::from(o.vote_count)).sum();
        if counted != u64::from(wire.total_votes) {
            return Err(PicknicError::Validation(format!(
                "results of poll {} count {} votes but report {}",
                wire.id, counted, wire.total_votes
            )));
        }

        Ok(PollResults {
            poll_id: wire.id,
            title: wire.title,
            total_votes: wire.total_votes,
            is_active: wire.is_active,
            expires_at: wire.expires_at,
            options: wire
                .options
                .into_iter()
                .map(|o| PollOption {
                    id: o.id,
                    text: o.option_text,
                    emoji: o.emoji,
                    image: o.image_url,
                    votes: o.vote_count,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CastVoteRequest<'a> {
    option_id: &'a str,
}

// ========== HTTP implementation ==========

/// REST implementation of [`VoteService`]
pub struct HttpVoteService {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpVoteService {
    pub fn new(config: &ClientConfig) -> PicknicResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| PicknicError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
            timeout: config.http_timeout,
            client,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and unwrap the `{ success, data }` envelope
    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> PicknicResult<T> {
        let (url, envelope) = self.send_envelope::<T>(builder).await?;
        envelope
            .data
            .ok_or_else(|| PicknicError::Validation(format!("Response from {} has no data", url)))
    }

    /// Send a request and check the envelope's success flag, returning it with the request path
    async fn send_envelope<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> PicknicResult<(String, ApiEnvelope<T>)> {
        let start = Instant::now();
        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let url = response.url().path().to_string();

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        tracing::debug!(
            "{} {} in {}ms",
            status.as_u16(),
            url,
            start.elapsed().as_millis()
        );

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let envelope: ApiEnvelope<T> = serde_json::from_str(&body)
            .map_err(|e| PicknicError::Validation(format!("Malformed response from {}: {}", url, e)))?;

        if !envelope.success {
            return Err(PicknicError::Validation(
                envelope
                    .message
                    .unwrap_or_else(|| format!("{} reported failure", url)),
            ));
        }

        Ok((url, envelope))
    }

    async fn send_poll(&self, builder: RequestBuilder) -> PicknicResult<Poll> {
        let wire: WirePoll = self.send(builder).await?;
        Poll::try_from(wire)
    }

    fn transport_error(&self, e: reqwest::Error) -> PicknicError {
        if e.is_timeout() {
            PicknicError::Timeout(self.timeout)
        } else {
            PicknicError::from(e)
        }
    }
}

/// Map a non-2xx response to the error taxonomy
fn status_error(status: StatusCode, body: &str) -> PicknicError {
    let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(body)
        .ok()
        .and_then(|e| e.message)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    if status == StatusCode::CONFLICT {
        PicknicError::Eligibility(EligibilityError::AlreadyVoted)
    } else if status.is_client_error() {
        PicknicError::Validation(message)
    } else {
        PicknicError::Network(message)
    }
}

#[async_trait]
impl VoteService for HttpVoteService {
    async fn list_polls(&self, filter: &PollFilter) -> PicknicResult<Vec<Poll>> {
        let builder = self
            .request(Method::GET, "/votes")
            .query(&filter.query_pairs());
        let wire: Vec<WirePoll> = self.send(builder).await?;
        wire.into_iter().map(Poll::try_from).collect()
    }

    async fn get_poll(&self, poll_id: &str) -> PicknicResult<Poll> {
        self.send_poll(self.request(Method::GET, &format!("/votes/{}", poll_id)))
            .await
    }

    async fn cast_vote(&self, poll_id: &str, option_id: &str) -> PicknicResult<Poll> {
        let builder = self
            .request(Method::POST, &format!("/votes/{}/vote", poll_id))
            .json(&CastVoteRequest { option_id });
        self.send_poll(builder).await
    }

    async fn get_results(&self, poll_id: &str) -> PicknicResult<PollResults> {
        let wire: WireResults = self
            .send(self.request(Method::GET, &format!("/votes/{}/results", poll_id)))
            .await?;
        PollResults::try_from(wire)
    }

    async fn create_poll(&self, draft: &PollDraft) -> PicknicResult<Poll> {
        draft.validate()?;
        self.send_poll(self.request(Method::POST, "/votes").json(draft))
            .await
    }

    async fn delete_poll(&self, poll_id: &str) -> PicknicResult<()> {
        let (_, envelope) = self
            .send_envelope::<serde_json::Value>(
                self.request(Method::DELETE, &format!("/votes/{}", poll_id)),
            )
            .await?;
        tracing::info!("Deleted poll {}: {:?}", poll_id, envelope.data);
        Ok(())
    }

    async fn close_poll(&self, poll_id: &str) -> PicknicResult<Poll> {
        self.send_poll(self.request(Method::PATCH, &format!("/votes/{}/close", poll_id)))
            .await
    }

    async fn toggle_hot(&self, poll_id: &str) -> PicknicResult<Poll> {
        self.send_poll(self.request(Method::PATCH, &format!("/votes/{}/hot", poll_id)))
            .await
    }

    async fn get_daily_limit(&self) -> PicknicResult<DailyLimit> {
        self.send(self.request(Method::GET, "/points/daily-limit"))
            .await
    }

    async fn get_point_balance(&self) -> PicknicResult<PointBalance> {
        self.send(self.request(Method::GET, "/points/me")).await
    }
}
