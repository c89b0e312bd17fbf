//! Pure helpers deriving display data from a poll.

use serde::Serialize;

use crate::types::{OptionId, Poll, PollOption, PollStatus};

/// Gradient and accent colors for a poll category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColorScheme {
    pub from: &'static str,
    pub to: &'static str,
    pub accent: &'static str,
}

impl ColorScheme {
    const fn new(from: &'static str, to: &'static str, accent: &'static str) -> Self {
        Self { from, to, accent }
    }
}

pub const DEFAULT_SCHEME: ColorScheme = ColorScheme::new("#1DB954", "#1aa34a", "#1DB954");

const CATEGORY_SCHEMES: &[(&str, ColorScheme)] = &[
    ("음식", ColorScheme::new("#f97316", "#ef4444", "#f97316")),
    ("패션", ColorScheme::new("#8b5cf6", "#ec4899", "#8b5cf6")),
    ("게임", ColorScheme::new("#3b82f6", "#14b8a6", "#3b82f6")),
    ("일상", ColorScheme::new("#eab308", "#f97316", "#eab308")),
    ("학교", ColorScheme::new("#3b82f6", "#8b5cf6", "#3b82f6")),
    ("아이돌", ColorScheme::new("#ec4899", "#8b5cf6", "#ec4899")),
    ("영화/드라마", ColorScheme::new("#ef4444", "#8b5cf6", "#ef4444")),
    ("운동", ColorScheme::new("#14b8a6", "#3b82f6", "#14b8a6")),
    ("취미", ColorScheme::new("#8b5cf6", "#3b82f6", "#8b5cf6")),
    ("밈/유머", ColorScheme::new("#ec4899", "#f97316", "#ec4899")),
    ("환경", ColorScheme::new("#10b981", "#84cc16", "#10b981")),
];

/// Color scheme for a category, falling back to the brand green
pub fn category_colors(category: &str) -> ColorScheme {
    CATEGORY_SCHEMES
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, scheme)| *scheme)
        .unwrap_or(DEFAULT_SCHEME)
}

/// Integer share of the total, rounded half away from zero. Zero when nobody voted.
pub fn percentage(votes: u32, total_votes: u32) -> u32 {
    if total_votes == 0 {
        return 0;
    }
    // (2 * 100 * v + t) / (2 * t) == round(100 * v / t) for non-negative integers
    let numerator = 200 * u64::from(votes) + u64::from(total_votes);
    (numerator / (2 * u64::from(total_votes))) as u32
}

/// The option holding the unique maximum, or None on a tie or an empty poll
pub fn winning_option(poll: &Poll) -> Option<&PollOption> {
    leading_option(&poll.options)
}

pub fn leading_option(options: &[PollOption]) -> Option<&PollOption> {
    let max = options.iter().map(|o| o.votes).max()?;
    let mut leaders = options.iter().filter(|o| o.votes == max);
    let leader = leaders.next()?;
    leaders.next().is_none().then_some(leader)
}

/// Results are shown once the viewer voted or the poll stopped taking votes
pub fn show_results(has_voted: bool, status: PollStatus) -> bool {
    has_voted || status.is_finished()
}

/// Human label for the time until a poll closes, as the backend phrases it
pub fn time_left_label(remaining: chrono::Duration) -> String {
    if remaining <= chrono::Duration::zero() {
        "마감됨".to_string()
    } else if remaining.num_days() >= 1 {
        format!("{}일 남음", remaining.num_days())
    } else if remaining.num_hours() >= 1 {
        format!("{}시간 남음", remaining.num_hours())
    } else if remaining.num_minutes() >= 1 {
        format!("{}분 남음", remaining.num_minutes())
    } else {
        "곧 마감".to_string()
    }
}

/// One rendered option row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionRow {
    pub id: OptionId,
    pub text: String,
    pub votes: u32,
    pub percentage: u32,
    pub is_selected: bool,
    /// Only set when results are visible
    pub is_winning: bool,
}

/// Derive the option rows of a card in display order
pub fn option_rows(poll: &Poll, selected: Option<&str>, results_visible: bool) -> Vec<OptionRow> {
    let winner = winning_option(poll).map(|o| o.id.as_str());
    poll.options
        .iter()
        .map(|option| OptionRow {
            id: option.id.clone(),
            text: option.text.clone(),
            votes: option.votes,
            percentage: percentage(option.votes, poll.total_votes),
            is_selected: selected == Some(option.id.as_str()),
            is_winning: results_visible && winner == Some(option.id.as_str()),
        })
        .collect()
}

/// Rows as shown once results are visible, marking the viewer's own vote
pub fn results_view(poll: &Poll) -> Vec<OptionRow> {
    option_rows(poll, poll.user_voted.as_deref(), true)
}
