use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::error::{AppError, AppResult};

/// Kind of interaction a user had with an item
///
/// Only `like` carries meaning for the top-items tier; anything unrecognized is
/// preserved verbatim so that it survives a round trip through the interaction log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Like,
    View,
    Other(String),
}

impl Action {
    pub fn is_like(&self) -> bool {
        matches!(self, Action::Like)
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "like" => Action::Like,
            "view" => Action::View,
            _ => Action::Other(value),
        }
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.to_string()
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Like => write!(f, "like"),
            Action::View => write!(f, "view"),
            Action::Other(other) => write!(f, "{}", other),
        }
    }
}

/// One row of the interaction log
///
/// Rows are immutable once appended. Several rows may describe the same
/// (user, item) pair; the one with the latest timestamp is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: String,
    pub item_id: String,
    pub action: Action,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl Interaction {
    pub fn new(
        user_id: impl Into<String>,
        item_id: impl Into<String>,
        action: Action,
        timestamp: f64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            item_id: item_id.into(),
            action,
            timestamp,
        }
    }
}

/// Either a single value or a list of values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// Interaction event as it travels over the event source
///
/// A single message may batch several items; `item_ids` and `actions` are
/// exploded pairwise into log rows, and a lone action applies to every item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionMessage {
    pub user_id: String,
    #[serde(alias = "item_id")]
    pub item_ids: OneOrMany<String>,
    #[serde(alias = "action")]
    pub actions: OneOrMany<Action>,
    #[serde(default = "now_timestamp")]
    pub timestamp: f64,
}

/// Current wall-clock time in fractional epoch seconds
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

impl InteractionMessage {
    /// Flattens the message into one log row per (item, action) pair
    pub fn explode(self) -> AppResult<Vec<Interaction>> {
        let item_ids = self.item_ids.into_vec();
        let mut actions = self.actions.into_vec();

        if actions.len() == 1 && item_ids.len() > 1 {
            actions = vec![actions[0].clone(); item_ids.len()];
        }

        if item_ids.len() != actions.len() {
            return Err(AppError::InvalidInput(format!(
                "{} item ids but {} actions for user {}",
                item_ids.len(),
                actions.len(),
                self.user_id
            )));
        }

        Ok(item_ids
            .into_iter()
            .zip(actions)
            .map(|(item_id, action)| Interaction {
                user_id: self.user_id.clone(),
                item_id,
                action,
                timestamp: self.timestamp,
            })
            .collect())
    }
}
