use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::customer::CustomerId;
use crate::errors::DomainError;
use crate::extraction::Extraction;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub Uuid);

/// Conversation lifecycle. `OrderCreated` is terminal: once a conversation
/// has produced an order, later messages never re-enter the intake gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    New,
    WaitingForInfo,
    OrderCreated,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Ordering,
    Inquiry,
    Complaint,
    Browsing,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Customer,
    Bot,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub sender: Sender,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// Platform thread identifier, unique per conversation.
    pub thread_id: String,
    pub customer_id: CustomerId,
    pub status: ConversationStatus,
    pub current_intent: Intent,
    pub turns: Vec<Turn>,
    pub last_extraction: Option<Extraction>,
    /// Optimistic-concurrency counter, bumped by the repository on save.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(thread_id: impl Into<String>, customer_id: CustomerId) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId(Uuid::new_v4()),
            thread_id: thread_id.into(),
            customer_id,
            status: ConversationStatus::New,
            current_intent: Intent::Browsing,
            turns: Vec::new(),
            last_extraction: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_transition_to(&self, next: ConversationStatus) -> bool {
        matches!(
            (self.status, next),
            (ConversationStatus::New, ConversationStatus::WaitingForInfo)
                | (ConversationStatus::New, ConversationStatus::OrderCreated)
                | (ConversationStatus::WaitingForInfo, ConversationStatus::WaitingForInfo)
                | (ConversationStatus::WaitingForInfo, ConversationStatus::OrderCreated)
        )
    }

    pub fn transition_to(&mut self, next: ConversationStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            self.updated_at = Utc::now();
            return Ok(());
        }

        Err(DomainError::InvalidStatusTransition { from: self.status, to: next })
    }

    pub fn is_terminal(&self) -> bool {
        self.status == ConversationStatus::OrderCreated
    }

    pub fn push_turn(&mut self, sender: Sender, text: impl Into<String>) {
        let at = Utc::now();
        self.turns.push(Turn { sender, text: text.into(), at });
        self.updated_at = at;
    }

    /// The most recent `window` turns, oldest first.
    pub fn recent_turns(&self, window: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(window);
        &self.turns[start..]
    }
}
