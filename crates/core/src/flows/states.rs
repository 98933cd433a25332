use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntakeState {
    New,
    WaitingForInfo,
    OrderCreated,
}

impl From<ConversationStatus> for IntakeState {
    fn from(status: ConversationStatus) -> Self {
        match status {
            ConversationStatus::New => Self::New,
            ConversationStatus::WaitingForInfo => Self::WaitingForInfo,
            ConversationStatus::OrderCreated => Self::OrderCreated,
        }
    }
}

impl From<IntakeState> for ConversationStatus {
    fn from(state: IntakeState) -> Self {
        match state {
            IntakeState::New => Self::New,
            IntakeState::WaitingForInfo => Self::WaitingForInfo,
            IntakeState::OrderCreated => Self::OrderCreated,
        }
    }
}

/// What the readiness gate concluded about the latest customer turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntakeEvent {
    OrderReady,
    OrderingIncomplete,
    NonOrdering,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IntakeContext {
    pub missing_fields: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntakeAction {
    PersistOrder,
    RequestMissingInfo,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: IntakeState,
    pub to: IntakeState,
    pub event: IntakeEvent,
    pub actions: Vec<IntakeAction>,
}
