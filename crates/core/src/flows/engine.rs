use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{
    IntakeAction, IntakeContext, IntakeEvent, IntakeState, TransitionOutcome,
};

pub trait FlowDefinition {
    fn initial_state(&self) -> IntakeState;
    fn transition(
        &self,
        current: &IntakeState,
        event: &IntakeEvent,
        context: &IntakeContext,
    ) -> Result<TransitionOutcome, IntakeTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct OrderIntakeFlow;

impl FlowDefinition for OrderIntakeFlow {
    fn initial_state(&self) -> IntakeState {
        IntakeState::New
    }

    fn transition(
        &self,
        current: &IntakeState,
        event: &IntakeEvent,
        context: &IntakeContext,
    ) -> Result<TransitionOutcome, IntakeTransitionError> {
        transition_order_intake(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> IntakeState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &IntakeState,
        event: &IntakeEvent,
        context: &IntakeContext,
    ) -> Result<TransitionOutcome, IntakeTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &IntakeState,
        event: &IntakeEvent,
        context: &IntakeContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, IntakeTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.conversation_id.clone(),
                        audit.sender_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.conversation_id.clone(),
                        audit.sender_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<OrderIntakeFlow> {
    fn default() -> Self {
        Self::new(OrderIntakeFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntakeTransitionError {
    #[error("conversation already produced an order; event {event:?} is not applicable")]
    ConversationClosed { event: IntakeEvent },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: IntakeState, event: IntakeEvent },
}

fn transition_order_intake(
    current: &IntakeState,
    event: &IntakeEvent,
    _context: &IntakeContext,
) -> Result<TransitionOutcome, IntakeTransitionError> {
    use IntakeAction::{PersistOrder, RequestMissingInfo};
    use IntakeEvent::{NonOrdering, OrderReady, OrderingIncomplete};
    use IntakeState::{New, OrderCreated, WaitingForInfo};

    let (to, actions) = match (current, event) {
        (OrderCreated, _) => {
            return Err(IntakeTransitionError::ConversationClosed { event: *event });
        }
        (New, OrderReady) | (WaitingForInfo, OrderReady) => (OrderCreated, vec![PersistOrder]),
        (New, OrderingIncomplete) | (WaitingForInfo, OrderingIncomplete) => {
            (WaitingForInfo, vec![RequestMissingInfo])
        }
        (New, NonOrdering) => (New, Vec::new()),
        (WaitingForInfo, NonOrdering) => (WaitingForInfo, Vec::new()),
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}
