pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, IntakeTransitionError, OrderIntakeFlow};
pub use states::{IntakeAction, IntakeContext, IntakeEvent, IntakeState, TransitionOutcome};
