pub mod engine;
pub mod states;

pub use engine::{AnalystTurnFlow, FlowDefinition, FlowEngine, TurnTransitionError};
pub use states::{AttemptBudget, TransitionOutcome, TurnAction, TurnEvent, TurnState};
