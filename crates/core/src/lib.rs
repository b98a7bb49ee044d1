pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod ports;

pub use domain::execution::{ExecutionResult, ExecutionSummary, Row};
pub use domain::question::{Question, SessionId};
pub use domain::response::{AnalystResponse, ErrorKind, ResponseStatus};
pub use domain::sql::{FailureCategory, SqlCandidate, ValidationResult};
pub use domain::turn::{ConversationTurn, TurnFocus, TurnRecord, TurnStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use ports::{AccessMode, ExecutionError, ExecutionProvider};
