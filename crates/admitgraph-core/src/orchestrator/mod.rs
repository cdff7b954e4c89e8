//! Turn orchestration
//!
//! [`TurnOrchestrator`] merges a streamed reply with a concurrent knowledge
//! lookup for one user input. [`ChatSession`] keeps the transcript and
//! supports regenerating a failed turn.

mod handler;
mod session;

pub use handler::{CANCELLED_TURN_MESSAGE, FAILED_TURN_MESSAGE, TurnEvent, TurnOrchestrator};
pub use session::ChatSession;
