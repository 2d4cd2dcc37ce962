// Continuation of truncated responses
//
// A response that stops at the role's output ceiling is extended by asking the
// same backend to continue from where it stopped, up to a fixed number of
// rounds. Before every round the partial text can be checkpointed so a run
// that never escapes truncation still leaves a deliverable behind.

use tracing::{info, warn};

use crate::config::Role;
use crate::dispatch::{Dispatcher, Reply};
use crate::events::{RunEvent, TraceLog};
use crate::prompt;

/// Whether the latest response finished on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationState {
    /// The backend stopped before the ceiling.
    Complete,
    /// The backend stopped at the ceiling.
    Truncated,
}

impl From<&Reply> for ContinuationState {
    fn from(reply: &Reply) -> Self {
        if reply.truncated { Self::Truncated } else { Self::Complete }
    }
}

/// Receives partial text before each continuation round.
pub trait Checkpoint: Send + Sync {
    /// Persists `partial`; `round` counts from 0.
    fn checkpoint(&self, partial: &str, round: usize);
}

/// Result of a possibly continued call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuedReply {
    /// Accumulated text of the first response and every continuation.
    pub text: String,
    /// Continuation rounds issued.
    pub rounds: usize,
    /// True when the text is still truncated because the round ceiling was hit
    /// or a continuation call failed.
    pub partial: bool,
    /// Whether the first call already returned placeholder text.
    pub degraded: bool,
}

/// Drives continuation rounds for one call.
pub struct ContinuationController<'a> {
    dispatcher: &'a Dispatcher,
    trace: &'a TraceLog,
    max_rounds: usize,
}

impl<'a> ContinuationController<'a> {
    /// At most `max_rounds` continuation calls per prompt.
    pub fn new(dispatcher: &'a Dispatcher, trace: &'a TraceLog, max_rounds: usize) -> Self {
        Self { dispatcher, trace, max_rounds }
    }

    /// Sends `prompt` to `role` and continues while the output is truncated.
    pub async fn run(
        &self,
        role: Role,
        prompt: &str,
        checkpoint: Option<&dyn Checkpoint>,
    ) -> ContinuedReply {
        let reply = self.dispatcher.call(role, prompt).await;
        let degraded = reply.degraded;
        let mut state = ContinuationState::from(&reply);
        let mut text = reply.text;
        let mut rounds = 0;

        while state == ContinuationState::Truncated {
            if rounds >= self.max_rounds {
                warn!(role = %role, rounds, "Continuation ceiling reached, keeping partial output");
                self.trace.emit(RunEvent::ContinuationExhausted { role, rounds });
                break;
            }

            if let Some(checkpoint) = checkpoint {
                checkpoint.checkpoint(&text, rounds);
            }

            rounds += 1;
            info!(role = %role, round = rounds, text_len = text.len(), "Output truncated, continuing");
            self.trace.emit(RunEvent::Truncated { role, round: rounds });

            let next = self.dispatcher.call(role, &prompt::continuation(&text, prompt)).await;
            if next.degraded {
                warn!(role = %role, round = rounds, "Continuation failed, keeping partial output");
                break;
            }

            state = ContinuationState::from(&next);
            text.push_str(&next.text);
        }

        ContinuedReply {
            text,
            rounds,
            partial: state == ContinuationState::Truncated,
            degraded,
        }
    }
}
