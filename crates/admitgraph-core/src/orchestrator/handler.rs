//! One user input: reply stream and knowledge lookup, merged into a turn

use futures_core::Stream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conversation::{ConversationClient, Turn};
use crate::error::Error;
use crate::knowledge::{RetrievalEngine, RetrievalResult};

/// Shown in place of the reply when a turn fails
pub const FAILED_TURN_MESSAGE: &str = "Something went wrong while generating a response. \
Use /regenerate to try again.";

/// Shown in place of the reply when the user cancels a turn
pub const CANCELLED_TURN_MESSAGE: &str = "Response cancelled.";

/// Progress of one handled turn
///
/// Zero or more `Fragment`s in generation order, then exactly one of
/// `Delivered` or `Failed`.
#[derive(Debug)]
pub enum TurnEvent {
    Fragment(String),
    /// The finished assistant turn, knowledge attached when the lookup succeeded
    Delivered(Turn),
    Failed { turn: Turn, error: Error },
}

impl TurnEvent {
    pub fn is_final(&self) -> bool {
        !matches!(self, TurnEvent::Fragment(_))
    }
}

enum Step {
    Fragment(String),
    Retrieved(Option<RetrievalResult>),
    Finished,
    Failed(Error),
}

/// Runs a conversation turn and a knowledge lookup side by side
pub struct TurnOrchestrator {
    client: ConversationClient,
    retrieval: Option<RetrievalEngine>,
}

impl TurnOrchestrator {
    pub fn new(client: ConversationClient) -> Self {
        Self {
            client,
            retrieval: None,
        }
    }

    /// Annotate turns with knowledge from `engine`
    pub fn with_retrieval(mut self, engine: RetrievalEngine) -> Self {
        self.retrieval = Some(engine);
        self
    }

    pub fn client(&self) -> &ConversationClient {
        &self.client
    }

    pub fn retrieval(&self) -> Option<&RetrievalEngine> {
        self.retrieval.as_ref()
    }

    /// Handle `text` as one user turn
    ///
    /// Both operations are polled from the returned stream, so no task is
    /// spawned. Knowledge is attached only once the reply has fully
    /// streamed; a failed reply discards the lookup, and a failed lookup
    /// only drops the annotation.
    pub fn handle(
        &self,
        text: impl Into<String>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = TurnEvent> + Send + '_ {
        let text = text.into();

        async_stream::stream! {
            let mut turn = Turn::assistant();
            let replies = self.client.send_turn(text.clone(), cancel);
            futures_util::pin_mut!(replies);
            let lookup = self.lookup(&text);
            futures_util::pin_mut!(lookup);
            let mut knowledge = None;

            let failure = loop {
                let step = tokio::select! {
                    next = replies.next() => match next {
                        Some(Ok(fragment)) => Step::Fragment(fragment),
                        Some(Err(e)) => Step::Failed(e),
                        None => Step::Finished,
                    },
                    found = &mut lookup, if knowledge.is_none() => Step::Retrieved(found),
                };

                match step {
                    Step::Fragment(fragment) => {
                        if let Err(e) = turn.push_fragment(&fragment) {
                            break Some(e);
                        }
                        yield TurnEvent::Fragment(fragment);
                    }
                    Step::Retrieved(found) => knowledge = Some(found),
                    Step::Finished => break None,
                    Step::Failed(e) => break Some(e),
                }
            };

            match failure {
                None => {
                    let knowledge = match knowledge {
                        Some(found) => found,
                        None => lookup.await,
                    };
                    info!(
                        chars = turn.content.len(),
                        knowledge = knowledge.as_ref().map(RetrievalResult::len).unwrap_or(0),
                        "Turn delivered"
                    );
                    match turn.deliver(knowledge) {
                        Ok(()) => {
                            yield TurnEvent::Delivered(turn);
                        }
                        Err(error) => {
                            yield TurnEvent::Failed { turn, error };
                        }
                    }
                }
                Some(error) => {
                    let message = if error.is_cancelled() {
                        CANCELLED_TURN_MESSAGE
                    } else {
                        warn!(error = %error, code = error.code(), "Turn failed");
                        FAILED_TURN_MESSAGE
                    };
                    // Pending turns always accept a failure
                    let _ = turn.fail(message);
                    yield TurnEvent::Failed { turn, error };
                }
            }
        }
    }

    async fn lookup(&self, text: &str) -> Option<RetrievalResult> {
        let engine = self.retrieval.as_ref()?;
        match engine.query(text).await {
            Ok(result) => {
                debug!(results = result.len(), "Knowledge lookup finished");
                Some(result)
            }
            Err(e) => {
                warn!(error = %e, "Knowledge lookup failed, omitting annotation");
                None
            }
        }
    }
}
