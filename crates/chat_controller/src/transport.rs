use engine_client::{CancellationSignal, ChatRequest, ClientError, EngineClient};
use engine_contract::StreamEvent;
use futures_util::future::BoxFuture;

/// Why a turn's stream stopped before its natural end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInterruption {
    Cancelled,
    /// Connection or HTTP failure, carrying the text shown to the user.
    Transport(String),
}

/// Sink for the events of one turn.
pub type EventSink<'a> = &'a mut (dyn FnMut(StreamEvent) + Send);

/// Streams one chat turn from an engine.
///
/// Implementations deliver events to `on_event` in arrival order and stop
/// delivering once `cancel` is set.
pub trait ChatTransport: Send + Sync {
    fn stream_turn<'a>(
        &'a self,
        request: &'a ChatRequest,
        cancel: &'a CancellationSignal,
        on_event: EventSink<'a>,
    ) -> BoxFuture<'a, Result<(), TurnInterruption>>;
}

impl ChatTransport for EngineClient {
    fn stream_turn<'a>(
        &'a self,
        request: &'a ChatRequest,
        cancel: &'a CancellationSignal,
        on_event: EventSink<'a>,
    ) -> BoxFuture<'a, Result<(), TurnInterruption>> {
        Box::pin(async move {
            match self
                .stream_with_handler(request, Some(cancel), |event| on_event(event))
                .await
            {
                Ok(_) => Ok(()),
                Err(ClientError::Cancelled) => Err(TurnInterruption::Cancelled),
                Err(error) => {
                    tracing::warn!(%error, endpoint = %self.chat_endpoint(), "chat turn failed");
                    Err(TurnInterruption::Transport(error.user_message()))
                }
            }
        })
    }
}
