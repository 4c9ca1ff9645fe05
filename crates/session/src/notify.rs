//! Publishes session transitions on an event bus.

use crate::session::ModelSession;
use llmbench_events::{emit_event, event_names, EventBusRef, ModelStateChangedEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Forward every transition of `session` to `bus` until `cancel` fires.
pub fn forward_transitions(
    session: &ModelSession,
    bus: EventBusRef,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut transitions = session.subscribe_transitions();

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = transitions.recv() => received,
            };

            match received {
                Ok(transition) => {
                    let event = ModelStateChangedEvent {
                        state: transition.state.as_str().to_string(),
                        model_name: transition.model_name,
                        message_count: transition.messages.len(),
                    };
                    emit_event(bus.as_ref(), event_names::MODEL_STATE_CHANGED, &event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "transition forwarder lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("transition forwarder stopped");
    })
}
