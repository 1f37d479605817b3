//! Update delivery for negotiation observers

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::model::ProposalId;
use crate::negotiation::OutcomeKind;

/// Protocol events, in the order the driver produces them
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NegotiationEvent {
    ProposalPosted {
        round: u32,
        proposal_id: ProposalId,
        author: String,
    },
    /// Emitted from evaluation workers as each one finishes
    EvaluationPosted {
        round: u32,
        proposal_id: ProposalId,
        agent: String,
        score: u8,
        satisfied: bool,
    },
    RoundCompleted {
        round: u32,
        proposal_id: ProposalId,
        average: f64,
        scores: BTreeMap<String, u8>,
    },
    ContinuationJudged {
        round: u32,
        should_continue: bool,
        rationale: String,
    },
    SidePaymentsValidated {
        round: u32,
        proposal_id: ProposalId,
        valid: bool,
        report: String,
    },
    /// Always the last event of a run that did not error
    Finished {
        outcome: OutcomeKind,
        rounds: u32,
        proposal_id: Option<ProposalId>,
    },
}

type Callback = Arc<dyn Fn(NegotiationEvent) + Send + Sync>;

#[derive(Clone)]
enum SinkTarget {
    Channel(mpsc::UnboundedSender<NegotiationEvent>),
    Callback(Callback),
}

/// Fire-and-forget destination for [`NegotiationEvent`]s
///
/// Cheap to clone and safe to use from evaluation workers. Emitting never
/// blocks and never fails; a closed receiver just drops events.
#[derive(Clone, Default)]
pub struct UpdateSink {
    target: Option<SinkTarget>,
}

impl UpdateSink {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_sender(tx: mpsc::UnboundedSender<NegotiationEvent>) -> Self {
        Self {
            target: Some(SinkTarget::Channel(tx)),
        }
    }

    /// The callback runs inline on whichever task emits, so it must not block.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(NegotiationEvent) + Send + Sync + 'static,
    {
        Self {
            target: Some(SinkTarget::Callback(Arc::new(f))),
        }
    }

    pub fn emit(&self, event: NegotiationEvent) {
        match &self.target {
            Some(SinkTarget::Channel(tx)) => {
                let _ = tx.send(event);
            }
            Some(SinkTarget::Callback(f)) => f(event),
            None => {}
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }
}

impl fmt::Debug for UpdateSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.target {
            Some(SinkTarget::Channel(_)) => "channel",
            Some(SinkTarget::Callback(_)) => "callback",
            None => "disabled",
        };
        f.debug_struct("UpdateSink").field("target", &kind).finish()
    }
}

/// Receiving half of [`update_channel`]
pub struct UpdateStream {
    rx: mpsc::UnboundedReceiver<NegotiationEvent>,
}

impl UpdateStream {
    pub async fn recv(&mut self) -> Option<NegotiationEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<NegotiationEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for UpdateStream {
    type Item = NegotiationEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Create a connected sink/stream pair
pub fn update_channel() -> (UpdateSink, UpdateStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UpdateSink::from_sender(tx), UpdateStream { rx })
}
