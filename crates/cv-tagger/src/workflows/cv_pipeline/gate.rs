use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use super::cancellation::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Open,
    AwaitingDecision,
    Approved,
    Rejected,
}

impl GateState {
    pub const fn is_resolved(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Approved,
    Rejected,
}

/// Single-use approval point between report export and tag upload.
///
/// Decisions are accepted only while the gate is awaiting one, and only the first counts;
/// other calls to [`approve`](Self::approve) or [`reject`](Self::reject) report `false` and
/// leave the state alone.
#[derive(Debug, Clone)]
pub struct ConfirmationGate {
    state: Arc<watch::Sender<GateState>>,
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmationGate {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(GateState::Open);
        Self {
            state: Arc::new(sender),
        }
    }

    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }

    /// Starts accepting a decision. Returns `false` if the gate had already left `Open`.
    pub fn request_decision(&self) -> bool {
        self.state.send_if_modified(|current| {
            if *current == GateState::Open {
                *current = GateState::AwaitingDecision;
                true
            } else {
                false
            }
        })
    }

    pub fn approve(&self) -> bool {
        self.resolve(GateState::Approved)
    }

    pub fn reject(&self) -> bool {
        self.resolve(GateState::Rejected)
    }

    fn resolve(&self, decision: GateState) -> bool {
        self.state.send_if_modified(|current| {
            if *current == GateState::AwaitingDecision {
                *current = decision;
                true
            } else {
                false
            }
        })
    }

    fn force_reject(&self) {
        self.state.send_if_modified(|current| {
            if current.is_resolved() {
                false
            } else {
                *current = GateState::Rejected;
                true
            }
        });
    }

    /// Suspends until a decision is made. Cancellation while waiting counts as a rejection.
    pub async fn await_decision(&self, token: &CancellationToken) -> GateDecision {
        if token.is_requested() {
            self.force_reject();
            return self.decision();
        }

        self.request_decision();

        let mut receiver = self.state.subscribe();
        let resolved = async move {
            loop {
                let current = *receiver.borrow_and_update();
                if current.is_resolved() || receiver.changed().await.is_err() {
                    return;
                }
            }
        };

        tokio::select! {
            _ = resolved => {}
            _ = token.requested() => {
                self.force_reject();
            }
        }

        self.decision()
    }

    fn decision(&self) -> GateDecision {
        match self.state() {
            GateState::Approved => GateDecision::Approved,
            _ => GateDecision::Rejected,
        }
    }
}
