use crate::propagator::{PropagationReport, RevocationPropagator};
use crate::signal::RevocationSignal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dcs_types::{Actor, ContractId, CredentialId, DcsError, DcsResult};
use dcs_workflow::TerminationHook;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Reply = oneshot::Sender<DcsResult<PropagationReport>>;

enum Command {
    Propagate {
        actor: Actor,
        signal: RevocationSignal,
        reply: Option<Reply>,
    },
    Shutdown,
}

/// Sending side of the revocation reactor.
#[derive(Clone)]
pub struct RevocationHandle {
    tx: mpsc::Sender<Command>,
}

/// Start the reactor. Signals are applied in arrival order, one at a time.
pub fn spawn(propagator: Arc<RevocationPropagator>, capacity: usize) -> (RevocationHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(async move {
        info!("revocation reactor started");
        while let Some(command) = rx.recv().await {
            let (actor, signal, reply) = match command {
                Command::Propagate { actor, signal, reply } => (actor, signal, reply),
                Command::Shutdown => break,
            };
            let kind = signal.kind();
            let entity = signal.entity();
            let result = propagator.propagate(&actor, signal).await;
            if let Err(err) = &result {
                if err.is_fatal() {
                    error!(kind, entity = %entity, error = %err, "revocation could not be recorded");
                } else {
                    warn!(kind, entity = %entity, error = %err, "revocation refused");
                }
            }
            if let Some(reply) = reply {
                // The submitter may have stopped waiting.
                let _ = reply.send(result);
            }
        }
        info!("revocation reactor stopped");
    });
    (RevocationHandle { tx }, task)
}

impl RevocationHandle {
    /// Queue a signal without waiting for its outcome.
    pub async fn submit(&self, actor: Actor, signal: RevocationSignal) -> DcsResult<()> {
        self.tx
            .send(Command::Propagate {
                actor,
                signal,
                reply: None,
            })
            .await
            .map_err(|_| stopped())
    }

    /// Queue a signal and wait until it has been propagated.
    pub async fn submit_and_wait(&self, actor: Actor, signal: RevocationSignal) -> DcsResult<PropagationReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Propagate {
                actor,
                signal,
                reply: Some(reply),
            })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    /// Stop after the signals already queued.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

fn stopped() -> DcsError {
    DcsError::ExternalUnavailable("revocation reactor is not running".into())
}

/// Credentials of a terminated contract are queued for revocation. Never
/// waits: the engine calls this while it still holds the contract.
#[async_trait]
impl TerminationHook for RevocationHandle {
    async fn on_termination(
        &self,
        contract_id: &ContractId,
        credentials: Vec<CredentialId>,
        effective_date: DateTime<Utc>,
    ) -> DcsResult<()> {
        let mut dropped = 0usize;
        for id in credentials {
            let signal = RevocationSignal::Credential {
                id,
                reason: format!("contract {contract_id} terminated"),
                at: Some(effective_date),
            };
            let command = Command::Propagate {
                actor: Actor::engine(),
                signal,
                reply: None,
            };
            if self.tx.try_send(command).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            return Err(DcsError::ExternalUnavailable(format!(
                "{dropped} credential revocation(s) for {contract_id} could not be queued"
            )));
        }
        debug!(contract_id = %contract_id, "termination revocations queued");
        Ok(())
    }
}
