//! Periodic expiry of overdue signing sessions and deployment attempts

use dcs_templates::TemplateRepository;
use dcs_types::{Actor, ContractId, DcsResult};
use dcs_workflow::ContractWorkflowEngine;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What one sweep changed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub expired_sessions: Vec<ContractId>,
    pub failed_deployments: Vec<ContractId>,
    /// Idle lock slots released.
    pub pruned_locks: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_sessions.is_empty() && self.failed_deployments.is_empty()
    }
}

pub struct Sweeper {
    engine: Arc<ContractWorkflowEngine>,
    templates: Option<Arc<TemplateRepository>>,
    interval: Duration,
    actor: Actor,
}

impl Sweeper {
    pub fn new(engine: Arc<ContractWorkflowEngine>, interval: Duration) -> Self {
        Self {
            engine,
            templates: None,
            interval: interval.max(Duration::from_secs(1)),
            actor: Actor::engine(),
        }
    }

    /// Also prune the template repository's lock slots.
    pub fn with_templates(mut self, templates: Arc<TemplateRepository>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Run both expiries once, then release idle lock slots. A failing
    /// expiry does not skip the other.
    pub async fn sweep_once(&self) -> DcsResult<SweepReport> {
        let sessions = self.engine.expire_signing_sessions(&self.actor).await;
        let deployments = self.engine.expire_overdue_deployments(&self.actor).await;
        let pruned_locks = self.engine.prune_locks() + self.templates.as_ref().map_or(0, |t| t.prune_locks());
        if pruned_locks > 0 {
            debug!(pruned_locks, "idle lock slots released");
        }
        let report = SweepReport {
            expired_sessions: sessions?,
            failed_deployments: deployments?,
            pruned_locks,
        };
        if !report.is_empty() {
            info!(
                sessions = report.expired_sessions.len(),
                deployments = report.failed_deployments.len(),
                "sweep expired overdue work"
            );
        }
        Ok(report)
    }

    /// Sweep every interval until `shutdown` turns true.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_secs = self.interval.as_secs(), "sweeper started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.sweep_once().await {
                            Ok(report) if report.is_empty() => debug!("sweep found nothing due"),
                            Ok(_) => {}
                            Err(err) if err.is_fatal() => error!(error = %err, "sweep could not be recorded"),
                            Err(err) => warn!(error = %err, "sweep failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("sweeper stopped");
        })
    }
}
