//! The contract transition table: `state x event -> state | error`.

use dcs_types::{ContractState, DcsError, DcsResult};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractEvent {
    SubmitForApproval,
    Approve,
    Reject,
    InitiateSigning,
    CompleteSigning,
    ExpireSigning,
    Deploy,
    Acknowledge,
    DeploymentFailed,
    ConfirmExecution,
    RequestRenewal,
    ApproveRenewal,
    RequestTermination,
    ApproveTermination,
    /// Return a pending renewal or termination to the state it came from.
    RejectPending,
}

impl ContractEvent {
    pub const ALL: &'static [ContractEvent] = &[
        ContractEvent::SubmitForApproval,
        ContractEvent::Approve,
        ContractEvent::Reject,
        ContractEvent::InitiateSigning,
        ContractEvent::CompleteSigning,
        ContractEvent::ExpireSigning,
        ContractEvent::Deploy,
        ContractEvent::Acknowledge,
        ContractEvent::DeploymentFailed,
        ContractEvent::ConfirmExecution,
        ContractEvent::RequestRenewal,
        ContractEvent::ApproveRenewal,
        ContractEvent::RequestTermination,
        ContractEvent::ApproveTermination,
        ContractEvent::RejectPending,
    ];
}

/// States from which renewal and termination may be requested.
pub const RENEWABLE: &[ContractState] = &[
    ContractState::Signed,
    ContractState::Deployed,
    ContractState::Executed,
    ContractState::Renewed,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: ContractState,
    pub event: ContractEvent,
    pub to: ContractState,
}

fn fixed(state: ContractState, event: ContractEvent) -> Option<ContractState> {
    use ContractEvent as E;
    use ContractState as S;
    let next = match (state, event) {
        (S::Draft, E::SubmitForApproval) => S::UnderReview,
        (S::UnderReview, E::Approve) => S::Approved,
        (S::UnderReview, E::Reject) => S::Draft,
        (S::Approved, E::InitiateSigning) => S::SigningInProgress,
        (S::SigningInProgress, E::CompleteSigning) => S::Signed,
        (S::SigningInProgress, E::ExpireSigning) => S::Approved,
        (S::Signed | S::Failed, E::Deploy) => S::DeploymentPending,
        (S::DeploymentPending, E::Acknowledge) => S::Deployed,
        (S::DeploymentPending, E::DeploymentFailed) => S::Failed,
        (S::Deployed, E::ConfirmExecution) => S::Executed,
        (s, E::RequestRenewal) if RENEWABLE.contains(&s) => S::RenewalPending,
        (s, E::RequestTermination) if RENEWABLE.contains(&s) => S::TerminationPending,
        (S::RenewalPending, E::ApproveRenewal) => S::Renewed,
        (S::TerminationPending, E::ApproveTermination) => S::Terminated,
        _ => return None,
    };
    Some(next)
}

/// Apply `event` to `state`. `origin` is the state a pending change was
/// requested from; only [`ContractEvent::RejectPending`] consults it.
pub fn apply(
    state: ContractState,
    event: ContractEvent,
    origin: Option<ContractState>,
) -> DcsResult<ContractState> {
    let next = match event {
        ContractEvent::RejectPending => match (state, origin) {
            (ContractState::RenewalPending | ContractState::TerminationPending, Some(o))
                if RENEWABLE.contains(&o) =>
            {
                Some(o)
            }
            _ => None,
        },
        _ => fixed(state, event),
    };
    next.ok_or_else(|| {
        DcsError::IllegalTransition(format!("{event:?} is not allowed in state {state}"))
    })
}

/// Every edge of the machine.
pub fn edges() -> Vec<Edge> {
    let mut out = Vec::new();
    for &from in ContractState::ALL {
        for &event in ContractEvent::ALL {
            if event == ContractEvent::RejectPending {
                for &origin in RENEWABLE {
                    if let Ok(to) = apply(from, event, Some(origin)) {
                        out.push(Edge { from, event, to });
                    }
                }
            } else if let Some(to) = fixed(from, event) {
                out.push(Edge { from, event, to });
            }
        }
    }
    out
}

/// Whether an audited `prior -> new` pair is an edge of the machine.
/// Creation is recorded as `none -> draft`.
pub fn is_recorded_edge(prior: &str, new: &str) -> bool {
    if prior == "none" {
        return new == ContractState::Draft.as_str();
    }
    edges()
        .iter()
        .any(|e| e.from.as_str() == prior && e.to.as_str() == new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn happy_path_reaches_executed() {
        use ContractEvent::*;
        let mut state = ContractState::Draft;
        for event in [SubmitForApproval, Approve, InitiateSigning, CompleteSigning, Deploy, Acknowledge, ConfirmExecution] {
            state = apply(state, event, None).unwrap();
        }
        assert_eq!(state, ContractState::Executed);
    }

    #[test]
    fn terminated_is_a_dead_end() {
        for &event in ContractEvent::ALL {
            assert!(apply(ContractState::Terminated, event, Some(ContractState::Signed)).is_err());
        }
    }

    #[test]
    fn pending_rejection_returns_to_origin() {
        let back = apply(ContractState::TerminationPending, ContractEvent::RejectPending, Some(ContractState::Deployed));
        assert_eq!(back.unwrap(), ContractState::Deployed);
        assert!(apply(ContractState::TerminationPending, ContractEvent::RejectPending, Some(ContractState::Draft)).is_err());
        assert!(apply(ContractState::Signed, ContractEvent::RejectPending, Some(ContractState::Signed)).is_err());
    }

    #[test]
    fn failed_deployment_can_be_retried() {
        assert_eq!(
            apply(ContractState::Failed, ContractEvent::Deploy, None).unwrap(),
            ContractState::DeploymentPending
        );
        assert!(is_recorded_edge("failed", "deployment_pending"));
        assert!(!is_recorded_edge("draft", "signed"));
    }

    fn any_event() -> impl Strategy<Value = ContractEvent> {
        proptest::sample::select(ContractEvent::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn random_walks_only_follow_edges(events in proptest::collection::vec(any_event(), 0..64)) {
            let mut state = ContractState::Draft;
            let mut origin = None;
            for event in events {
                if let Ok(next) = apply(state, event, origin) {
                    prop_assert!(is_recorded_edge(state.as_str(), next.as_str()));
                    if matches!(next, ContractState::RenewalPending | ContractState::TerminationPending) {
                        origin = Some(state);
                    }
                    state = next;
                }
            }
        }

        #[test]
        fn no_edge_leaves_terminated(event in any_event()) {
            prop_assert!(apply(ContractState::Terminated, event, None).is_err());
        }
    }
}
