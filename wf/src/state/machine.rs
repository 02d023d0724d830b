//! Workflow phase machines
//!
//! Each workflow's transition table is declarative data. Workers never
//! branch on phases themselves; they call [`WorkflowMachine::advance`]
//! which validates against the table and stamps the update time.

use thiserror::Error;

use super::execution::ExecutionState;

/// Phase transition errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhaseError {
    #[error("phase {phase:?} is not in workflow {workflow}'s alphabet")]
    UnknownPhase { workflow: &'static str, phase: String },

    #[error("workflow {workflow} does not allow {from:?} -> {to:?}")]
    InvalidTransition {
        workflow: &'static str,
        from: String,
        to: String,
    },
}

/// A finite state machine over a phase alphabet
#[derive(Debug)]
pub struct WorkflowMachine {
    pub id: &'static str,

    /// Phase the reactive engine creates executions in
    pub initial: &'static str,

    transitions: &'static [(&'static str, &'static [&'static str])],
}

impl WorkflowMachine {
    /// Whether a phase belongs to this workflow's alphabet
    pub fn contains(&self, phase: &str) -> bool {
        self.transitions.iter().any(|(from, _)| *from == phase)
    }

    /// Allowed next phases from a given phase
    pub fn allowed(&self, from: &str) -> &'static [&'static str] {
        self.transitions
            .iter()
            .find(|(f, _)| *f == from)
            .map(|(_, to)| *to)
            .unwrap_or(&[])
    }

    pub fn can_advance(&self, from: &str, to: &str) -> bool {
        self.allowed(from).contains(&to)
    }

    /// Terminal phases have no outgoing transitions
    pub fn is_terminal(&self, phase: &str) -> bool {
        self.contains(phase) && self.allowed(phase).is_empty()
    }

    /// Advance a state record to the next phase, validating the
    /// transition and stamping `updated_at`.
    pub fn advance(&self, state: &mut ExecutionState, next: &str) -> Result<(), PhaseError> {
        if !self.contains(next) {
            return Err(PhaseError::UnknownPhase {
                workflow: self.id,
                phase: next.to_string(),
            });
        }
        if !self.can_advance(&state.phase, next) {
            return Err(PhaseError::InvalidTransition {
                workflow: self.id,
                from: state.phase.clone(),
                to: next.to_string(),
            });
        }
        state.phase = next.to_string();
        state.touch();
        Ok(())
    }
}

/// Plan generation and review loop
pub static PLAN_REVIEW: WorkflowMachine = WorkflowMachine {
    id: "plan-review",
    initial: "generating",
    transitions: &[
        ("generating", &["planning", "generator_failed"]),
        ("planning", &["planned", "generator_failed"]),
        ("planned", &["reviewing"]),
        ("reviewing", &["reviewing_dispatched"]),
        ("reviewing_dispatched", &["reviewed", "reviewer_failed"]),
        ("reviewed", &["evaluated"]),
        ("evaluated", &["approved", "needs_changes"]),
        ("approved", &["complete"]),
        ("needs_changes", &["generating", "escalated"]),
        ("complete", &[]),
        ("escalated", &[]),
        ("generator_failed", &[]),
        ("reviewer_failed", &[]),
    ],
};

/// Plan-phase expansion and review loop
pub static PHASE_REVIEW: WorkflowMachine = WorkflowMachine {
    id: "phase-review",
    initial: "expanding",
    transitions: &[
        ("expanding", &["expanded", "generator_failed"]),
        ("expanded", &["reviewing"]),
        ("reviewing", &["reviewing_dispatched"]),
        ("reviewing_dispatched", &["reviewed", "reviewer_failed"]),
        ("reviewed", &["evaluated"]),
        ("evaluated", &["approved", "needs_changes"]),
        ("approved", &["complete"]),
        ("needs_changes", &["expanding", "escalated"]),
        ("complete", &[]),
        ("escalated", &[]),
        ("generator_failed", &[]),
        ("reviewer_failed", &[]),
    ],
};

/// Task-list expansion and review loop
pub static TASK_REVIEW: WorkflowMachine = WorkflowMachine {
    id: "task-review",
    initial: "expanding",
    transitions: &[
        ("expanding", &["expanded", "generator_failed"]),
        ("expanded", &["reviewing"]),
        ("reviewing", &["reviewing_dispatched"]),
        ("reviewing_dispatched", &["reviewed", "reviewer_failed"]),
        ("reviewed", &["evaluated"]),
        ("evaluated", &["approved", "needs_changes"]),
        ("approved", &["complete"]),
        ("needs_changes", &["expanding", "escalated"]),
        ("complete", &[]),
        ("escalated", &[]),
        ("generator_failed", &[]),
        ("reviewer_failed", &[]),
    ],
};

/// Per-task develop → validate → review loop
pub static TASK_EXECUTION: WorkflowMachine = WorkflowMachine {
    id: "task-execution-loop",
    initial: "pending",
    transitions: &[
        ("pending", &["developing"]),
        ("developing", &["developed", "developer_failed"]),
        ("developed", &["validating"]),
        ("validating", &["validated", "validation_error"]),
        ("validated", &["reviewing"]),
        ("reviewing", &["reviewing_dispatched"]),
        ("reviewing_dispatched", &["reviewed", "reviewer_failed"]),
        ("reviewed", &["evaluated"]),
        ("evaluated", &["approved", "needs_changes"]),
        ("approved", &["complete"]),
        ("needs_changes", &["developing", "escalated"]),
        ("complete", &[]),
        ("escalated", &[]),
        ("developer_failed", &[]),
        ("validation_error", &[]),
        ("reviewer_failed", &[]),
    ],
};

/// Look up a machine by workflow id
pub fn machine_for(workflow_id: &str) -> Option<&'static WorkflowMachine> {
    match workflow_id {
        "plan-review" => Some(&PLAN_REVIEW),
        "phase-review" => Some(&PHASE_REVIEW),
        "task-review" => Some(&TASK_REVIEW),
        "task-execution-loop" => Some(&TASK_EXECUTION),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_in(machine: &WorkflowMachine, phase: &str) -> ExecutionState {
        ExecutionState::new("exec-1", machine.id, phase, "auth", "Add auth")
    }

    #[test]
    fn test_happy_path_is_a_valid_walk() {
        let path = [
            "planning",
            "planned",
            "reviewing",
            "reviewing_dispatched",
            "reviewed",
            "evaluated",
            "approved",
            "complete",
        ];

        let mut state = state_in(&PLAN_REVIEW, PLAN_REVIEW.initial);
        for next in path {
            PLAN_REVIEW.advance(&mut state, next).unwrap();
        }
        assert!(PLAN_REVIEW.is_terminal(&state.phase));
    }

    #[test]
    fn test_revision_loop() {
        let mut state = state_in(&PLAN_REVIEW, "evaluated");
        PLAN_REVIEW.advance(&mut state, "needs_changes").unwrap();
        PLAN_REVIEW.advance(&mut state, "generating").unwrap();
        assert_eq!(state.phase, "generating");
    }

    #[test]
    fn test_escalation_from_needs_changes() {
        let mut state = state_in(&PLAN_REVIEW, "needs_changes");
        PLAN_REVIEW.advance(&mut state, "escalated").unwrap();
        assert!(PLAN_REVIEW.is_terminal("escalated"));
    }

    #[test]
    fn test_rejects_out_of_alphabet_phase() {
        let mut state = state_in(&PLAN_REVIEW, "generating");
        let err = PLAN_REVIEW.advance(&mut state, "daydreaming").unwrap_err();
        assert!(matches!(err, PhaseError::UnknownPhase { .. }));
        // State untouched on failure
        assert_eq!(state.phase, "generating");
    }

    #[test]
    fn test_rejects_invalid_transition() {
        let mut state = state_in(&PLAN_REVIEW, "generating");
        let err = PLAN_REVIEW.advance(&mut state, "approved").unwrap_err();
        assert!(matches!(err, PhaseError::InvalidTransition { .. }));
    }

    #[test]
    fn test_failure_phases_absorb() {
        for machine in [&PLAN_REVIEW, &PHASE_REVIEW, &TASK_REVIEW] {
            assert!(machine.is_terminal("generator_failed"));
            assert!(machine.is_terminal("reviewer_failed"));
        }
        assert!(TASK_EXECUTION.is_terminal("developer_failed"));
        assert!(TASK_EXECUTION.is_terminal("validation_error"));
    }

    #[test]
    fn test_task_execution_loop_path() {
        let path = [
            "developing",
            "developed",
            "validating",
            "validated",
            "reviewing",
            "reviewing_dispatched",
            "reviewed",
            "evaluated",
            "needs_changes",
            "developing",
        ];
        let mut state = state_in(&TASK_EXECUTION, TASK_EXECUTION.initial);
        for next in path {
            TASK_EXECUTION.advance(&mut state, next).unwrap();
        }
    }

    #[test]
    fn test_machine_for() {
        assert_eq!(machine_for("plan-review").unwrap().id, "plan-review");
        assert_eq!(machine_for("task-execution-loop").unwrap().id, "task-execution-loop");
        assert!(machine_for("nope").is_none());
    }

    proptest::proptest! {
        /// Any sequence of advances that succeeds only ever lands on
        /// in-alphabet phases reachable from the previous phase.
        #[test]
        fn prop_advances_stay_in_alphabet(steps in proptest::collection::vec(proptest::string::string_regex("[a-z_]{1,20}").unwrap(), 0..20)) {
            let mut state = state_in(&PLAN_REVIEW, PLAN_REVIEW.initial);
            for step in steps {
                let before = state.phase.clone();
                match PLAN_REVIEW.advance(&mut state, &step) {
                    Ok(()) => {
                        proptest::prop_assert!(PLAN_REVIEW.contains(&state.phase));
                        proptest::prop_assert!(PLAN_REVIEW.allowed(&before).contains(&state.phase.as_str()));
                    }
                    Err(_) => proptest::prop_assert_eq!(&state.phase, &before),
                }
            }
        }
    }
}
