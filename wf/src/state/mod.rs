//! Execution state and workflow phase machines

mod execution;
mod findings;
mod machine;

pub use execution::{ExecutionState, StateUpdate};
pub use findings::{Finding, FindingSeverity, format_findings};
pub use machine::{
    PHASE_REVIEW, PLAN_REVIEW, PhaseError, TASK_EXECUTION, TASK_REVIEW, WorkflowMachine, machine_for,
};
