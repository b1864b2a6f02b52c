//! Persistence models.
//!
//! `core` holds the entities themselves; `orchestration` holds the derived
//! row types returned by the readiness SQL functions.

pub mod core;
pub mod orchestration;

pub use self::core::named_task::{NamedTask, NewNamedTask};
pub use self::core::task::{NewTask, Task};
pub use self::core::task_namespace::TaskNamespace;
pub use self::core::task_transition::{NewTaskTransition, TaskTransition};
pub use self::core::workflow_step::{NewWorkflowStep, WorkflowStep};
pub use self::core::workflow_step_edge::WorkflowStepEdge;
pub use self::core::workflow_step_transition::{NewWorkflowStepTransition, WorkflowStepTransition};
pub use orchestration::{
    DependencyLevel, ExecutionStatus, HealthStatus, StepReadiness, SystemHealth,
    TaskExecutionContext,
};
