//! Load generation and escalation engine: simulated users, shared step
//! metrics, early abort on overload, and step-wise escalation.

pub mod aggregate;
pub mod escalation;
pub mod shutdown;
pub mod step;
pub mod store;
pub mod worker;

pub use aggregate::{aggregate, Recommendation, StepResult};
pub use escalation::{user_steps, EscalationLoop, EscalationPlan, RunReport};
pub use shutdown::Shutdown;
pub use step::{should_abort, StepController, StepOutcome, StepPlan, StepTiming};
pub use store::{MetricsSnapshot, MetricsStore};
pub use worker::{PauseBounds, UserSimulator};
