mod scheduler;
mod system;

pub use scheduler::Scheduler;
pub use system::{StepContext, System};
