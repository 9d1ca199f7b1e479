//! The resumable editing workflow.
//!
//! A job moves through `intro → sections → summary → complete`, one step per
//! invocation. [`machine`] holds the pure transition function; [`runner`]
//! performs the provider calls, persists the job after every step and hands
//! follow-up work to a [`scheduler::Scheduler`].

pub mod error;
pub mod machine;
pub mod progress;
pub mod prompts;
pub mod runner;
pub mod scheduler;

pub use error::WorkflowError;
pub use machine::{Effect, Event, Limits, Plan, plan, transition};
pub use progress::{ProgressReport, progress_message};
pub use prompts::PromptPair;
pub use runner::{ClientFactory, ConfiguredClients, TickReport, Workflow, WorkflowOptions};
pub use scheduler::{Scheduler, SchedulerError, Task, TaskQueue};
