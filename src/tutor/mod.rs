pub mod context;
pub mod exec_log;
pub mod orchestrator;
pub mod planner;
pub mod protocol;
pub mod rate_limit;
pub mod semantic;
pub mod tools;

pub use orchestrator::{Orchestrator, TurnError, TurnLinks, TurnRequest, TurnStream};
