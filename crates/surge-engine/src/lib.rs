//! Load generation engine.
//!
//! - [`scheduler`]: target concurrency as a function of elapsed time
//! - [`selector`]: seeded weighted and Bernoulli choice
//! - [`user`] / [`executor`]: virtual users and the pools that scale them
//! - [`orchestrator`]: the run lifecycle, from validation to [`RunReport`]

pub mod action;
pub mod client;
pub mod executor;
pub mod orchestrator;
pub mod scheduler;
pub mod selector;
pub mod user;

pub use client::{HttpClient, HttpRequest, HttpResponse, Method, ReqwestClient};
pub use executor::VirtualUserPool;
pub use orchestrator::{
    CancelHandle, LoadTestOrchestrator, RunOptions, RunReport, RunState, StateTransition,
    StopReason, Verdict,
};
pub use scheduler::{scenario_target, target_concurrency};
pub use selector::{bernoulli, WeightedTable};
pub use user::{VirtualUser, VuState};
