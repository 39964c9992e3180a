//! Three-stage concurrent job pipeline.
//!
//! A batch of jobs goes through fetch, update and process worker pools
//! ([`orchestrator::PipelineOrchestrator`]); failures come back as data and the
//! [`retry::RetryDriver`] decides whether they get another pass, all under one
//! global deadline ([`deadline::DeadlineContext`]).

pub mod cli;
pub mod config;
pub mod deadline;
pub mod error;
pub mod fetch;
pub mod job;
pub mod logging;
pub mod operator;
pub mod orchestrator;
pub mod pool;
pub mod process;
pub mod retry;
pub mod seed;
pub mod stage;
pub mod store;
pub mod ui;
