//! # quorra-runtime
//!
//! Controller side of the engine.
//!
//! - **Agency**: [`agency::Agency`] accepts worker connections and routes them
//!   by identity; [`agency::RemoteRunner`] drives one worker over its socket
//! - **Launcher**: [`launcher::WorkerLauncher`] starts workers;
//!   [`launcher::ProcessLauncher`] spawns one agent process per worker
//! - **Orchestrator**: [`orchestrator::MultipleProcessRunner`] fans a
//!   composite package out over a bounded set of workers and merges results
//!
//! ## Crate Position
//!
//! Depends on: quorra-core, quorra-protocol, quorra-settings.
//! Depended on by: quorra (binary).

#![deny(unsafe_code)]

pub mod agency;
pub mod errors;
pub mod launcher;
pub mod orchestrator;

pub use agency::{Agency, RemoteRunner};
pub use errors::AgencyError;
pub use launcher::{ProcessLauncher, RemoteWorker, Worker, WorkerLauncher};
pub use orchestrator::{MultipleProcessRunner, level_of_parallelism};
