//! # quorra-core
//!
//! Foundation types, runner contracts, and errors for the Quorra test engine.
//!
//! This crate provides the shared vocabulary that every other Quorra crate
//! depends on:
//!
//! - **Identity**: [`ids::AgentIdentity`], the 128-bit id a worker registers under
//! - **Packages**: [`package::TestPackage`], the hierarchical unit of work
//! - **Filters**: [`filter::TestFilter`] with the match-all [`filter::TestFilter::empty`]
//! - **Results**: [`results::TestNode`] trees and their aggregation
//! - **Runner contracts**: [`runner::TestEngineRunner`], [`runner::RunnerFactory`],
//!   [`runner::TestEventListener`]
//! - **Errors**: [`errors::RunnerError`] with a wire-stable [`errors::ErrorKind`]
//! - **Logging**: [`logging::init_logging`] for binaries
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other quorra crates.

#![deny(unsafe_code)]

pub mod errors;
pub mod filter;
pub mod ids;
pub mod logging;
pub mod package;
pub mod package_settings;
pub mod results;
pub mod runner;

pub use errors::{ChildFailure, ErrorKind, RunnerError};
pub use filter::TestFilter;
pub use ids::AgentIdentity;
pub use package::TestPackage;
pub use results::{NodeKind, ResultSummary, TestNode, TestOutcome};
pub use runner::{NullListener, RunnerFactory, TestEngineRunner, TestEventListener};
