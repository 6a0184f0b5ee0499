//! # Simulated Worker
//!
//! An in-process implementation of the worker side of the script protocol.
//!
//! ## Purpose
//!
//! The worker normally lives in another runtime. This crate serves the same
//! channels on plain threads so that engines can be exercised under
//! `cargo test`:
//! - [`WorkerService`] runs the requester loop and one loop per instance
//! - [`ScriptRunner`] is the interpretation seam
//! - [`ArithmeticRunner`] is a small integer interpreter
//! - [`SimLauncher`] plugs the worker into a `ScriptLanguage`

pub mod launcher;
pub mod runner;
pub mod service;

pub use launcher::SimLauncher;
pub use runner::{arithmetic_factory, ArithmeticRunner, EvalError, RunnerFactory, ScriptRunner};
pub use service::{WorkerHandle, WorkerService};
