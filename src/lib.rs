//! Core library for the rust_scan sequencer.
//!
//! A sequence file describes an experiment as nested `action <type> ... end`
//! blocks. The [`parser`] turns it into a [`Forest`] of [`ActionNode`]s using the
//! handlers known to an [`ActionRegistry`], and the [`engine`] drives that forest
//! through setup, run and cleanup against the devices reachable through a shared
//! [`ConnectionManager`].
//!
//! ```no_run
//! use rust_scan::{parse, ActionContext, ActionRegistry, ConnectionManager, OutputTarget, RunEngine};
//! use rust_scan::hardware::SimulatedBackend;
//! use std::sync::Arc;
//!
//! # async fn demo() -> rust_scan::ScanResult<()> {
//! let registry = ActionRegistry::with_builtins();
//! let mut forest = parse("action count\n count 3\n action sleep\n end\nend\n", &registry)?;
//!
//! let connections = ConnectionManager::new(Arc::new(SimulatedBackend::default()));
//! let ctx = ActionContext::new(connections, OutputTarget::new(".", "demo"));
//! RunEngine::new(ctx).run_all(&mut forest).await?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod actions;
pub mod config;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod output;
pub mod parameters;
pub mod parser;
pub mod registry;

pub use action::{Action, ActionCategory, ActionContext, ActionNode, Children, NodeId};
pub use config::Settings;
pub use engine::{run_all, RunEngine, RunSummary};
pub use error::{ActionError, NodeLabel, ScanError, ScanResult};
pub use hardware::ConnectionManager;
pub use output::OutputTarget;
pub use parameters::{Parameter, ParameterStore};
pub use parser::{parse, parse_file, Forest, Parser};
pub use registry::ActionRegistry;
