//! itemflow engine
//!
//! Runs declarative item workflows: sources produce items, the pipeline drops
//! the ones already processed, filters narrow the list, and steps act on each
//! remaining item. Processed-item keys persist in a state store so later runs
//! only see new items.
//!
//! This crate provides:
//! - Namespaced, TTL-aware state store over memory, JSON-file and SQLite adapters
//! - Source-item pipeline with key-based dedup, reverse and limit
//! - Template engine with Jinja2-compatible syntax and a Rhai script evaluator
//! - Command-chain executor (`a && b || c & d`)
//! - Step and source registries with built-in implementations
//! - Identifier codec for composite item keys

pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod identifier;
pub mod pipeline;
pub mod script;
pub mod source;
pub mod step;
pub mod store;
pub mod template;
pub mod value_path;
pub mod workflow;

pub use config::EngineConfig;
pub use context::{InternalState, PublicContext, RunContext};
pub use error::{EngineError, EngineResult};
pub use identifier::Identifier;
pub use source::{Source, SourceRegistry};
pub use step::{Step, StepRegistry};
pub use store::Store;
pub use template::TemplateEngine;
pub use workflow::{RunReport, Workflow, WorkflowRunner};
