//! Command-chain DSL: `a && b || c & d`.
//!
//! Not a shell. Programs are spawned directly with arguments split by a small
//! quote-aware lexer; there are no pipes, redirections or globbing.

mod executor;
mod parser;

pub use executor::{run_chain, ChainOptions, CommandOutput, SPAWN_FAILURE_EXIT_CODE, TIMEOUT_EXIT_CODE};
pub use parser::{parse_chain, split_args, CommandSegment, Dependency};
