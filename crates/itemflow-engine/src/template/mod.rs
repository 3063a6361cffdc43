//! Template rendering.
//!
//! Jinja2-compatible rendering over the public context using minijinja, plus
//! the recursive walker that renders the string leaves of step configuration.

mod engine;
mod object;

pub use engine::TemplateEngine;
pub use object::render_object;
