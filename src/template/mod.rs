//! Stack template rendering
//!
//! Stack templates are jinja templates. They receive two variables:
//! `unique`, the stack's uniqueness token, and `agents`, the generated agent
//! map keyed by id. Loops such as
//! `{% for agent in agents.values() %}` and lookups such as
//! `{{ agents.x_master_0.availability_zone }}` both work.

use minijinja::{Environment, ErrorKind};
use serde::Serialize;
use thiserror::Error;

use crate::placement::AgentMap;

#[derive(Error, Debug, PartialEq)]
pub enum TemplateError {
    #[error("Template syntax error: {0}")]
    Syntax(String),

    #[error("Undefined template variable: {0}")]
    UndefinedVariable(String),

    #[error("Failed to render template: {0}")]
    Render(String),
}

impl From<minijinja::Error> for TemplateError {
    fn from(e: minijinja::Error) -> Self {
        match e.kind() {
            ErrorKind::SyntaxError => TemplateError::Syntax(e.to_string()),
            ErrorKind::UndefinedError => TemplateError::UndefinedVariable(e.to_string()),
            _ => TemplateError::Render(e.to_string()),
        }
    }
}

/// Variables injected into a template
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TemplateContext<'a> {
    pub agents: &'a AgentMap,
    pub unique: &'a str,
}

/// Renders a stack template with agents and the uniqueness token
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, source: &str, context: &TemplateContext<'_>) -> Result<String, TemplateError>;
}

/// Jinja renderer. Undefined names print as empty, attribute access on them
/// fails, and a single trailing newline is dropped.
pub struct JinjaRenderer {
    env: Environment<'static>,
}

impl Default for JinjaRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl JinjaRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_unknown_method_callback(minijinja_contrib::pycompat::unknown_method_callback);
        Self { env }
    }
}

impl TemplateRenderer for JinjaRenderer {
    fn render(&self, source: &str, context: &TemplateContext<'_>) -> Result<String, TemplateError> {
        Ok(self.env.render_str(source, context)?)
    }
}
