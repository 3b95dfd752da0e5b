pub mod diag;
pub mod error;
pub mod eval;
pub mod expr;
pub mod options;

pub use diag::{Diagnostic, Diagnostics, Severity};
pub use error::{DeploymentError, ExpressionError};
pub use eval::visitor::{expand_template, parameter_values, Expansion};
pub use options::ExpansionOptions;

/// Expands a template from JSON text, with parameters from JSON text in
/// either plain or parameters-file form.
pub fn expand_template_str(
    template: &str,
    parameters: Option<&str>,
    options: ExpansionOptions,
) -> Result<Expansion, ExpandError> {
    let template: serde_json::Value = serde_json::from_str(template)?;
    let parameters = match parameters {
        Some(text) => serde_json::from_str(text)?,
        None => serde_json::Value::Object(serde_json::Map::new()),
    };
    Ok(expand_template(&template, &parameters, options)?)
}

/// Errors from [`expand_template_str`].
#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
}
