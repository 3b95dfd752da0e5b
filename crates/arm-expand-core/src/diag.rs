//! Findings collected while a template is expanded.
//!
//! A diagnostic is located by the JSON path of the template value it is
//! about, such as `resources[2].properties.name`. Templates arrive as parsed
//! JSON, so there are no byte spans to point at.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning = 0,
    Error = 1,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub summary: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        path: Option<String>,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            path,
            summary: summary.into(),
            detail: detail.into(),
        }
    }

    pub fn error(path: Option<String>, summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(Severity::Error, path, summary, detail)
    }

    pub fn warning(path: Option<String>, summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(Severity::Warning, path, summary, detail)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: ", path)?;
        }
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {}", level, self.summary)?;
        if !self.detail.is_empty() {
            write!(f, "; {}", self.detail)?;
        }
        Ok(())
    }
}

/// Diagnostics in the order they were reported.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    diags: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, diag: Diagnostic) {
        self.diags.push(diag);
    }

    pub fn error(&mut self, path: Option<String>, summary: impl Into<String>, detail: impl Into<String>) {
        self.add(Diagnostic::error(path, summary, detail));
    }

    pub fn warning(&mut self, path: Option<String>, summary: impl Into<String>, detail: impl Into<String>) {
        self.add(Diagnostic::warning(path, summary, detail));
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.diags.extend(other.diags);
    }

    pub fn has_errors(&self) -> bool {
        self.diags.iter().any(Diagnostic::is_error)
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags.iter().filter(|d| !d.is_error())
    }

    /// Diagnostics reported at `path` or anywhere beneath it.
    pub fn under<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Diagnostic> {
        self.diags.iter().filter(move |d| {
            d.path.as_deref().is_some_and(|p| {
                p.strip_prefix(path)
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with(['.', '[']))
            })
        })
    }

    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags.iter()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diags.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diags.iter()
    }
}

/// Errors first, then warnings; each group in reporting order.
impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diag in self.errors().chain(self.warnings()) {
            writeln!(f, "{}", diag)?;
        }
        Ok(())
    }
}

/// Levenshtein distance, ignoring ASCII case since template names resolve
/// case-insensitively.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = diagonal + usize::from(!ca.eq_ignore_ascii_case(cb));
            diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(row[j + 1] + 1);
        }
    }
    row[b.len()]
}

/// Returns the candidate closest to `target` when it is a plausible typo:
/// at most a third of the target's length away.
pub fn suggest<S: AsRef<str>>(candidates: &[S], target: &str) -> Option<String> {
    let limit = (target.chars().count() / 3).max(1);
    candidates
        .iter()
        .map(|c| (edit_distance(c.as_ref(), target), c.as_ref()))
        .filter(|(distance, _)| *distance <= limit)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, c)| c.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::error(
            Some("resources[0].properties.name".to_string()),
            "failed to expand resource 'web'",
            "the function 'concta' is not implemented",
        );
        assert_eq!(
            d.to_string(),
            "resources[0].properties.name: error: failed to expand resource 'web'; the function 'concta' is not implemented"
        );
        assert_eq!(
            Diagnostic::warning(None, "circular dependency: a -> b -> a", "").to_string(),
            "warning: circular dependency: a -> b -> a"
        );
    }

    #[test]
    fn test_diagnostics_by_severity() {
        let mut diags = Diagnostics::new();
        assert!(!diags.has_errors() && !diags.has_warnings());

        diags.warning(Some("parameters.sku".to_string()), "not allowed", "");
        assert!(!diags.has_errors());
        assert!(diags.has_warnings());

        let mut other = Diagnostics::new();
        other.error(Some("resources[1]".to_string()), "failed", "");
        diags.extend(other);
        assert!(diags.has_errors());
        assert_eq!(diags.len(), 2);
        assert_eq!(diags.errors().count(), 1);
        assert_eq!(
            diags.to_string(),
            "resources[1]: error: failed\nparameters.sku: warning: not allowed\n"
        );
    }

    #[test]
    fn test_diagnostics_under_path() {
        let mut diags = Diagnostics::new();
        diags.warning(Some("resources[1]".to_string()), "a", "");
        diags.warning(Some("resources[1].properties.template.resources[0]".to_string()), "b", "");
        diags.warning(Some("resources[10]".to_string()), "c", "");
        diags.warning(None, "d", "");
        let summaries: Vec<_> = diags.under("resources[1]").map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, vec!["a", "b"]);
    }

    #[test]
    fn test_serialize() {
        let mut diags = Diagnostics::new();
        diags.error(Some("variables.x".to_string()), "bad", "");
        assert_eq!(
            serde_json::to_value(&diags).unwrap(),
            serde_json::json!([{"severity": "error", "path": "variables.x", "summary": "bad"}])
        );
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("abc", ""), 3);
        assert_eq!(edit_distance("concat", "CONCAT"), 0);
    }

    #[test]
    fn test_suggest() {
        let candidates = ["resourceGroup", "resourceId", "reference"];
        assert_eq!(
            suggest(&candidates, "resourceGrop"),
            Some("resourceGroup".to_string())
        );
        assert_eq!(suggest(&candidates, "xyz"), None);
    }
}
