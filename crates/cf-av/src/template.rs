//! Variable substitution for compiled engine arguments.
//!
//! Compiled programs never contain concrete scratch paths or measured values.
//! They reference `{workspace}` and named measurement slots instead, which
//! are filled in at execution time from a [`TemplateContext`].

use std::collections::BTreeMap;
use std::path::Path;

/// Variable substitution context for argument templates.
///
/// Supports variable substitution in strings using the `{varname}` syntax.
/// Unknown placeholders are left untouched.
///
/// # Example
///
/// ```
/// use cf_av::TemplateContext;
/// use std::path::Path;
///
/// let ctx = TemplateContext::new()
///     .with_workspace(Path::new("/tmp/clipforge-1"))
///     .with_var("loudnorm_0", "measured_I=-20.1");
///
/// assert_eq!(ctx.substitute("{workspace}/final.mp4"), "/tmp/clipforge-1/final.mp4");
/// assert_eq!(ctx.substitute("loudnorm={loudnorm_0}"), "loudnorm=measured_I=-20.1");
/// assert_eq!(ctx.substitute("{unknown}"), "{unknown}");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: BTreeMap<String, String>,
}

impl TemplateContext {
    /// Create a new empty template context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `{workspace}` variable.
    pub fn with_workspace(mut self, workspace: &Path) -> Self {
        self.vars
            .insert("workspace".to_string(), workspace.display().to_string());
        self
    }

    /// Add a custom variable.
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    /// Set a variable.
    pub fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    /// Get a variable value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Remove a variable, returning its previous value.
    pub fn unset(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    /// Substitute variables in a string.
    pub fn substitute(&self, template: &str) -> String {
        let mut result = template.to_string();
        for (key, value) in &self.vars {
            result = result.replace(&format!("{{{}}}", key), value);
        }
        result
    }

    /// Substitute variables in a list of strings.
    pub fn substitute_all(&self, templates: &[String]) -> Vec<String> {
        templates.iter().map(|t| self.substitute(t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_workspace() {
        let ctx = TemplateContext::new().with_workspace(Path::new("/tmp/ws"));
        assert_eq!(ctx.substitute("{workspace}/inter_0.mkv"), "/tmp/ws/inter_0.mkv");
        assert_eq!(ctx.substitute("no placeholders"), "no placeholders");
    }

    #[test]
    fn test_custom_var() {
        let ctx = TemplateContext::new()
            .with_var("a", "1")
            .with_var("b", "2");
        assert_eq!(ctx.substitute("x={a}:y={b}"), "x=1:y=2");
    }

    #[test]
    fn test_substitute_all() {
        let ctx = TemplateContext::new().with_workspace(Path::new("/w"));
        let out = ctx.substitute_all(&["-i".to_string(), "{workspace}/a.mkv".to_string()]);
        assert_eq!(out, vec!["-i", "/w/a.mkv"]);
    }

    #[test]
    fn test_set_get_unset() {
        let mut ctx = TemplateContext::new();
        ctx.set("k", "v");
        assert_eq!(ctx.get("k"), Some("v"));
        assert_eq!(ctx.unset("k"), Some("v".to_string()));
        assert_eq!(ctx.get("k"), None);
    }
}
