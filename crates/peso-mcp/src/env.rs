//! Environment lookup and `${VAR}` template resolution.
//!
//! Server specs carry environment templates whose values are either
//! literals or whole-value placeholders (`${TAVILY_API_KEY}` or
//! `$TAVILY_API_KEY`). Lookup goes through a trait so tests can inject a
//! fake environment instead of mutating the process environment.

/// Read access to environment variables.
pub trait EnvProvider: Send + Sync {
    /// Value of `key`, or `None` when unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnv;

impl EnvProvider for SystemEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// The variable name referenced by a whole-value placeholder, if the
/// template is one. `"${HOME}"` and `"$HOME"` both yield `HOME`; literals
/// yield `None`.
pub fn placeholder_key(template: &str) -> Option<&str> {
    if let Some(inner) = template.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        return (!inner.is_empty()).then_some(inner);
    }
    if let Some(name) = template.strip_prefix('$') {
        return (!name.is_empty()).then_some(name);
    }
    None
}

/// Resolve one template value. Placeholders substitute from `env`, with
/// unset variables resolving to the empty string; literals pass through.
pub fn expand(template: &str, env: &dyn EnvProvider) -> String {
    match placeholder_key(template) {
        Some(key) => env.get(key).unwrap_or_default(),
        None => template.to_string(),
    }
}

/// Fixed-map environment for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockEnv {
    vars: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl MockEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }
}

#[cfg(test)]
impl EnvProvider for MockEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_key_braced() {
        assert_eq!(placeholder_key("${TAVILY_API_KEY}"), Some("TAVILY_API_KEY"));
    }

    #[test]
    fn placeholder_key_bare() {
        assert_eq!(placeholder_key("$HOME"), Some("HOME"));
    }

    #[test]
    fn placeholder_key_literal() {
        assert_eq!(placeholder_key("3000"), None);
        assert_eq!(placeholder_key("no$inline"), None);
    }

    #[test]
    fn placeholder_key_degenerate() {
        assert_eq!(placeholder_key("$"), None);
        assert_eq!(placeholder_key("${}"), None);
        assert_eq!(placeholder_key(""), None);
    }

    #[test]
    fn expand_substitutes_set_variable() {
        let env = MockEnv::new().with_var("API_KEY", "tvly-123");
        assert_eq!(expand("${API_KEY}", &env), "tvly-123");
        assert_eq!(expand("$API_KEY", &env), "tvly-123");
    }

    #[test]
    fn expand_unset_variable_to_empty() {
        let env = MockEnv::new();
        assert_eq!(expand("${MISSING}", &env), "");
        assert_eq!(expand("$MISSING", &env), "");
    }

    #[test]
    fn expand_passes_literals_through() {
        let env = MockEnv::new().with_var("PORT", "9999");
        assert_eq!(expand("3000", &env), "3000");
        assert_eq!(expand("literal value", &env), "literal value");
    }
}
