//! Server registry: declarative specs, availability, and connection order.
//!
//! The registry is constructed explicitly and handed to the manager — no
//! global state. Built-in defaults are merged with the external file, and
//! every query answers against immutable `Arc<ServerSpec>` values.

use crate::config::{
    self, DockerConfig, ParsedRegistry, ServerEntry, Settings, parse_registry,
};
use crate::env::{self, EnvProvider, SystemEnv};
use crate::error::McpError;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Immutable description of how to launch and recognize one tool-provider
/// process. Shared read-only by every connection.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub name: String,
    pub description: String,
    pub command: Vec<String>,
    /// Raw environment template; resolve via [`Registry::resolve_env`].
    pub environment: HashMap<String, String>,
    /// Variables referenced by placeholders in `environment`, sorted.
    pub required_env_keys: Vec<String>,
    pub capabilities: BTreeSet<String>,
    pub priority: i32,
    pub auto_connect: bool,
    pub timeout_ms: Option<u64>,
    pub docker: Option<DockerConfig>,
}

impl ServerSpec {
    /// Build a spec from a parsed config entry, deriving the required
    /// environment keys from the template's placeholders.
    pub fn from_entry(name: &str, entry: ServerEntry) -> Self {
        let mut required: Vec<String> = entry
            .environment
            .values()
            .filter_map(|value| env::placeholder_key(value))
            .map(str::to_string)
            .collect();
        required.sort();
        required.dedup();

        Self {
            name: name.to_string(),
            description: entry.description,
            command: entry.command,
            environment: entry.environment,
            required_env_keys: required,
            capabilities: entry.capabilities.into_iter().collect(),
            priority: entry.priority,
            auto_connect: entry.auto_connect,
            timeout_ms: entry.timeout_ms,
            docker: entry.docker_config,
        }
    }

    fn to_entry(&self) -> ServerEntry {
        ServerEntry {
            description: self.description.clone(),
            command: self.command.clone(),
            environment: self.environment.clone(),
            capabilities: self.capabilities.iter().cloned().collect(),
            priority: self.priority,
            auto_connect: self.auto_connect,
            timeout_ms: self.timeout_ms,
            docker_config: self.docker.clone(),
        }
    }
}

/// The set of known server specs plus the environment they are judged
/// against.
pub struct Registry {
    specs: BTreeMap<String, Arc<ServerSpec>>,
    settings: Settings,
    env: Arc<dyn EnvProvider>,
}

impl Registry {
    /// Empty registry against the process environment.
    pub fn new() -> Self {
        Self::with_env(Arc::new(SystemEnv))
    }

    /// Empty registry with an injected environment.
    pub fn with_env(env: Arc<dyn EnvProvider>) -> Self {
        Self {
            specs: BTreeMap::new(),
            settings: Settings::default(),
            env,
        }
    }

    /// Load the registry: built-in defaults merged with the file at
    /// `path`. A missing file is generated from the defaults; an unreadable
    /// or wholly malformed file falls back to the defaults without being
    /// touched. Never fails — worst case is the built-in set.
    pub fn load(path: &Path) -> Self {
        Self::load_with_env(path, Arc::new(SystemEnv))
    }

    /// [`Registry::load`] with an injected environment.
    pub fn load_with_env(path: &Path, env: Arc<dyn EnvProvider>) -> Self {
        let mut registry = Self::with_env(env);
        registry.absorb(builtin_defaults());

        if !path.exists() {
            tracing::info!("No registry file at {}; generating default", path.display());
            if let Err(e) = config::write_default_config(path) {
                tracing::warn!("Could not write default registry file: {e}");
            }
            return registry;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    "Could not read registry file {}: {e}; using defaults",
                    path.display()
                );
                return registry;
            }
        };
        match parse_registry(&text) {
            Ok(parsed) => registry.absorb(parsed),
            Err(e) => {
                tracing::warn!(
                    "Registry file {} is not valid TOML: {e}; using defaults",
                    path.display()
                );
            }
        }
        registry
    }

    /// Fold a parsed document in: file entries override built-ins of the
    /// same name, file settings replace the current settings.
    fn absorb(&mut self, parsed: ParsedRegistry) {
        if let Some(settings) = parsed.settings {
            self.settings = settings;
        }
        for (name, entry) in parsed.entries {
            self.register(ServerSpec::from_entry(&name, entry));
        }
    }

    /// Add or replace a spec.
    pub fn register(&mut self, spec: ServerSpec) {
        self.specs.insert(spec.name.clone(), Arc::new(spec));
    }

    /// Spec by name.
    pub fn get(&self, name: &str) -> Option<Arc<ServerSpec>> {
        self.specs.get(name).cloned()
    }

    /// All specs, name order.
    pub fn specs(&self) -> impl Iterator<Item = &Arc<ServerSpec>> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Effective per-operation timeout for a spec.
    pub fn timeout_for(&self, spec: &ServerSpec) -> Duration {
        Duration::from_millis(spec.timeout_ms.unwrap_or(self.settings.request_timeout_ms))
    }

    /// True iff every required environment key is set and non-empty.
    pub fn is_available(&self, spec: &ServerSpec) -> bool {
        spec.required_env_keys
            .iter()
            .all(|key| self.env.get(key).is_some_and(|v| !v.is_empty()))
    }

    /// Concrete environment for spawning: placeholders substituted, unset
    /// variables resolving to empty strings.
    pub fn resolve_env(&self, spec: &ServerSpec) -> HashMap<String, String> {
        spec.environment
            .iter()
            .map(|(key, template)| (key.clone(), env::expand(template, self.env.as_ref())))
            .collect()
    }

    /// Available specs marked for auto-connect, descending priority with
    /// name as the deterministic tiebreak.
    pub fn auto_connect_list(&self) -> Vec<Arc<ServerSpec>> {
        self.ordered(|spec| spec.auto_connect)
    }

    /// Available specs advertising `capability`, same order as
    /// [`Registry::auto_connect_list`].
    pub fn by_capability(&self, capability: &str) -> Vec<Arc<ServerSpec>> {
        self.ordered(|spec| spec.capabilities.contains(capability))
    }

    fn ordered(&self, keep: impl Fn(&ServerSpec) -> bool) -> Vec<Arc<ServerSpec>> {
        let mut list: Vec<Arc<ServerSpec>> = self
            .specs
            .values()
            .filter(|spec| keep(spec) && self.is_available(spec))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        list
    }

    /// Write the current registry out as a TOML document.
    pub fn export(&self, path: &Path) -> Result<(), McpError> {
        let mut servers = toml::Table::new();
        for (name, spec) in &self.specs {
            let value = toml::Value::try_from(spec.to_entry())
                .map_err(|e| McpError::Protocol(format!("Could not serialize '{name}': {e}")))?;
            servers.insert(name.clone(), value);
        }
        let mut doc = toml::Table::new();
        let settings = toml::Value::try_from(self.settings.clone())
            .map_err(|e| McpError::Protocol(format!("Could not serialize settings: {e}")))?;
        doc.insert("settings".to_string(), settings);
        doc.insert("servers".to_string(), toml::Value::Table(servers));
        std::fs::write(path, doc.to_string())?;
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in server set: the parsed default document. A unit test pins the
/// document as parseable, so the failure arm is unreachable in practice.
fn builtin_defaults() -> ParsedRegistry {
    match parse_registry(config::DEFAULT_CONFIG) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::error!("Built-in default registry failed to parse: {e}");
            ParsedRegistry::default()
        }
    }
}
