//! In-memory backend registry: a lock-guarded mapping from logical model
//! name to `Backend`, layered into an immutable "defaults" set (loaded from
//! config at startup) and a mutable "added" set (populated via the admin
//! register endpoint). Grounded on the teacher's `CredentialRouter`
//! (`crates/provider/src/routing.rs`), stripped of multi-format credential
//! selection since every backend here speaks the same wire protocol.

use crate::error::ProxyError;
use std::sync::RwLock;

/// A configured upstream endpoint, identified by a logical model name.
#[derive(Debug, Clone)]
pub struct Backend {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: Option<u64>,
    /// The upstream's true model id; the proxy rewrites the client's
    /// logical model name to this before forwarding.
    pub target_model: Option<String>,
    pub supports_reasoning: bool,
}

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

impl Backend {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

/// Result of a `register` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterOutcome {
    pub replaced: bool,
}

#[derive(Default)]
struct Layer {
    order: Vec<String>,
    backends: std::collections::HashMap<String, Backend>,
}

impl Layer {
    fn upsert(&mut self, backend: Backend) -> bool {
        let replaced = self.backends.contains_key(&backend.name);
        if !replaced {
            self.order.push(backend.name.clone());
        }
        self.backends.insert(backend.name.clone(), backend);
        replaced
    }
}

struct RegistryState {
    defaults: Layer,
    added: Layer,
    fallbacks: std::collections::HashMap<String, Vec<String>>,
}

pub struct BackendRegistry {
    inner: RwLock<RegistryState>,
}

impl BackendRegistry {
    pub fn new(
        defaults: Vec<Backend>,
        fallbacks: std::collections::HashMap<String, Vec<String>>,
    ) -> Self {
        let mut layer = Layer::default();
        for backend in defaults {
            layer.upsert(backend);
        }
        Self {
            inner: RwLock::new(RegistryState {
                defaults: layer,
                added: Layer::default(),
                fallbacks,
            }),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Backend> {
        let state = self.inner.read().expect("registry lock poisoned");
        state
            .added
            .backends
            .get(name)
            .or_else(|| state.defaults.backends.get(name))
            .cloned()
    }

    /// Stable: defaults first in insertion order, then added entries.
    pub fn list_names(&self) -> Vec<String> {
        let state = self.inner.read().expect("registry lock poisoned");
        state
            .defaults
            .order
            .iter()
            .chain(state.added.order.iter())
            .cloned()
            .collect()
    }

    /// Registers (or replaces) a backend in the "added" layer. Rejects if a
    /// default-layer entry with the same name already exists.
    pub fn register(
        &self,
        backend: Backend,
        fallbacks: Option<Vec<String>>,
    ) -> Result<RegisterOutcome, ProxyError> {
        let mut state = self.inner.write().expect("registry lock poisoned");
        if state.defaults.backends.contains_key(&backend.name) {
            return Err(ProxyError::RegistryCollision { model: backend.name });
        }
        let replaced = state.added.upsert(backend.clone());
        if let Some(fallbacks) = fallbacks {
            state.fallbacks.insert(backend.name.clone(), fallbacks);
        }
        Ok(RegisterOutcome { replaced })
    }

    /// Builds the ordered route for a logical model: primary first, then
    /// declared fallbacks in order, duplicates suppressed, filtered to
    /// backends that actually exist.
    pub fn build_route(&self, model: &str) -> Result<Vec<Backend>, ProxyError> {
        let state = self.inner.read().expect("registry lock poisoned");
        let primary = state
            .added
            .backends
            .get(model)
            .or_else(|| state.defaults.backends.get(model))
            .cloned()
            .ok_or_else(|| ProxyError::ModelNotFound(model.to_string()))?;

        let mut seen = std::collections::HashSet::new();
        seen.insert(primary.name.clone());
        let mut route = vec![primary];

        if let Some(names) = state.fallbacks.get(model) {
            for name in names {
                if seen.contains(name) {
                    continue;
                }
                if let Some(backend) = state
                    .added
                    .backends
                    .get(name)
                    .or_else(|| state.defaults.backends.get(name))
                {
                    seen.insert(name.clone());
                    route.push(backend.clone());
                }
            }
        }
        Ok(route)
    }
}
