//! Configuration schema and hot-reload, grounded on the teacher's
//! `crates/core/src/config.rs`: a single `Config` loaded from YAML with
//! `#[serde(default)]` fallbacks everywhere, validated once, then kept
//! live via a `notify` watcher that debounces and content-hash-dedupes
//! before atomically swapping a new value into an `ArcSwap<Config>`.

use arc_swap::ArcSwap;
use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::Backend;
use crate::payload::derive_target_model;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub debug: bool,
    pub logging_to_file: bool,
    pub log_dir: Option<String>,

    pub connect_timeout: u64,
    pub request_timeout: u64,
    pub body_limit_mb: usize,

    pub model_list: Vec<ModelListEntry>,
    pub router_settings: RouterSettings,
    pub proxy_settings: ProxySettings,
    pub general_settings: GeneralSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            debug: false,
            logging_to_file: false,
            log_dir: None,
            connect_timeout: 10,
            request_timeout: 300,
            body_limit_mb: 10,
            model_list: Vec::new(),
            router_settings: RouterSettings::default(),
            proxy_settings: ProxySettings::default(),
            general_settings: GeneralSettings::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml_ng::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.model_list {
            anyhow::ensure!(
                seen.insert(entry.model_name.clone()),
                "duplicate model_name in model_list: {}",
                entry.model_name
            );
            anyhow::ensure!(
                !entry.model_params.api_base.is_empty(),
                "model_params.api_base is required for {}",
                entry.model_name
            );
        }
        anyhow::ensure!(self.router_settings.num_retries_or_default() >= 1, "router_settings.num_retries must be >= 1");
        Ok(())
    }

    /// Recorder log directory: `<log_dir or "./logs">/requests`.
    pub fn recorder_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(self.log_dir.as_deref().unwrap_or("./logs")).join("requests")
    }

    /// Builds the startup default-layer backends and fallback map for the
    /// `BackendRegistry`, derived from `model_list` and `router_settings`.
    pub fn build_registry(&self) -> (Vec<Backend>, HashMap<String, Vec<String>>) {
        let backends = self.model_list.iter().map(ModelListEntry::to_backend).collect();

        let mut fallbacks = HashMap::new();
        for group in &self.router_settings.fallbacks {
            for (primary, names) in group {
                fallbacks.insert(primary.clone(), names.clone());
            }
        }
        (backends, fallbacks)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelListEntry {
    pub model_name: String,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub extends: Option<String>,
    pub model_params: ModelParams,
}

impl ModelListEntry {
    fn to_backend(&self) -> Backend {
        let params = &self.model_params;
        let target_model = derive_target_model(
            &params.model,
            params.target_model.as_deref(),
            params.forward_model.as_deref(),
        );
        Backend {
            name: self.model_name.clone(),
            base_url: params.api_base.trim_end_matches('/').to_string(),
            api_key: params.api_key.clone(),
            timeout_seconds: params.request_timeout,
            target_model,
            supports_reasoning: params.supports_reasoning.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelParams {
    pub model: String,
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub request_timeout: Option<u64>,
    #[serde(default)]
    pub target_model: Option<String>,
    #[serde(default)]
    pub forward_model: Option<String>,
    #[serde(default)]
    pub supports_reasoning: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct RouterSettings {
    pub num_retries: u32,
    pub fallbacks: Vec<HashMap<String, Vec<String>>>,
}

impl RouterSettings {
    pub fn num_retries_or_default(&self) -> u32 {
        if self.num_retries == 0 { 1 } else { self.num_retries }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProxySettings {
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct GeneralSettings {
    pub enable_responses_endpoint: bool,
}

// ─── Config Watcher ────────────────────────────────────────────────────────

pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
}

impl ConfigWatcher {
    /// Starts watching a config file. On changes (debounced 150ms, SHA256
    /// content-hash dedup), reloads and atomically swaps via `ArcSwap`.
    pub fn start(
        path: String,
        config: Arc<ArcSwap<Config>>,
        on_reload: impl Fn(&Config) + Send + Sync + 'static,
    ) -> Result<Self, anyhow::Error> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res
                && (event.kind.is_modify() || event.kind.is_create())
            {
                let _ = tx.blocking_send(());
            }
        })?;
        watcher.watch(Path::new(&path), RecursiveMode::NonRecursive)?;

        let path_clone = path.clone();
        tokio::spawn(async move {
            let mut last_hash: Option<[u8; 32]> = None;
            let mut debounce: Option<tokio::time::Instant> = None;

            loop {
                tokio::select! {
                    Some(()) = rx.recv() => {
                        debounce = Some(tokio::time::Instant::now() + Duration::from_millis(150));
                    }
                    _ = async {
                        match debounce {
                            Some(deadline) => tokio::time::sleep_until(deadline).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        debounce = None;
                        match std::fs::read(&path_clone) {
                            Ok(contents) => {
                                let hash: [u8; 32] = sha2::Sha256::digest(&contents).into();
                                if last_hash.as_ref() == Some(&hash) {
                                    continue;
                                }
                                last_hash = Some(hash);

                                match Config::load(&path_clone) {
                                    Ok(new_cfg) => {
                                        tracing::info!("configuration reloaded successfully");
                                        on_reload(&new_cfg);
                                        config.store(Arc::new(new_cfg));
                                    }
                                    Err(e) => tracing::error!("config reload failed: {e}"),
                                }
                            }
                            Err(e) => tracing::error!("config file read failed: {e}"),
                        }
                    }
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = Config::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.router_settings.num_retries, 0);
        assert_eq!(cfg.router_settings.num_retries_or_default(), 1);
    }

    #[test]
    fn yaml_deserialization_matches_schema() {
        let yaml = r#"
host: "127.0.0.1"
port: 9000
model-list:
  - model-name: "alpha"
    model-params:
      model: "openai/gpt-4o-mini"
      api-base: "https://api.upstream.example/v1"
      api-key: "sk-test"
router-settings:
  num-retries: 2
  fallbacks:
    - alpha: ["beta"]
general-settings:
  enable-responses-endpoint: true
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.model_list.len(), 1);
        assert_eq!(config.model_list[0].model_params.model, "openai/gpt-4o-mini");
        assert_eq!(config.router_settings.num_retries, 2);
        assert!(config.general_settings.enable_responses_endpoint);
    }

    #[test]
    fn target_model_derivation_strips_openai_prefix() {
        let entry = ModelListEntry {
            model_name: "alpha".to_string(),
            protected: false,
            extends: None,
            model_params: ModelParams {
                model: "openai/gpt-4o-mini".to_string(),
                api_base: "https://api.upstream.example/v1".to_string(),
                api_key: None,
                request_timeout: None,
                target_model: None,
                forward_model: None,
                supports_reasoning: None,
            },
        };
        let backend = entry.to_backend();
        assert_eq!(backend.target_model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn duplicate_model_names_fail_validation() {
        let yaml = r#"
model-list:
  - model-name: "alpha"
    model-params:
      model: "a"
      api-base: "http://u"
  - model-name: "alpha"
    model-params:
      model: "b"
      api-base: "http://u2"
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
