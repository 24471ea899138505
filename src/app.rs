//! Application struct that encapsulates server assembly and serving logic.
//! Grounded on the teacher's `src/app.rs` build/serve split, stripped of PID
//! files, daemonization, and manual TLS termination (no client auth, no
//! admin UI, no outer TLS surface — see spec Non-goals); `ConfigWatcher` and
//! `SignalHandler` keep the teacher's hot-reload shape.

use crate::cli::Cli;
use ai_proxy_core::backend::BackendRegistry;
use ai_proxy_core::config::{Config, ConfigWatcher};
use ai_proxy_core::lifecycle::signal::SignalHandler;
use ai_proxy_core::metrics::Metrics;
use ai_proxy_core::state_store::{self, ResponseStateStore};
use ai_proxy_provider::Router as BackendRouter;
use ai_proxy_server::AppState;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Instant;

pub struct Application {
    config: Arc<ArcSwap<Config>>,
    app_router: axum::Router,
    config_path: String,
}

impl Application {
    /// Build the application from CLI args: load config, build the backend
    /// registry, router, metrics, and state store, then wire up the axum
    /// router.
    pub fn build(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = Config::load(&cli.config).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from '{}': {e}, using defaults", cli.config);
            Config::default()
        });

        if let Some(ref host) = cli.host {
            config.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.port = port;
        }

        let (backends, fallbacks) = config.build_registry();
        tracing::info!("Loaded {} configured model(s)", backends.len());
        let registry = Arc::new(BackendRegistry::new(backends, fallbacks));

        let router = Arc::new(BackendRouter::new()?);
        let state_store = Arc::new(ResponseStateStore::new(state_store::default_capacity(), None));
        let metrics = Arc::new(Metrics::new());
        let config = Arc::new(ArcSwap::from_pointee(config));

        let state = AppState {
            config: config.clone(),
            registry,
            router,
            state_store,
            metrics,
            start_time: Instant::now(),
        };
        let app_router = ai_proxy_server::build_router(state);

        Ok(Self {
            config,
            app_router,
            config_path: cli.config.clone(),
        })
    }

    /// Start serving HTTP, handle signals, and drain gracefully.
    pub async fn serve(self) -> anyhow::Result<()> {
        let Self { config, app_router, config_path } = self;

        // The file watcher keeps `config` live for anything read straight
        // off the `ArcSwap` (admin endpoints, request/connect timeouts).
        // The backend registry itself is built once at startup: reloading
        // it in place would need a second swap path the registry doesn't
        // expose, so a model-list change still requires a restart.
        let _watcher = ConfigWatcher::start(config_path.clone(), config.clone(), move |new_cfg| {
            tracing::info!("Config reloaded: {} model(s) configured", new_cfg.model_list.len());
        });

        let (signal_handler, mut shutdown_rx) = SignalHandler::new();

        let reload_config = config.clone();
        let reload_path = config_path.clone();
        let reload_fn = move || match Config::load(&reload_path) {
            Ok(new_cfg) => {
                tracing::info!("SIGHUP reload: {} model(s) configured", new_cfg.model_list.len());
                reload_config.store(Arc::new(new_cfg));
            }
            Err(e) => tracing::error!("SIGHUP config reload failed: {e}"),
        };

        tokio::spawn(signal_handler.run(reload_fn));

        let cfg = config.load();
        let addr = format!("{}:{}", cfg.host, cfg.port);
        tracing::info!("Starting HTTP server on {addr}");
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        let shutdown = async move {
            let _ = shutdown_rx.wait_for(|v| *v).await;
        };

        axum::serve(listener, app_router).with_graceful_shutdown(shutdown).await?;

        tracing::info!("Draining in-flight request log writes...");
        ai_proxy_core::recorder::await_all_pending_flushes().await;

        tracing::info!("Server shut down.");
        Ok(())
    }
}
