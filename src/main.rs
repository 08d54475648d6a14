mod handlers;

use axum::extract::Request;
use axum::handler::HandlerWithoutStateExt;
use axum::response::Response;
use axum::{Extension, Router, routing};
use bitbucket_hook::logging::{FileLogger, setup_logging};
use bitbucket_hook::middleware::MatchedPush;
use bitbucket_hook::{AppState, HookConfig, HookServiceConfig};
use chrono::Utc;
use handlers::{root, run_hook, status};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower::Layer;
use tower::util::BoxCloneSyncService;
use tracing::info;

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const DEFAULT_CONFIG_PATH: &str = "hook_config.toml";

type HookService = BoxCloneSyncService<Request, Response, Infallible>;

/// Guards the hooks sharing one path, each falling through to the next.
fn hook_chain(config: &HookServiceConfig, hooks: &[&HookConfig]) -> Option<HookService> {
    let mut next: Option<HookService> = None;
    for hook in hooks.iter().rev() {
        let mut guard = config.guard_for(hook);
        info!(
            "Hook {} -> '{}' branch '{}' (address check: {})",
            hook.path,
            guard.config().repository_name,
            guard.config().branch_name,
            !guard.config().bypass_address_check
        );
        if let Some(next) = next.take() {
            guard = guard.or(next);
        }

        let hook = Arc::new((*hook).clone());
        let handler = move |push: Extension<MatchedPush>| run_hook(hook.clone(), push);
        next = Some(BoxCloneSyncService::new(guard.layer(handler.into_service())));
    }
    next
}

fn build_router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/", routing::get(root))
        .route("/status", routing::get(status));

    for (path, hooks) in state.config.hooks_by_path() {
        if let Some(chain) = hook_chain(&state.config, &hooks) {
            app = app.route(path, routing::post_service(chain));
        }
    }

    app.with_state(state)
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config_path =
        std::env::var("HOOK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = match HookServiceConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let file_logger = config.log_dir.clone().map(FileLogger::new);
    let _log_guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging setup error: {}", e);
            std::process::exit(1);
        }
    };

    let bind_address = std::env::var("BIND_ADDRESS")
        .ok()
        .or_else(|| config.bind_address.clone())
        .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

    let state = Arc::new(AppState {
        config,
        start_time: Instant::now(),
        started_at: Utc::now(),
    });
    let app = build_router(state);

    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
