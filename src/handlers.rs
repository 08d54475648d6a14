use axum::{Extension, Json, extract::State as AxumState, response::IntoResponse};
use bitbucket_hook::middleware::MatchedPush;
use bitbucket_hook::runner::run_hook_script;
use bitbucket_hook::{HookConfig, SharedState};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

pub async fn root() -> &'static str {
    "bitbucket_hook is listening"
}

/// Returns server uptime and the configured hooks
pub async fn status(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    let hooks: Vec<_> = state
        .config
        .hook
        .iter()
        .map(|hook| {
            json!({
                "path": hook.path,
                "repository": hook.repository,
                "branch": hook.branch,
                "address_check": hook.needs_address_check(),
                "has_script": hook.run_script.is_some(),
            })
        })
        .collect();

    Json(json!({
        "server": {
            "name": "bitbucket_hook",
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "hooks": hooks,
    }))
}

/// Runs behind the webhook guard once a push matched repository and branch.
pub async fn run_hook(hook: Arc<HookConfig>, Extension(push): Extension<MatchedPush>) {
    info!(
        "Push to '{}' branch '{}' accepted as delivery {}",
        push.repository, push.branch, push.delivery_id
    );
    if let Err(e) = run_hook_script(&hook, &push).await {
        error!("Delivery {} failed: {}", push.delivery_id, e);
    }
}
