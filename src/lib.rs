pub mod address;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod payload;
pub mod runner;
pub mod validator;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use error::HookError;
use middleware::{DEFAULT_MAX_BODY_BYTES, WebhookGuard};
use validator::ValidatorConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct HookServiceConfig {
    pub bind_address: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub max_body_bytes: Option<usize>,
    #[serde(default)]
    pub trusted_proxies: Vec<IpNet>,
    pub hook: Vec<HookConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HookConfig {
    pub path: String,
    pub repository: String,
    pub branch: String,
    pub bypass_address_check: Option<bool>,
    pub run_script: Option<String>,
    pub work_dir: Option<PathBuf>,
}

impl HookServiceConfig {
    /// Read and validate the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HookError> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            HookError::ConfigError(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let config: HookServiceConfig = toml::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HookError> {
        if self.hook.is_empty() {
            return Err(HookError::ConfigError(
                "At least one [[hook]] must be configured".to_string(),
            ));
        }

        for hook in &self.hook {
            if hook.repository.trim().is_empty() || hook.branch.trim().is_empty() {
                return Err(HookError::ConfigError(format!(
                    "Hook '{}' needs both a repository and a branch",
                    hook.path
                )));
            }
            if !hook.path.starts_with('/') {
                return Err(HookError::ConfigError(format!(
                    "Hook path '{}' must start with '/'",
                    hook.path
                )));
            }
        }
        Ok(())
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES)
    }

    /// Hooks grouped by path, each group in file order. A request on a shared
    /// path is offered to the hooks in that order until one claims it.
    pub fn hooks_by_path(&self) -> Vec<(&str, Vec<&HookConfig>)> {
        let mut groups: Vec<(&str, Vec<&HookConfig>)> = Vec::new();
        for hook in &self.hook {
            match groups.iter_mut().find(|(path, _)| *path == hook.path) {
                Some((_, hooks)) => hooks.push(hook),
                None => groups.push((hook.path.as_str(), vec![hook])),
            }
        }
        groups
    }

    /// Builds the guard layer for one configured hook.
    pub fn guard_for(&self, hook: &HookConfig) -> WebhookGuard {
        WebhookGuard::from_config(hook.validator_config())
            .trusted_proxies(self.trusted_proxies.clone())
            .max_body_bytes(self.max_body_bytes())
    }
}

impl HookConfig {
    pub fn needs_address_check(&self) -> bool {
        !self.bypass_address_check.unwrap_or(false)
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig::new(&self.repository, &self.branch)
            .bypass_address_check(!self.needs_address_check())
    }
}

pub struct AppState {
    pub config: HookServiceConfig,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        trusted_proxies = ["127.0.0.0/8", "::1/128"]

        [[hook]]
        path = "/deploy"
        repository = "team/app"
        branch = "master"
        run_script = "./deploy.sh --fast"

        [[hook]]
        path = "/docs"
        repository = "team/docs"
        branch = "main"
        bypass_address_check = true
    "#;

    #[test]
    fn parses_hooks_and_defaults() {
        let config: HookServiceConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.hook.len(), 2);
        assert_eq!(config.trusted_proxies.len(), 2);
        assert_eq!(config.max_body_bytes(), DEFAULT_MAX_BODY_BYTES);
        assert!(config.bind_address.is_none());

        let deploy = config.hook[0].validator_config();
        assert_eq!(deploy.repository_name, "team/app");
        assert_eq!(deploy.branch_name, "master");
        assert!(!deploy.bypass_address_check);
        assert!(config.hook[1].validator_config().bypass_address_check);
    }

    #[test]
    fn guard_carries_hook_settings() {
        let config: HookServiceConfig = toml::from_str(SAMPLE).unwrap();
        let guard = config.guard_for(&config.hook[1]);
        assert_eq!(guard.config().repository_name, "team/docs");
        assert!(guard.config().bypass_address_check);
    }

    #[test]
    fn hooks_sharing_a_path_are_grouped_in_order() {
        let config: HookServiceConfig = toml::from_str(
            r#"
            [[hook]]
            path = "/deploy"
            repository = "team/app"
            branch = "master"

            [[hook]]
            path = "/deploy"
            repository = "team/app"
            branch = "dev"

            [[hook]]
            path = "/docs"
            repository = "team/docs"
            branch = "main"
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        let groups = config.hooks_by_path();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "/deploy");
        let branches: Vec<_> = groups[0].1.iter().map(|hook| hook.branch.as_str()).collect();
        assert_eq!(branches, vec!["master", "dev"]);
        assert_eq!(groups[1].0, "/docs");
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn rejects_bad_hooks() {
        let relative: HookServiceConfig = toml::from_str(
            r#"
            [[hook]]
            path = "deploy"
            repository = "team/app"
            branch = "master"
            "#,
        )
        .unwrap();
        assert!(relative.validate().is_err());

        let blank: HookServiceConfig = toml::from_str(
            r#"
            [[hook]]
            path = "/deploy"
            repository = "team/app"
            branch = " "
            "#,
        )
        .unwrap();
        assert!(blank.validate().is_err());

        let none: HookServiceConfig = toml::from_str("hook = []").unwrap();
        assert!(none.validate().is_err());
    }

    #[test]
    fn invalid_proxy_networks_fail_to_parse() {
        let parsed = toml::from_str::<HookServiceConfig>(
            r#"
            trusted_proxies = ["localhost"]
            hook = []
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let result = HookServiceConfig::load("does/not/exist.toml");
        assert!(matches!(result, Err(HookError::ConfigError(_))));
    }
}
