//! Classification of Bitbucket push webhooks.

use serde_json::Value;

use crate::address::is_allowed_source;
use crate::error::SchemaError;
use crate::payload::WebhookPayload;

/// The only `repository.scm` value a push hook reacts to.
pub const GIT_SCM: &str = "git";

/// Repository and branch a hook is listening for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorConfig {
    pub repository_name: String,
    pub branch_name: String,
    pub bypass_address_check: bool,
}

impl ValidatorConfig {
    pub fn new(repository_name: impl Into<String>, branch_name: impl Into<String>) -> Self {
        Self {
            repository_name: repository_name.into(),
            branch_name: branch_name.into(),
            bypass_address_check: false,
        }
    }

    /// Skip the source network check, e.g. behind a proxy that already filters.
    pub fn bypass_address_check(mut self, bypass: bool) -> Self {
        self.bypass_address_check = bypass;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The body could not be read as a push payload at all.
    SchemaError(SchemaError),
    /// Not a call for this hook; another route may handle it.
    NotApplicable,
    /// Right repository, but none of the pushed refs is the configured branch.
    RepositoryMatchOnly,
    /// Repository and branch both matched.
    FullMatch,
}

impl ValidationOutcome {
    /// Only schema failures are errors; everything else is a routing result.
    pub fn is_error(&self) -> bool {
        matches!(self, ValidationOutcome::SchemaError(_))
    }
}

/// Classifies one webhook request.
///
/// Checks run in order and stop at the first decisive one: body shape,
/// source address, event shape and repository, then the pushed branches.
pub fn validate(body: &Value, source_address: &str, config: &ValidatorConfig) -> ValidationOutcome {
    if !body.is_object() {
        return ValidationOutcome::SchemaError(SchemaError::NotAnObject);
    }

    if !config.bypass_address_check && !is_allowed_source(source_address) {
        return ValidationOutcome::NotApplicable;
    }

    let push = match WebhookPayload::parse(body) {
        Ok(WebhookPayload::Push(push)) => push,
        Ok(WebhookPayload::Other) => return ValidationOutcome::NotApplicable,
        Err(e) => return ValidationOutcome::SchemaError(e),
    };

    if push.repository.scm != Some(GIT_SCM)
        || push.repository.full_name != Some(config.repository_name.as_str())
    {
        return ValidationOutcome::NotApplicable;
    }

    if push.branch_names().any(|name| name == config.branch_name) {
        ValidationOutcome::FullMatch
    } else {
        ValidationOutcome::RepositoryMatchOnly
    }
}
