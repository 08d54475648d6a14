//! Typed, borrowed view over an untrusted Bitbucket push payload.
//!
//! Only the fields the validator needs are read. Anything absent or of the
//! wrong JSON type is folded into an explicit variant instead of being
//! dereferenced speculatively.

use serde_json::Value;

use crate::error::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repository<'a> {
    pub scm: Option<&'a str>,
    pub full_name: Option<&'a str>,
}

/// One entry of `push.changes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change<'a> {
    /// `change.new.name` is a string.
    Ref { name: &'a str },
    /// `change.new` is null or missing a name, e.g. a deleted branch.
    Unnamed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent<'a> {
    pub repository: Repository<'a>,
    pub changes: Vec<Change<'a>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookPayload<'a> {
    /// The body has no `push` object; `repository` is never looked at.
    Other,
    Push(PushEvent<'a>),
}

impl<'a> WebhookPayload<'a> {
    /// Reads the payload skeleton out of a decoded JSON body.
    ///
    /// `repository` is only required once a `push` object is present.
    pub fn parse(body: &'a Value) -> Result<Self, SchemaError> {
        let root = body.as_object().ok_or(SchemaError::NotAnObject)?;

        let Some(push) = root.get("push").and_then(Value::as_object) else {
            return Ok(WebhookPayload::Other);
        };

        let repository = root
            .get("repository")
            .and_then(Value::as_object)
            .map(|repo| Repository {
                scm: repo.get("scm").and_then(Value::as_str),
                full_name: repo.get("full_name").and_then(Value::as_str),
            })
            .ok_or(SchemaError::MissingRepository)?;

        let changes = push
            .get("changes")
            .and_then(Value::as_array)
            .map(|changes| changes.iter().map(Change::from_value).collect())
            .unwrap_or_default();

        Ok(WebhookPayload::Push(PushEvent {
            repository,
            changes,
        }))
    }
}

impl<'a> Change<'a> {
    fn from_value(change: &'a Value) -> Self {
        match change
            .get("new")
            .and_then(|new| new.get("name"))
            .and_then(Value::as_str)
        {
            Some(name) => Change::Ref { name },
            None => Change::Unnamed,
        }
    }
}

impl<'a> PushEvent<'a> {
    /// Branch names in payload order; unnamed changes are skipped.
    pub fn branch_names(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.changes.iter().filter_map(|change| match change {
            Change::Ref { name } => Some(*name),
            Change::Unnamed => None,
        })
    }
}
