//! Caller permissions as plain data.
//!
//! A caller carries a [`PermissionSet`] of [`PermissionToken`]s resolved by the
//! API layer from its RBAC policies. Tokens name an action and optionally a
//! resource pattern:
//!
//! ```text
//! rules:read                      any rule resource
//! rules:read@rule:file:0010-*     rule files whose name starts with 0010-
//! !rules:read@rule:file:secret*   deny, wins over any allow
//! ```
//!
//! Filtering of arguments and results against a set lives in [`filter`].

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod filter;

pub use filter::{
    filter_arguments, filter_failed_items, filter_outcome, filter_results, PermissionDenied,
    ResourcePolicy,
};

/// Errors from parsing permission tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenParseError {
    /// The token has no action.
    #[error("permission token '{0}' has no action")]
    MissingAction(String),
    /// The resource part is not `<kind>:<field>:<pattern>`.
    #[error("permission token '{token}' has malformed resource '{resource}'")]
    MalformedResource {
        /// Full token text.
        token: String,
        /// The offending resource part.
        resource: String,
    },
}

/// Allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Grants the action.
    Allow,
    /// Revokes the action, overriding any allow.
    Deny,
}

/// A concrete resource an action targets, e.g. `rule:file:0010-rules.xml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resource<'a> {
    /// Resource class, e.g. `rule`.
    pub kind: &'a str,
    /// Identifying field, e.g. `file`.
    pub field: &'a str,
    /// Identifier value.
    pub id: &'a str,
}

/// `<kind>:<field>:<glob>` where `*` in the glob matches any run of characters.
#[derive(Debug, Clone)]
struct ResourcePattern {
    kind: String,
    field: String,
    glob: String,
    matcher: Regex,
}

impl ResourcePattern {
    fn parse(token: &str, resource: &str) -> Result<Self, TokenParseError> {
        let malformed = || TokenParseError::MalformedResource {
            token: token.to_owned(),
            resource: resource.to_owned(),
        };
        let mut parts = resource.splitn(3, ':');
        let kind = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let field = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let glob = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;

        let body: Vec<String> = glob.split('*').map(regex::escape).collect();
        let matcher = Regex::new(&format!("^{}$", body.join(".*"))).map_err(|_| malformed())?;

        Ok(Self {
            kind: kind.to_owned(),
            field: field.to_owned(),
            glob: glob.to_owned(),
            matcher,
        })
    }

    fn same_class(&self, kind: &str, field: &str) -> bool {
        self.kind == kind && self.field == field
    }

    fn matches(&self, resource: &Resource<'_>) -> bool {
        self.same_class(resource.kind, resource.field) && self.matcher.is_match(resource.id)
    }

    fn is_wildcard(&self) -> bool {
        self.glob == "*"
    }
}

/// One granted or revoked action, optionally scoped to a resource pattern.
#[derive(Debug, Clone)]
pub struct PermissionToken {
    raw: String,
    effect: Effect,
    action: String,
    resource: Option<ResourcePattern>,
}

impl PermissionToken {
    /// Parse a token of the form `[!]<action>[@<kind>:<field>:<glob>]`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenParseError`] when the action is empty or the resource
    /// part does not have three non-empty segments.
    pub fn parse(token: &str) -> Result<Self, TokenParseError> {
        let trimmed = token.trim();
        let (effect, rest) = match trimmed.strip_prefix('!') {
            Some(rest) => (Effect::Deny, rest),
            None => (Effect::Allow, trimmed),
        };
        let (action, resource) = match rest.split_once('@') {
            Some((action, resource)) => (action, Some(resource)),
            None => (rest, None),
        };
        if action.is_empty() {
            return Err(TokenParseError::MissingAction(token.to_owned()));
        }
        let resource = resource
            .map(|r| ResourcePattern::parse(token, r))
            .transpose()?;

        Ok(Self {
            raw: trimmed.to_owned(),
            effect,
            action: action.to_owned(),
            resource,
        })
    }

    /// Allow or deny.
    pub fn effect(&self) -> Effect {
        self.effect
    }

    /// The action this token governs.
    pub fn action(&self) -> &str {
        &self.action
    }

    fn covers_action(&self, action: &str) -> bool {
        self.action == "*" || self.action == action
    }

    /// Whether this token applies to `action` on `resource`.
    ///
    /// A token without a resource pattern applies to every resource.
    pub fn applies_to(&self, action: &str, resource: &Resource<'_>) -> bool {
        self.covers_action(action) && self.resource.as_ref().is_none_or(|p| p.matches(resource))
    }

    /// Whether this token applies to every resource of the class.
    fn covers_whole_class(&self, action: &str, kind: &str, field: &str) -> bool {
        self.covers_action(action)
            && self
                .resource
                .as_ref()
                .is_none_or(|p| p.same_class(kind, field) && p.is_wildcard())
    }

    /// Whether this token touches any resource of the class at all.
    fn touches_class(&self, action: &str, kind: &str, field: &str) -> bool {
        self.covers_action(action)
            && self
                .resource
                .as_ref()
                .is_none_or(|p| p.same_class(kind, field))
    }
}

impl PartialEq for PermissionToken {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for PermissionToken {}

impl fmt::Display for PermissionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for PermissionToken {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// The permissions a caller holds for the duration of one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct PermissionSet {
    tokens: Vec<PermissionToken>,
}

impl PermissionSet {
    /// A set holding no permissions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse every token.
    ///
    /// # Errors
    ///
    /// Returns the first [`TokenParseError`] encountered.
    pub fn parse<I, S>(tokens: I) -> Result<Self, TokenParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens = tokens
            .into_iter()
            .map(|t| PermissionToken::parse(t.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tokens })
    }

    /// Tokens in the order they were granted.
    pub fn tokens(&self) -> &[PermissionToken] {
        &self.tokens
    }

    /// Returns `true` when the set holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Whether `action` is allowed on `resource`. Deny wins over allow.
    pub fn allows(&self, action: &str, resource: &Resource<'_>) -> bool {
        let applicable = || self.tokens.iter().filter(|t| t.applies_to(action, resource));
        if applicable().any(|t| t.effect == Effect::Deny) {
            return false;
        }
        applicable().any(|t| t.effect == Effect::Allow)
    }

    /// Whether some resource of the class can still be allowed for `action`.
    ///
    /// False without an allow touching the class, or when a deny covers the
    /// whole class.
    pub fn grants_any(&self, action: &str, kind: &str, field: &str) -> bool {
        let denied_everywhere = self
            .tokens
            .iter()
            .any(|t| t.effect == Effect::Deny && t.covers_whole_class(action, kind, field));
        !denied_everywhere
            && self
                .tokens
                .iter()
                .any(|t| t.effect == Effect::Allow && t.touches_class(action, kind, field))
    }

    /// Whether `action` is allowed on every resource of the class.
    ///
    /// True only with a class-wide allow and no deny touching the class.
    pub fn is_unrestricted(&self, action: &str, kind: &str, field: &str) -> bool {
        let denied = self
            .tokens
            .iter()
            .any(|t| t.effect == Effect::Deny && t.touches_class(action, kind, field));
        !denied
            && self
                .tokens
                .iter()
                .any(|t| t.effect == Effect::Allow && t.covers_whole_class(action, kind, field))
    }
}

impl TryFrom<Vec<String>> for PermissionSet {
    type Error = TokenParseError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<PermissionSet> for Vec<String> {
    fn from(set: PermissionSet) -> Self {
        set.tokens.into_iter().map(|t| t.raw).collect()
    }
}
