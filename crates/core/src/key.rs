//! Resource identity: types, names, and keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors produced when parsing identity values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// The resource type string violates the `namespace:module:Kind` shape.
    #[error("resource type `{value}` is invalid: {reason}")]
    InvalidType {
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The resource name contains forbidden characters or has a bad length.
    #[error("resource name `{value}` is invalid: {reason}")]
    InvalidName {
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A key string could not be split into type and name.
    #[error("resource key `{value}` is invalid: expected `type::name`")]
    InvalidKey {
        /// The rejected input.
        value: String,
    },
}

/// A namespaced resource type such as `azure:sql:Server`.
///
/// Types have two to four non-empty colon-separated segments. Segment
/// characters are limited to ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceType(String);

impl ResourceType {
    /// Parses and validates a resource type string.
    pub fn parse(value: impl Into<String>) -> Result<Self, IdentityError> {
        let value = value.into();
        let segments: Vec<&str> = value.split(':').collect();
        if !(2..=4).contains(&segments.len()) {
            return Err(IdentityError::InvalidType {
                value,
                reason: "expected 2 to 4 colon-separated segments".into(),
            });
        }
        for segment in &segments {
            if segment.is_empty() {
                return Err(IdentityError::InvalidType {
                    value,
                    reason: "empty segment".into(),
                });
            }
            if let Some(bad) = segment
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
            {
                return Err(IdentityError::InvalidType {
                    value: value.clone(),
                    reason: format!("forbidden character `{bad}`"),
                });
            }
        }
        Ok(Self(value))
    }

    /// The reserved type used for command steps.
    #[must_use]
    pub fn command() -> Self {
        Self("exec:command".to_owned())
    }

    /// The reserved type used for fan-out groups.
    #[must_use]
    pub fn fan_out() -> Self {
        Self("group:fan-out".to_owned())
    }

    /// Returns the type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates over the colon-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(':')
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceType {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceType {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ResourceType> for String {
    fn from(value: ResourceType) -> Self {
        value.0
    }
}

/// A resource name unique within its type.
///
/// Names are 1 to 128 characters drawn from ASCII alphanumerics, `-`, `_`
/// and `.`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceName(String);

impl ResourceName {
    const MAX_LEN: usize = 128;

    /// Parses and validates a resource name.
    pub fn parse(value: impl Into<String>) -> Result<Self, IdentityError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdentityError::InvalidName {
                value,
                reason: "must not be empty".into(),
            });
        }
        if value.len() > Self::MAX_LEN {
            return Err(IdentityError::InvalidName {
                value,
                reason: format!("longer than {} characters", Self::MAX_LEN),
            });
        }
        if let Some(bad) = value.chars().find(|c| !Self::allowed(*c)) {
            return Err(IdentityError::InvalidName {
                value: value.clone(),
                reason: format!("forbidden character `{bad}`"),
            });
        }
        Ok(Self(value))
    }

    /// Builds a valid name from arbitrary input by mapping forbidden
    /// characters to `-` and truncating.
    ///
    /// Used for names derived at runtime, e.g. fan-out children keyed by an
    /// element value. Distinct inputs can collide after sanitisation; callers
    /// that need injectivity must ensure their inputs only differ in allowed
    /// characters.
    #[must_use]
    pub fn sanitized(raw: &str) -> Self {
        let mut out = String::with_capacity(raw.len().min(Self::MAX_LEN));
        for c in raw.chars().take(Self::MAX_LEN) {
            out.push(if Self::allowed(c) { c } else { '-' });
        }
        if out.is_empty() {
            out.push('x');
        }
        Self(out)
    }

    fn allowed(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceName {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceName {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ResourceName> for String {
    fn from(value: ResourceName) -> Self {
        value.0
    }
}

/// The stable identity of one declared node: type plus name.
///
/// Rendered as `type::name`, e.g. `azure:sql:Server::prod-sql`. Keys order
/// by type, then name, which keeps report listings stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceKey {
    rtype: ResourceType,
    name: ResourceName,
}

impl ResourceKey {
    /// Builds a key from its parts.
    #[must_use]
    pub fn new(rtype: ResourceType, name: ResourceName) -> Self {
        Self { rtype, name }
    }

    /// Parses a `type::name` rendering.
    pub fn parse(value: &str) -> Result<Self, IdentityError> {
        let Some((rtype, name)) = value.split_once("::") else {
            return Err(IdentityError::InvalidKey {
                value: value.to_owned(),
            });
        };
        Ok(Self {
            rtype: ResourceType::parse(rtype)?,
            name: ResourceName::parse(name)?,
        })
    }

    /// The type half of the key.
    #[must_use]
    pub fn rtype(&self) -> &ResourceType {
        &self.rtype
    }

    /// The name half of the key.
    #[must_use]
    pub fn name(&self) -> &ResourceName {
        &self.name
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.rtype, self.name)
    }
}

impl FromStr for ResourceKey {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceKey> for String {
    fn from(value: ResourceKey) -> Self {
        value.to_string()
    }
}
