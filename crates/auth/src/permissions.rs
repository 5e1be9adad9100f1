//! Resource/action vocabulary and the structured permission view.
//!
//! Resources and actions are opaque names. In policy tuples they appear in a
//! prefixed form (`obj:<resource>`, `act:<action>`) so the columns of a flat
//! store cannot be confused with each other or with `div:` subjects.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

pub const OBJ_PREFIX: &str = "obj:";
pub const ACT_PREFIX: &str = "act:";

/// A protectable object (e.g. "user").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(Cow<'static, str>);

impl Resource {
    pub const USER: Resource = Resource(Cow::Borrowed("user"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Policy-tuple form: `obj:<name>`.
    pub fn prefixed(&self) -> String {
        format!("{OBJ_PREFIX}{}", self.0)
    }

    /// Parse the `obj:` form; `None` unless the prefix strips cleanly.
    pub fn from_prefixed(value: &str) -> Option<Self> {
        value
            .strip_prefix(OBJ_PREFIX)
            .filter(|name| !name.is_empty())
            .map(|name| Self::new(name.to_string()))
    }
}

impl core::fmt::Display for Resource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An operation on a resource (e.g. "read").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(Cow<'static, str>);

impl Action {
    pub const READ: Action = Action(Cow::Borrowed("read"));
    pub const CREATE: Action = Action(Cow::Borrowed("create"));
    pub const UPDATE: Action = Action(Cow::Borrowed("update"));
    pub const DELETE: Action = Action(Cow::Borrowed("delete"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Policy-tuple form: `act:<name>`.
    pub fn prefixed(&self) -> String {
        format!("{ACT_PREFIX}{}", self.0)
    }

    /// Parse the `act:` form; `None` unless the prefix strips cleanly.
    pub fn from_prefixed(value: &str) -> Option<Self> {
        value
            .strip_prefix(ACT_PREFIX)
            .filter(|name| !name.is_empty())
            .map(|name| Self::new(name.to_string()))
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Grant state of one action within a permission view.
///
/// `is_available` comes from the catalog and says whether the platform allows
/// granting the action at all; `status` is the current grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAction {
    pub name: Action,
    pub status: bool,
    #[serde(default)]
    pub is_available: bool,
}

/// One resource and the grant state of its actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub name: Resource,
    pub actions: Vec<ResourceAction>,
}

impl Permission {
    /// Look up an action's grant state by name.
    pub fn action(&self, action: &Action) -> Option<&ResourceAction> {
        self.actions.iter().find(|a| &a.name == action)
    }

    /// Whether `action` is present and granted.
    pub fn grants(&self, action: &Action) -> bool {
        self.action(action).is_some_and(|a| a.status)
    }
}
