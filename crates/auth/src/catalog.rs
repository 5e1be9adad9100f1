//! Permission catalog and the permission ⇄ policy translator.
//!
//! The catalog is the load-time-fixed universe of `(resource, action)` pairs
//! and their availability. It is read once from a JSON descriptor of the form
//!
//! ```json
//! { "user": { "read": { "status": false, "isAvailable": true } } }
//! ```
//!
//! and never mutated afterwards: every translation works on a value copy.
//!
//! Unknown pairs are dropped in both directions rather than reported. Stale
//! or foreign tuples in the store must not break permission rendering, and a
//! client-submitted permission set may name resources this build does not
//! know.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::permissions::{Action, Permission, Resource, ResourceAction};
use crate::policy::PolicyRule;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("read permission descriptor {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse permission descriptor: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid permission descriptor: {0}")]
    Schema(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct DescriptorEntry {
    #[serde(default)]
    name: Option<String>,
    status: bool,
    is_available: bool,
}

type ActionMap = BTreeMap<Action, ResourceAction>;

/// Immutable `Resource -> Action -> ResourceAction` map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCatalog {
    entries: BTreeMap<Resource, ActionMap>,
}

impl PermissionCatalog {
    /// Load the descriptor file. Any failure is fatal to startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        let raw: BTreeMap<String, BTreeMap<String, DescriptorEntry>> =
            serde_json::from_str(content)?;

        let mut entries = BTreeMap::new();
        for (resource, actions) in raw {
            if resource.trim().is_empty() {
                return Err(CatalogError::Schema("empty resource name".to_string()));
            }
            if actions.is_empty() {
                return Err(CatalogError::Schema(format!(
                    "resource '{resource}' declares no actions"
                )));
            }

            let mut action_map = ActionMap::new();
            for (action, entry) in actions {
                if action.trim().is_empty() {
                    return Err(CatalogError::Schema(format!(
                        "resource '{resource}' has an empty action name"
                    )));
                }
                if let Some(name) = entry.name.as_deref() {
                    if name != action {
                        return Err(CatalogError::Schema(format!(
                            "resource '{resource}': action key '{action}' names '{name}'"
                        )));
                    }
                }
                let action = Action::new(action);
                action_map.insert(
                    action.clone(),
                    ResourceAction {
                        name: action,
                        status: entry.status,
                        is_available: entry.is_available,
                    },
                );
            }
            entries.insert(Resource::new(resource), action_map);
        }

        debug!(resources = entries.len(), "permission catalog loaded");
        Ok(Self { entries })
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.entries.keys()
    }

    /// Catalog entry for a pair, if the pair is legal.
    pub fn lookup(&self, resource: &Resource, action: &Action) -> Option<&ResourceAction> {
        self.entries.get(resource)?.get(action)
    }

    pub fn is_available(&self, resource: &Resource, action: &Action) -> bool {
        self.lookup(resource, action).is_some_and(|a| a.is_available)
    }

    /// The whole catalog rendered with every legal action granted.
    pub fn all_allowed_permissions(&self) -> Vec<Permission> {
        self.render(|mut action| {
            action.status = true;
            action
        })
    }

    /// Render stored tuples as a permission view.
    ///
    /// Starts from a copy of the catalog with every status off and turns on
    /// each `(resource, action)` named by a tuple. Tuples whose columns do not
    /// carry the `obj:`/`act:` prefixes, or whose pair the catalog does not
    /// know, are ignored. Subjects are not inspected.
    pub fn policies_to_permissions(&self, policies: &[PolicyRule]) -> Vec<Permission> {
        let mut copied: BTreeMap<Resource, ActionMap> = self
            .entries
            .iter()
            .map(|(resource, actions)| {
                let actions = actions
                    .iter()
                    .map(|(name, action)| {
                        let mut action = action.clone();
                        action.status = false;
                        (name.clone(), action)
                    })
                    .collect();
                (resource.clone(), actions)
            })
            .collect();

        for rule in policies {
            let (Some(resource), Some(action)) = (
                Resource::from_prefixed(&rule.object),
                Action::from_prefixed(&rule.action),
            ) else {
                debug!(%rule, "skipping tuple without obj:/act: prefixes");
                continue;
            };
            match copied.get_mut(&resource).and_then(|m| m.get_mut(&action)) {
                Some(entry) => entry.status = true,
                None => debug!(%rule, "skipping tuple outside the catalog"),
            }
        }

        copied
            .into_iter()
            .map(|(name, actions)| Permission {
                name,
                actions: actions.into_values().collect(),
            })
            .collect()
    }

    /// Translate a permission view into tuples for `subject`.
    ///
    /// Emits a tuple for every action that is granted in the input and
    /// available in the catalog. Granted-but-unavailable actions and unknown
    /// resources or actions produce nothing.
    pub fn permissions_to_policies(&self, subject: &str, permissions: &[Permission]) -> Vec<PolicyRule> {
        let mut rules = Vec::new();
        for permission in permissions {
            for action in &permission.actions {
                if action.status && self.is_available(&permission.name, &action.name) {
                    rules.push(PolicyRule::grant(subject, &permission.name, &action.name));
                }
            }
        }
        rules
    }

    fn render<F>(&self, map_action: F) -> Vec<Permission>
    where
        F: Fn(ResourceAction) -> ResourceAction,
    {
        self.entries
            .iter()
            .map(|(resource, actions)| Permission {
                name: resource.clone(),
                actions: actions.values().cloned().map(&map_action).collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use proptest::prelude::*;

    use super::*;

    const DESCRIPTOR: &str = r#"{
        "user": {
            "read":   { "status": false, "isAvailable": true },
            "create": { "status": false, "isAvailable": true },
            "update": { "status": false, "isAvailable": true },
            "delete": { "status": false, "isAvailable": false }
        },
        "report": {
            "read": { "name": "read", "status": true, "isAvailable": true }
        }
    }"#;

    fn catalog() -> PermissionCatalog {
        PermissionCatalog::from_json(DESCRIPTOR).unwrap()
    }

    fn granted(perms: &[Permission]) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = perms
            .iter()
            .flat_map(|p| {
                p.actions
                    .iter()
                    .filter(|a| a.status)
                    .map(|a| (p.name.to_string(), a.name.to_string()))
            })
            .collect();
        out.sort();
        out
    }

    #[test]
    fn load_reads_descriptor_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DESCRIPTOR.as_bytes()).unwrap();

        let loaded = PermissionCatalog::load(file.path()).unwrap();
        assert_eq!(loaded, catalog());
        assert_eq!(loaded.resources().count(), 2);
    }

    #[test]
    fn missing_descriptor_is_fatal() {
        let err = PermissionCatalog::load("/nonexistent/permissions.json").unwrap_err();
        assert!(matches!(err, CatalogError::Read { .. }));
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        assert!(matches!(
            PermissionCatalog::from_json("{not json"),
            Err(CatalogError::Parse(_))
        ));
        // Unknown field.
        assert!(PermissionCatalog::from_json(
            r#"{"user": {"read": {"status": true, "isAvailable": true, "extra": 1}}}"#
        )
        .is_err());
        // Missing availability flag.
        assert!(PermissionCatalog::from_json(r#"{"user": {"read": {"status": true}}}"#).is_err());
        // Name disagreeing with its key.
        assert!(matches!(
            PermissionCatalog::from_json(
                r#"{"user": {"read": {"name": "write", "status": true, "isAvailable": true}}}"#
            ),
            Err(CatalogError::Schema(_))
        ));
        assert!(matches!(
            PermissionCatalog::from_json(r#"{"user": {}}"#),
            Err(CatalogError::Schema(_))
        ));
    }

    #[test]
    fn all_allowed_grants_every_action() {
        let perms = catalog().all_allowed_permissions();
        assert_eq!(perms.len(), 2);
        assert!(perms.iter().all(|p| p.actions.iter().all(|a| a.status)));
        assert_eq!(granted(&perms).len(), 5);
    }

    #[test]
    fn empty_tuple_set_renders_everything_off() {
        let perms = catalog().policies_to_permissions(&[]);
        assert_eq!(perms.len(), 2);
        // The descriptor marks report/read as on; the rendered view still starts off.
        assert!(granted(&perms).is_empty());
    }

    #[test]
    fn tuples_turn_on_matching_actions() {
        let rules = vec![
            PolicyRule::new("div:ops", "obj:user", "act:read"),
            PolicyRule::new("div:ops", "obj:report", "act:read"),
        ];
        let perms = catalog().policies_to_permissions(&rules);
        assert_eq!(
            granted(&perms),
            vec![
                ("report".to_string(), "read".to_string()),
                ("user".to_string(), "read".to_string()),
            ]
        );
    }

    // Documented, possibly surprising: unknown and unprefixed tuples are
    // dropped silently instead of failing the render.
    #[test]
    fn unknown_tuples_are_ignored() {
        let rules = vec![
            PolicyRule::new("div:ops", "obj:invoice", "act:read"),
            PolicyRule::new("div:ops", "obj:user", "act:approve"),
            PolicyRule::new("div:ops", "user", "read"),
        ];
        let perms = catalog().policies_to_permissions(&rules);
        assert!(granted(&perms).is_empty());
        assert_eq!(perms.len(), 2);
    }

    #[test]
    fn translation_never_mutates_the_catalog() {
        let catalog = catalog();
        let before = catalog.clone();
        let _ = catalog.policies_to_permissions(&[PolicyRule::new("d", "obj:user", "act:read")]);
        let _ = catalog.all_allowed_permissions();
        assert_eq!(catalog, before);
    }

    #[test]
    fn unavailable_actions_are_frozen() {
        let perms = vec![Permission {
            name: Resource::USER,
            actions: vec![
                ResourceAction { name: Action::READ, status: true, is_available: true },
                ResourceAction { name: Action::DELETE, status: true, is_available: true },
                ResourceAction { name: Action::UPDATE, status: false, is_available: true },
            ],
        }];
        let rules = catalog().permissions_to_policies("div:ops", &perms);
        assert_eq!(rules, vec![PolicyRule::new("div:ops", "obj:user", "act:read")]);
    }

    // Documented, possibly surprising: a resource the catalog does not know
    // is skipped entirely rather than rejected.
    #[test]
    fn unknown_resources_produce_no_tuples() {
        let perms = vec![
            Permission {
                name: Resource::new("invoice"),
                actions: vec![ResourceAction { name: Action::READ, status: true, is_available: true }],
            },
            Permission { name: Resource::USER, actions: vec![] },
        ];
        assert!(catalog().permissions_to_policies("div:ops", &perms).is_empty());
    }

    #[test]
    fn all_allowed_round_trip_marks_available_actions_only() {
        let catalog = catalog();
        let rules = catalog.permissions_to_policies("div:ops", &catalog.all_allowed_permissions());
        assert_eq!(rules.len(), 4);

        let perms = catalog.policies_to_permissions(&rules);
        for perm in &perms {
            for action in &perm.actions {
                assert_eq!(action.status, action.is_available, "{}/{}", perm.name, action.name);
            }
        }
    }

    fn arb_permissions() -> impl Strategy<Value = Vec<Permission>> {
        let resources = prop::sample::select(vec!["user", "report", "invoice"]);
        let actions = prop::sample::select(vec!["read", "create", "update", "delete", "approve"]);
        let action = (actions, any::<bool>(), any::<bool>()).prop_map(|(name, status, is_available)| {
            ResourceAction { name: Action::new(name), status, is_available }
        });
        prop::collection::vec(
            (resources, prop::collection::vec(action, 0..6))
                .prop_map(|(name, actions)| Permission { name: Resource::new(name), actions }),
            0..5,
        )
    }

    proptest! {
        #[test]
        fn emits_tuple_iff_granted_and_available(perms in arb_permissions()) {
            let catalog = catalog();
            let rules = catalog.permissions_to_policies("div:p", &perms);

            let mut expected = Vec::new();
            for perm in &perms {
                for action in &perm.actions {
                    if action.status && catalog.is_available(&perm.name, &action.name) {
                        expected.push(PolicyRule::grant("div:p", &perm.name, &action.name));
                    }
                }
            }
            prop_assert_eq!(&rules, &expected);

            for rule in &rules {
                let resource = Resource::from_prefixed(&rule.object).unwrap();
                let action = Action::from_prefixed(&rule.action).unwrap();
                prop_assert!(catalog.lookup(&resource, &action).is_some());
            }
        }
    }
}
