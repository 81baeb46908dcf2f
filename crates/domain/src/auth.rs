//! Principals and the context an action is executed in.
//!
//! Scopes are dot-separated paths (`bus`, `entity.kitchen_lamp`). A user
//! holds a map of scope → permissions; `scope.*` grants the scope and every
//! descendant, `*` as a permission grants all permissions on that scope.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Scope guarding event-bus dispatch.
pub const BUS_SCOPE: &str = "bus";
/// Prefix of the per-entity scope (`entity.<name>`).
pub const ENTITY_SCOPE: &str = "entity";

/// Read permission.
pub const READ: &str = "r";
/// Write permission.
pub const WRITE: &str = "w";

const WILDCARD: &str = "*";

/// A principal with scoped permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub scopes: HashMap<String, Vec<String>>,
}

impl User {
    /// A regular user with the given scopes.
    #[must_use]
    pub fn new(name: impl Into<String>, scopes: HashMap<String, Vec<String>>) -> Self {
        Self {
            name: name.into(),
            admin: false,
            scopes,
        }
    }

    /// An administrator; authorizes everything.
    #[must_use]
    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: true,
            scopes: HashMap::from([(WILDCARD.to_string(), vec![WILDCARD.to_string()])]),
        }
    }

    /// Whether this user holds `permission` on `scope`.
    ///
    /// Pure: depends only on the user's flags and scope map.
    #[must_use]
    pub fn authorize(&self, scope: &str, permission: &str) -> bool {
        if self.admin {
            return true;
        }
        if self.grants(scope, permission) {
            return true;
        }

        let mut end = 0;
        for fragment in scope.split('.') {
            end += fragment.len();
            let prefix = &scope[..end];
            if self.grants(prefix, permission)
                || self.grants(&format!("{prefix}.{WILDCARD}"), permission)
            {
                return true;
            }
            end += 1;
        }

        self.grants(WILDCARD, permission)
    }

    fn grants(&self, scope: &str, permission: &str) -> bool {
        self.scopes
            .get(scope)
            .is_some_and(|perms| perms.iter().any(|p| p == permission || p == WILDCARD))
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.admin {
            write!(f, "{} (admin)", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Caller identity travelling with every event and method call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Context {
    user: Arc<User>,
    remote: bool,
}

impl Context {
    #[must_use]
    pub fn new(user: User, remote: bool) -> Self {
        Self {
            user: Arc::new(user),
            remote,
        }
    }

    /// The context internal kernel callers run with. Construct once at
    /// startup and pass it explicitly.
    #[must_use]
    pub fn system() -> Self {
        Self::new(User::admin("system"), false)
    }

    #[must_use]
    pub fn user(&self) -> &User {
        &self.user
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    #[must_use]
    pub fn authorize(&self, scope: &str, permission: &str) -> bool {
        self.user.authorize(scope, permission)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = if self.remote { "remote" } else { "internal" };
        write!(f, "<{} | {origin}>", self.user)
    }
}
