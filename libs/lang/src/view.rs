//! PolicyView: the ACL-enforcing capability wrapper around a policy.
//!
//! This sits at the API boundary only. The reconciliation engine always
//! receives an already-vetted [`Policy`]; nothing below this layer checks
//! permissions again.

use serde::{Deserialize, Serialize};

use crate::error::LangError;
use crate::object::{Kind, Metadata};
use crate::policy::{Policy, PolicyObject};

/// A policy consumer or operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
        }
    }
}

/// What a user may do to an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Privilege {
    pub view: bool,
    pub manage: bool,
}

impl Privilege {
    pub const NONE: Privilege = Privilege {
        view: false,
        manage: false,
    };
    pub const VIEW: Privilege = Privilege {
        view: true,
        manage: false,
    };
    pub const MANAGE: Privilege = Privilege {
        view: true,
        manage: true,
    };
}

/// Resolves a user's privileges over an object.
pub trait AclResolver: Send + Sync {
    fn user_privileges(
        &self,
        user: &User,
        kind: Kind,
        metadata: &Metadata,
    ) -> Result<Privilege, LangError>;
}

/// Views and manages a policy on behalf of a user, enforcing ACLs on
/// every operation.
pub struct PolicyView<'a> {
    policy: &'a mut Policy,
    user: User,
    acl: &'a dyn AclResolver,
}

impl<'a> PolicyView<'a> {
    pub fn new(policy: &'a mut Policy, user: User, acl: &'a dyn AclResolver) -> Self {
        Self { policy, user, acl }
    }

    /// Add an object to the policy. Requires `manage` on the object.
    pub fn add_object(&mut self, obj: PolicyObject) -> Result<(), LangError> {
        self.check(obj.kind(), obj.metadata(), "manage")?;
        self.policy.add_object(obj);
        Ok(())
    }

    /// Look up an object. Requires `view`.
    pub fn view_object(
        &self,
        kind: Kind,
        locator: &str,
        current_ns: &str,
    ) -> Result<&PolicyObject, LangError> {
        let obj = self.policy.get_object(kind, locator, current_ns)?;
        self.check(kind, obj.metadata(), "view")?;
        Ok(obj)
    }

    /// Look up an object for modification. Requires `manage`.
    pub fn manage_object(
        &self,
        kind: Kind,
        locator: &str,
        current_ns: &str,
    ) -> Result<&PolicyObject, LangError> {
        let obj = self.policy.get_object(kind, locator, current_ns)?;
        self.check(kind, obj.metadata(), "manage")?;
        Ok(obj)
    }

    fn check(&self, kind: Kind, metadata: &Metadata, operation: &'static str) -> Result<(), LangError> {
        let privilege = self.acl.user_privileges(&self.user, kind, metadata)?;
        let allowed = match operation {
            "view" => privilege.view,
            _ => privilege.manage,
        };
        if !allowed {
            return Err(LangError::AccessDenied {
                user: self.user.id.clone(),
                operation,
                namespace: metadata.namespace.clone(),
                kind,
                name: metadata.name.clone(),
            });
        }
        Ok(())
    }
}

/// One grant in a [`StaticAclResolver`]: a user gets a privilege over a
/// namespace (`"*"` matches every namespace).
#[derive(Debug, Clone)]
pub struct AclGrant {
    pub user_id: String,
    pub namespace: String,
    pub privilege: Privilege,
}

/// Role-table ACL resolver. Privileges are the union of all matching
/// grants; no matching grant means no access.
#[derive(Debug, Clone, Default)]
pub struct StaticAclResolver {
    grants: Vec<AclGrant>,
}

impl StaticAclResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(
        mut self,
        user_id: impl Into<String>,
        namespace: impl Into<String>,
        privilege: Privilege,
    ) -> Self {
        self.grants.push(AclGrant {
            user_id: user_id.into(),
            namespace: namespace.into(),
            privilege,
        });
        self
    }
}

impl AclResolver for StaticAclResolver {
    fn user_privileges(
        &self,
        user: &User,
        _kind: Kind,
        metadata: &Metadata,
    ) -> Result<Privilege, LangError> {
        let mut privilege = Privilege::NONE;
        for grant in &self.grants {
            if grant.user_id != user.id {
                continue;
            }
            if grant.namespace != "*" && grant.namespace != metadata.namespace {
                continue;
            }
            privilege.view |= grant.privilege.view;
            privilege.manage |= grant.privilege.manage;
        }
        Ok(privilege)
    }
}
