//! Permission resolver
//!
//! Named checks live in a namespace tree of evaluators. A permission path is
//! granted when the actor's native capabilities cover its terminal segment,
//! or when the tenant's override tree allows it. Anything that cannot be
//! decided resolves to "no".

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::application::errors::{BotError, NamespaceError};
use crate::domain::entities::{Actor, OverrideTree, TenantContext};
use crate::domain::namespace::NamespaceTree;

/// Check bound to a permission node: `(node, actor, context) -> granted`
pub type PermissionEvaluator =
    Arc<dyn Fn(&str, &Actor, &TenantContext) -> Result<bool, BotError> + Send + Sync>;

/// Outcome of walking one override leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideDecision {
    Allow,
    Deny,
    Indeterminate,
}

/// Evaluator plus the module that registered it
struct RegisteredNode {
    owner: Option<String>,
    evaluator: PermissionEvaluator,
}

/// Registry of permission nodes
#[derive(Default)]
pub struct PermissionResolver {
    nodes: RwLock<NamespaceTree<RegisteredNode>>,
}

impl PermissionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, NamespaceTree<RegisteredNode>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, NamespaceTree<RegisteredNode>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an evaluator at `path` with no owning module.
    /// Re-registering an unowned path replaces it.
    pub fn register_node(&self, path: &str, evaluator: PermissionEvaluator) -> Result<(), NamespaceError> {
        self.insert(path, None, evaluator)
    }

    /// Register an evaluator on behalf of `module`. A path another module
    /// already holds is refused and left untouched.
    pub fn register_owned(
        &self,
        path: &str,
        module: &str,
        evaluator: PermissionEvaluator,
    ) -> Result<(), NamespaceError> {
        self.insert(path, Some(module.to_string()), evaluator)
    }

    fn insert(&self, path: &str, owner: Option<String>, evaluator: PermissionEvaluator) -> Result<(), NamespaceError> {
        let mut nodes = self.write();
        if let Some(existing) = nodes.get_exact(path) {
            if let Some(holder) = existing.owner.as_deref() {
                if owner.as_deref() != Some(holder) {
                    return Err(NamespaceError::Owned {
                        path: path.to_string(),
                        owner: holder.to_string(),
                    });
                }
            }
        }

        let previous = nodes.register(path, RegisteredNode { owner, evaluator })?;
        if previous.is_some() {
            tracing::debug!(node = path, "Permission node replaced");
        } else {
            tracing::debug!(node = path, "Permission node registered");
        }
        Ok(())
    }

    pub fn register_evaluator<F>(&self, path: &str, evaluator: F) -> Result<(), NamespaceError>
    where
        F: Fn(&str, &Actor, &TenantContext) -> Result<bool, BotError> + Send + Sync + 'static,
    {
        self.register_node(path, Arc::new(evaluator))
    }

    pub fn remove_node(&self, path: &str) -> bool {
        self.write().remove(path).is_some()
    }

    /// Remove `path` only if `module` registered it
    pub fn remove_owned(&self, path: &str, module: &str) -> bool {
        let mut nodes = self.write();
        let owned = nodes
            .get_exact(path)
            .is_some_and(|node| node.owner.as_deref() == Some(module));
        owned && nodes.remove(path).is_some()
    }

    /// Module that registered `path`, if any
    pub fn owner_of(&self, path: &str) -> Option<String> {
        self.read().get_exact(path).and_then(|node| node.owner.clone())
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.read().get_exact(path).is_some()
    }

    pub fn nodes(&self) -> Vec<String> {
        self.read().entries().into_iter().map(|(path, _)| path).collect()
    }

    /// Run the evaluator covering `node`. Missing evaluators, errors and
    /// panics all count as not granted.
    pub fn check_node(&self, node: &str, actor: &Actor, ctx: &TenantContext) -> bool {
        let evaluator = self.read().lookup(node).map(|n| Arc::clone(&n.evaluator));
        let Some(evaluator) = evaluator else {
            tracing::warn!(node, "No permission node registered");
            return false;
        };

        match catch_unwind(AssertUnwindSafe(|| evaluator(node, actor, ctx))) {
            Ok(Ok(granted)) => granted,
            Ok(Err(e)) => {
                tracing::warn!(node, actor = %actor.id, "Permission check failed: {}", e);
                false
            }
            Err(_) => {
                tracing::error!(node, actor = %actor.id, "Permission check panicked");
                false
            }
        }
    }

    /// Walk the most specific override for `node`: allow entries first,
    /// then deny entries.
    pub fn resolve_override(
        &self,
        node: &str,
        actor: &Actor,
        ctx: &TenantContext,
        overrides: &OverrideTree,
    ) -> OverrideDecision {
        let Some(leaf) = overrides.lookup(node) else {
            return OverrideDecision::Indeterminate;
        };

        if leaf.allow.iter().any(|entry| self.check_node(entry, actor, ctx)) {
            return OverrideDecision::Allow;
        }
        if leaf.deny.iter().any(|entry| self.check_node(entry, actor, ctx)) {
            return OverrideDecision::Deny;
        }
        OverrideDecision::Indeterminate
    }

    pub fn has_permission(
        &self,
        node: &str,
        actor: &Actor,
        ctx: &TenantContext,
        overrides: &OverrideTree,
    ) -> bool {
        let terminal = node.rsplit('.').next().unwrap_or(node);
        if actor.capabilities.grants(terminal) {
            return true;
        }

        match self.resolve_override(node, actor, ctx, overrides) {
            OverrideDecision::Allow => true,
            OverrideDecision::Deny | OverrideDecision::Indeterminate => false,
        }
    }
}

fn subject(node: &str) -> &str {
    node.rsplit('.').next().unwrap_or_default()
}

/// `Role.<id>`: the actor holds the role
pub fn role_evaluator() -> PermissionEvaluator {
    Arc::new(|node, actor, _ctx| Ok(actor.has_role(subject(node))))
}

/// `User.<id>`: the actor is that user
pub fn user_evaluator() -> PermissionEvaluator {
    Arc::new(|node, actor, _ctx| Ok(actor.id == subject(node)))
}

/// `Channel.<id>`: the request came from that channel
pub fn channel_evaluator() -> PermissionEvaluator {
    Arc::new(|node, _actor, ctx| Ok(ctx.channel_id.as_deref() == Some(subject(node))))
}
