//! Command and event router
//!
//! Owns the global command surface, the queue of subcommands waiting for
//! their parent group, the help index and the event bus. Module exports are
//! classified here on load and removed again on unload.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use super::audit::{AuditRecord, AuditSink};
use super::middleware::{DispatchContext, Middleware};
use crate::domain::entities::{
    CommandContext, CommandDescriptor, CommandGroup, CommandHelp, EventContext, EventPayload,
    EventSubscription, Export, InboundRequest, ModuleRecord, RegistrationKey, Reply, Subcommand,
    SurfaceEntry,
};
use crate::runtime::Runtime;

pub const DISABLED_NOTICE: &str = "This command is temporarily disabled.";
pub const ERROR_NOTICE: &str = "There was an error while executing this command!";

/// How a dispatch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No command by that name
    Ignored,
    Disabled(Reply),
    /// Rejected by middleware
    Blocked(Reply),
    /// Handler failed, panicked or timed out
    Failed(Reply),
    Completed(Reply),
}

impl DispatchOutcome {
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            DispatchOutcome::Ignored => None,
            DispatchOutcome::Disabled(r)
            | DispatchOutcome::Blocked(r)
            | DispatchOutcome::Failed(r)
            | DispatchOutcome::Completed(r) => Some(r),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, DispatchOutcome::Completed(_))
    }
}

#[derive(Default)]
struct RouterState {
    surface: crate::domain::entities::CommandSurface,
    pending: Vec<Subcommand>,
    help: HashMap<String, CommandHelp>,
    events: HashMap<String, Vec<EventSubscription>>,
}

pub struct CommandRouter {
    state: RwLock<RouterState>,
    middleware: Vec<Arc<dyn Middleware>>,
    audit: AuditSink,
    timeout: Duration,
}

impl CommandRouter {
    pub fn new(audit: AuditSink, timeout: Duration) -> Self {
        Self {
            state: RwLock::new(RouterState::default()),
            middleware: Vec::new(),
            audit,
            timeout,
        }
    }

    /// Add middleware to the chain
    pub fn with_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, RouterState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RouterState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify one export and credit it to `module`. Conflicting names are
    /// logged and skipped.
    pub fn process_export(&self, export: Export, module: &mut ModuleRecord) {
        let mut state = self.write();
        process_into(&mut state, export, module);
    }

    /// Attach queued subcommands to their parents, creating stub groups for
    /// parents nobody registered. Returns how many were attached.
    pub fn resolve_pending_children(&self) -> usize {
        let mut state = self.write();
        let pending = std::mem::take(&mut state.pending);
        let mut attached = 0;

        for sub in pending {
            match state.surface.get_mut(&sub.parent) {
                None => {
                    tracing::info!(
                        "Auto-created group '{}' for subcommand '{}'",
                        sub.parent,
                        sub.command.name
                    );
                    let group = CommandGroup::stub(sub.parent.clone()).with_child(sub.command);
                    state.surface.insert(SurfaceEntry::Group(group));
                    attached += 1;
                }
                Some(SurfaceEntry::Group(group)) => {
                    if let Some(existing) = group.children.get(&sub.command.name) {
                        if existing.module != sub.command.module {
                            tracing::error!(
                                "Subcommand '{} {}' from '{}' conflicts with module '{}', skipped",
                                sub.parent,
                                sub.command.name,
                                sub.command.module,
                                existing.module
                            );
                            continue;
                        }
                    }
                    group.children.insert(sub.command.name.clone(), sub.command);
                    attached += 1;
                }
                Some(SurfaceEntry::Leaf(_)) => {
                    tracing::warn!(
                        "Unresolved subcommand '{} {}': '{}' is not a group",
                        sub.parent,
                        sub.command.name,
                        sub.parent
                    );
                    state.pending.push(sub);
                }
            }
        }

        attached
    }

    pub fn pending_count(&self) -> usize {
        self.read().pending.len()
    }

    /// Remove everything credited to `module`
    pub fn unregister_module(&self, module: &ModuleRecord) {
        let mut state = self.write();
        let name = module.name.as_str();

        for key in &module.registrations {
            match key {
                RegistrationKey::Command(cmd) => {
                    if matches!(state.surface.get(cmd), Some(SurfaceEntry::Leaf(c)) if c.module == name) {
                        state.surface.remove(cmd);
                    }
                }
                RegistrationKey::Group(group_name) => {
                    let owned = matches!(
                        state.surface.get(group_name),
                        Some(SurfaceEntry::Group(g)) if g.module.as_deref() == Some(name)
                    );
                    if !owned {
                        continue;
                    }
                    if let Some(SurfaceEntry::Group(group)) = state.surface.remove(group_name) {
                        // children other modules attached survive in a stub
                        let foreign: Vec<_> = group
                            .children
                            .into_values()
                            .filter(|c| c.module != name)
                            .collect();
                        if !foreign.is_empty() {
                            let stub = foreign
                                .into_iter()
                                .fold(CommandGroup::stub(group_name.clone()), |g, c| g.with_child(c));
                            state.surface.insert(SurfaceEntry::Group(stub));
                        }
                    }
                }
                RegistrationKey::Subcommand { parent, name: child } => {
                    state
                        .pending
                        .retain(|s| !(s.parent == *parent && s.command.name == *child && s.command.module == name));

                    let mut prune = false;
                    if let Some(SurfaceEntry::Group(group)) = state.surface.get_mut(parent) {
                        if group.children.get(child).is_some_and(|c| c.module == name) {
                            group.children.remove(child);
                        }
                        prune = group.auto_created && group.children.is_empty();
                    }
                    if prune {
                        state.surface.remove(parent);
                    }
                }
                RegistrationKey::Help(cmd) => {
                    state.help.remove(cmd);
                }
                RegistrationKey::Event { event, id } => {
                    if let Some(subs) = state.events.get_mut(event) {
                        subs.retain(|s| s.id != *id);
                        if subs.is_empty() {
                            state.events.remove(event);
                        }
                    }
                }
            }
        }

        tracing::debug!("Unregistered {} registrations of module '{}'", module.registrations.len(), name);
    }

    /// Toggle a command or group child, addressed as `name` or `group child`
    pub fn set_disabled(&self, path: &str, disabled: bool) -> bool {
        let mut state = self.write();
        let mut parts = path.split_whitespace();
        let Some(top) = parts.next() else {
            return false;
        };

        match (state.surface.get_mut(top), parts.next()) {
            (Some(SurfaceEntry::Leaf(cmd)), None) => cmd.disabled = disabled,
            (Some(SurfaceEntry::Group(group)), None) => group.disabled = disabled,
            (Some(SurfaceEntry::Group(group)), Some(child)) => match group.children.get_mut(child) {
                Some(cmd) => cmd.disabled = disabled,
                None => return false,
            },
            _ => return false,
        }
        tracing::info!("Command '{}' {}", path, if disabled { "disabled" } else { "enabled" });
        true
    }

    /// Descriptors for every top level command, as published on sync
    pub fn surface(&self) -> Vec<CommandDescriptor> {
        self.read().surface.descriptors()
    }

    pub fn command_names(&self) -> Vec<String> {
        self.read().surface.names()
    }

    /// Module owning a top level command; `None` for unknown names and stubs
    pub fn owner_of(&self, name: &str) -> Option<String> {
        self.read()
            .surface
            .get(name)
            .and_then(|e| e.module().map(str::to_string))
    }

    pub fn is_auto_created(&self, name: &str) -> bool {
        matches!(self.read().surface.get(name), Some(SurfaceEntry::Group(g)) if g.auto_created)
    }

    pub fn help(&self, name: &str) -> Option<CommandHelp> {
        self.read().help.get(name).cloned()
    }

    pub fn event_handler_count(&self, event: &str) -> usize {
        self.read().events.get(event).map_or(0, Vec::len)
    }

    /// Resolve and run one request. Handler failures never escape; they
    /// turn into the generic error notice.
    pub async fn handle_incoming(&self, runtime: &Arc<Runtime>, request: &InboundRequest) -> DispatchOutcome {
        let resolved = self.read().surface.resolve(&request.name, &request.args);
        let Some(resolved) = resolved else {
            tracing::debug!("No command named '{}'", request.name);
            return DispatchOutcome::Ignored;
        };

        if resolved.command.disabled {
            return DispatchOutcome::Disabled(Reply::ephemeral(DISABLED_NOTICE));
        }

        let ctx = DispatchContext {
            request,
            command: &resolved,
            runtime,
        };
        for middleware in &self.middleware {
            if let Err(e) = middleware.process(&ctx).await {
                tracing::debug!(middleware = middleware.name(), "Dispatch of '{}' stopped: {}", resolved.path, e);
                return DispatchOutcome::Blocked(e.to_reply());
            }
        }

        let module = resolved.command.module.clone();
        let Some(handler) = resolved.command.handler.clone() else {
            tracing::error!(module = %module, command = %resolved.path, "Command has no handler");
            return DispatchOutcome::Failed(Reply::ephemeral(ERROR_NOTICE));
        };

        let command_ctx = CommandContext {
            request: request.clone(),
            module: module.clone(),
            path: resolved.path.clone(),
            args: resolved.args.clone(),
            runtime: Arc::clone(runtime),
        };

        let mut task = tokio::spawn(handler(command_ctx));
        let failure = match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(Ok(reply))) => {
                self.audit
                    .emit(AuditRecord::for_request(request, &resolved.path, &module));
                return DispatchOutcome::Completed(reply);
            }
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(join_error)) if join_error.is_panic() => "handler panicked".to_string(),
            Ok(Err(join_error)) => join_error.to_string(),
            Err(_) => {
                task.abort();
                format!("timed out after {:?}", self.timeout)
            }
        };

        tracing::error!(
            actor = %request.actor.id,
            module = %module,
            command = %resolved.path,
            tenant = request.tenant_id().unwrap_or("dm"),
            "Error while executing command: {}",
            failure
        );
        DispatchOutcome::Failed(Reply::ephemeral(ERROR_NOTICE))
    }

    /// Run every handler subscribed to the event, each in its own task.
    /// Returns how many completed without error.
    pub async fn dispatch_event(&self, runtime: &Arc<Runtime>, payload: EventPayload) -> usize {
        let subscriptions = self
            .read()
            .events
            .get(&payload.event)
            .cloned()
            .unwrap_or_default();

        let tasks: Vec<_> = subscriptions
            .into_iter()
            .map(|sub| {
                let ctx = EventContext {
                    payload: payload.clone(),
                    module: sub.module.clone(),
                    runtime: Arc::clone(runtime),
                };
                let timeout = self.timeout;
                let module = sub.module;
                let handle = tokio::spawn(tokio::time::timeout(timeout, (sub.handler)(ctx)));
                (module, handle)
            })
            .collect();

        let mut succeeded = 0;
        for (module, handle) in tasks {
            match handle.await {
                Ok(Ok(Ok(()))) => succeeded += 1,
                Ok(Ok(Err(e))) => {
                    tracing::error!(module = %module, event = %payload.event, "Event handler failed: {}", e)
                }
                Ok(Err(_)) => {
                    tracing::error!(module = %module, event = %payload.event, "Event handler timed out")
                }
                Err(e) => {
                    tracing::error!(module = %module, event = %payload.event, "Event handler panicked: {}", e)
                }
            }
        }
        succeeded
    }
}

fn process_into(state: &mut RouterState, export: Export, module: &mut ModuleRecord) {
    let owner = module.name.clone();

    match export {
        Export::Leaf(mut command) => {
            command.module = owner.clone();
            match state.surface.get(&command.name) {
                Some(SurfaceEntry::Leaf(existing)) if existing.module != owner => {
                    tracing::error!(
                        "Command '{}' from '{}' conflicts with module '{}', skipped",
                        command.name,
                        owner,
                        existing.module
                    );
                    return;
                }
                Some(SurfaceEntry::Group(existing)) => {
                    tracing::error!(
                        "Command '{}' from '{}' conflicts with group owned by {}, skipped",
                        command.name,
                        owner,
                        existing.module.as_deref().unwrap_or("nobody")
                    );
                    return;
                }
                _ => {}
            }
            module.registrations.insert(RegistrationKey::Command(command.name.clone()));
            state.surface.insert(SurfaceEntry::Leaf(command));
        }
        Export::Group(mut group) => {
            group.module = Some(owner.clone());
            group.auto_created = false;
            for child in group.children.values_mut() {
                child.module = owner.clone();
            }

            match state.surface.get(&group.name) {
                Some(SurfaceEntry::Group(existing)) if existing.module.is_none() => {
                    // adopt whatever was attached to the stub
                    for (name, child) in &existing.children {
                        group.children.entry(name.clone()).or_insert_with(|| child.clone());
                    }
                    tracing::debug!("Group '{}' replaced its auto-created stub", group.name);
                }
                Some(SurfaceEntry::Group(existing)) if existing.module.as_deref() != Some(owner.as_str()) => {
                    tracing::error!(
                        "Group '{}' from '{}' conflicts with module '{}', skipped",
                        group.name,
                        owner,
                        existing.module.as_deref().unwrap_or_default()
                    );
                    return;
                }
                Some(SurfaceEntry::Leaf(existing)) if existing.module != owner => {
                    tracing::error!(
                        "Group '{}' from '{}' conflicts with command of module '{}', skipped",
                        group.name,
                        owner,
                        existing.module
                    );
                    return;
                }
                _ => {}
            }
            module.registrations.insert(RegistrationKey::Group(group.name.clone()));
            state.surface.insert(SurfaceEntry::Group(group));
        }
        Export::PendingChild(mut sub) => {
            sub.command.module = owner;
            module.registrations.insert(RegistrationKey::Subcommand {
                parent: sub.parent.clone(),
                name: sub.command.name.clone(),
            });
            state.pending.push(sub);
        }
        Export::BundledSet(bundle) => {
            tracing::debug!("Processing bundle '{}' of module '{}'", bundle.name, owner);
            for export in bundle.exports {
                process_into(state, export, module);
            }
        }
        Export::HelpMetadata(help) => {
            module.registrations.insert(RegistrationKey::Help(help.name.clone()));
            state.help.insert(help.name.clone(), help);
        }
        Export::Event(mut sub) => {
            sub.module = owner;
            module.registrations.insert(RegistrationKey::Event {
                event: sub.event.clone(),
                id: sub.id.clone(),
            });
            state.events.entry(sub.event.clone()).or_default().push(sub);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Bundle, Command, HelpText};
    use crate::infrastructure::plugins::ModuleManifest;

    fn router() -> CommandRouter {
        CommandRouter::new(AuditSink::new(16), Duration::from_secs(1))
    }

    fn record(name: &str) -> ModuleRecord {
        ModuleRecord::new(ModuleManifest::synthesized(name, "1.0.0", ""))
    }

    #[test]
    fn pending_child_creates_stub_group() {
        let router = router();
        let mut m = record("M");
        router.process_export(
            Export::PendingChild(Subcommand::new("settings", Command::new("set"))),
            &mut m,
        );
        assert!(router.command_names().is_empty());

        assert_eq!(router.resolve_pending_children(), 1);
        assert!(router.is_auto_created("settings"));
        assert_eq!(router.surface()[0].subcommands[0].name, "set");
        assert_eq!(router.surface()[0].description, "Group for settings commands.");
    }

    #[test]
    fn resolving_twice_changes_nothing() {
        let router = router();
        let mut m = record("M");
        router.process_export(
            Export::PendingChild(Subcommand::new("settings", Command::new("set"))),
            &mut m,
        );
        router.resolve_pending_children();
        let before = router.surface();

        assert_eq!(router.resolve_pending_children(), 0);
        assert_eq!(router.surface(), before);
    }

    #[test]
    fn real_group_adopts_stub_children() {
        let router = router();
        let mut a = record("A");
        let mut b = record("B");
        router.process_export(
            Export::PendingChild(Subcommand::new("xp", Command::new("reset"))),
            &mut a,
        );
        router.resolve_pending_children();
        router.process_export(
            Export::Group(CommandGroup::new("xp", "XP").with_child(Command::new("show"))),
            &mut b,
        );

        assert!(!router.is_auto_created("xp"));
        assert_eq!(router.owner_of("xp").as_deref(), Some("B"));
        let names: Vec<_> = router.surface()[0].subcommands.iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["reset", "show"]);
    }

    #[test]
    fn conflicting_leaf_is_skipped() {
        let router = router();
        let mut a = record("A");
        let mut b = record("B");
        router.process_export(Export::Leaf(Command::new("ping")), &mut a);
        router.process_export(Export::Leaf(Command::new("ping")), &mut b);

        assert_eq!(router.owner_of("ping").as_deref(), Some("A"));
        assert!(b.registrations.is_empty());
    }

    #[test]
    fn bundle_members_are_credited_to_module() {
        let router = router();
        let mut m = record("M");
        let bundle = Bundle::new("permissions")
            .with(Export::Group(CommandGroup::new("permissions", "Permissions")))
            .with(Export::HelpMetadata(CommandHelp::new("permissions").with_translation(
                "en",
                HelpText { description: "Manage overrides".into(), ..Default::default() },
            )));
        router.process_export(Export::BundledSet(bundle), &mut m);

        assert!(m.registrations.contains(&RegistrationKey::Group("permissions".into())));
        assert!(m.registrations.contains(&RegistrationKey::Help("permissions".into())));
        assert!(router.help("permissions").is_some());
    }

    #[test]
    fn unregister_keeps_foreign_children_and_prunes_empty_stubs() {
        let router = router();
        let mut owner = record("Owner");
        let mut guest = record("Guest");
        router.process_export(
            Export::Group(CommandGroup::new("xp", "XP").with_child(Command::new("show"))),
            &mut owner,
        );
        router.process_export(
            Export::PendingChild(Subcommand::new("xp", Command::new("reset"))),
            &mut guest,
        );
        router.process_export(
            Export::PendingChild(Subcommand::new("stats", Command::new("top"))),
            &mut guest,
        );
        router.resolve_pending_children();

        router.unregister_module(&owner);
        assert!(router.is_auto_created("xp"));
        assert_eq!(router.surface().iter().find(|d| d.name == "xp").unwrap().subcommands.len(), 1);

        router.unregister_module(&guest);
        assert!(router.command_names().is_empty());
    }

    #[test]
    fn child_of_leaf_stays_pending() {
        let router = router();
        let mut m = record("M");
        router.process_export(Export::Leaf(Command::new("ping")), &mut m);
        router.process_export(
            Export::PendingChild(Subcommand::new("ping", Command::new("loud"))),
            &mut m,
        );

        assert_eq!(router.resolve_pending_children(), 0);
        assert_eq!(router.pending_count(), 1);
    }

    #[test]
    fn set_disabled_addresses_children() {
        let router = router();
        let mut m = record("M");
        router.process_export(
            Export::Group(CommandGroup::new("xp", "XP").with_child(Command::new("show"))),
            &mut m,
        );

        assert!(router.set_disabled("xp show", true));
        assert!(!router.set_disabled("xp missing", true));
        assert!(!router.set_disabled("nothing", true));
    }
}
