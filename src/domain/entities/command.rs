use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;

use super::{EventPayload, InboundRequest, Reply};
use crate::application::errors::{BotError, CommandError};
use crate::runtime::Runtime;

/// Command handler function type
pub type CommandHandler =
    Arc<dyn Fn(CommandContext) -> BoxFuture<'static, Result<Reply, CommandError>> + Send + Sync>;

/// Event handler function type
pub type EventHandler =
    Arc<dyn Fn(EventContext) -> BoxFuture<'static, Result<(), BotError>> + Send + Sync>;

/// Everything a command handler gets to see
#[derive(Clone)]
pub struct CommandContext {
    pub request: InboundRequest,
    /// Owning module
    pub module: String,
    /// Space separated invocation path, `settings set` for a group child
    pub path: String,
    /// Arguments after the resolved command name
    pub args: Vec<String>,
    pub runtime: Arc<Runtime>,
}

impl CommandContext {
    pub fn tenant_id(&self) -> Option<&str> {
        self.request.tenant_id()
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

/// Context handed to event handlers
#[derive(Clone)]
pub struct EventContext {
    pub payload: EventPayload,
    pub module: String,
    pub runtime: Arc<Runtime>,
}

/// Represents a bot command
#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub description: String,
    pub usage: Option<String>,
    /// Filled in when the router credits the command to a module
    pub module: String,
    pub handler: Option<CommandHandler>,
    /// Permission node checked before the handler runs
    pub permission: Option<String>,
    pub owner_only: bool,
    pub disabled: bool,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            usage: None,
            module: String::new(),
            handler: None,
            permission: None,
            owner_only: false,
            disabled: false,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    pub fn with_permission(mut self, node: impl Into<String>) -> Self {
        self.permission = Some(node.into());
        self
    }

    pub fn owner_only(mut self) -> Self {
        self.owner_only = true;
        self
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, CommandError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |ctx| handler(ctx).boxed()));
        self
    }

    pub fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            module: self.module.clone(),
            subcommands: Vec::new(),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("permission", &self.permission)
            .field("owner_only", &self.owner_only)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

/// A named group of subcommands
#[derive(Debug, Clone)]
pub struct CommandGroup {
    pub name: String,
    pub description: String,
    /// `None` for a stub nobody has claimed yet
    pub module: Option<String>,
    pub auto_created: bool,
    pub permission: Option<String>,
    pub owner_only: bool,
    pub disabled: bool,
    pub children: BTreeMap<String, Command>,
}

impl CommandGroup {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            module: None,
            auto_created: false,
            permission: None,
            owner_only: false,
            disabled: false,
            children: BTreeMap::new(),
        }
    }

    /// Placeholder created when a child names a parent nobody registered
    pub fn stub(name: impl Into<String>) -> Self {
        let name = name.into();
        let description = format!("Group for {} commands.", name);
        let mut group = Self::new(name, description);
        group.auto_created = true;
        group
    }

    pub fn with_child(mut self, command: Command) -> Self {
        self.children.insert(command.name.clone(), command);
        self
    }

    pub fn with_permission(mut self, node: impl Into<String>) -> Self {
        self.permission = Some(node.into());
        self
    }

    pub fn owner_only(mut self) -> Self {
        self.owner_only = true;
        self
    }

    pub fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            module: self.module.clone().unwrap_or_default(),
            subcommands: self.children.values().map(Command::descriptor).collect(),
        }
    }
}

/// A child command attached to a parent group by name
#[derive(Debug, Clone)]
pub struct Subcommand {
    pub parent: String,
    pub command: Command,
}

impl Subcommand {
    pub fn new(parent: impl Into<String>, command: Command) -> Self {
        Self {
            parent: parent.into(),
            command,
        }
    }
}

/// Localized help text for one language
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HelpText {
    pub description: String,
    pub usage: Option<String>,
    pub examples: Vec<String>,
}

/// Help metadata indexed by command name
#[derive(Debug, Clone, Default)]
pub struct CommandHelp {
    pub name: String,
    pub translations: HashMap<String, HelpText>,
}

impl CommandHelp {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            translations: HashMap::new(),
        }
    }

    pub fn with_translation(mut self, lang: impl Into<String>, text: HelpText) -> Self {
        self.translations.insert(lang.into(), text);
        self
    }

    /// Text for `lang`, falling back to English
    pub fn get_translation(&self, lang: &str) -> Option<&HelpText> {
        self.translations
            .get(lang)
            .or_else(|| self.translations.get("en"))
    }
}

/// A module's handler for a named platform event
#[derive(Clone)]
pub struct EventSubscription {
    pub id: String,
    pub event: String,
    pub module: String,
    pub handler: EventHandler,
}

impl EventSubscription {
    pub fn new<F, Fut>(event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BotError>> + Send + 'static,
    {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event: event.into(),
            module: String::new(),
            handler: Arc::new(move |ctx| handler(ctx).boxed()),
        }
    }
}

impl fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

/// Named collection of exports processed as one unit
#[derive(Debug, Clone)]
pub struct Bundle {
    pub name: String,
    pub exports: Vec<Export>,
}

impl Bundle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exports: Vec::new(),
        }
    }

    pub fn with(mut self, export: Export) -> Self {
        self.exports.push(export);
        self
    }
}

/// Anything a module hands to the router while loading
#[derive(Debug, Clone)]
pub enum Export {
    Leaf(Command),
    Group(CommandGroup),
    PendingChild(Subcommand),
    BundledSet(Bundle),
    HelpMetadata(CommandHelp),
    Event(EventSubscription),
}

/// Top level entry of the command surface
#[derive(Debug, Clone)]
pub enum SurfaceEntry {
    Leaf(Command),
    Group(CommandGroup),
}

impl SurfaceEntry {
    pub fn name(&self) -> &str {
        match self {
            SurfaceEntry::Leaf(cmd) => &cmd.name,
            SurfaceEntry::Group(group) => &group.name,
        }
    }

    /// Owning module, `None` for an unclaimed stub group
    pub fn module(&self) -> Option<&str> {
        match self {
            SurfaceEntry::Leaf(cmd) => Some(&cmd.module),
            SurfaceEntry::Group(group) => group.module.as_deref(),
        }
    }

    pub fn descriptor(&self) -> CommandDescriptor {
        match self {
            SurfaceEntry::Leaf(cmd) => cmd.descriptor(),
            SurfaceEntry::Group(group) => group.descriptor(),
        }
    }
}

/// A command resolved from a request, with group settings folded in
#[derive(Debug, Clone)]
pub struct ResolvedCommand {
    pub command: Command,
    pub path: String,
    pub args: Vec<String>,
}

/// Global command surface keyed by top level name
#[derive(Debug, Clone, Default)]
pub struct CommandSurface {
    entries: BTreeMap<String, SurfaceEntry>,
}

impl CommandSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&SurfaceEntry> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SurfaceEntry> {
        self.entries.get_mut(name)
    }

    pub fn insert(&mut self, entry: SurfaceEntry) -> Option<SurfaceEntry> {
        self.entries.insert(entry.name().to_string(), entry)
    }

    pub fn remove(&mut self, name: &str) -> Option<SurfaceEntry> {
        self.entries.remove(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &SurfaceEntry> {
        self.entries.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look a request up. A group consumes the first argument as the child
    /// name; a group invoked without a known child resolves to nothing.
    pub fn resolve(&self, name: &str, args: &[String]) -> Option<ResolvedCommand> {
        match self.entries.get(name)? {
            SurfaceEntry::Leaf(cmd) => Some(ResolvedCommand {
                command: cmd.clone(),
                path: cmd.name.clone(),
                args: args.to_vec(),
            }),
            SurfaceEntry::Group(group) => {
                let (child_name, rest) = args.split_first()?;
                let child = group.children.get(child_name)?;

                let mut command = child.clone();
                command.disabled |= group.disabled;
                command.owner_only |= group.owner_only;
                if command.permission.is_none() {
                    command.permission = group.permission.clone();
                }

                Some(ResolvedCommand {
                    command,
                    path: format!("{} {}", group.name, child.name),
                    args: rest.to_vec(),
                })
            }
        }
    }

    pub fn descriptors(&self) -> Vec<CommandDescriptor> {
        self.entries.values().map(SurfaceEntry::descriptor).collect()
    }
}

/// Serializable description of a command, as published on sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandDescriptor {
    pub name: String,
    pub description: String,
    pub module: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subcommands: Vec<CommandDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn stub_group_description() {
        let group = CommandGroup::stub("settings");
        assert!(group.auto_created);
        assert_eq!(group.description, "Group for settings commands.");
        assert!(group.module.is_none());
    }

    #[test]
    fn group_consumes_first_argument() {
        let mut surface = CommandSurface::new();
        let group = CommandGroup::new("settings", "Settings")
            .with_permission("Defaults.settings.manage_guild")
            .with_child(Command::new("set"));
        surface.insert(SurfaceEntry::Group(group));

        let resolved = surface.resolve("settings", &args(&["set", "language", "pt"])).unwrap();
        assert_eq!(resolved.path, "settings set");
        assert_eq!(resolved.args, args(&["language", "pt"]));
        assert_eq!(
            resolved.command.permission.as_deref(),
            Some("Defaults.settings.manage_guild")
        );

        assert!(surface.resolve("settings", &[]).is_none());
        assert!(surface.resolve("settings", &args(&["nope"])).is_none());
        assert!(surface.resolve("missing", &[]).is_none());
    }

    #[test]
    fn disabled_group_disables_children() {
        let mut group = CommandGroup::new("modules", "Modules").with_child(Command::new("list"));
        group.disabled = true;
        let mut surface = CommandSurface::new();
        surface.insert(SurfaceEntry::Group(group));

        assert!(surface.resolve("modules", &args(&["list"])).unwrap().command.disabled);
    }

    #[test]
    fn help_falls_back_to_english() {
        let help = CommandHelp::new("ping").with_translation(
            "en",
            HelpText {
                description: "Pong".into(),
                ..Default::default()
            },
        );
        assert_eq!(help.get_translation("pt").unwrap().description, "Pong");
    }

    #[test]
    fn descriptors_nest_children() {
        let mut surface = CommandSurface::new();
        surface.insert(SurfaceEntry::Group(
            CommandGroup::new("xp", "XP").with_child(Command::new("show").with_description("Show")),
        ));
        let descriptors = surface.descriptors();
        assert_eq!(descriptors[0].subcommands[0].name, "show");
    }
}
