//! Domain entities - Core business objects

pub mod actor;
pub mod request;
pub mod command;
pub mod setting;
pub mod permission;
pub mod profile;
pub mod module;

pub use actor::{Actor, Capabilities};
pub use request::{EventPayload, InboundRequest, Reply, TenantContext};
pub use command::{
    Bundle, Command, CommandContext, CommandDescriptor, CommandGroup, CommandHandler, CommandHelp,
    CommandSurface, EventContext, EventHandler, EventSubscription, Export, HelpText, ResolvedCommand,
    Subcommand, SurfaceEntry,
};
pub use setting::{SettingDef, SettingInstance, SettingKind, SettingValue};
pub use permission::{OverrideEntry, OverrideNode, OverrideTree};
pub use profile::{MemberProfile, TenantProfile};
pub use module::{ModuleRecord, ModuleState, RegistrationKey};
