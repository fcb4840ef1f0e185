//! Defaults module - the baseline every guild gets
//!
//! Registers the `Role.*`, `User.*` and `Channel.*` permission checks used by
//! override entries, plus help, settings and permission override commands.

use async_trait::async_trait;

use super::trait_def::{InitContext, Module, ModuleRegistrar, ModuleSetup};
use crate::application::errors::{BotError, CommandError};
use crate::application::permissions::resolver::{channel_evaluator, role_evaluator, user_evaluator};
use crate::domain::entities::{
    Bundle, Command, CommandContext, CommandGroup, CommandHelp, EventContext, EventSubscription,
    Export, HelpText, OverrideEntry, OverrideTree, Reply, SettingDef, SettingKind, SettingValue,
    TenantProfile,
};

pub const DEFAULTS: &str = "Defaults";
pub const MANAGE_SETTINGS: &str = "Defaults.settings.manage_guild";
pub const MANAGE_PERMISSIONS: &str = "Defaults.permissions.administrator";

const GUILD_ONLY: &str = "This command can only be used inside a guild.";

/// Interface other modules can fetch with `interface::<DefaultsInterface>`
#[derive(Debug, Clone)]
pub struct DefaultsInterface {
    pub languages: Vec<String>,
}

impl DefaultsInterface {
    /// Tenant language, falling back to the first supported one
    pub fn language_of(&self, profile: &TenantProfile) -> String {
        profile
            .language()
            .filter(|lang| self.languages.iter().any(|l| l == lang))
            .or_else(|| self.languages.first().map(String::as_str))
            .unwrap_or("en")
            .to_string()
    }
}

pub struct DefaultsModule;

#[async_trait]
impl Module for DefaultsModule {
    fn name(&self) -> &str {
        DEFAULTS
    }

    fn description(&self) -> &str {
        "Help, settings and permission overrides"
    }

    fn register(&self, registrar: &mut ModuleRegistrar) -> Result<(), BotError> {
        registrar
            .permission_node("Role.*", role_evaluator())
            .permission_node("User.*", user_evaluator())
            .permission_node("Channel.*", channel_evaluator());

        registrar.command(
            Command::new("help")
                .with_description("List commands or show help for one")
                .with_usage("/help [command]")
                .with_handler(help),
        );

        registrar.group(
            CommandGroup::new("settings", "View and change guild settings")
                .with_permission(MANAGE_SETTINGS)
                .with_child(
                    Command::new("list")
                        .with_description("List every guild setting")
                        .with_handler(settings_list),
                )
                .with_child(
                    Command::new("get")
                        .with_description("Show one setting")
                        .with_usage("/settings get <id>")
                        .with_handler(settings_get),
                ),
        );
        registrar.subcommand(
            "settings",
            Command::new("set")
                .with_description("Change a guild setting")
                .with_usage("/settings set <id> <value>")
                .with_handler(settings_set),
        );

        registrar.command(
            Command::new("preferences")
                .with_description("View or change your own settings in this guild")
                .with_usage("/preferences [id] [value]")
                .with_handler(preferences),
        );

        registrar.bundle(
            Bundle::new("permissions")
                .with(Export::Group(
                    CommandGroup::new("permissions", "Manage permission overrides")
                        .with_permission(MANAGE_PERMISSIONS)
                        .with_child(
                            Command::new("list")
                                .with_description("Show the guild's overrides")
                                .with_handler(permissions_list),
                        )
                        .with_child(
                            Command::new("set")
                                .with_description("Replace the guild's overrides")
                                .with_usage("/permissions set <yaml list of {id, allow, deny}>")
                                .with_handler(permissions_set),
                        )
                        .with_child(
                            Command::new("nodes")
                                .with_description("List registered permission checks")
                                .with_handler(permissions_nodes),
                        ),
                ))
                .with(Export::HelpMetadata(
                    CommandHelp::new("permissions")
                        .with_translation(
                            "en",
                            HelpText {
                                description: "Allow or deny commands for roles, users and channels."
                                    .to_string(),
                                usage: Some("/permissions set [{id: Role.1, allow: [Commands.ban]}]".to_string()),
                                examples: vec!["/permissions list".to_string()],
                            },
                        )
                        .with_translation(
                            "pt",
                            HelpText {
                                description: "Permite ou nega comandos para cargos, usuários e canais."
                                    .to_string(),
                                usage: Some("/permissions set [{id: Role.1, allow: [Commands.ban]}]".to_string()),
                                examples: vec!["/permissions list".to_string()],
                            },
                        ),
                )),
        );

        registrar
            .event(EventSubscription::new("guild_update", guild_update))
            .event(EventSubscription::new("guild_delete", guild_delete));
        Ok(())
    }

    async fn init(&self, _ctx: InitContext) -> Result<ModuleSetup, BotError> {
        let languages = vec!["en".to_string(), "pt".to_string()];

        Ok(ModuleSetup::new()
            .with_setting(
                SettingDef::new(
                    "language",
                    SettingKind::Select {
                        options: languages.clone(),
                    },
                    SettingValue::text("en"),
                )
                .with_name("Language")
                .with_description("Language used for replies in this guild"),
            )
            .with_user_setting(
                SettingDef::new("dm_notifications", SettingKind::Boolean, SettingValue::Bool(false))
                    .with_name("DM notifications")
                    .with_description("Receive direct messages about your activity"),
            )
            .with_interface(DefaultsInterface { languages }))
    }
}

async fn language(ctx: &CommandContext) -> String {
    let Some(tenant) = ctx.tenant_id() else {
        return ctx.request.tenant.locale.clone().unwrap_or_else(|| "en".to_string());
    };
    match ctx.runtime.profiles.fetch_or_create(tenant).await {
        Ok(profile) => profile.language().unwrap_or("en").to_string(),
        Err(e) => {
            tracing::warn!(tenant, "Failed to load tenant language: {}", e);
            "en".to_string()
        }
    }
}

async fn help(ctx: CommandContext) -> Result<Reply, CommandError> {
    let router = &ctx.runtime.router;

    let Some(name) = ctx.arg(0) else {
        let lines: Vec<String> = router
            .surface()
            .iter()
            .map(|d| format!("/{} - {}", d.name, d.description))
            .collect();
        return Ok(Reply::text(format!("Available commands:\n{}", lines.join("\n"))));
    };

    let lang = language(&ctx).await;
    if let Some(text) = router.help(name).as_ref().and_then(|h| h.get_translation(&lang).cloned()) {
        let mut out = format!("/{}: {}", name, text.description);
        if let Some(usage) = text.usage {
            out.push_str(&format!("\nUsage: {}", usage));
        }
        for example in text.examples {
            out.push_str(&format!("\nExample: {}", example));
        }
        return Ok(Reply::text(out));
    }

    match router.surface().into_iter().find(|d| d.name == name) {
        Some(descriptor) => {
            let mut out = format!("/{}: {}", descriptor.name, descriptor.description);
            for sub in descriptor.subcommands {
                out.push_str(&format!("\n  {} - {}", sub.name, sub.description));
            }
            Ok(Reply::text(out))
        }
        None => Ok(Reply::ephemeral(format!("Unknown command: {}", name))),
    }
}

async fn settings_list(ctx: CommandContext) -> Result<Reply, CommandError> {
    let Some(tenant) = ctx.tenant_id() else {
        return Ok(Reply::ephemeral(GUILD_ONLY));
    };
    let profile = ctx.runtime.profiles.fetch_or_create(tenant).await.map_err(BotError::from)?;

    let lines: Vec<String> = profile
        .settings
        .values()
        .map(|s| format!("{} ({}) = {}", s.id(), s.def.kind.type_name(), s.value))
        .collect();
    if lines.is_empty() {
        return Ok(Reply::ephemeral("No settings are declared."));
    }
    Ok(Reply::ephemeral(lines.join("\n")))
}

async fn settings_get(ctx: CommandContext) -> Result<Reply, CommandError> {
    let Some(tenant) = ctx.tenant_id() else {
        return Ok(Reply::ephemeral(GUILD_ONLY));
    };
    let Some(id) = ctx.arg(0) else {
        return Ok(Reply::ephemeral("Usage: /settings get <id>"));
    };

    let profile = ctx.runtime.profiles.fetch_or_create(tenant).await.map_err(BotError::from)?;
    match profile.setting(id) {
        Some(setting) => Ok(Reply::ephemeral(format!(
            "{}: {}\n{}",
            setting.def.name, setting.value, setting.def.description
        ))),
        None => Ok(Reply::ephemeral(format!("Unknown setting: {}", id))),
    }
}

async fn settings_set(ctx: CommandContext) -> Result<Reply, CommandError> {
    let Some(tenant) = ctx.tenant_id() else {
        return Ok(Reply::ephemeral(GUILD_ONLY));
    };
    let (Some(id), true) = (ctx.arg(0), ctx.args.len() > 1) else {
        return Ok(Reply::ephemeral("Usage: /settings set <id> <value>"));
    };
    let input = ctx.args[1..].join(" ");

    match ctx.runtime.profiles.save_setting_input(tenant, id, &input).await {
        Ok(profile) => {
            let value = profile.value(id).map(ToString::to_string).unwrap_or_default();
            Ok(Reply::ephemeral(format!("Setting `{}` updated to {}", id, value)))
        }
        Err(BotError::Setting(e)) => Ok(Reply::ephemeral(format!("Invalid value for `{}`: {}", id, e))),
        Err(e) => Err(e.into()),
    }
}

async fn preferences(ctx: CommandContext) -> Result<Reply, CommandError> {
    let Some(tenant) = ctx.tenant_id() else {
        return Ok(Reply::ephemeral(GUILD_ONLY));
    };
    let member = ctx.request.actor.id.clone();
    let members = &ctx.runtime.members;

    let Some(id) = ctx.arg(0) else {
        let profile = members
            .fetch_or_create_member(tenant, &member)
            .await
            .map_err(BotError::from)?;
        let lines: Vec<String> = profile
            .settings
            .values()
            .map(|s| format!("{} = {}", s.id(), s.value))
            .collect();
        return Ok(Reply::ephemeral(lines.join("\n")));
    };

    if ctx.args.len() < 2 {
        let profile = members
            .fetch_or_create_member(tenant, &member)
            .await
            .map_err(BotError::from)?;
        return Ok(match profile.value(id) {
            Some(value) => Reply::ephemeral(format!("{} = {}", id, value)),
            None => Reply::ephemeral(format!("Unknown setting: {}", id)),
        });
    }

    let Some(def) = ctx.runtime.schemas.find_member(id) else {
        return Ok(Reply::ephemeral(format!("Unknown setting: {}", id)));
    };
    let value = match def.kind.parse_input(&ctx.args[1..].join(" ")) {
        Ok(value) => value,
        Err(e) => return Ok(Reply::ephemeral(format!("Invalid value for `{}`: {}", id, e))),
    };

    match members.save_member_setting(tenant, &member, id, value).await {
        Ok(profile) => Ok(Reply::ephemeral(format!(
            "{} = {}",
            id,
            profile.value(id).map(ToString::to_string).unwrap_or_default()
        ))),
        Err(BotError::Setting(e)) => Ok(Reply::ephemeral(format!("Invalid value for `{}`: {}", id, e))),
        Err(e) => Err(e.into()),
    }
}

async fn permissions_list(ctx: CommandContext) -> Result<Reply, CommandError> {
    let Some(tenant) = ctx.tenant_id() else {
        return Ok(Reply::ephemeral(GUILD_ONLY));
    };
    let profile = ctx.runtime.profiles.fetch_or_create(tenant).await.map_err(BotError::from)?;

    let entries = profile.overrides.to_entries();
    if entries.is_empty() {
        return Ok(Reply::ephemeral("No permission overrides are set."));
    }
    let yaml = serde_yaml::to_string(&entries)
        .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;
    Ok(Reply::ephemeral(yaml))
}

async fn permissions_set(ctx: CommandContext) -> Result<Reply, CommandError> {
    let Some(tenant) = ctx.tenant_id() else {
        return Ok(Reply::ephemeral(GUILD_ONLY));
    };
    if ctx.args.is_empty() {
        return Ok(Reply::ephemeral(
            "Usage: /permissions set [{id: Role.1, allow: [Commands.ban], deny: []}]",
        ));
    }

    let entries: Vec<OverrideEntry> = match serde_yaml::from_str(&ctx.args.join(" ")) {
        Ok(entries) => entries,
        Err(e) => return Ok(Reply::ephemeral(format!("Invalid overrides: {}", e))),
    };
    let tree = match OverrideTree::from_entries(&entries) {
        Ok(tree) => tree,
        Err(e) => return Ok(Reply::ephemeral(format!("Invalid overrides: {}", e))),
    };

    ctx.runtime.profiles.save_overrides(tenant, &tree).await?;
    Ok(Reply::ephemeral(format!(
        "Saved {} override path(s) for {} subject(s).",
        tree.len(),
        entries.len()
    )))
}

async fn permissions_nodes(ctx: CommandContext) -> Result<Reply, CommandError> {
    let nodes = ctx.runtime.permissions.nodes();
    Ok(Reply::ephemeral(nodes.join("\n")))
}

async fn guild_update(ctx: EventContext) -> Result<(), BotError> {
    if let Some(tenant) = ctx.payload.tenant.as_deref() {
        ctx.runtime.profiles.invalidate(tenant).await;
    }
    Ok(())
}

async fn guild_delete(ctx: EventContext) -> Result<(), BotError> {
    if let Some(tenant) = ctx.payload.tenant.as_deref() {
        if ctx.runtime.profiles.evict(tenant) {
            tracing::info!(tenant, "Tenant profile evicted");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn profile(language: Option<&str>) -> TenantProfile {
        let def = SettingDef::new(
            "language",
            SettingKind::Select {
                options: vec!["en".into(), "pt".into()],
            },
            SettingValue::text("en"),
        );
        let mut settings = BTreeMap::new();
        if let Some(lang) = language {
            settings.insert("language".to_string(), def.instantiate(SettingValue::text(lang)));
        }
        TenantProfile {
            id: "G".into(),
            document: Default::default(),
            settings,
            overrides: OverrideTree::new(),
            flags: BTreeMap::new(),
        }
    }

    #[test]
    fn interface_language_falls_back() {
        let interface = DefaultsInterface {
            languages: vec!["en".into(), "pt".into()],
        };
        assert_eq!(interface.language_of(&profile(Some("pt"))), "pt");
        assert_eq!(interface.language_of(&profile(Some("de"))), "en");
        assert_eq!(interface.language_of(&profile(None)), "en");
    }

    #[test]
    fn registers_checks_and_exports() {
        let mut registrar = ModuleRegistrar::new();
        DefaultsModule.register(&mut registrar).unwrap();

        let nodes: Vec<_> = registrar.permission_nodes.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(nodes, vec!["Role.*", "User.*", "Channel.*"]);
        assert!(registrar
            .exports
            .iter()
            .any(|e| matches!(e, Export::PendingChild(s) if s.parent == "settings")));
        assert!(registrar.exports.iter().any(|e| matches!(e, Export::BundledSet(_))));
    }
}
