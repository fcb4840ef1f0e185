//! Owner module - runtime module management for bot owners

use super::trait_def::{Module, ModuleRegistrar};
use crate::application::errors::{BotError, CommandError};
use crate::domain::entities::{Command, CommandContext, CommandGroup, Reply};
use crate::domain::traits::SyncScope;

pub const OWNER: &str = "Owner";

pub struct OwnerModule;

impl Module for OwnerModule {
    fn name(&self) -> &str {
        OWNER
    }

    fn description(&self) -> &str {
        "Load, unload and sync modules"
    }

    fn register(&self, registrar: &mut ModuleRegistrar) -> Result<(), BotError> {
        registrar.group(
            CommandGroup::new("modules", "Manage loaded modules")
                .owner_only()
                .with_child(
                    Command::new("list")
                        .with_description("List modules and their state")
                        .with_handler(list),
                )
                .with_child(
                    Command::new("load")
                        .with_description("Load a module")
                        .with_usage("/modules load <name>")
                        .with_handler(load),
                )
                .with_child(
                    Command::new("unload")
                        .with_description("Unload a module")
                        .with_usage("/modules unload <name> [global|guild]")
                        .with_handler(unload),
                )
                .with_child(
                    Command::new("reload")
                        .with_description("Unload and load a module again")
                        .with_usage("/modules reload <name>")
                        .with_handler(reload),
                )
                .with_child(
                    Command::new("sync")
                        .with_description("Publish the command list")
                        .with_usage("/modules sync [global|guild]")
                        .with_handler(sync),
                )
                .with_child(
                    Command::new("disable")
                        .with_description("Disable a command")
                        .with_usage("/modules disable <command> [subcommand]")
                        .with_handler(|ctx| toggle(ctx, true)),
                )
                .with_child(
                    Command::new("enable")
                        .with_description("Enable a disabled command")
                        .with_usage("/modules enable <command> [subcommand]")
                        .with_handler(|ctx| toggle(ctx, false)),
                ),
        );
        Ok(())
    }
}

/// `global` or `guild` (the current tenant); `None` for anything else
fn scope(ctx: &CommandContext, arg: Option<&str>) -> Option<SyncScope> {
    match arg {
        Some("global") => Some(SyncScope::Global),
        Some("guild") => ctx.tenant_id().map(|t| SyncScope::Tenant(t.to_string())),
        _ => None,
    }
}

async fn list(ctx: CommandContext) -> Result<Reply, CommandError> {
    let modules = &ctx.runtime.modules;
    let mut lines: Vec<String> = modules
        .list()
        .iter()
        .map(|m| format!("{} v{} [{}] {}", m.name, m.version, m.state, m.commands().join(", ")))
        .collect();

    for manifest in modules.discovered() {
        if !modules.is_loaded(&manifest.name) {
            let state = modules
                .state(&manifest.name)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "discovered".to_string());
            let note = if manifest.disabled { " (disabled)" } else { "" };
            lines.push(format!("{} v{} [{}]{}", manifest.name, manifest.version, state, note));
        }
    }

    Ok(Reply::ephemeral(lines.join("\n")))
}

async fn load(ctx: CommandContext) -> Result<Reply, CommandError> {
    let Some(name) = ctx.arg(0) else {
        return Ok(Reply::ephemeral("Usage: /modules load <name>"));
    };
    match ctx.runtime.load_module(name).await {
        Ok(()) => Ok(Reply::ephemeral(format!("Module `{}` loaded.", name))),
        Err(e) => Ok(Reply::ephemeral(format!("Failed to load `{}`: {}", name, e))),
    }
}

async fn unload(ctx: CommandContext) -> Result<Reply, CommandError> {
    let Some(name) = ctx.arg(0) else {
        return Ok(Reply::ephemeral("Usage: /modules unload <name> [global|guild]"));
    };
    let sync = scope(&ctx, ctx.arg(1));
    match ctx.runtime.unload_module(name, sync).await {
        Ok(()) => Ok(Reply::ephemeral(format!("Module `{}` unloaded.", name))),
        Err(e) => Ok(Reply::ephemeral(format!("Failed to unload `{}`: {}", name, e))),
    }
}

async fn reload(ctx: CommandContext) -> Result<Reply, CommandError> {
    let Some(name) = ctx.arg(0) else {
        return Ok(Reply::ephemeral("Usage: /modules reload <name>"));
    };
    match ctx.runtime.reload_module(name).await {
        Ok(()) => Ok(Reply::ephemeral(format!("Module `{}` reloaded.", name))),
        Err(e) => Ok(Reply::ephemeral(format!("Failed to reload `{}`: {}", name, e))),
    }
}

async fn sync(ctx: CommandContext) -> Result<Reply, CommandError> {
    let scope = scope(&ctx, ctx.arg(0).or(Some("global"))).unwrap_or(SyncScope::Global);
    let count = ctx.runtime.sync_commands(&scope).await?;
    Ok(Reply::ephemeral(format!("Published {} command(s) ({}).", count, scope)))
}

async fn toggle(ctx: CommandContext, disabled: bool) -> Result<Reply, CommandError> {
    if ctx.args.is_empty() {
        return Ok(Reply::ephemeral("Usage: /modules disable|enable <command> [subcommand]"));
    }
    let path = ctx.args.join(" ");
    if disabled && ctx.arg(0) == Some("modules") {
        return Ok(Reply::ephemeral("The modules command cannot be disabled."));
    }
    if ctx.runtime.router.set_disabled(&path, disabled) {
        let verb = if disabled { "disabled" } else { "enabled" };
        Ok(Reply::ephemeral(format!("Command `{}` {}.", path, verb)))
    } else {
        Ok(Reply::ephemeral(format!("Unknown command: {}", path)))
    }
}
