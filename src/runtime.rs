//! Runtime context
//!
//! One `Runtime` is built at startup and shared as `Arc<Runtime>` with every
//! command, event handler and middleware. It owns all mutable state.

use std::any::Any;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::application::errors::BotError;
use crate::application::messaging::{
    AuditSink, CommandRouter, DispatchOutcome, LoggingMiddleware, OwnerMiddleware,
    PermissionMiddleware, RateLimitMiddleware,
};
use crate::application::permissions::PermissionResolver;
use crate::application::services::{MemberProfiles, SettingsSchema, TenantProfileCache};
use crate::domain::entities::{EventPayload, InboundRequest};
use crate::domain::traits::{DocumentStore, Platform, SyncScope};
use crate::infrastructure::config::{Config, StorageBackend};
use crate::infrastructure::database::SqliteStore;
use crate::infrastructure::plugins::ModuleLoader;
use crate::infrastructure::storage::MemoryStore;
use crate::plugins::{ModuleCatalog, ModuleManager};

pub struct Runtime {
    pub config: Config,
    pub permissions: PermissionResolver,
    pub router: CommandRouter,
    pub schemas: Arc<SettingsSchema>,
    pub profiles: TenantProfileCache,
    pub members: MemberProfiles,
    pub modules: ModuleManager,
    pub platform: Arc<dyn Platform>,
    pub store: Arc<dyn DocumentStore>,
    pub audit: AuditSink,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn is_owner(&self, actor_id: &str) -> bool {
        self.config.is_owner(actor_id)
    }

    /// Start the audit logger, discover modules and load them when
    /// auto-load is on. Returns the audit logger task, if any.
    pub async fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let audit_config = &self.config.security.audit;
        let logger = audit_config
            .enabled
            .then(|| self.audit.spawn_logger(audit_config.path.clone()));

        self.modules.discover();
        if self.config.modules.auto_load {
            for (name, result) in self.modules.load_all(self).await {
                if let Err(e) = result {
                    tracing::error!("Module '{}' was not loaded: {}", name, e);
                }
            }
        }

        tracing::info!(
            "{} ready with {} module(s) and {} command(s)",
            self.config.bot.name,
            self.modules.list().len(),
            self.router.command_names().len()
        );
        logger
    }

    /// Dispatch a request and deliver whatever reply it produced
    pub async fn handle_request(self: &Arc<Self>, request: InboundRequest) -> DispatchOutcome {
        let outcome = self.router.handle_incoming(self, &request).await;
        if let Some(reply) = outcome.reply() {
            if let Err(e) = self.platform.send_reply(&request, reply).await {
                tracing::error!(request = %request.id, "Failed to deliver reply: {}", e);
            }
        }
        outcome
    }

    pub async fn dispatch_event(self: &Arc<Self>, payload: EventPayload) -> usize {
        self.router.dispatch_event(self, payload).await
    }

    pub async fn load_module(self: &Arc<Self>, name: &str) -> Result<(), BotError> {
        self.modules.load(self, name).await
    }

    pub async fn unload_module(self: &Arc<Self>, name: &str, sync: Option<SyncScope>) -> Result<(), BotError> {
        self.modules.unload(self, name, sync).await
    }

    pub async fn reload_module(self: &Arc<Self>, name: &str) -> Result<(), BotError> {
        self.modules.reload(self, name).await
    }

    /// Publish the current command surface. Returns how many top level
    /// commands were sent.
    pub async fn sync_commands(&self, scope: &SyncScope) -> Result<usize, BotError> {
        let surface = self.router.surface();
        self.platform.publish_commands(scope, &surface).await?;
        tracing::info!("Synced {} command(s) ({})", surface.len(), scope);
        Ok(surface.len())
    }

    pub fn interface<T: Any + Send + Sync>(&self, module: &str) -> Option<Arc<T>> {
        self.modules.interface::<T>(module)
    }
}

/// Builder for [`Runtime`]
#[derive(Default)]
pub struct RuntimeBuilder {
    config: Option<Config>,
    store: Option<Arc<dyn DocumentStore>>,
    platform: Option<Arc<dyn Platform>>,
    catalog: Option<ModuleCatalog>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this store instead of the one the config names
    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Defaults to [`ModuleCatalog::builtin`]
    pub fn catalog(mut self, catalog: ModuleCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn build(self) -> Result<Arc<Runtime>, BotError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let platform = self
            .platform
            .ok_or_else(|| BotError::Configuration("a platform is required".to_string()))?;

        let store: Arc<dyn DocumentStore> = match self.store {
            Some(store) => store,
            None => match config.storage.backend {
                StorageBackend::Memory => Arc::new(MemoryStore::new()),
                StorageBackend::Sqlite => {
                    tracing::info!("Opening database at {}", config.storage.path.display());
                    Arc::new(SqliteStore::open(&config.storage.path)?)
                }
            },
        };

        let audit = AuditSink::new(config.security.audit.capacity);
        let mut router = CommandRouter::new(audit.clone(), config.dispatch_timeout())
            .with_middleware(LoggingMiddleware)
            .with_middleware(OwnerMiddleware)
            .with_middleware(PermissionMiddleware);
        let limits = &config.security.rate_limit;
        if limits.enabled {
            router = router.with_middleware(RateLimitMiddleware::new(limits.max_requests, limits.window_seconds));
        }

        let schemas = Arc::new(SettingsSchema::new());
        let catalog = self.catalog.unwrap_or_else(ModuleCatalog::builtin);
        let loader = ModuleLoader::new(config.modules.directory.clone());

        Ok(Arc::new(Runtime {
            permissions: PermissionResolver::new(),
            router,
            profiles: TenantProfileCache::new(Arc::clone(&store), Arc::clone(&schemas)),
            members: MemberProfiles::new(Arc::clone(&store), Arc::clone(&schemas)),
            modules: ModuleManager::new(catalog, loader),
            schemas,
            platform,
            store,
            audit,
            config,
        }))
    }
}
