use crate::compose::ScriptStore;
use crate::config::Config;
use crate::fetch::{Fetcher, Origin};
use crate::registry::{Extension, Registry, ResourcePack};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state, one instance per server process. Registries
/// are mutated only by administrative operations, which serialize on the
/// write lock.
pub struct AppState {
    pub config: Config,
    pub resourcepacks: RwLock<Registry<ResourcePack>>,
    pub extensions: RwLock<Registry<Extension>>,
    pub scripts: ScriptStore,
    pub fetcher: Fetcher,
    pub origin: Arc<dyn Origin>,
}

impl AppState {
    pub fn new(config: Config, origin: Arc<dyn Origin>) -> Arc<Self> {
        let alternates = config.alternate_prefixes();
        let resourcepacks = Registry::new(&config.data_dir, alternates.clone());
        let extensions = Registry::new(&config.data_dir, alternates);
        let fetcher = Fetcher::new(origin.clone(), config.cache_dir());

        Arc::new(Self {
            config,
            resourcepacks: RwLock::new(resourcepacks),
            extensions: RwLock::new(extensions),
            scripts: ScriptStore::new(),
            fetcher,
            origin,
        })
    }

    /// Scan both package kinds from disk, then gather the entry scripts of
    /// every enabled extension applying to the active server.
    pub async fn load_packages(&self) -> crate::error::Result<()> {
        {
            let mut resourcepacks = self.resourcepacks.write().await;
            resourcepacks.scan()?;
        }
        {
            let mut extensions = self.extensions.write().await;
            extensions.scan()?;
        }
        self.gather_enabled_scripts().await;
        Ok(())
    }

    /// Re-read every enabled extension's scripts into the store. Remote
    /// entries are re-fetched fresh; nothing is cached to disk.
    pub async fn gather_enabled_scripts(&self) {
        self.scripts.clear();
        let extensions = self.extensions.read().await;
        let extension_dir = self.config.extension_dir();
        let server_to_play = self.config.game.server_to_play;

        for (_, record) in extensions.enabled_by_sequence() {
            if !record.metadata.apply_server.contains(&server_to_play) {
                continue;
            }
            crate::compose::gather_scripts(
                &self.scripts,
                &self.origin,
                &extension_dir,
                &record.metadata,
            )
            .await;
        }
    }
}
