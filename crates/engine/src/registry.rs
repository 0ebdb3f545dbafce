//! Registry of configured file manager instances.
//!
//! Each instance is built once from its configuration and stored behind an
//! `Arc`. Re-registering an id swaps in a fresh instance; operations already
//! holding the old `Arc` finish against the configuration they started with.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use envelope::Codec;
use tracing::{debug, info};

use crate::config::InstanceConfig;
use crate::error::{scrub, EngineError, IoResultExt, Result};
use crate::files::quota::QuotaGuard;
use crate::files::sandbox::Sandbox;

/// A configured mount point with its resolver, quota guard and codec.
#[derive(Debug)]
pub struct Instance {
    config: InstanceConfig,
    sandbox: Sandbox,
    quota: QuotaGuard,
    codec: Codec,
}

impl Instance {
    /// Build an instance, creating its root directory if it is missing.
    pub fn open(config: InstanceConfig) -> Result<Self> {
        if config.root_path.as_os_str().is_empty() {
            return Err(EngineError::InvalidRoot(config.root_path.clone()));
        }
        if !config.root_path.exists() {
            fs::create_dir_all(&config.root_path)
                .op_context(|| format!("create root {}", config.root_path.display()))?;
            info!(instance = %config.id, "Created missing root directory");
        }

        let sandbox = Sandbox::new(&config.root_path)?;
        let quota = QuotaGuard::new(
            sandbox.root(),
            config.storage_max_size_mb,
            config.compression_max_size_mb,
        );
        let key = config.resolve_key();
        let codec = Codec::from_settings(key.as_deref(), config.use_encryption);

        Ok(Self {
            config,
            sandbox,
            quota,
            codec,
        })
    }

    /// Instance identifier.
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Configuration this instance was built from.
    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// Path resolver for the instance root.
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Quota guard for the instance root.
    pub fn quota(&self) -> &QuotaGuard {
        &self.quota
    }

    /// Content codec.
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Physical path of the recycle bin, which may not exist yet.
    pub fn recycle_bin(&self) -> PathBuf {
        self.sandbox
            .root()
            .join(format!("recyclebin-{}", self.config.id))
    }

    /// Replace every physical root spelling in `message` with a placeholder.
    pub fn scrub(&self, message: &str) -> String {
        let roots: [&Path; 2] = [self.sandbox.root(), &self.config.root_path];
        scrub(message, &roots)
    }
}

/// Thread-safe map of instance id to instance.
pub struct InstanceRegistry {
    instances: DashMap<String, Arc<Instance>>,
}

impl InstanceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    /// Build and register an instance, replacing any previous one with the same id.
    pub fn register(&self, config: InstanceConfig) -> Result<Arc<Instance>> {
        let instance = Arc::new(Instance::open(config)?);
        let id = instance.id().to_string();
        if self.instances.insert(id.clone(), Arc::clone(&instance)).is_some() {
            debug!(instance = %id, "Replaced instance configuration");
        } else {
            info!(instance = %id, root = %instance.sandbox().root().display(), "Registered instance");
        }
        Ok(instance)
    }

    /// Look up an instance by id.
    pub fn get(&self, id: &str) -> Result<Arc<Instance>> {
        self.instances
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::UnknownInstance(id.to_string()))
    }

    /// Remove an instance. Returns whether it was registered.
    pub fn remove(&self, id: &str) -> bool {
        self.instances.remove(id).is_some()
    }

    /// Registered instance ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether no instance is registered.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
