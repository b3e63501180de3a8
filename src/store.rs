// 📦 Durable Store - one persisted pack per park, addressed by `park:<id>`
// Every operation can fail (store unavailable, quota); failures propagate as Err.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::Pack;

#[async_trait]
pub trait PackStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Pack>>;

    async fn set(&self, key: &str, pack: &Pack) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Small string settings (last selected park). Stores without settings
    /// support keep nothing.
    async fn get_setting(&self, _name: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set_setting(&self, _name: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}

/// Process-local store, used by tests and embedders that need no persistence
#[derive(Debug, Default)]
pub struct MemoryPackStore {
    packs: Mutex<HashMap<String, Pack>>,
    settings: Mutex<HashMap<String, String>>,
}

impl MemoryPackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let packs = self.packs.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = packs.keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Store("memory store lock poisoned".to_string())
}

#[async_trait]
impl PackStore for MemoryPackStore {
    async fn get(&self, key: &str) -> Result<Option<Pack>> {
        let packs = self.packs.lock().map_err(poisoned)?;
        Ok(packs.get(key).cloned())
    }

    async fn set(&self, key: &str, pack: &Pack) -> Result<()> {
        let mut packs = self.packs.lock().map_err(poisoned)?;
        packs.insert(key.to_string(), pack.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut packs = self.packs.lock().map_err(poisoned)?;
        packs.remove(key);
        Ok(())
    }

    async fn get_setting(&self, name: &str) -> Result<Option<String>> {
        let settings = self.settings.lock().map_err(poisoned)?;
        Ok(settings.get(name).cloned())
    }

    async fn set_setting(&self, name: &str, value: &str) -> Result<()> {
        let mut settings = self.settings.lock().map_err(poisoned)?;
        settings.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
