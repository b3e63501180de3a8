// 🏞️ Park Registry - the external list of parks (parks.json)
// Relative data locations resolve against the registry's own location.

use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};
use crate::fetch::{is_remote, PackFetcher};
use crate::model::ParkDescriptor;
use crate::store::PackStore;

/// Settings key holding the last registry fetched successfully
pub const REGISTRY_SETTING: &str = "registry";

#[derive(Debug, Clone, Default)]
pub struct ParkRegistry {
    parks: Vec<ParkDescriptor>,
}

impl ParkRegistry {
    pub fn new(parks: Vec<ParkDescriptor>) -> Self {
        Self { parks }
    }

    /// Load `[{id, name, dataLocation}, ...]` from a URL or file
    pub async fn load(fetcher: &dyn PackFetcher, location: &str) -> Result<Self> {
        let value = fetcher.fetch_json(location).await?;
        let mut parks: Vec<ParkDescriptor> = serde_json::from_value(value)?;

        for park in &mut parks {
            park.data_location = resolve_location(location, &park.data_location);
        }

        Ok(Self { parks })
    }

    /// Like `load`, but remembers the registry in the store and falls back
    /// to the remembered copy when the location can't be reached.
    pub async fn load_with_fallback(
        fetcher: &dyn PackFetcher,
        store: &dyn PackStore,
        location: &str,
    ) -> Result<Self> {
        match Self::load(fetcher, location).await {
            Ok(registry) => {
                let json = serde_json::to_string(&registry.parks)?;
                if let Err(e) = store.set_setting(REGISTRY_SETTING, &json).await {
                    warn!(error = %e, "could not cache park registry");
                }
                Ok(registry)
            }
            Err(e) => match store.get_setting(REGISTRY_SETTING).await? {
                Some(json) => {
                    warn!(error = %e, "park registry unavailable, using cached copy");
                    Ok(Self::new(serde_json::from_str(&json)?))
                }
                None => Err(e),
            },
        }
    }

    pub fn parks(&self) -> &[ParkDescriptor] {
        &self.parks
    }

    pub fn get(&self, id: &str) -> Result<&ParkDescriptor> {
        self.parks
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::UnknownPark(id.to_string()))
    }

    /// The remembered park when it is still listed, else the first park
    pub fn default_park(&self, last: Option<&str>) -> Option<&ParkDescriptor> {
        last.and_then(|id| self.parks.iter().find(|p| p.id == id))
            .or_else(|| self.parks.first())
    }

    pub fn is_empty(&self) -> bool {
        self.parks.is_empty()
    }
}

/// Resolve `location` relative to the registry at `base`.
///
/// Absolute URLs and absolute paths are kept as-is.
pub fn resolve_location(base: &str, location: &str) -> String {
    if is_remote(location) || location.starts_with("file://") || Path::new(location).is_absolute() {
        return location.to_string();
    }

    let relative = location.trim_start_matches("./");
    match base.rfind('/') {
        Some(idx) => format!("{}/{}", &base[..idx], relative),
        None => relative.to_string(),
    }
}
