//! Asset catalog abstraction.
//!
//! The catalog (CRUD, categories, uploads) is owned by another part of the
//! system; downgate only needs to know whether an asset exists and where
//! its file lives. Implement [`Catalog`] over your asset storage.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A downloadable asset, as seen by the download gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// Catalog asset ID.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Location the client downloads from.
    pub file_url: String,
}

/// Read-only view of the asset catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Look up an asset by ID. `Ok(None)` means the asset does not exist.
    async fn find_asset(&self, asset_id: &str) -> Result<Option<Asset>>;
}

/// In-memory catalog, used in tests and as a reference implementation.
#[derive(Default, Clone)]
pub struct InMemoryCatalog {
    assets: std::sync::Arc<std::sync::RwLock<std::collections::HashMap<String, Asset>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, asset: Asset) {
        if let Ok(mut assets) = self.assets.write() {
            assets.insert(asset.id.clone(), asset);
        }
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn find_asset(&self, asset_id: &str) -> Result<Option<Asset>> {
        let assets = self
            .assets
            .read()
            .map_err(|_| crate::error::DowngateError::internal("catalog lock poisoned"))?;
        Ok(assets.get(asset_id).cloned())
    }
}
