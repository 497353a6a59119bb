//! The database boundary.
//!
//! Stages never talk to a database directly. Every read goes through the
//! [`Repository`] trait, which returns typed records. [`JsonRepository`]
//! serves the same queries from a directory of JSON table exports.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use tracing::debug;

use crate::error::{ParseTableSnafu, ReadTableSnafu, RepositoryError};
use crate::model::{Asset, AssetBinding, NamedLocation};

/// Shared handle to a repository.
pub type RepositoryRef = Arc<dyn Repository>;

/// Typed queries against the asset and location tables.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Every asset of `source_type`.
    async fn assets(&self, source_type: &str) -> Result<Vec<Asset>, RepositoryError>;

    /// The location history of one asset, oldest binding first.
    async fn asset_history(&self, asset_uid: &str) -> Result<Vec<AssetBinding>, RepositoryError>;

    /// The location history recorded against a MAC address, oldest first.
    async fn mac_history(
        &self,
        mac_address: &str,
    ) -> Result<Vec<AssetBinding>, RepositoryError>;

    /// Every binding of `asset`, by uid and by MAC address, oldest first.
    async fn bindings_of(&self, asset: &Asset) -> Result<Vec<AssetBinding>, RepositoryError> {
        let mut history = if asset.asset_uid.is_empty() {
            Vec::new()
        } else {
            self.asset_history(&asset.asset_uid).await?
        };
        if let Some(mac) = asset.mac_address.as_deref().filter(|m| !m.is_empty()) {
            for binding in self.mac_history(mac).await? {
                if !history.contains(&binding) {
                    history.push(binding);
                }
            }
        }
        history.sort_by_key(|b| b.install_date);
        Ok(history)
    }

    /// A named location by name.
    async fn named_location(&self, name: &str) -> Result<Option<NamedLocation>, RepositoryError>;
}

/// File names of the table exports read by [`JsonRepository::load`].
pub const ASSETS_TABLE: &str = "assets.json";
pub const BINDINGS_TABLE: &str = "asset_bindings.json";
pub const LOCATIONS_TABLE: &str = "named_locations.json";

/// An in-memory repository loaded once and read-only afterwards.
#[derive(Debug, Default)]
pub struct JsonRepository {
    assets: Vec<Asset>,
    bindings: HashMap<String, Vec<AssetBinding>>,
    mac_bindings: HashMap<String, Vec<AssetBinding>>,
    locations: HashMap<String, NamedLocation>,
}

impl JsonRepository {
    pub fn from_records(
        assets: Vec<Asset>,
        bindings: Vec<AssetBinding>,
        locations: Vec<NamedLocation>,
    ) -> Self {
        let mut by_asset: HashMap<String, Vec<AssetBinding>> = HashMap::new();
        let mut by_mac: HashMap<String, Vec<AssetBinding>> = HashMap::new();
        for binding in bindings {
            if let Some(mac) = binding.mac_address.as_deref().filter(|m| !m.is_empty()) {
                by_mac.entry(mac.to_string()).or_default().push(binding.clone());
            }
            if !binding.asset_uid.is_empty() {
                by_asset
                    .entry(binding.asset_uid.clone())
                    .or_default()
                    .push(binding);
            }
        }
        for history in by_asset.values_mut().chain(by_mac.values_mut()) {
            history.sort_by_key(|b| b.install_date);
        }

        Self {
            assets,
            bindings: by_asset,
            mac_bindings: by_mac,
            locations: locations
                .into_iter()
                .map(|loc| (loc.name.clone(), loc))
                .collect(),
        }
    }

    /// Load the three table exports from `dir`.
    pub async fn load(dir: &Path) -> Result<Self, RepositoryError> {
        let assets: Vec<Asset> = read_table(&dir.join(ASSETS_TABLE)).await?;
        let bindings: Vec<AssetBinding> = read_table(&dir.join(BINDINGS_TABLE)).await?;
        let locations: Vec<NamedLocation> = read_table(&dir.join(LOCATIONS_TABLE)).await?;

        debug!(
            dir = %dir.display(),
            assets = assets.len(),
            bindings = bindings.len(),
            locations = locations.len(),
            "Loaded repository tables"
        );
        Ok(Self::from_records(assets, bindings, locations))
    }

    pub fn into_ref(self) -> RepositoryRef {
        Arc::new(self)
    }
}

async fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, RepositoryError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .context(ReadTableSnafu { path })?;
    serde_json::from_str(&text).context(ParseTableSnafu { path })
}

#[async_trait]
impl Repository for JsonRepository {
    async fn assets(&self, source_type: &str) -> Result<Vec<Asset>, RepositoryError> {
        Ok(self
            .assets
            .iter()
            .filter(|a| a.source_type == source_type)
            .cloned()
            .collect())
    }

    async fn asset_history(&self, asset_uid: &str) -> Result<Vec<AssetBinding>, RepositoryError> {
        Ok(self.bindings.get(asset_uid).cloned().unwrap_or_default())
    }

    async fn mac_history(
        &self,
        mac_address: &str,
    ) -> Result<Vec<AssetBinding>, RepositoryError> {
        Ok(self.mac_bindings.get(mac_address).cloned().unwrap_or_default())
    }

    async fn named_location(&self, name: &str) -> Result<Option<NamedLocation>, RepositoryError> {
        Ok(self.locations.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_tables() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(ASSETS_TABLE),
            r#"[{"asset_uid": "1", "source_type": "prt"}, {"asset_uid": "2", "source_type": "dualfan"}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(BINDINGS_TABLE),
            r#"[
                {"asset_uid": "1", "install_date": "2020-02-01T00:00:00Z", "named_location": "CFGLOC2"},
                {"asset_uid": "1", "install_date": "2020-01-01T00:00:00Z", "remove_date": "2020-02-01T00:00:00Z", "named_location": "CFGLOC1"}
            ]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(LOCATIONS_TABLE),
            r#"[{"name": "CFGLOC1", "site": "CPER"}]"#,
        )
        .unwrap();

        let repo = JsonRepository::load(dir.path()).await.unwrap();
        let assets = repo.assets("prt").await.unwrap();
        assert_eq!(assets.len(), 1);

        let history = repo.asset_history("1").await.unwrap();
        assert_eq!(history[0].named_location, "CFGLOC1");
        assert_eq!(history[1].remove_date, None);
        assert!(repo.asset_history("2").await.unwrap().is_empty());

        let loc = repo.named_location("CFGLOC1").await.unwrap().unwrap();
        assert_eq!(loc.site, "CPER");
        assert!(repo.named_location("CFGLOC9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bindings_by_uid_and_mac() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(ASSETS_TABLE),
            r#"[
                {"asset_uid": "7", "source_type": "li191r", "mac_address": "00:1a:2b:3c:4d:5e"},
                {"source_type": "li191r", "mac_address": "00:aa:bb:cc:dd:ee"}
            ]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(BINDINGS_TABLE),
            r#"[
                {"mac_address": "00:1a:2b:3c:4d:5e", "install_date": "2020-02-01T00:00:00Z", "named_location": "CFGLOC2"},
                {"asset_uid": "7", "install_date": "2020-01-01T00:00:00Z", "remove_date": "2020-02-01T00:00:00Z", "named_location": "CFGLOC1"},
                {"mac_address": "00:aa:bb:cc:dd:ee", "install_date": "2020-01-01T00:00:00Z", "named_location": "CFGLOC3"}
            ]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join(LOCATIONS_TABLE), "[]").unwrap();

        let repo = JsonRepository::load(dir.path()).await.unwrap();
        assert_eq!(repo.mac_history("00:1a:2b:3c:4d:5e").await.unwrap().len(), 1);
        assert!(repo.mac_history("ff:ff:ff:ff:ff:ff").await.unwrap().is_empty());

        let assets = repo.assets("li191r").await.unwrap();
        let both = repo.bindings_of(&assets[0]).await.unwrap();
        let names: Vec<_> = both.iter().map(|b| b.named_location.as_str()).collect();
        assert_eq!(names, vec!["CFGLOC1", "CFGLOC2"]);

        let mac_only = repo.bindings_of(&assets[1]).await.unwrap();
        assert_eq!(mac_only.len(), 1);
        assert_eq!(mac_only[0].named_location, "CFGLOC3");
    }

    #[tokio::test]
    async fn test_load_missing_table() {
        let dir = TempDir::new().unwrap();
        let err = JsonRepository::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::ReadTable { .. }));
    }
}
