//! Asset-location binding.
//!
//! Two stages read the database boundary for one source type:
//!
//! - [`BindAssets`] writes each asset's location history as
//!   `<OUT>/<source-type>/<asset>/<asset>.json`, where `<asset>` is the asset
//!   uid or, for assets known only by their network interface, the MAC
//!   address.
//! - [`WriteLocations`] writes every location those assets occupied as
//!   `<OUT>/<source-type>/<location>/<location>.json`, the location root
//!   read by the gap filler.

pub mod azimuth;

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use datum_core::{DayWindow, Linker, Settings};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{RecordError, StageError};
use crate::model::asset::check_disjoint;
use crate::model::{
    Asset, Feature, FeatureCollection, LocationProperties, NamedLocation, ResolvedOffsets,
};
use crate::repository::{JsonRepository, LOCATIONS_TABLE, RepositoryRef};
use crate::stage::{Stage, StageContext, StageReport, write_json};

/// Deepest `reference_location` chain rendered into a location file.
pub const MAX_REFERENCE_DEPTH: usize = 8;

/// Properties of one binding in an asset's location history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingProperties {
    pub asset_uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    pub name: String,
    pub site: String,
    #[serde(with = "crate::model::timestamp")]
    pub install_date: DateTime<Utc>,
    #[serde(with = "crate::model::timestamp::option")]
    pub remove_date: Option<DateTime<Utc>>,
    pub context: Vec<String>,
    pub offsets: ResolvedOffsets,
}

/// Inputs shared by both binder stages.
#[derive(Debug, Clone)]
struct BinderInputs {
    repository_path: PathBuf,
    source_type: String,
    out_path: PathBuf,
    window: Option<DayWindow>,
}

impl BinderInputs {
    fn from_settings(settings: &Settings) -> Result<Self, StageError> {
        let window = match (settings.get("START_DATE"), settings.get("END_DATE")) {
            (None, None) => None,
            _ => Some(DayWindow::new(
                settings.date("START_DATE")?,
                settings.date("END_DATE")?,
            )?),
        };
        Ok(Self {
            repository_path: settings.path("REPOSITORY_PATH")?,
            source_type: settings.require("SOURCE_TYPE")?.to_string(),
            out_path: settings.path("OUT_PATH")?,
            window,
        })
    }

    async fn open(&self) -> Result<RepositoryRef, StageError> {
        if !tokio::fs::metadata(&self.repository_path)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return Err(StageError::MissingInput {
                path: self.repository_path.clone(),
            });
        }
        Ok(JsonRepository::load(&self.repository_path).await?.into_ref())
    }

    fn locations_table(&self) -> PathBuf {
        self.repository_path.join(LOCATIONS_TABLE)
    }

    fn in_window(&self, binding: &crate::model::AssetBinding) -> bool {
        self.window.as_ref().is_none_or(|w| binding.overlaps(w))
    }
}

/// Writes per-asset location histories.
#[derive(Debug, Clone)]
pub struct BindAssets {
    inputs: BinderInputs,
}

impl Stage for BindAssets {
    const NAME: &'static str = "bind-assets";

    fn from_settings(settings: &Settings) -> Result<Self, StageError> {
        Ok(Self {
            inputs: BinderInputs::from_settings(settings)?,
        })
    }

    async fn run(self, ctx: StageContext) -> Result<StageReport, StageError> {
        let repo = self.inputs.open().await?;
        let assets = repo.assets(&self.inputs.source_type).await?;
        info!(
            source_type = %self.inputs.source_type,
            assets = assets.len(),
            "Binding assets to locations"
        );

        let mut tasks = ctx.fan_out::<StageReport>("asset");
        for asset in assets {
            let repo = repo.clone();
            let inputs = self.inputs.clone();
            let linker = ctx.linker;
            tasks.spawn(async move { bind_asset(&repo, &inputs, linker, &asset).await });
        }

        let mut report = StageReport::default();
        for partial in tasks.join().await? {
            report.merge(partial);
        }
        Ok(report)
    }
}

async fn bind_asset(
    repo: &RepositoryRef,
    inputs: &BinderInputs,
    linker: Linker,
    asset: &Asset,
) -> Result<StageReport, StageError> {
    let mut report = StageReport::default();
    let Some(asset_key) = asset.key() else {
        debug!(source_type = %asset.source_type, "Asset has neither uid nor MAC address");
        return Ok(report);
    };
    let history: Vec<_> = repo
        .bindings_of(asset)
        .await?
        .into_iter()
        .filter(|b| inputs.in_window(b))
        .collect();

    if history.is_empty() {
        debug!(asset = asset_key, "Asset has no bindings in window");
        return Ok(report);
    }
    if let Err(reason) = check_disjoint(&history) {
        report.skip(linker.stage(), &RecordError::bad_location(inputs.locations_table(), reason));
        return Ok(report);
    }

    let mut features = Vec::with_capacity(history.len());
    for binding in history {
        let Some(location) = repo.named_location(&binding.named_location).await? else {
            let err = RecordError::bad_location(
                inputs.locations_table(),
                format!(
                    "asset {asset_key} is bound to unknown location {}",
                    binding.named_location
                ),
            );
            report.skip(linker.stage(), &err);
            return Ok(report);
        };

        features.push(Feature::new(
            location.geometry.clone(),
            BindingProperties {
                asset_uid: asset.asset_uid.clone(),
                mac_address: asset.mac_address.clone(),
                name: location.name.clone(),
                site: location.site.clone(),
                install_date: binding.install_date,
                remove_date: binding.remove_date,
                context: location.context.clone(),
                offsets: azimuth::resolve(&location.offsets),
            },
        ));
    }

    let path = inputs
        .out_path
        .join(&inputs.source_type)
        .join(asset_key)
        .join(format!("{asset_key}.json"));
    write_json(&linker, &path, &FeatureCollection::new(features)).await?;
    debug!(asset = asset_key, path = %path.display(), "Wrote asset location history");
    report.files_written += 1;
    Ok(report)
}

/// Writes one location file per location occupied by the source type.
#[derive(Debug, Clone)]
pub struct WriteLocations {
    inputs: BinderInputs,
}

impl Stage for WriteLocations {
    const NAME: &'static str = "write-locations";

    fn from_settings(settings: &Settings) -> Result<Self, StageError> {
        Ok(Self {
            inputs: BinderInputs::from_settings(settings)?,
        })
    }

    async fn run(self, ctx: StageContext) -> Result<StageReport, StageError> {
        let repo = self.inputs.open().await?;

        let mut names = BTreeSet::new();
        for asset in repo.assets(&self.inputs.source_type).await? {
            for binding in repo.bindings_of(&asset).await? {
                if self.inputs.in_window(&binding) {
                    names.insert(binding.named_location);
                }
            }
        }
        info!(
            source_type = %self.inputs.source_type,
            locations = names.len(),
            "Writing location files"
        );

        let mut tasks = ctx.fan_out::<StageReport>("location");
        for name in names {
            let repo = repo.clone();
            let inputs = self.inputs.clone();
            let linker = ctx.linker;
            tasks.spawn(async move {
                let mut report = StageReport::default();
                match render_location(&repo, &name, &inputs.locations_table()).await? {
                    Ok(feature) => {
                        let path = inputs
                            .out_path
                            .join(&inputs.source_type)
                            .join(&name)
                            .join(format!("{name}.json"));
                        write_json(&linker, &path, &FeatureCollection::new(vec![feature])).await?;
                        report.files_written += 1;
                    }
                    Err(err) => report.skip(linker.stage(), &err),
                }
                Ok(report)
            });
        }

        let mut report = StageReport::default();
        for partial in tasks.join().await? {
            report.merge(partial);
        }
        Ok(report)
    }
}

/// Render a named location and its reference chain as a nested feature.
///
/// The outer result carries repository failures, the inner one per-location
/// problems: unknown names, cycles and chains deeper than
/// [`MAX_REFERENCE_DEPTH`].
pub async fn render_location(
    repo: &RepositoryRef,
    name: &str,
    table: &Path,
) -> Result<Result<Feature<LocationProperties>, RecordError>, StageError> {
    let mut chain: Vec<NamedLocation> = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(name.to_string());

    while let Some(current) = next.take() {
        if !seen.insert(current.clone()) {
            return Ok(Err(RecordError::bad_location(
                table,
                format!("reference cycle through {current} starting at {name}"),
            )));
        }
        if chain.len() > MAX_REFERENCE_DEPTH {
            return Ok(Err(RecordError::bad_location(
                table,
                format!("reference chain from {name} deeper than {MAX_REFERENCE_DEPTH}"),
            )));
        }
        let Some(location) = repo.named_location(&current).await? else {
            return Ok(Err(RecordError::bad_location(
                table,
                format!("unknown location {current}"),
            )));
        };
        next = location.reference_location.clone();
        chain.push(location);
    }

    let mut rendered: Option<Feature<LocationProperties>> = None;
    while let Some(location) = chain.pop() {
        let reference = rendered.take().map(Box::new);
        rendered = Some(location_feature(location, reference));
    }
    Ok(rendered.ok_or_else(|| RecordError::bad_location(table, format!("unknown location {name}"))))
}

fn location_feature(
    location: NamedLocation,
    reference: Option<Box<Feature<LocationProperties>>>,
) -> Feature<LocationProperties> {
    let data_rate = location.data_rate();
    let offsets = azimuth::resolve(&location.offsets);
    Feature::new(
        location.geometry,
        LocationProperties {
            name: location.name,
            location_type: location.location_type,
            description: location.description,
            site: location.site,
            context: location.context,
            active_periods: location.active_periods,
            data_rate,
            properties: location.properties,
            offsets: Some(offsets),
            reference_location: reference,
        },
    )
}
