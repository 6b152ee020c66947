use crate::collection::{CollectionMetadata, TemporalExtent};
use crate::error::{CatalogError, Result};
use crate::footprint::BoundingBox;
use crate::item::{ItemBuilder, MissingDate};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use toml;

/// Everything needed to request NDVI rasters for an area and time span and to
/// catalog the results.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ImageSelection {
    pub catalog: CatalogSection,
    pub collection: CollectionSection,
    pub extent: Extent,
    pub backend: Backend,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct CatalogSection {
    pub id: String,
    pub description: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct CollectionSection {
    pub id: String,
    pub description: String,
    pub license: String,
    /// Location name that prefixes every item id
    pub item_prefix: String,
    #[serde(default)]
    pub missing_date: MissingDate,
    /// Use the union of item footprints instead of `[extent]` as the collection's spatial extent
    #[serde(default)]
    pub derive_spatial_extent: bool,
    /// Use `[extent]` start and end as the collection's temporal extent instead of the item dates
    #[serde(default)]
    pub fixed_temporal_extent: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Extent {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Backend {
    pub url: String,
    pub collection: String,
    pub red: String,
    pub nir: String,
    pub format: String,
    #[serde(default)]
    pub auth_provider: Option<String>,
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
}

pub fn image_selection_toml() -> toml::Table {
    toml::toml! {
        [catalog]
        id = "sentinel_data"
        description = "Sentinel Data Catalog"

        [collection]
        id = "Sentinel-2-Bolzano"
        description = "Sentinel-2 data for Bolzano"
        license = "proprietary"
        item_prefix = "Bolzano"
        missing_date = "skip"
        derive_spatial_extent = false
        fixed_temporal_extent = false

        [extent]
        west = 11.3
        south = 46.4
        east = 11.5
        north = 46.5
        start = "2024-01-01"
        end = "2024-01-31"

        // Copernicus Data Space Ecosystem openEO federation
        [backend]
        url = "https://openeo.dataspace.copernicus.eu/openeo/1.2/"
        collection = "SENTINEL2_L2A"
        red = "B04"
        nir = "B08"
        format = "GTiff"
        auth_provider = "CDSE"
        poll_interval_secs = 30
        max_wait_secs = 3600
    }
}

impl ImageSelection {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let selection: Self = toml::from_str(&content)?;
        selection.validate()?;
        Ok(selection)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_template(table: &toml::Table) -> Result<Self> {
        let selection: Self = toml::from_str(&table.to_string())?;
        selection.validate()?;
        Ok(selection)
    }

    pub fn validate(&self) -> Result<()> {
        let extent = &self.extent;
        if extent.west > extent.east || extent.south > extent.north {
            return Err(CatalogError::InvalidSelection(format!(
                "extent [{}, {}, {}, {}] is not ordered west <= east, south <= north",
                extent.west, extent.south, extent.east, extent.north
            )));
        }
        if extent.start > extent.end {
            return Err(CatalogError::InvalidSelection(format!(
                "start {} is after end {}",
                extent.start, extent.end
            )));
        }
        if self.backend.poll_interval_secs == 0 {
            return Err(CatalogError::InvalidSelection(
                "poll_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn spatial_extent(&self) -> BoundingBox {
        BoundingBox::new(
            self.extent.west,
            self.extent.south,
            self.extent.east,
            self.extent.north,
        )
    }

    /// Requested time span, from midnight UTC of `start` to midnight UTC of `end`.
    pub fn temporal_extent(&self) -> TemporalExtent {
        let midnight = |date: NaiveDate| date.and_time(NaiveTime::MIN).and_utc();
        TemporalExtent::new(midnight(self.extent.start), midnight(self.extent.end))
    }

    pub fn collection_metadata(&self) -> CollectionMetadata {
        CollectionMetadata {
            id: self.collection.id.clone(),
            description: self.collection.description.clone(),
            license: self.collection.license.clone(),
        }
    }

    pub fn item_builder(&self) -> ItemBuilder {
        ItemBuilder::new(&self.collection.item_prefix, self.collection.missing_date)
    }
}
