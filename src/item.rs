//! Catalog items built from NDVI rasters, and the directory scan that collects them.
use crate::acquisition_date;
use crate::error::{CatalogError, Result};
use crate::footprint::{self, BoundingBox, Footprint};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const IMAGE_ASSET_KEY: &str = "image";
pub const GEOTIFF_MEDIA_TYPE: &str = "image/tiff; application=geotiff";
pub const GROUND_SAMPLE_DISTANCE: f64 = 10.0;
pub const PLATFORM: &str = "Sentinel-2";
pub const INSTRUMENTS: [&str; 1] = ["MSI"];

const RASTER_EXTENSIONS: [&str; 2] = ["tif", "tiff"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub common_name: String,
    /// Micrometres
    pub center_wavelength: f64,
    /// Micrometres
    pub full_width_half_max: f64,
}

impl Band {
    fn new(name: &str, common_name: &str, center: f64, fwhm: f64) -> Self {
        Self {
            name: name.to_string(),
            common_name: common_name.to_string(),
            center_wavelength: center,
            full_width_half_max: fwhm,
        }
    }

    /// Sentinel-2 MSI bands B04 and B08, the inputs of the NDVI computation.
    pub fn ndvi_inputs() -> Vec<Band> {
        vec![
            Band::new("B04", "red", 0.665, 0.038),
            Band::new("B08", "nir", 0.842, 0.145),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub href: String,
    pub media_type: String,
    pub title: String,
    pub roles: Vec<String>,
    pub bands: Vec<Band>,
}

impl Asset {
    pub fn ndvi_geotiff(path: &Path) -> Self {
        Self {
            href: path.to_string_lossy().into_owned(),
            media_type: GEOTIFF_MEDIA_TYPE.to_string(),
            title: "NDVI".to_string(),
            roles: vec!["data".to_string()],
            bands: Band::ndvi_inputs(),
        }
    }
}

/// One acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub id: String,
    pub bbox: BoundingBox,
    pub footprint: Footprint,
    pub datetime: DateTime<Utc>,
    pub gsd: f64,
    pub platform: String,
    pub instruments: Vec<String>,
    pub epsg: Option<u16>,
    pub assets: BTreeMap<String, Asset>,
}

/// What to do with rasters whose file name carries no acquisition date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingDate {
    /// Refuse to build the item.
    #[default]
    Skip,
    /// Identify the item by its file stem and date it by file modification time.
    FileStem,
}

pub struct ItemBuilder {
    prefix: String,
    missing_date: MissingDate,
}

impl ItemBuilder {
    pub fn new(prefix: &str, missing_date: MissingDate) -> Self {
        Self {
            prefix: prefix.to_string(),
            missing_date,
        }
    }

    /// Builds the item for the raster at `path`, named `file_name` within its directory.
    pub fn build(&self, path: &Path, file_name: &str) -> Result<CatalogItem> {
        let (suffix, datetime) = match acquisition_date::acquisition_datetime(file_name) {
            Ok(datetime) => (datetime.format("%Y-%m-%d").to_string(), datetime),
            Err(e @ CatalogError::DateNotFound { .. }) => match self.missing_date {
                MissingDate::Skip => return Err(e),
                MissingDate::FileStem => (file_stem(file_name), modified_time(path)?),
            },
            Err(e) => return Err(e),
        };

        let georef = footprint::read_georef(path)?;

        let mut assets = BTreeMap::new();
        assets.insert(IMAGE_ASSET_KEY.to_string(), Asset::ndvi_geotiff(path));

        Ok(CatalogItem {
            id: format!("{}-{}", self.prefix, suffix),
            bbox: georef.bbox,
            footprint: georef.footprint(),
            datetime,
            gsd: GROUND_SAMPLE_DISTANCE,
            platform: PLATFORM.to_string(),
            instruments: INSTRUMENTS.iter().map(|s| s.to_string()).collect(),
            epsg: georef.epsg,
            assets,
        })
    }
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

fn modified_time(path: &Path) -> Result<DateTime<Utc>> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| CatalogError::raster_read(path, e))?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Items accumulated during a scan. A failed build never touches the set.
#[derive(Debug, Clone, Default)]
pub struct ItemSet {
    items: Vec<CatalogItem>,
}

impl ItemSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    /// Adds `item` unless its id is already taken.
    pub fn push(&mut self, item: CatalogItem, path: &Path) -> Result<&CatalogItem> {
        if self.contains(&item.id) {
            return Err(CatalogError::DuplicateItem {
                id: item.id,
                path: path.to_path_buf(),
            });
        }
        self.items.push(item);
        Ok(&self.items[self.items.len() - 1])
    }

    pub fn add_raster(&mut self, builder: &ItemBuilder, path: &Path) -> Result<&CatalogItem> {
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| CatalogError::raster_read(path, "path has no file name"))?;
        let item = builder.build(path, &file_name)?;
        debug!("Built item {} from {:?}", item.id, path);
        self.push(item, path)
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<CatalogItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// How a directory scan reacts to rasters that cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnReadError {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub added: usize,
    pub skipped_no_date: Vec<PathBuf>,
    pub skipped_unreadable: Vec<PathBuf>,
    pub skipped_duplicate: Vec<PathBuf>,
}

/// Lists the GeoTIFF files directly inside `dir`, sorted by file name.
pub fn list_rasters(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut rasters = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && is_raster(&path) {
            rasters.push(path);
        }
    }
    rasters.sort();
    Ok(rasters)
}

fn is_raster(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            RASTER_EXTENSIONS
                .iter()
                .any(|r| ext.eq_ignore_ascii_case(r))
        })
        .unwrap_or(false)
}

/// Adds an item to `items` for every raster in `dir`. Files without a date, and
/// files whose item id is already taken by an earlier file, are skipped. With [`OnReadError::Abort`] the first unreadable raster ends the
/// scan with its error; items added before it stay in `items`.
pub fn scan_directory(
    dir: &Path,
    builder: &ItemBuilder,
    on_read_error: OnReadError,
    items: &mut ItemSet,
) -> Result<ScanReport> {
    let mut report = ScanReport::default();

    for path in list_rasters(dir)? {
        match items.add_raster(builder, &path) {
            Ok(item) => {
                info!("Added item {}", item.id);
                report.added += 1;
            }
            Err(CatalogError::DateNotFound { file_name }) => {
                warn!("Skipping {}: no acquisition date in file name", file_name);
                report.skipped_no_date.push(path);
            }
            Err(CatalogError::DuplicateItem { id, .. }) => {
                warn!("Skipping {:?}: item {} already exists", path, id);
                report.skipped_duplicate.push(path);
            }
            Err(e @ CatalogError::RasterRead { .. }) if on_read_error == OnReadError::Skip => {
                warn!("Skipping unreadable raster: {}", e);
                report.skipped_unreadable.push(path);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}
