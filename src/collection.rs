use crate::error::Result;
use crate::footprint::BoundingBox;
use crate::image_selection::ImageSelection;
use crate::item::{scan_directory, CatalogItem, ItemSet, OnReadError, ScanReport};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::path::Path;

/// Closed time interval; `None` on either side means open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemporalExtent {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TemporalExtent {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMetadata {
    pub id: String,
    pub description: String,
    pub license: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogCollection {
    pub id: String,
    pub description: String,
    pub license: String,
    pub spatial_extent: BoundingBox,
    pub temporal_extent: TemporalExtent,
    pub items: Vec<CatalogItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub id: String,
    pub description: String,
    pub collections: Vec<CatalogCollection>,
}

impl Catalog {
    pub fn new(id: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            collections: vec![],
        }
    }

    /// Appends `collection`. Identifiers are not checked for uniqueness.
    pub fn add_collection(&mut self, collection: CatalogCollection) {
        self.collections.push(collection);
    }
}

/// Returns a copy of `items` in ascending time order. Items sharing a
/// timestamp keep their relative order.
pub fn sort_by_time(items: &[CatalogItem]) -> Vec<CatalogItem> {
    let mut sorted = items.to_vec();
    sorted.sort_by_key(|item| item.datetime);
    sorted
}

/// `[earliest, latest]` item timestamps, open on both sides when there are no items.
pub fn temporal_extent(items: &[CatalogItem]) -> TemporalExtent {
    TemporalExtent {
        start: items.iter().map(|i| i.datetime).min(),
        end: items.iter().map(|i| i.datetime).max(),
    }
}

/// Union of the item bounding boxes.
pub fn spatial_extent(items: &[CatalogItem]) -> Option<BoundingBox> {
    items
        .iter()
        .map(|i| i.bbox)
        .reduce(|acc, bbox| acc.union(&bbox))
}

/// Assembles a collection holding `items` sorted by time. The spatial extent is
/// taken as given. The temporal extent is taken as given when supplied and is
/// otherwise derived from the items.
pub fn build_collection(
    metadata: CollectionMetadata,
    items: Vec<CatalogItem>,
    spatial_extent: BoundingBox,
    temporal: Option<TemporalExtent>,
) -> CatalogCollection {
    let items = sort_by_time(&items);
    let temporal_extent = temporal.unwrap_or_else(|| temporal_extent(&items));

    CatalogCollection {
        id: metadata.id,
        description: metadata.description,
        license: metadata.license,
        spatial_extent,
        temporal_extent,
        items,
    }
}

/// Scans `input_dir` for NDVI rasters and assembles the catalog described by `selection`.
pub fn catalog_from_directory(
    selection: &ImageSelection,
    input_dir: &Path,
    on_read_error: OnReadError,
) -> Result<(Catalog, ScanReport)> {
    let mut items = ItemSet::new();
    let report = scan_directory(input_dir, &selection.item_builder(), on_read_error, &mut items)?;
    if items.is_empty() {
        warn!("No items were built from {:?}", input_dir);
    }

    let spatial = match spatial_extent(items.items()) {
        Some(derived) if selection.collection.derive_spatial_extent => derived,
        _ => selection.spatial_extent(),
    };
    let temporal = selection
        .collection
        .fixed_temporal_extent
        .then(|| selection.temporal_extent());
    let collection = build_collection(
        selection.collection_metadata(),
        items.into_items(),
        spatial,
        temporal,
    );
    info!(
        "Collection {} spans {:?} to {:?}",
        collection.id, collection.temporal_extent.start, collection.temporal_extent.end
    );

    let mut catalog = Catalog::new(&selection.catalog.id, &selection.catalog.description);
    catalog.add_collection(collection);
    Ok((catalog, report))
}
