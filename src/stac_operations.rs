//! Serialization of the in-memory catalog as a self-contained STAC catalog on disk.
use crate::collection::{Catalog, CatalogCollection, TemporalExtent};
use crate::error::{CatalogError, Result};
use crate::item::CatalogItem;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs::{self, read_to_string};
use std::path::{Path, PathBuf};

const STAC_VERSION: &str = "1.0.0";
const EO_EXTENSION: &str = "https://stac-extensions.github.io/eo/v1.1.0/schema.json";
const PROJECTION_EXTENSION: &str =
    "https://stac-extensions.github.io/projection/v1.1.0/schema.json";
const CATALOG_FILE: &str = "catalog.json";
const COLLECTION_FILE: &str = "collection.json";
const JSON_MEDIA_TYPE: &str = "application/json";

fn link(rel: &str, href: &str) -> Value {
    json!({ "rel": rel, "href": href, "type": JSON_MEDIA_TYPE })
}

fn timestamp(datetime: &DateTime<Utc>) -> String {
    datetime.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn interval(extent: &TemporalExtent) -> Value {
    json!([[
        extent.start.as_ref().map(timestamp),
        extent.end.as_ref().map(timestamp)
    ]])
}

fn item_href(item: &CatalogItem) -> String {
    format!("./{0}/{0}.json", item.id)
}

pub fn item_to_stac(item: &CatalogItem, collection_id: &str) -> Result<stac::Item> {
    let mut extensions = vec![EO_EXTENSION];
    let mut properties = json!({
        "datetime": timestamp(&item.datetime),
        "gsd": item.gsd,
        "platform": item.platform,
        "instruments": item.instruments,
    });
    if let Some(epsg) = item.epsg {
        extensions.push(PROJECTION_EXTENSION);
        properties["proj:epsg"] = json!(epsg);
    }

    let assets: serde_json::Map<String, Value> = item
        .assets
        .iter()
        .map(|(key, asset)| {
            let value = json!({
                "href": asset.href,
                "type": asset.media_type,
                "title": asset.title,
                "roles": asset.roles,
                "eo:bands": asset.bands,
            });
            (key.clone(), value)
        })
        .collect();

    let value = json!({
        "type": "Feature",
        "stac_version": STAC_VERSION,
        "stac_extensions": extensions,
        "id": item.id,
        "geometry": item.footprint.to_geojson(),
        "bbox": item.bbox.to_array(),
        "properties": properties,
        "links": [
            link("root", "../../catalog.json"),
            link("parent", "../collection.json"),
            link("collection", "../collection.json"),
        ],
        "assets": assets,
        "collection": collection_id,
    });
    Ok(serde_json::from_value(value)?)
}

pub fn collection_to_stac(collection: &CatalogCollection) -> Result<stac::Collection> {
    let mut links = vec![
        link("root", "../catalog.json"),
        link("parent", "../catalog.json"),
    ];
    links.extend(
        collection
            .items
            .iter()
            .map(|item| link("item", &item_href(item))),
    );

    let value = json!({
        "type": "Collection",
        "stac_version": STAC_VERSION,
        "id": collection.id,
        "description": collection.description,
        "license": collection.license,
        "extent": {
            "spatial": { "bbox": [collection.spatial_extent.to_array()] },
            "temporal": { "interval": interval(&collection.temporal_extent) },
        },
        "links": links,
    });
    Ok(serde_json::from_value(value)?)
}

pub fn catalog_to_stac(catalog: &Catalog) -> Result<stac::Catalog> {
    let mut links = vec![link("root", "./catalog.json")];
    links.extend(catalog.collections.iter().map(|collection| {
        link(
            "child",
            &format!("./{}/{}", collection.id, COLLECTION_FILE),
        )
    }));

    let value = json!({
        "type": "Catalog",
        "stac_version": STAC_VERSION,
        "id": catalog.id,
        "description": catalog.description,
        "links": links,
    });
    Ok(serde_json::from_value(value)?)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)?;
    debug!("Wrote {:?}", path);
    Ok(())
}

/// Writes `catalog` below `output_dir` and returns the path of the root `catalog.json`.
///
/// Layout: `catalog.json`, `<collection>/collection.json` and
/// `<collection>/<item>/<item>.json`, linked with relative hrefs. Item ids
/// must be unique within their collection.
pub fn write_catalog(catalog: &Catalog, output_dir: &Path) -> Result<PathBuf> {
    for collection in catalog.collections.iter() {
        let collection_dir = output_dir.join(&collection.id);
        let mut ids = HashSet::new();
        for item in collection.items.iter() {
            let path = collection_dir
                .join(&item.id)
                .join(format!("{}.json", item.id));
            if !ids.insert(item.id.as_str()) {
                return Err(CatalogError::DuplicateItem {
                    id: item.id.clone(),
                    path,
                });
            }
            write_json(&path, &item_to_stac(item, &collection.id)?)?;
        }
        write_json(
            &collection_dir.join(COLLECTION_FILE),
            &collection_to_stac(collection)?,
        )?;
        info!(
            "Wrote collection {} with {} items",
            collection.id,
            collection.items.len()
        );
    }

    let catalog_path = output_dir.join(CATALOG_FILE);
    write_json(&catalog_path, &catalog_to_stac(catalog)?)?;
    Ok(catalog_path)
}

pub fn read_item_from_file(path: &Path) -> Result<stac::Item> {
    let content = read_to_string(path)?;
    let item: stac::Item = serde_json::from_str(&content)?;
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::build_collection;
    use crate::collection::fixtures::{item, metadata};
    use crate::footprint::fixtures::{bolzano, write_geotiff};
    use crate::footprint::BoundingBox;
    use crate::item::{ItemBuilder, MissingDate, IMAGE_ASSET_KEY};

    fn sample_catalog() -> Catalog {
        let items = vec![
            item("Bolzano-2024-01-03", "2024-01-03"),
            item("Bolzano-2024-01-01", "2024-01-01"),
        ];
        let collection = build_collection(
            metadata(),
            items,
            BoundingBox::new(11.3, 46.4, 11.5, 46.5),
            None,
        );
        let mut catalog = Catalog::new("sentinel_data", "Sentinel Data Catalog");
        catalog.add_collection(collection);
        catalog
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_item_to_stac() {
        let item = item("Bolzano-2024-01-03", "2024-01-03");
        let stac_item = item_to_stac(&item, "Sentinel-2-Bolzano").unwrap();
        assert_eq!(stac_item.id, "Bolzano-2024-01-03");

        let value = serde_json::to_value(&stac_item).unwrap();
        assert_eq!(value["bbox"], json!([11.3, 46.4, 11.5, 46.5]));
        assert_eq!(value["properties"]["datetime"], "2024-01-03T00:00:00Z");
        assert_eq!(value["properties"]["platform"], "Sentinel-2");
        assert_eq!(value["properties"]["gsd"], 10.0);
        assert_eq!(value["properties"]["proj:epsg"], 4326);
        assert_eq!(value["geometry"]["coordinates"][0][1], json!([11.3, 46.5]));

        let bands = &value["assets"][IMAGE_ASSET_KEY]["eo:bands"];
        assert_eq!(bands[0]["common_name"], "red");
        assert_eq!(bands[1]["full_width_half_max"], 0.145);
    }

    #[test]
    fn test_collection_extent() {
        let catalog = sample_catalog();
        let collection = collection_to_stac(&catalog.collections[0]).unwrap();
        let value = serde_json::to_value(&collection).unwrap();
        assert_eq!(
            value["extent"]["temporal"]["interval"],
            json!([["2024-01-01T00:00:00Z", "2024-01-03T00:00:00Z"]])
        );
        assert_eq!(
            value["extent"]["spatial"]["bbox"],
            json!([[11.3, 46.4, 11.5, 46.5]])
        );
        assert_eq!(value["license"], "proprietary");
    }

    #[test]
    fn test_open_interval() {
        let collection = build_collection(
            metadata(),
            vec![],
            BoundingBox::new(11.3, 46.4, 11.5, 46.5),
            None,
        );
        let value = serde_json::to_value(collection_to_stac(&collection).unwrap()).unwrap();
        assert_eq!(value["extent"]["temporal"]["interval"], json!([[null, null]]));
    }

    #[test]
    fn test_write_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let catalog_path = write_catalog(&sample_catalog(), dir.path()).unwrap();
        assert_eq!(catalog_path, dir.path().join("catalog.json"));

        let root = read_json(&catalog_path);
        assert_eq!(root["type"], "Catalog");
        let child = root["links"]
            .as_array()
            .unwrap()
            .iter()
            .find(|l| l["rel"] == "child")
            .unwrap();
        assert_eq!(child["href"], "./Sentinel-2-Bolzano/collection.json");

        let collection = read_json(&dir.path().join("Sentinel-2-Bolzano/collection.json"));
        let item_links: Vec<_> = collection["links"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|l| l["rel"] == "item")
            .map(|l| l["href"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            item_links,
            vec![
                "./Bolzano-2024-01-01/Bolzano-2024-01-01.json",
                "./Bolzano-2024-01-03/Bolzano-2024-01-03.json"
            ]
        );

        let item = read_item_from_file(
            &dir.path()
                .join("Sentinel-2-Bolzano/Bolzano-2024-01-01/Bolzano-2024-01-01.json"),
        )
        .unwrap();
        assert_eq!(item.id, "Bolzano-2024-01-01");
    }

    #[test]
    fn test_write_catalog_rejects_duplicate_item_ids() {
        let collection = build_collection(
            metadata(),
            vec![
                item("Bolzano-2024-01-03", "2024-01-03"),
                item("Bolzano-2024-01-03", "2024-01-03"),
            ],
            BoundingBox::new(11.3, 46.4, 11.5, 46.5),
            None,
        );
        let mut catalog = Catalog::new("sentinel_data", "Sentinel Data Catalog");
        catalog.add_collection(collection);

        let dir = tempfile::tempdir().unwrap();
        let err = write_catalog(&catalog, dir.path()).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateItem { .. }));
        assert!(!dir.path().join("catalog.json").exists());
    }

    #[test]
    fn test_raster_to_item_file() {
        let dir = tempfile::tempdir().unwrap();
        let raster = dir.path().join("openEO_2024-01-05Z.tif");
        write_geotiff(&raster, 2, 1, Some(&bolzano()));

        let built = ItemBuilder::new("Bolzano", MissingDate::Skip)
            .build(&raster, "openEO_2024-01-05Z.tif")
            .unwrap();
        let collection = build_collection(
            metadata(),
            vec![built.clone()],
            BoundingBox::new(11.3, 46.4, 11.5, 46.5),
            None,
        );
        let mut catalog = Catalog::new("sentinel_data", "Sentinel Data Catalog");
        catalog.add_collection(collection);

        let output = dir.path().join("stac");
        write_catalog(&catalog, &output).unwrap();
        let path = output.join("Sentinel-2-Bolzano/Bolzano-2024-01-05/Bolzano-2024-01-05.json");

        let item = read_item_from_file(&path).unwrap();
        assert_eq!(item.id, built.id);
        assert_eq!(item.assets[IMAGE_ASSET_KEY].href, raster.to_string_lossy());

        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["bbox"], json!(built.bbox.to_array()));
    }

    #[test]
    fn test_read_missing_item() {
        assert!(read_item_from_file(Path::new("/nonexistent/item.json")).is_err());
    }
}
