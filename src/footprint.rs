//! Spatial bounds of GeoTIFF rasters and the rectangle footprints derived from them.
use crate::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::Decoder;
use tiff::tags::Tag;

// GeoKey IDs
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
const RASTER_PIXEL_IS_POINT: u16 = 2;

/// `[west, south, east, north]` in the raster's native CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            west: self.west.min(other.west),
            south: self.south.min(other.south),
            east: self.east.max(other.east),
            north: self.north.max(other.north),
        }
    }

    pub fn footprint(&self) -> Footprint {
        Footprint {
            corners: [
                [self.west, self.south],
                [self.west, self.north],
                [self.east, self.north],
                [self.east, self.south],
            ],
        }
    }
}

/// Axis-aligned rectangle with corners ordered bottom-left, top-left,
/// top-right, bottom-right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footprint {
    corners: [[f64; 2]; 4],
}

impl Footprint {
    pub fn corners(&self) -> &[[f64; 2]; 4] {
        &self.corners
    }

    /// Closed linear ring: the four corners followed by the first one again.
    pub fn ring(&self) -> Vec<[f64; 2]> {
        let mut ring = self.corners.to_vec();
        ring.push(self.corners[0]);
        ring
    }

    /// GeoJSON Polygon geometry.
    pub fn to_geojson(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [self.ring()],
        })
    }
}

/// Georeferencing read from a raster header.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGeoref {
    pub bbox: BoundingBox,
    pub epsg: Option<u16>,
}

impl RasterGeoref {
    pub fn footprint(&self) -> Footprint {
        self.bbox.footprint()
    }
}

/// Reads the bounds and CRS of the GeoTIFF at `path`. The file is closed
/// before returning, on success and on failure alike.
pub fn read_georef(path: &Path) -> Result<RasterGeoref> {
    let read_error = |reason: String| CatalogError::raster_read(path, reason);

    let file = File::open(path).map_err(|e| read_error(e.to_string()))?;
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(|e| read_error(e.to_string()))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| read_error(e.to_string()))?;

    let transformation = find_f64_tag(&mut decoder, Tag::ModelTransformationTag)
        .map_err(|e| read_error(e.to_string()))?;
    let tiepoint = find_f64_tag(&mut decoder, Tag::ModelTiepointTag)
        .map_err(|e| read_error(e.to_string()))?;
    let pixel_scale = find_f64_tag(&mut decoder, Tag::ModelPixelScaleTag)
        .map_err(|e| read_error(e.to_string()))?;

    let geokeys = decoder
        .find_tag_unsigned_vec::<u16>(Tag::GeoKeyDirectoryTag)
        .map_err(|e| read_error(e.to_string()))?
        .unwrap_or_default();
    let epsg = epsg_from_geokeys(&geokeys);

    // PixelIsPoint rasters anchor their tiepoint on a pixel centre, half a pixel
    // inside the area the image covers.
    let pixel_offset = match geokey_value(&geokeys, GT_RASTER_TYPE_GEO_KEY) {
        Some(RASTER_PIXEL_IS_POINT) => 0.5,
        _ => 0.0,
    };

    let bbox = match (transformation, tiepoint, pixel_scale) {
        (Some(matrix), _, _) => bounds_from_transformation(&matrix, width, height, pixel_offset),
        (None, Some(tiepoint), Some(scale)) => {
            bounds_from_tiepoint(&tiepoint, &scale, width, height, pixel_offset)
        }
        _ => None,
    }
    .ok_or_else(|| read_error("no usable georeferencing tags".to_string()))?;

    Ok(RasterGeoref { bbox, epsg })
}

/// Convenience wrapper returning the `[left, bottom, right, top]` box and footprint.
pub fn bbox_and_footprint(path: &Path) -> Result<(BoundingBox, Footprint)> {
    let georef = read_georef(path)?;
    Ok((georef.bbox, georef.footprint()))
}

fn find_f64_tag(
    decoder: &mut Decoder<BufReader<File>>,
    tag: Tag,
) -> tiff::TiffResult<Option<Vec<f64>>> {
    decoder
        .find_tag(tag)?
        .map(|value| value.into_f64_vec())
        .transpose()
}

fn bounds_from_tiepoint(
    tiepoint: &[f64],
    scale: &[f64],
    width: u32,
    height: u32,
    pixel_offset: f64,
) -> Option<BoundingBox> {
    // ModelTiepoint: [I, J, K, X, Y, Z], ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
    if tiepoint.len() < 6 || scale.len() < 2 {
        return None;
    }
    let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
    let (sx, sy) = (scale[0], scale[1]);

    let left = x - (i + pixel_offset) * sx;
    let top = y + (j + pixel_offset) * sy;
    let right = left + width as f64 * sx;
    let bottom = top - height as f64 * sy;

    Some(BoundingBox::new(
        left.min(right),
        bottom.min(top),
        left.max(right),
        bottom.max(top),
    ))
}

fn bounds_from_transformation(
    matrix: &[f64],
    width: u32,
    height: u32,
    pixel_offset: f64,
) -> Option<BoundingBox> {
    if matrix.len() < 16 {
        return None;
    }
    let transform = |i: f64, j: f64| {
        let (i, j) = (i - pixel_offset, j - pixel_offset);
        (
            matrix[0] * i + matrix[1] * j + matrix[3],
            matrix[4] * i + matrix[5] * j + matrix[7],
        )
    };
    let (w, h) = (width as f64, height as f64);
    let corners = [
        transform(0.0, 0.0),
        transform(w, 0.0),
        transform(0.0, h),
        transform(w, h),
    ];

    let xs = corners.iter().map(|c| c.0);
    let ys = corners.iter().map(|c| c.1);
    Some(BoundingBox::new(
        xs.clone().fold(f64::INFINITY, f64::min),
        ys.clone().fold(f64::INFINITY, f64::min),
        xs.fold(f64::NEG_INFINITY, f64::max),
        ys.fold(f64::NEG_INFINITY, f64::max),
    ))
}

/// Inline SHORT value of `key` in a GeoKey directory.
fn geokey_value(keys: &[u16], key: u16) -> Option<u16> {
    // [KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys,
    //  KeyID1, TIFFTagLocation1, Count1, Value_Offset1, ...]
    let count = *keys.get(3)? as usize;
    keys.get(4..)?
        .chunks_exact(4)
        .take(count)
        // Location 0 means the value is stored inline.
        .find(|entry| entry[0] == key && entry[1] == 0)
        .map(|entry| entry[3])
}

fn epsg_from_geokeys(keys: &[u16]) -> Option<u16> {
    geokey_value(keys, PROJECTED_CS_TYPE_GEO_KEY)
        .or_else(|| geokey_value(keys, GEOGRAPHIC_TYPE_GEO_KEY))
}
