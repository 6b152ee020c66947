#![allow(async_fn_in_trait)]
pub mod acquisition_date;
pub mod collection;
pub mod download_plan;
pub mod error;
pub mod footprint;
pub mod image_selection;
pub mod item;
pub mod openeo;
pub mod stac_operations;

pub use error::{CatalogError, Result};
