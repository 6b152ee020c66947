//! Acquisition dates embedded in raster file names, e.g.
//! `openEO_2024-01-03Z.tif`.
use crate::error::{CatalogError, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9]{4}-[0-9]{2}-[0-9]{2}").expect("Regex pattern should always compile")
});

/// Returns the leftmost `YYYY-MM-DD` substring of `file_name`, if any.
pub fn extract_date(file_name: &str) -> Option<&str> {
    DATE_PATTERN.find(file_name).map(|m| m.as_str())
}

/// Parses the extracted date as a calendar date. A match such as `2024-13-40`
/// is treated the same as no match at all.
pub fn acquisition_date(file_name: &str) -> Result<NaiveDate> {
    let not_found = || CatalogError::DateNotFound {
        file_name: file_name.to_owned(),
    };
    let date = extract_date(file_name).ok_or_else(not_found)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| not_found())
}

/// Midnight UTC of the acquisition day.
pub fn acquisition_datetime(file_name: &str) -> Result<DateTime<Utc>> {
    let date = acquisition_date(file_name)?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}
