use std::fs::File;
use std::path::Path;

use calamine::{open_workbook, Reader, Xlsx};
use log::{error, info, warn};
use serde::Deserialize;

use crate::config::{HarvestConfig, QUERY_PLACEHOLDER};
use crate::error::{HarvestError, Result};

#[derive(Debug, Deserialize, Clone)]
struct RegionRow {
    #[serde(rename = "City", alias = "city", alias = "Region", alias = "region", alias = "Ville", alias = "ville")]
    city: String,
}

/// Renders search URLs for region names.
#[derive(Debug, Clone)]
pub struct RegionSource {
    url_template: String,
}

impl RegionSource {
    pub fn new(url_template: impl Into<String>) -> Result<Self> {
        let url_template = url_template.into();
        if url_template.matches(QUERY_PLACEHOLDER).count() != 1 {
            return Err(HarvestError::Config(format!(
                "url template '{}' must contain {} exactly once",
                url_template, QUERY_PLACEHOLDER
            )));
        }
        Ok(RegionSource { url_template })
    }

    pub fn query_url(&self, region: &str) -> String {
        self.url_template
            .replace(QUERY_PLACEHOLDER, &urlencoding::encode(region.trim()))
    }
}

/// The configured region list: from `regions_file` when set, else inline.
pub fn resolve_regions(config: &HarvestConfig) -> Result<Vec<String>> {
    let regions = match &config.regions_file {
        Some(path) => load_regions(path)?,
        None => config.regions.clone(),
    };
    if regions.is_empty() {
        return Err(HarvestError::Config("region list is empty".into()));
    }
    Ok(regions)
}

/// Reads region names from a CSV or XLSX file with a city/region header.
pub fn load_regions<P: AsRef<Path>>(filename: P) -> Result<Vec<String>> {
    let path_ref = filename.as_ref();
    if !path_ref.exists() {
        error!("Region file {:?} does not exist.", path_ref);
        return Err(HarvestError::Config(format!("region file {:?} not found", path_ref)));
    }

    let is_excel = path_ref
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("xlsx"));

    if is_excel {
        return load_excel(path_ref);
    }
    load_csv(path_ref)
}

fn load_csv(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let mut regions = Vec::new();
    for result in rdr.deserialize::<RegionRow>() {
        match result {
            Ok(row) if !row.city.is_empty() => regions.push(row.city),
            Ok(_) => {}
            Err(e) => warn!("Error parsing region row: {}", e),
        }
    }
    info!("Loaded {} regions from CSV {:?}", regions.len(), path);
    Ok(regions)
}

fn load_excel(path: &Path) -> Result<Vec<String>> {
    let mut excel: Xlsx<_> = open_workbook(path)
        .map_err(|e| HarvestError::Config(format!("could not open workbook {:?}: {}", path, e)))?;

    let mut regions = Vec::new();
    let worksheets = excel.worksheets();
    if let Some((_name, range)) = worksheets.first() {
        let mut city_idx = None;
        for (row_idx, row) in range.rows().enumerate() {
            if row_idx == 0 {
                city_idx = row.iter().position(|cell| {
                    let header = cell.to_string().to_lowercase();
                    header.contains("city") || header.contains("region") || header.contains("ville")
                });
                if city_idx.is_none() {
                    return Err(HarvestError::Config(format!(
                        "workbook {:?} has no City/Region column",
                        path
                    )));
                }
                continue;
            }

            let city = city_idx
                .and_then(|i| row.get(i))
                .map(|c| c.to_string().trim().to_string())
                .unwrap_or_default();
            if !city.is_empty() {
                regions.push(city);
            }
        }
    }

    info!("Loaded {} regions from Excel {:?}", regions.len(), path);
    Ok(regions)
}
