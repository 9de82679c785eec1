//! Geonames dump scanning: filter populated places, join administrative names.
//!
//! Dump rows are tab-separated with 19 columns; the ones we read are
//! name (1), lat (4), lng (5), feature class (6), feature code (7),
//! country code (8), admin1..admin4 codes (10..13), population (14) and
//! timezone (17).

use std::collections::HashMap;

use crate::models::City;

use super::error::ServerError;

/// Minimum population for a class-P record to be retained.
pub const POPULATION_MIN: u64 = 500;

/// A dump row kept after the class/population filter.
#[derive(Debug, Clone)]
pub(crate) struct RawRecord {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub feature_class: String,
    pub feature_code: String,
    pub country_code: String,
    pub admin1: String,
    pub admin2: String,
    pub admin3: String,
    pub admin4: String,
    pub timezone: String,
}

/// Scan the dump text, keeping class-A rows and class-P rows with
/// population >= [`POPULATION_MIN`]. Malformed rows fail the whole scan.
pub(crate) fn scan_records(text: &str) -> Result<Vec<RawRecord>, ServerError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(text.as_bytes());

    let mut kept = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let row = row.map_err(|e| bad_row(i, &e))?;
        if row.len() < 18 {
            return Err(bad_row(i, &format!("expected 19 columns, got {}", row.len())));
        }

        let feature_class = &row[6];
        if feature_class != "P" && feature_class != "A" {
            continue;
        }
        let population: u64 = match row[14].trim() {
            "" => 0,
            raw => raw.parse().map_err(|e| bad_row(i, &e))?,
        };
        if feature_class == "P" && population < POPULATION_MIN {
            continue;
        }

        kept.push(RawRecord {
            name: row[1].to_string(),
            lat: row[4].parse().map_err(|e| bad_row(i, &e))?,
            lng: row[5].parse().map_err(|e| bad_row(i, &e))?,
            feature_class: feature_class.to_string(),
            feature_code: row[7].to_string(),
            country_code: row[8].to_string(),
            admin1: row[10].to_string(),
            admin2: row[11].to_string(),
            admin3: row[12].to_string(),
            admin4: row[13].to_string(),
            timezone: row[17].to_string(),
        });
    }
    Ok(kept)
}

fn bad_row(index: usize, reason: &dyn std::fmt::Display) -> ServerError {
    ServerError::CountryFile(format!("row {}: {}", index + 1, reason))
}

/// Join each retained city with its administrative parents.
///
/// Class-A rows name the admin regions; a region is addressed by the chain
/// of admin codes down to its own level, scoped to the country.
pub(crate) fn build_cities(records: &[RawRecord]) -> Vec<City> {
    let mut adm1: HashMap<&str, &str> = HashMap::new();
    let mut adm2: HashMap<(&str, &str), &str> = HashMap::new();
    let mut adm3: HashMap<(&str, &str, &str), &str> = HashMap::new();
    let mut adm4: HashMap<(&str, &str, &str, &str), &str> = HashMap::new();

    for r in records.iter().filter(|r| r.feature_class == "A") {
        match r.feature_code.as_str() {
            "ADM1" => {
                adm1.insert(&r.admin1, &r.name);
            }
            "ADM2" => {
                adm2.insert((&r.admin1, &r.admin2), &r.name);
            }
            "ADM3" => {
                adm3.insert((&r.admin1, &r.admin2, &r.admin3), &r.name);
            }
            "ADM4" => {
                adm4.insert((&r.admin1, &r.admin2, &r.admin3, &r.admin4), &r.name);
            }
            _ => {}
        }
    }

    let lookup = |name: Option<&&str>| name.map(|n| n.to_string());

    records
        .iter()
        .filter(|r| r.feature_class == "P")
        .map(|r| City {
            name: r.name.clone(),
            lat: r.lat,
            lng: r.lng,
            feature_class: r.feature_class.clone(),
            feature_code: r.feature_code.clone(),
            country_code: r.country_code.clone(),
            admin1_txt: lookup(nonempty(&r.admin1).and_then(|a1| adm1.get(a1))),
            admin2_txt: lookup(
                nonempty(&r.admin2).and_then(|a2| adm2.get(&(r.admin1.as_str(), a2))),
            ),
            admin3_txt: lookup(nonempty(&r.admin3).and_then(|a3| {
                adm3.get(&(r.admin1.as_str(), r.admin2.as_str(), a3))
            })),
            admin4_txt: lookup(nonempty(&r.admin4).and_then(|a4| {
                adm4.get(&(r.admin1.as_str(), r.admin2.as_str(), r.admin3.as_str(), a4))
            })),
            timezone: r.timezone.clone(),
        })
        .collect()
}

fn nonempty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
