//! FCP cache file: the on-disk materialization of a country's index.
//!
//! Layout: a header line carrying the upstream validator token (`-` when the
//! upstream sent none) and the RFC 3339 fetch timestamp, then one
//! tab-separated city per line. Written atomically via a scratch file and a
//! rename, so readers never observe a half-written cache.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use crate::models::City;

use super::error::ServerError;

const NO_ETAG: &str = "-";

/// Header of an FCP cache file.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CacheMeta {
    pub etag: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// One country's FCP cache file.
#[derive(Debug, Clone)]
pub(crate) struct FcpCache {
    path: PathBuf,
}

impl FcpCache {
    pub fn new(data_dir: &Path, code: &str) -> Self {
        Self {
            path: data_dir.join(format!("{code}.fcp")),
        }
    }

    /// Read the header only. `None` when no cache file exists.
    pub fn read_meta(&self) -> Result<Option<CacheMeta>, ServerError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file = File::open(&self.path).map_err(|e| self.corrupt(&e))?;
        let mut header = String::new();
        BufReader::new(file)
            .read_line(&mut header)
            .map_err(|e| self.corrupt(&e))?;

        let (etag, fetched_at) = header
            .trim_end()
            .split_once('\t')
            .ok_or_else(|| self.corrupt(&"missing header"))?;
        let fetched_at = DateTime::parse_from_rfc3339(fetched_at)
            .map_err(|e| self.corrupt(&e))?
            .with_timezone(&Utc);

        Ok(Some(CacheMeta {
            etag: (etag != NO_ETAG).then(|| etag.to_string()),
            fetched_at,
        }))
    }

    /// Read the cached city set back.
    pub fn read_cities(&self) -> Result<Vec<City>, ServerError> {
        let file = File::open(&self.path).map_err(|e| self.corrupt(&e))?;
        let mut reader = BufReader::new(file);
        let mut header = String::new();
        reader.read_line(&mut header).map_err(|e| self.corrupt(&e))?;

        let mut rows = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut cities = Vec::new();
        for (i, row) in rows.records().enumerate() {
            let row = row.map_err(|e| self.corrupt(&e))?;
            if row.len() < 11 {
                return Err(self.corrupt(&format!("row {}: expected 11 columns", i + 1)));
            }
            cities.push(City {
                name: row[0].to_string(),
                lat: row[1].parse().map_err(|e| self.corrupt(&e))?,
                lng: row[2].parse().map_err(|e| self.corrupt(&e))?,
                feature_class: row[3].to_string(),
                feature_code: row[4].to_string(),
                country_code: row[5].to_string(),
                admin1_txt: nonempty(&row[6]),
                admin2_txt: nonempty(&row[7]),
                admin3_txt: nonempty(&row[8]),
                admin4_txt: nonempty(&row[9]),
                timezone: row[10].to_string(),
            });
        }
        Ok(cities)
    }

    /// Atomically replace the cache file.
    pub fn write(
        &self,
        etag: Option<&str>,
        fetched_at: DateTime<Utc>,
        cities: &[City],
    ) -> Result<(), ServerError> {
        let mut body = Vec::new();
        writeln!(
            body,
            "{}\t{}",
            etag.unwrap_or(NO_ETAG),
            fetched_at.to_rfc3339()
        )
        .map_err(|e| self.corrupt(&e))?;

        let mut rows = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(&mut body);
        for city in cities {
            let lat = city.lat.to_string();
            let lng = city.lng.to_string();
            rows.write_record([
                city.name.as_str(),
                lat.as_str(),
                lng.as_str(),
                city.feature_class.as_str(),
                city.feature_code.as_str(),
                city.country_code.as_str(),
                city.admin1_txt.as_deref().unwrap_or(""),
                city.admin2_txt.as_deref().unwrap_or(""),
                city.admin3_txt.as_deref().unwrap_or(""),
                city.admin4_txt.as_deref().unwrap_or(""),
                city.timezone.as_str(),
            ])
            .map_err(|e| self.corrupt(&e))?;
        }
        rows.flush().map_err(|e| self.corrupt(&e))?;
        drop(rows);

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut scratch = NamedTempFile::new_in(dir).map_err(|e| self.corrupt(&e))?;
        scratch.write_all(&body).map_err(|e| self.corrupt(&e))?;
        scratch
            .persist(&self.path)
            .map_err(|e| self.corrupt(&e))?;
        Ok(())
    }

    fn corrupt(&self, reason: &dyn std::fmt::Display) -> ServerError {
        ServerError::FcpCountryFile(format!("{}: {}", self.path.display(), reason))
    }
}

fn nonempty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
