//! Country catalog, read once at boot from a local geonames `countryInfo.txt`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// One recognized country.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// ISO-2 code, uppercase.
    pub code: String,
    pub name: String,
    pub continent: String,
}

/// Ordered list of recognized countries.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Read and parse a local copy of the geonames `countryInfo.txt`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).with_context(|| {
            format!("failed to read country catalog {}", path.as_ref().display())
        })?;
        Self::parse(&content)
    }

    /// Parse the `countryInfo.txt` format: tab-separated rows, `#` comments.
    pub fn parse(content: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 9 {
                anyhow::bail!("malformed countryInfo row: {:?}", line);
            }
            entries.push(CatalogEntry {
                code: fields[0].to_uppercase(),
                name: fields[4].to_string(),
                continent: continent_name(fields[8]).to_string(),
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Map a geonames continent code to its display name.
fn continent_name(code: &str) -> &str {
    match code {
        "AF" => "Africa",
        "AS" => "Asia",
        "EU" => "Europe",
        "NA" => "North America",
        "OC" => "Oceania",
        "SA" => "South America",
        "AN" => "Antarctica",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# GeoNames countryInfo\n\
#ISO\tISO3\tISO-Numeric\tfips\tCountry\tCapital\tArea\tPopulation\tContinent\n\
GB\tGBR\t826\tUK\tUnited Kingdom\tLondon\t244820\t66488991\tEU\tmore\tfields\n\
FR\tFRA\t250\tFR\tFrance\tParis\t547030\t66987244\tEU\tmore\tfields\n";

    #[test]
    fn test_parse_skips_comments() {
        let catalog = Catalog::parse(SAMPLE).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.entries()[0],
            CatalogEntry {
                code: "GB".into(),
                name: "United Kingdom".into(),
                continent: "Europe".into(),
            }
        );
    }

    #[test]
    fn test_parse_rejects_short_rows() {
        assert!(Catalog::parse("GB\tGBR\tonly three\n").is_err());
    }

    #[test]
    fn test_unknown_continent_code_kept_verbatim() {
        let row = "XX\tXXX\t0\tXX\tNowhere\t\t0\t0\tZZ\n";
        let catalog = Catalog::parse(row).unwrap();
        assert_eq!(catalog.entries()[0].continent, "ZZ");
    }
}
