//! City record kept in a country's in-memory index.

use serde::{Deserialize, Serialize};

/// One populated place retained after filtering and the admin join.
///
/// Field names follow the wire shape served by `/search` (camelCase), so a
/// `City` serializes directly as a response element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct City {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    /// Geonames feature class, always `"P"` for retained cities.
    pub feature_class: String,
    /// Geonames feature code, e.g. `"PPLC"` for a capital.
    pub feature_code: String,
    pub country_code: String,
    /// Resolved first-level administrative region name, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin1_txt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin2_txt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin3_txt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin4_txt: Option<String>,
    pub timezone: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let city = City {
            name: "London".into(),
            lat: 51.50853,
            lng: -0.12574,
            feature_class: "P".into(),
            feature_code: "PPLC".into(),
            country_code: "GB".into(),
            admin1_txt: Some("England".into()),
            admin2_txt: None,
            admin3_txt: None,
            admin4_txt: None,
            timezone: "Europe/London".into(),
        };

        let json = serde_json::to_value(&city).unwrap();
        assert_eq!(json["featureClass"], "P");
        assert_eq!(json["countryCode"], "GB");
        assert_eq!(json["admin1Txt"], "England");
        assert!(json.get("admin2Txt").is_none());
    }
}
