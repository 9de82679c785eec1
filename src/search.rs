//! Term matching over loaded country indexes.
//!
//! Runs on snapshots handed out by the manager, so a slow search never
//! blocks the fleet.

use crate::models::City;

/// Minimum accepted search term length.
pub const MIN_TERM_LEN: usize = 3;

/// Matching flags from the search request.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    pub starts_with: bool,
    pub whole_word: bool,
}

/// Match `term` against one loaded index, case-insensitively. With both
/// flags set the term must equal the whole place name.
pub fn match_cities<'a>(cities: &'a [City], term: &str, opts: MatchOptions) -> Vec<&'a City> {
    let needle = term.to_lowercase();
    cities
        .iter()
        .filter(|city| matches(&city.name.to_lowercase(), &needle, opts))
        .collect()
}

fn matches(name: &str, needle: &str, opts: MatchOptions) -> bool {
    match (opts.starts_with, opts.whole_word) {
        (true, true) => name == needle,
        (true, false) => name.starts_with(needle),
        (false, true) => name
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == needle),
        (false, false) => name.contains(needle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn city(name: &str) -> City {
        City {
            name: name.into(),
            lat: 0.0,
            lng: 0.0,
            feature_class: "P".into(),
            feature_code: "PPL".into(),
            country_code: "GB".into(),
            admin1_txt: None,
            admin2_txt: None,
            admin3_txt: None,
            admin4_txt: None,
            timezone: "UTC".into(),
        }
    }

    fn names(found: &[&City]) -> Vec<String> {
        found.iter().map(|c| c.name.clone()).collect()
    }

    #[test]
    fn test_substring_match_is_default() {
        let cities = vec![city("London"), city("East London"), city("Dover")];
        let found = match_cities(&cities, "lond", MatchOptions::default());
        assert_eq!(names(&found), vec!["London", "East London"]);
    }

    #[test]
    fn test_starts_with() {
        let cities = vec![city("London"), city("East London")];
        let opts = MatchOptions {
            starts_with: true,
            whole_word: false,
        };
        assert_eq!(names(&match_cities(&cities, "Lond", opts)), vec!["London"]);
    }

    #[test]
    fn test_whole_word() {
        let cities = vec![city("London"), city("East London"), city("Londonderry")];
        let opts = MatchOptions {
            starts_with: false,
            whole_word: true,
        };
        assert_eq!(
            names(&match_cities(&cities, "london", opts)),
            vec!["London", "East London"]
        );
    }

    #[test]
    fn test_exact_match_with_both_flags() {
        let cities = vec![city("London"), city("East London")];
        let opts = MatchOptions {
            starts_with: true,
            whole_word: true,
        };
        assert_eq!(names(&match_cities(&cities, "LONDON", opts)), vec!["London"]);
    }
}
