//! Ordering of the status list.

use std::cmp::Ordering;
use std::str::FromStr;

use super::status::CountryStatus;

/// Column a sort command may order by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Continent,
    CountryName,
    CountryCode,
    CityCount,
    MemUsage,
    StartupTime,
}

impl FromStr for SortColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "continent" => Ok(SortColumn::Continent),
            "country_name" => Ok(SortColumn::CountryName),
            "country_code" => Ok(SortColumn::CountryCode),
            "city_count" => Ok(SortColumn::CityCount),
            "mem_usage" => Ok(SortColumn::MemUsage),
            "startup_time" => Ok(SortColumn::StartupTime),
            other => Err(format!("unknown sort column {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Anything but "ascending" sorts descending.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("ascending") {
            SortDirection::Ascending
        } else {
            SortDirection::Descending
        }
    }
}

/// Reorder the status list. Descending swaps the comparator arguments.
pub fn sort(list: &mut [CountryStatus], direction: SortDirection, column: SortColumn) {
    list.sort_by(|a, b| match direction {
        SortDirection::Ascending => compare(a, b, column),
        SortDirection::Descending => compare(b, a, column),
    });
}

/// Default presentation order at boot: continent descending, country name
/// ascending within a continent.
pub(crate) fn initial_order(list: &mut [CountryStatus]) {
    list.sort_by(|a, b| {
        b.continent
            .cmp(&a.continent)
            .then_with(|| a.country_name.cmp(&b.country_name))
    });
}

fn compare(a: &CountryStatus, b: &CountryStatus, column: SortColumn) -> Ordering {
    match column {
        SortColumn::Continent => a
            .continent
            .cmp(&b.continent)
            .then_with(|| a.country_name.cmp(&b.country_name)),
        SortColumn::CountryName => a.country_name.cmp(&b.country_name),
        SortColumn::CountryCode => a.country_code.cmp(&b.country_code),
        SortColumn::CityCount => cmp_absent_last(a.city_count, b.city_count),
        SortColumn::MemUsage => cmp_absent_last(a.mem_usage, b.mem_usage),
        SortColumn::StartupTime => cmp_absent_last(a.startup_time, b.startup_time),
    }
}

/// Absent values order after any present value.
fn cmp_absent_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(&y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;

    fn status(code: &str, name: &str, continent: &str) -> CountryStatus {
        CountryStatus::initial(&CatalogEntry {
            code: code.into(),
            name: name.into(),
            continent: continent.into(),
        })
    }

    fn europe_trio() -> Vec<CountryStatus> {
        vec![
            status("GB", "United Kingdom", "Europe"),
            status("FR", "France", "Europe"),
            status("DE", "Germany", "Europe"),
        ]
    }

    fn codes(list: &[CountryStatus]) -> Vec<&str> {
        list.iter().map(|s| s.country_code.as_str()).collect()
    }

    #[test]
    fn test_sort_by_name_both_directions() {
        let mut list = europe_trio();
        sort(&mut list, SortDirection::Ascending, SortColumn::CountryName);
        assert_eq!(codes(&list), vec!["DE", "FR", "GB"]);

        sort(&mut list, SortDirection::Descending, SortColumn::CountryName);
        assert_eq!(codes(&list), vec!["GB", "FR", "DE"]);
    }

    #[test]
    fn test_absent_values_sort_last_ascending_first_descending() {
        let mut list = europe_trio();
        list[0].mem_usage = Some(100); // GB
        list[2].mem_usage = Some(50); // DE

        sort(&mut list, SortDirection::Ascending, SortColumn::MemUsage);
        assert_eq!(codes(&list), vec!["DE", "GB", "FR"]);

        sort(&mut list, SortDirection::Descending, SortColumn::MemUsage);
        assert_eq!(codes(&list), vec!["FR", "GB", "DE"]);
    }

    #[test]
    fn test_continent_falls_through_to_name() {
        let mut list = vec![
            status("JP", "Japan", "Asia"),
            status("FR", "France", "Europe"),
            status("DE", "Germany", "Europe"),
        ];
        sort(&mut list, SortDirection::Ascending, SortColumn::Continent);
        assert_eq!(codes(&list), vec!["JP", "FR", "DE"]);
    }

    #[test]
    fn test_initial_order_is_continent_descending_name_ascending() {
        let mut list = vec![
            status("DE", "Germany", "Europe"),
            status("JP", "Japan", "Asia"),
            status("FR", "France", "Europe"),
        ];
        initial_order(&mut list);
        assert_eq!(codes(&list), vec!["FR", "DE", "JP"]);
    }

    #[test]
    fn test_direction_parse_defaults_to_descending() {
        assert_eq!(SortDirection::parse("ascending"), SortDirection::Ascending);
        assert_eq!(SortDirection::parse("descending"), SortDirection::Descending);
        assert_eq!(SortDirection::parse("sideways"), SortDirection::Descending);
    }
}
