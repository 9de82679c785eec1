//! The per-country status record owned by the manager.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::CatalogEntry;
use crate::country::Substatus;

/// Lifecycle state of one country's data server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Stopped,
    Starting,
    Started,
    Crashed,
}

/// One country's runtime state, as exposed to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryStatus {
    /// ISO-2 code, uppercase. Never mutates.
    pub country_code: String,
    pub server_name: String,
    pub country_name: String,
    pub continent: String,
    pub status: ServerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub substatus: Option<Substatus>,
    /// 0-100. Reaches 100 exactly when the server is started.
    pub progress: u8,
    /// Helpers spawned during startup, recorded for diagnostics.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Milliseconds from init to running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city_count: Option<usize>,
    /// Process resident bytes sampled when the server came up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_usage: Option<u64>,
    pub trace: bool,
}

impl CountryStatus {
    /// Fresh record for a catalog entry.
    pub fn initial(entry: &CatalogEntry) -> Self {
        Self {
            country_code: entry.code.clone(),
            server_name: format!("country_server_{}", entry.code.to_lowercase()),
            country_name: entry.name.clone(),
            continent: entry.continent.clone(),
            status: ServerStatus::Stopped,
            substatus: None,
            progress: 0,
            children: Vec::new(),
            started_at: None,
            startup_time: None,
            city_count: None,
            mem_usage: None,
            trace: false,
        }
    }

    /// Drop back to the initial shape, keeping identity.
    pub(crate) fn reset_runtime(&mut self) {
        self.status = ServerStatus::Stopped;
        self.substatus = None;
        self.progress = 0;
        self.children.clear();
        self.started_at = None;
        self.startup_time = None;
        self.city_count = None;
        self.mem_usage = None;
        self.trace = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> CatalogEntry {
        CatalogEntry {
            code: "GB".into(),
            name: "United Kingdom".into(),
            continent: "Europe".into(),
        }
    }

    #[test]
    fn test_initial_record() {
        let status = CountryStatus::initial(&entry());
        assert_eq!(status.server_name, "country_server_gb");
        assert_eq!(status.status, ServerStatus::Stopped);
        assert_eq!(status.progress, 0);
        assert_eq!(status.city_count, None);
    }

    #[test]
    fn test_reset_runtime_restores_post_init_shape() {
        let initial = CountryStatus::initial(&entry());
        let mut status = initial.clone();
        status.status = ServerStatus::Started;
        status.progress = 100;
        status.city_count = Some(42);
        status.mem_usage = Some(1 << 20);
        status.trace = true;
        status.children.push("unzip:GB.zip".into());

        status.reset_runtime();
        assert_eq!(status, initial);
    }
}
