//! The command contract of the country manager.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::models::City;

use super::sort::{SortColumn, SortDirection};
use super::status::CountryStatus;

/// Snapshot returned by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub country_manager_trace: bool,
    pub servers: Vec<CountryStatus>,
}

/// Operator errors, reported synchronously without any state change.
/// The display form is the structured reason on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("already_started")]
    AlreadyStarted,
    #[error("country_server_not_found")]
    CountryServerNotFound,
    #[error("server_not_crashed")]
    ServerNotCrashed,
    #[error("no_such_country_server")]
    NoSuchCountryServer,
}

pub type CommandResult = Result<CountryStatus, CommandError>;

/// Commands accepted by the manager. Every variant carries its reply
/// channel; the handler pattern-matches and answers exactly once.
#[derive(Debug)]
pub enum Command {
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    StatusStarted {
        reply: oneshot::Sender<Vec<CountryStatus>>,
    },
    Start {
        code: String,
        reply: oneshot::Sender<CommandResult>,
    },
    StartAll {
        reply: oneshot::Sender<Vec<CountryStatus>>,
    },
    Shutdown {
        code: String,
        reply: oneshot::Sender<CommandResult>,
    },
    ShutdownAll {
        reply: oneshot::Sender<Vec<CountryStatus>>,
    },
    /// Shut everything down, then exit once the fleet has drained.
    Terminate {
        reply: oneshot::Sender<()>,
    },
    Reset {
        code: String,
        reply: oneshot::Sender<CommandResult>,
    },
    ResetAll {
        reply: oneshot::Sender<Vec<CountryStatus>>,
    },
    Trace {
        on: bool,
        reply: oneshot::Sender<bool>,
    },
    TraceCountry {
        code: String,
        on: bool,
        reply: oneshot::Sender<CommandResult>,
    },
    Sort {
        direction: SortDirection,
        column: SortColumn,
        reply: oneshot::Sender<Vec<CountryStatus>>,
    },
    /// Loaded indexes of every started country, for the search handlers.
    Indexes {
        reply: oneshot::Sender<Vec<(String, Arc<Vec<City>>)>>,
    },
}
