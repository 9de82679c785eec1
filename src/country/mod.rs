//! Per-country data servers.
//!
//! Each started country runs as one spawned task that downloads, unpacks,
//! filters and joins the geonames dump for its country, caches the result,
//! and then serves the in-memory index until told to stop. All state flows
//! to the country manager as [`ServerEvent`] messages; the manager talks
//! back over a per-server control channel and a cancellation token.

pub(crate) mod archive;
pub(crate) mod cache;
pub(crate) mod download;
pub mod error;
pub(crate) mod records;
pub(crate) mod server;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::City;

pub use error::{ExitReason, ServerError};
pub(crate) use server::CountryContext;

/// Download retry attempts before giving up on a country.
pub const RETRY_LIMIT: u32 = 3;
/// Fixed backoff between download attempts.
pub const RETRY_WAIT: Duration = Duration::from_millis(5000);
/// Age under which the FCP cache is used without consulting the upstream.
pub const CACHE_STALENESS: Duration = Duration::from_secs(24 * 60 * 60);

/// Share of the progress bar owned by each pipeline stage. The full build
/// path awards exactly 100 points.
pub(crate) const DOWNLOAD_SHARE: u8 = 40;
pub(crate) const UNZIP_SHARE: u8 = 10;
pub(crate) const SCAN_SHARE: u8 = 30;
pub(crate) const JOIN_SHARE: u8 = 20;

/// Tunables for the startup pipeline. Defaults are the production values;
/// tests tighten the waits.
#[derive(Debug, Clone)]
pub struct Settings {
    pub retry_limit: u32,
    pub retry_wait: Duration,
    pub cache_staleness: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry_limit: RETRY_LIMIT,
            retry_wait: RETRY_WAIT,
            cache_staleness: CACHE_STALENESS,
        }
    }
}

/// Spawn-unique identity of one data-server incarnation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ServerId(u64);

impl ServerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Tag refining a country's current phase or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Substatus {
    CheckingForUpdate,
    CountryFileDownload,
    CountryZipFile,
    CountryFile,
    FcpCountryFile,
    Running,
    NoCities,
    CountryFileError,
    FcpCountryFileError,
    CountryZipFileError,
    RetryLimitExceeded,
    #[serde(untagged)]
    Other(String),
}

/// Control messages accepted by a live data server.
#[derive(Debug)]
pub(crate) enum ServerControl {
    Shutdown,
    Trace(bool),
}

/// Notifications from data servers to the manager.
#[derive(Debug)]
pub(crate) enum ServerEvent {
    /// Birth announcement; resets progress and stamps `started_at`.
    Init { id: ServerId, at: DateTime<Utc> },
    /// Phase change with no progress movement.
    Phase { id: ServerId, substatus: Substatus },
    /// Incremental progress within a phase.
    Progress {
        id: ServerId,
        substatus: Substatus,
        delta: u8,
    },
    /// A helper spawned during startup, recorded for diagnostics.
    Child {
        id: ServerId,
        substatus: Substatus,
        child: String,
    },
    /// Pipeline complete; progress jumps to 100.
    PhaseComplete { id: ServerId, substatus: Substatus },
    /// The index is built and the server is now reachable.
    Running {
        id: ServerId,
        cities: Arc<Vec<City>>,
        at: DateTime<Utc>,
    },
    /// Terminal notification, normal or otherwise.
    Exited { id: ServerId, reason: ExitReason },
}

/// The server-side half of the event channel.
#[derive(Debug, Clone)]
pub(crate) struct Reporter {
    id: ServerId,
    tx: mpsc::Sender<ServerEvent>,
}

impl Reporter {
    // Event sends ignore a gone manager: the server is being torn down
    // anyway when that happens.
    pub async fn init(&self, at: DateTime<Utc>) {
        let _ = self.tx.send(ServerEvent::Init { id: self.id, at }).await;
    }

    pub async fn phase(&self, substatus: Substatus) {
        let _ = self
            .tx
            .send(ServerEvent::Phase {
                id: self.id,
                substatus,
            })
            .await;
    }

    pub async fn progress(&self, substatus: Substatus, delta: u8) {
        let _ = self
            .tx
            .send(ServerEvent::Progress {
                id: self.id,
                substatus,
                delta,
            })
            .await;
    }

    pub async fn child(&self, substatus: Substatus, child: String) {
        let _ = self
            .tx
            .send(ServerEvent::Child {
                id: self.id,
                substatus,
                child,
            })
            .await;
    }

    pub async fn phase_complete(&self, substatus: Substatus) {
        let _ = self
            .tx
            .send(ServerEvent::PhaseComplete {
                id: self.id,
                substatus,
            })
            .await;
    }

    pub async fn running(&self, cities: Arc<Vec<City>>, at: DateTime<Utc>) {
        let _ = self
            .tx
            .send(ServerEvent::Running {
                id: self.id,
                cities,
                at,
            })
            .await;
    }
}

/// A live data server as owned by the manager.
#[derive(Debug)]
pub(crate) struct ServerHandle {
    pub id: ServerId,
    pub control: mpsc::Sender<ServerControl>,
    pub cancel: CancellationToken,
    pub join: JoinHandle<()>,
}

impl ServerHandle {
    /// Ask for an orderly stop, falling back to cancellation if the control
    /// channel is unusable.
    pub fn request_shutdown(&self) {
        if self.control.try_send(ServerControl::Shutdown).is_err() {
            self.cancel.cancel();
        }
    }

    /// Forcibly kill the task. Used by reset on lingering incarnations.
    pub fn kill(&self) {
        self.cancel.cancel();
        self.join.abort();
    }
}

/// Spawn a data server for one country. Its terminal event is delivered on
/// `events` even if the task panics.
pub(crate) fn spawn(ctx: CountryContext, events: mpsc::Sender<ServerEvent>) -> ServerHandle {
    let id = ServerId::next();
    let (control_tx, control_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();

    let reporter = Reporter {
        id,
        tx: events.clone(),
    };
    let task_cancel = cancel.clone();
    let join = tokio::spawn(async move {
        let code = ctx.code.clone();
        let reason = match std::panic::AssertUnwindSafe(server::run(
            ctx,
            reporter,
            control_rx,
            task_cancel,
        ))
        .catch_unwind()
        .await
        {
            Ok(reason) => reason,
            Err(_) => ExitReason::Failed(ServerError::Other("data server panicked".into())),
        };
        debug!(country = %code, ?reason, "data server exited");
        let _ = events.send(ServerEvent::Exited { id, reason }).await;
    });

    ServerHandle {
        id,
        control: control_tx,
        cancel,
        join,
    }
}
