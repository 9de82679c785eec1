//! The country manager: the single long-lived coordinator that owns the
//! fleet of per-country data servers and their status table.
//!
//! The manager is the only writer of the table. Every external actor
//! (admin handlers, search handlers) talks to it through a cloneable
//! [`ManagerHandle`] and gets a snapshot back; data servers report in on a
//! shared event channel. The manager's loop selects across the two, so all
//! fleet mutations are serialized without a lock anywhere.

pub mod command;
pub mod sort;
pub mod status;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::country::download::Downloader;
use crate::country::{
    self, CountryContext, ExitReason, ServerControl, ServerEvent, ServerHandle, ServerId,
    Settings, Substatus,
};
use crate::models::City;

pub use command::{Command, CommandError, CommandResult, StatusSnapshot};
pub use sort::{SortColumn, SortDirection};
pub use status::{CountryStatus, ServerStatus};

/// Client half of the manager: a cloneable sender handed out at boot.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<Command>,
}

impl ManagerHandle {
    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| anyhow!("country manager is gone"))?;
        rx.await.map_err(|_| anyhow!("country manager dropped the request"))
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn status_started(&self) -> Result<Vec<CountryStatus>> {
        self.request(|reply| Command::StatusStarted { reply }).await
    }

    pub async fn start(&self, code: &str) -> Result<CommandResult> {
        let code = code.to_uppercase();
        self.request(|reply| Command::Start { code, reply }).await
    }

    pub async fn start_all(&self) -> Result<Vec<CountryStatus>> {
        self.request(|reply| Command::StartAll { reply }).await
    }

    pub async fn shutdown(&self, code: &str) -> Result<CommandResult> {
        let code = code.to_uppercase();
        self.request(|reply| Command::Shutdown { code, reply }).await
    }

    pub async fn shutdown_all(&self) -> Result<Vec<CountryStatus>> {
        self.request(|reply| Command::ShutdownAll { reply }).await
    }

    pub async fn terminate(&self) -> Result<()> {
        self.request(|reply| Command::Terminate { reply }).await
    }

    pub async fn reset(&self, code: &str) -> Result<CommandResult> {
        let code = code.to_uppercase();
        self.request(|reply| Command::Reset { code, reply }).await
    }

    pub async fn reset_all(&self) -> Result<Vec<CountryStatus>> {
        self.request(|reply| Command::ResetAll { reply }).await
    }

    pub async fn trace(&self, on: bool) -> Result<bool> {
        self.request(|reply| Command::Trace { on, reply }).await
    }

    pub async fn trace_country(&self, code: &str, on: bool) -> Result<CommandResult> {
        let code = code.to_uppercase();
        self.request(|reply| Command::TraceCountry { code, on, reply })
            .await
    }

    pub async fn sort(
        &self,
        direction: SortDirection,
        column: SortColumn,
    ) -> Result<Vec<CountryStatus>> {
        self.request(|reply| Command::Sort {
            direction,
            column,
            reply,
        })
        .await
    }

    pub async fn indexes(&self) -> Result<Vec<(String, Arc<Vec<City>>)>> {
        self.request(|reply| Command::Indexes { reply }).await
    }
}

/// Spawn the manager with one stopped record per catalog entry.
pub fn spawn(
    catalog: Catalog,
    config: Config,
    settings: Settings,
) -> Result<(ManagerHandle, JoinHandle<()>)> {
    let downloader = Arc::new(Downloader::new(&config.upstream)?);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(256);

    let mut initial: Vec<CountryStatus> = catalog
        .entries()
        .iter()
        .map(CountryStatus::initial)
        .collect();
    sort::initial_order(&mut initial);

    let mut entries = HashMap::new();
    let mut order = Vec::new();
    for state in initial {
        if entries.contains_key(&state.country_code) {
            warn!(country = %state.country_code, "duplicate catalog entry ignored");
            continue;
        }
        order.push(state.country_code.clone());
        entries.insert(
            state.country_code.clone(),
            CountryEntry {
                state,
                handle: None,
                index: None,
            },
        );
    }

    let manager = CountryManager {
        entries,
        order,
        draining: HashMap::new(),
        trace: false,
        pending_shutdown: false,
        commands: cmd_rx,
        events: event_rx,
        event_tx,
        downloader,
        data_dir: config.data_dir,
        settings,
    };
    let join = tokio::spawn(manager.run());
    Ok((ManagerHandle { tx: cmd_tx }, join))
}

/// Resident memory of this process, in bytes.
pub fn process_memory() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut sys = sysinfo::System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).map(|p| p.memory())
}

/// One table slot: the operator-visible record plus the live pieces that
/// never leave the manager.
struct CountryEntry {
    state: CountryStatus,
    handle: Option<ServerHandle>,
    index: Option<Arc<Vec<City>>>,
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Exit,
}

struct CountryManager {
    entries: HashMap<String, CountryEntry>,
    /// Presentation order, recomputed on sort.
    order: Vec<String>,
    /// Handles of servers told to stop, kept until their terminal event
    /// confirms the optimistic record update.
    draining: HashMap<ServerId, (String, ServerHandle)>,
    trace: bool,
    pending_shutdown: bool,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Receiver<ServerEvent>,
    event_tx: mpsc::Sender<ServerEvent>,
    downloader: Arc<Downloader>,
    data_dir: PathBuf,
    settings: Settings,
}

impl CountryManager {
    async fn run(mut self) {
        info!(countries = self.entries.len(), "country manager started");
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd) == Flow::Exit {
                            break;
                        }
                    }
                    // Every handle is gone; nothing can talk to us again.
                    None => break,
                },
                Some(event) = self.events.recv() => {
                    self.handle_event(event);
                    if self.pending_shutdown && !self.any_live() {
                        break;
                    }
                }
            }
        }
        info!("country manager exited");
    }

    fn handle_command(&mut self, cmd: Command) -> Flow {
        if self.trace {
            info!(?cmd, "command");
        }
        match cmd {
            Command::Status { reply } => {
                let _ = reply.send(StatusSnapshot {
                    country_manager_trace: self.trace,
                    servers: self.snapshot(),
                });
            }
            Command::StatusStarted { reply } => {
                let started = self
                    .snapshot()
                    .into_iter()
                    .filter(|s| s.status == ServerStatus::Started)
                    .collect();
                let _ = reply.send(started);
            }
            Command::Start { code, reply } => {
                let _ = reply.send(self.start_country(&code));
            }
            Command::StartAll { reply } => {
                for code in self.order.clone() {
                    if self.entries[&code].state.status == ServerStatus::Stopped {
                        let _ = self.start_country(&code);
                    }
                }
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown { code, reply } => {
                let result = self
                    .shutdown_country(&code)
                    .ok_or(CommandError::CountryServerNotFound);
                let _ = reply.send(result);
            }
            Command::ShutdownAll { reply } => {
                self.pending_shutdown = false;
                self.shutdown_fleet();
                let _ = reply.send(self.snapshot());
            }
            Command::Terminate { reply } => {
                info!("terminate requested, draining the fleet");
                self.pending_shutdown = true;
                self.shutdown_fleet();
                let _ = reply.send(());
                if !self.any_live() {
                    return Flow::Exit;
                }
            }
            Command::Reset { code, reply } => {
                let _ = reply.send(self.reset_country(&code));
            }
            Command::ResetAll { reply } => {
                for code in self.order.clone() {
                    if self.entries[&code].state.status == ServerStatus::Crashed {
                        let _ = self.reset_country(&code);
                    }
                }
                let _ = reply.send(self.snapshot());
            }
            Command::Trace { on, reply } => {
                self.trace = on;
                let _ = reply.send(self.trace);
            }
            Command::TraceCountry { code, on, reply } => {
                let _ = reply.send(self.trace_country(&code, on));
            }
            Command::Sort {
                direction,
                column,
                reply,
            } => {
                let mut list = self.snapshot();
                sort::sort(&mut list, direction, column);
                self.order = list.iter().map(|s| s.country_code.clone()).collect();
                let _ = reply.send(list);
            }
            Command::Indexes { reply } => {
                let indexes = self
                    .order
                    .iter()
                    .filter_map(|code| {
                        let entry = self.entries.get(code)?;
                        let index = entry.index.as_ref()?;
                        Some((code.clone(), Arc::clone(index)))
                    })
                    .collect();
                let _ = reply.send(indexes);
            }
        }
        Flow::Continue
    }

    /// Status list in presentation order.
    fn snapshot(&self) -> Vec<CountryStatus> {
        self.order
            .iter()
            .filter_map(|code| self.entries.get(code))
            .map(|entry| entry.state.clone())
            .collect()
    }

    fn any_live(&self) -> bool {
        !self.draining.is_empty() || self.entries.values().any(|e| e.handle.is_some())
    }

    fn start_country(&mut self, code: &str) -> CommandResult {
        let Some(entry) = self.entries.get_mut(code) else {
            return Err(CommandError::CountryServerNotFound);
        };
        if entry.state.status != ServerStatus::Stopped {
            return Err(CommandError::AlreadyStarted);
        }

        let ctx = CountryContext {
            code: entry.state.country_code.clone(),
            data_dir: self.data_dir.clone(),
            downloader: Arc::clone(&self.downloader),
            settings: self.settings.clone(),
        };
        let handle = country::spawn(ctx, self.event_tx.clone());
        debug!(country = %code, id = ?handle.id, "data server spawned");

        entry.state.reset_runtime();
        entry.state.status = ServerStatus::Starting;
        entry.handle = Some(handle);
        Ok(entry.state.clone())
    }

    /// Ask one country to stop. The record flips optimistically; the handle
    /// drains until the terminal event confirms. `None` for unknown codes.
    fn shutdown_country(&mut self, code: &str) -> Option<CountryStatus> {
        let entry = self.entries.get_mut(code)?;
        if let Some(handle) = entry.handle.take() {
            handle.request_shutdown();
            self.draining
                .insert(handle.id, (code.to_string(), handle));
            entry.index = None;
            entry.state.reset_runtime();
        }
        Some(entry.state.clone())
    }

    fn shutdown_fleet(&mut self) {
        for code in self.order.clone() {
            self.shutdown_country(&code);
        }
    }

    /// Reset a crashed country to its initial record, forcibly killing any
    /// lingering incarnation first.
    fn reset_country(&mut self, code: &str) -> CommandResult {
        let Some(entry) = self.entries.get_mut(code) else {
            return Err(CommandError::CountryServerNotFound);
        };
        if entry.state.status != ServerStatus::Crashed {
            return Err(CommandError::ServerNotCrashed);
        }

        if let Some(handle) = entry.handle.take() {
            handle.kill();
        }
        entry.index = None;
        entry.state.reset_runtime();
        let state = entry.state.clone();

        let lingering: Vec<ServerId> = self
            .draining
            .iter()
            .filter(|(_, (c, _))| c == code)
            .map(|(id, _)| *id)
            .collect();
        for id in lingering {
            if let Some((_, handle)) = self.draining.remove(&id) {
                handle.kill();
            }
        }
        Ok(state)
    }

    fn trace_country(&mut self, code: &str, on: bool) -> CommandResult {
        let Some(entry) = self.entries.get_mut(code) else {
            return Err(CommandError::NoSuchCountryServer);
        };
        let Some(handle) = entry.handle.as_ref() else {
            return Err(CommandError::NoSuchCountryServer);
        };
        let _ = handle.control.try_send(ServerControl::Trace(on));
        if entry.state.trace != on {
            entry.state.trace = on;
        }
        Ok(entry.state.clone())
    }

    fn handle_event(&mut self, event: ServerEvent) {
        if self.trace {
            info!(?event, "server event");
        }
        match event {
            ServerEvent::Init { id, at } => {
                if let Some(entry) = self.live_entry_mut(id) {
                    entry.state.progress = 0;
                    entry.state.started_at = Some(at);
                }
            }
            ServerEvent::Phase { id, substatus } => {
                if let Some(entry) = self.live_entry_mut(id) {
                    entry.state.substatus = Some(substatus);
                }
            }
            ServerEvent::Progress {
                id,
                substatus,
                delta,
            } => {
                if let Some(entry) = self.live_entry_mut(id) {
                    entry.state.substatus = Some(substatus);
                    entry.state.progress =
                        entry.state.progress.saturating_add(delta).min(100);
                }
            }
            ServerEvent::Child {
                id,
                substatus,
                child,
            } => {
                if let Some(entry) = self.live_entry_mut(id) {
                    entry.state.substatus = Some(substatus);
                    entry.state.children.push(child);
                }
            }
            ServerEvent::PhaseComplete { id, substatus } => {
                if let Some(entry) = self.live_entry_mut(id) {
                    entry.state.substatus = Some(substatus);
                    entry.state.progress = 100;
                }
            }
            ServerEvent::Running { id, cities, at } => {
                if let Some(entry) = self.live_entry_mut(id) {
                    entry.state.status = ServerStatus::Started;
                    entry.state.substatus = Some(Substatus::Running);
                    entry.state.progress = 100;
                    entry.state.city_count = Some(cities.len());
                    entry.state.startup_time = entry
                        .state
                        .started_at
                        .map(|started| (at - started).num_milliseconds());
                    entry.state.mem_usage = process_memory();
                    entry.index = Some(cities);
                    info!(
                        country = %entry.state.country_code,
                        cities = entry.state.city_count.unwrap_or(0),
                        "country started"
                    );
                }
            }
            ServerEvent::Exited { id, reason } => self.handle_exit(id, reason),
        }
    }

    fn handle_exit(&mut self, id: ServerId, reason: ExitReason) {
        // A draining handle confirms an optimistic stop, unless the server
        // actually went down in flames, which corrects the record.
        if let Some((code, _)) = self.draining.remove(&id) {
            debug!(country = %code, ?reason, "shutdown confirmed");
            if let ExitReason::Failed(err) = reason {
                if let Some(entry) = self.entries.get_mut(&code) {
                    apply_crash(entry, &err);
                }
            }
            return;
        }

        let Some((code, entry)) = self
            .entries
            .iter_mut()
            .find(|(_, e)| e.handle.as_ref().is_some_and(|h| h.id == id))
        else {
            warn!(?id, ?reason, "terminal event from unknown data server");
            return;
        };
        entry.handle = None;
        entry.index = None;
        match reason {
            ExitReason::Stopped => {
                debug!(country = %code, "country stopped");
                entry.state.reset_runtime();
            }
            ExitReason::NoCities => {
                info!(country = %code, "country has no qualifying cities");
                entry.state.reset_runtime();
                entry.state.substatus = Some(Substatus::NoCities);
            }
            ExitReason::Failed(err) => apply_crash(entry, &err),
        }
    }

    fn live_entry_mut(&mut self, id: ServerId) -> Option<&mut CountryEntry> {
        self.entries
            .values_mut()
            .find(|e| e.handle.as_ref().is_some_and(|h| h.id == id))
    }
}

fn apply_crash(entry: &mut CountryEntry, err: &crate::country::ServerError) {
    warn!(country = %entry.state.country_code, error = %err, "country data server crashed");
    entry.handle = None;
    entry.index = None;
    entry.state.status = ServerStatus::Crashed;
    entry.state.substatus = Some(err.substatus());
    entry.state.children.clear();
    entry.state.trace = false;
    entry.state.mem_usage = None;
    entry.state.city_count = None;
    entry.state.startup_time = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::testutil::{dump_row, fake_upstream, zip_archive};
    use std::time::Duration;

    fn catalog() -> Catalog {
        Catalog::from_entries(vec![
            CatalogEntry {
                code: "GB".into(),
                name: "United Kingdom".into(),
                continent: "Europe".into(),
            },
            CatalogEntry {
                code: "FR".into(),
                name: "France".into(),
                continent: "Europe".into(),
            },
        ])
    }

    fn config(base_url: &str, data_dir: &std::path::Path) -> Config {
        Config {
            listen: "127.0.0.1:0".into(),
            data_dir: data_dir.to_path_buf(),
            country_info: data_dir.join("countryInfo.txt"),
            upstream: crate::config::UpstreamConfig {
                base_url: base_url.to_string(),
                proxy: None,
            },
        }
    }

    fn settings() -> Settings {
        Settings {
            retry_wait: Duration::from_millis(5),
            ..Settings::default()
        }
    }

    fn gb_dump() -> String {
        [
            dump_row("England", "52.1", "-1.2", "A", "ADM1", "GB", "ENG", "", "", "", "0", "Europe/London"),
            dump_row("London", "51.5", "-0.12", "P", "PPLC", "GB", "ENG", "", "", "", "7556900", "Europe/London"),
            dump_row("Leeds", "53.79", "-1.54", "P", "PPL", "GB", "ENG", "", "", "", "455123", "Europe/London"),
        ]
        .join("")
    }

    async fn wait_for(
        manager: &ManagerHandle,
        code: &str,
        want: ServerStatus,
    ) -> CountryStatus {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let snap = manager.status().await.unwrap();
                let status = snap
                    .servers
                    .iter()
                    .find(|s| s.country_code == code)
                    .unwrap_or_else(|| panic!("no record for {code}"))
                    .clone();
                if status.status == want {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{code} never reached {want:?}"))
    }

    #[tokio::test]
    async fn test_unknown_country_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _join) =
            spawn(catalog(), config("http://127.0.0.1:9", dir.path()), settings()).unwrap();

        let result = manager.start("XX").await.unwrap();
        assert_eq!(result, Err(CommandError::CountryServerNotFound));
    }

    #[tokio::test]
    async fn test_start_twice_reports_already_started() {
        let upstream = fake_upstream(zip_archive("GB", &gb_dump()), 0).await;
        let dir = tempfile::tempdir().unwrap();
        let (manager, _join) =
            spawn(catalog(), config(&upstream.base_url, dir.path()), settings()).unwrap();

        let first = manager.start("GB").await.unwrap().unwrap();
        assert_eq!(first.status, ServerStatus::Starting);

        let before = manager.status().await.unwrap().servers;
        let second = manager.start("GB").await.unwrap();
        assert_eq!(second, Err(CommandError::AlreadyStarted));
        let after = manager.status().await.unwrap().servers;
        // Progress events may race the two snapshots, but the fleet shape
        // must not change.
        assert_eq!(before.len(), after.len());
        assert_eq!(after.iter().filter(|s| s.status != ServerStatus::Stopped).count(), 1);
    }

    #[tokio::test]
    async fn test_startup_round_trip_restores_initial_record() {
        let upstream = fake_upstream(zip_archive("GB", &gb_dump()), 0).await;
        let dir = tempfile::tempdir().unwrap();
        let (manager, _join) =
            spawn(catalog(), config(&upstream.base_url, dir.path()), settings()).unwrap();

        manager.start("GB").await.unwrap().unwrap();
        let started = wait_for(&manager, "GB", ServerStatus::Started).await;
        assert_eq!(started.progress, 100);
        assert_eq!(started.city_count, Some(2));
        assert_eq!(started.substatus, Some(Substatus::Running));
        assert!(started.startup_time.is_some());
        assert!(started.mem_usage.is_some());

        // The other country is untouched.
        let snap = manager.status().await.unwrap();
        let fr = snap.servers.iter().find(|s| s.country_code == "FR").unwrap();
        assert_eq!(fr.status, ServerStatus::Stopped);
        assert_eq!(fr.progress, 0);

        // Loaded index is reachable for search routing.
        let indexes = manager.indexes().await.unwrap();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].0, "GB");
        assert_eq!(indexes[0].1.len(), 2);

        manager.shutdown("GB").await.unwrap().unwrap();
        let stopped = wait_for(&manager, "GB", ServerStatus::Stopped).await;
        let initial = CountryStatus::initial(&CatalogEntry {
            code: "GB".into(),
            name: "United Kingdom".into(),
            continent: "Europe".into(),
        });
        assert_eq!(stopped, initial);
        assert!(manager.indexes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_started_filters() {
        let upstream = fake_upstream(zip_archive("GB", &gb_dump()), 0).await;
        let dir = tempfile::tempdir().unwrap();
        let (manager, _join) =
            spawn(catalog(), config(&upstream.base_url, dir.path()), settings()).unwrap();

        assert!(manager.status_started().await.unwrap().is_empty());

        manager.start("GB").await.unwrap().unwrap();
        wait_for(&manager, "GB", ServerStatus::Started).await;

        let started = manager.status_started().await.unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].country_code, "GB");
    }

    #[tokio::test]
    async fn test_no_cities_country_stops_normally() {
        let dump = dump_row("Tiny Hamlet", "1", "1", "P", "PPL", "GB", "", "", "", "", "120", "UTC");
        let upstream = fake_upstream(zip_archive("GB", &dump), 0).await;
        let dir = tempfile::tempdir().unwrap();
        let (manager, _join) =
            spawn(catalog(), config(&upstream.base_url, dir.path()), settings()).unwrap();

        manager.start("GB").await.unwrap().unwrap();
        let stopped = wait_for(&manager, "GB", ServerStatus::Stopped).await;
        assert_eq!(stopped.substatus, Some(Substatus::NoCities));
        assert_eq!(stopped.progress, 0);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_crash_reset_start_again() {
        // Exactly three failures: the first incarnation exhausts its retry
        // budget, the post-reset one succeeds immediately.
        let upstream = fake_upstream(zip_archive("GB", &gb_dump()), 3).await;
        let dir = tempfile::tempdir().unwrap();
        let (manager, _join) =
            spawn(catalog(), config(&upstream.base_url, dir.path()), settings()).unwrap();

        manager.start("GB").await.unwrap().unwrap();
        let crashed = wait_for(&manager, "GB", ServerStatus::Crashed).await;
        assert_eq!(crashed.substatus, Some(Substatus::RetryLimitExceeded));
        assert_eq!(crashed.mem_usage, None);
        assert!(crashed.children.is_empty());

        // Start while crashed is refused; reset is required first.
        assert_eq!(
            manager.start("GB").await.unwrap(),
            Err(CommandError::AlreadyStarted)
        );

        let reset = manager.reset("GB").await.unwrap().unwrap();
        assert_eq!(reset.status, ServerStatus::Stopped);
        assert_eq!(reset.substatus, None);

        // A second reset is a no-op refusal; the record stays put.
        assert_eq!(
            manager.reset("GB").await.unwrap(),
            Err(CommandError::ServerNotCrashed)
        );
        let snap = manager.status().await.unwrap();
        let gb = snap.servers.iter().find(|s| s.country_code == "GB").unwrap();
        assert_eq!(gb.status, ServerStatus::Stopped);

        manager.start("GB").await.unwrap().unwrap();
        let started = wait_for(&manager, "GB", ServerStatus::Started).await;
        assert_eq!(started.city_count, Some(2));
    }

    #[tokio::test]
    async fn test_reset_on_stopped_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _join) =
            spawn(catalog(), config("http://127.0.0.1:9", dir.path()), settings()).unwrap();

        assert_eq!(
            manager.reset("GB").await.unwrap(),
            Err(CommandError::ServerNotCrashed)
        );
    }

    #[tokio::test]
    async fn test_sort_command_reorders_the_view() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::from_entries(vec![
            CatalogEntry { code: "GB".into(), name: "United Kingdom".into(), continent: "Europe".into() },
            CatalogEntry { code: "FR".into(), name: "France".into(), continent: "Europe".into() },
            CatalogEntry { code: "DE".into(), name: "Germany".into(), continent: "Europe".into() },
        ]);
        let (manager, _join) =
            spawn(catalog, config("http://127.0.0.1:9", dir.path()), settings()).unwrap();

        let sorted = manager
            .sort(SortDirection::Ascending, SortColumn::CountryName)
            .await
            .unwrap();
        let codes: Vec<&str> = sorted.iter().map(|s| s.country_code.as_str()).collect();
        assert_eq!(codes, vec!["DE", "FR", "GB"]);

        // The new order sticks for subsequent snapshots.
        let snap = manager.status().await.unwrap();
        let codes: Vec<&str> = snap.servers.iter().map(|s| s.country_code.as_str()).collect();
        assert_eq!(codes, vec!["DE", "FR", "GB"]);

        let sorted = manager
            .sort(SortDirection::Descending, SortColumn::CountryName)
            .await
            .unwrap();
        let codes: Vec<&str> = sorted.iter().map(|s| s.country_code.as_str()).collect();
        assert_eq!(codes, vec!["GB", "FR", "DE"]);
    }

    #[tokio::test]
    async fn test_trace_commands() {
        let upstream = fake_upstream(zip_archive("GB", &gb_dump()), 0).await;
        let dir = tempfile::tempdir().unwrap();
        let (manager, _join) =
            spawn(catalog(), config(&upstream.base_url, dir.path()), settings()).unwrap();

        assert!(manager.trace(true).await.unwrap());
        let snap = manager.status().await.unwrap();
        assert!(snap.country_manager_trace);

        // No live server for FR, and XX is not in the catalog at all.
        assert_eq!(
            manager.trace_country("FR", true).await.unwrap(),
            Err(CommandError::NoSuchCountryServer)
        );
        assert_eq!(
            manager.trace_country("XX", true).await.unwrap(),
            Err(CommandError::NoSuchCountryServer)
        );

        manager.start("GB").await.unwrap().unwrap();
        wait_for(&manager, "GB", ServerStatus::Started).await;
        let traced = manager.trace_country("GB", true).await.unwrap().unwrap();
        assert!(traced.trace);
    }

    #[tokio::test]
    async fn test_shutdown_all_mid_startup_then_terminate_exits() {
        // An upstream that never answers keeps both servers pinned in their
        // download stage while we pull the plug.
        let upstream = crate::testutil::stalled_upstream().await;
        let dir = tempfile::tempdir().unwrap();
        let (manager, join) =
            spawn(catalog(), config(&upstream, dir.path()), settings()).unwrap();

        manager.start_all().await.unwrap();
        let list = manager.shutdown_all().await.unwrap();
        assert!(list.iter().all(|s| s.status == ServerStatus::Stopped));

        wait_for(&manager, "GB", ServerStatus::Stopped).await;
        wait_for(&manager, "FR", ServerStatus::Stopped).await;

        manager.terminate().await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), join)
            .await
            .expect("manager did not exit after terminate")
            .unwrap();

        // The manager is gone; further commands fail cleanly.
        assert!(manager.status().await.is_err());
    }
}
