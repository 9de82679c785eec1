//! The data server task for one country: startup pipeline, then serve.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::City;

use super::cache::FcpCache;
use super::download::Downloader;
use super::error::{ExitReason, ServerError};
use super::{
    archive, records, Reporter, ServerControl, Settings, Substatus, JOIN_SHARE, SCAN_SHARE,
    UNZIP_SHARE,
};

/// Everything a data server needs to build its country.
#[derive(Debug)]
pub(crate) struct CountryContext {
    /// ISO-2 code, uppercase.
    pub code: String,
    pub data_dir: PathBuf,
    pub downloader: Arc<Downloader>,
    pub settings: Settings,
}

/// Body of the data server task. Runs the startup pipeline while listening
/// for control messages, then serves the index until shutdown.
pub(crate) async fn run(
    ctx: CountryContext,
    reporter: Reporter,
    mut control: mpsc::Receiver<ServerControl>,
    cancel: CancellationToken,
) -> ExitReason {
    reporter.init(Utc::now()).await;

    let trace = AtomicBool::new(false);
    let pipeline = build_index(&ctx, &reporter, &trace);
    tokio::pin!(pipeline);

    let outcome = loop {
        tokio::select! {
            res = &mut pipeline => break res,
            cmd = control.recv() => match cmd {
                Some(ServerControl::Trace(on)) => trace.store(on, Ordering::Relaxed),
                Some(ServerControl::Shutdown) | None => {
                    debug!(country = %ctx.code, "shutdown during startup");
                    return ExitReason::Stopped;
                }
            },
            _ = cancel.cancelled() => return ExitReason::Stopped,
        }
    };

    let cities = match outcome {
        Ok(cities) => cities,
        Err(e) => return ExitReason::Failed(e),
    };
    if cities.is_empty() {
        return ExitReason::NoCities;
    }

    stage(&trace, &ctx.code, &format!("running with {} cities", cities.len()));
    reporter.running(Arc::new(cities), Utc::now()).await;

    loop {
        tokio::select! {
            cmd = control.recv() => match cmd {
                Some(ServerControl::Trace(on)) => trace.store(on, Ordering::Relaxed),
                Some(ServerControl::Shutdown) | None => return ExitReason::Stopped,
            },
            _ = cancel.cancelled() => return ExitReason::Stopped,
        }
    }
}

/// The startup pipeline: cache check, download, unzip, scan, join, cache
/// write. Blocking stages run off the async threads.
async fn build_index(
    ctx: &CountryContext,
    reporter: &Reporter,
    trace: &AtomicBool,
) -> Result<Vec<City>, ServerError> {
    let cache = FcpCache::new(&ctx.data_dir, &ctx.code);

    reporter.phase(Substatus::CheckingForUpdate).await;
    if let Some(meta) = cache.read_meta()? {
        // The recorded fetch timestamp is authoritative, not the file mtime.
        let age = Utc::now().signed_duration_since(meta.fetched_at);
        let fresh = age
            .to_std()
            .map(|a| a < ctx.settings.cache_staleness)
            .unwrap_or(true);
        if fresh {
            stage(trace, &ctx.code, "cache is fresh");
            return read_cached(&cache, reporter).await;
        }
        match ctx.downloader.head_etag(&ctx.code).await {
            Ok(upstream) if upstream.is_some() && upstream == meta.etag => {
                stage(trace, &ctx.code, "upstream archive unchanged");
                return read_cached(&cache, reporter).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(country = %ctx.code, error = %e, "update check failed, downloading")
            }
        }
    }

    stage(trace, &ctx.code, "downloading archive");
    reporter.phase(Substatus::CountryFileDownload).await;
    let (scratch, etag) = ctx
        .downloader
        .fetch_archive(&ctx.code, &ctx.data_dir, &ctx.settings, reporter)
        .await?;
    let fetched_at = Utc::now();

    stage(trace, &ctx.code, "extracting dump");
    reporter
        .child(Substatus::CountryZipFile, format!("unzip:{}.zip", ctx.code))
        .await;
    let zip_path = scratch.path().to_path_buf();
    let code = ctx.code.clone();
    let text = tokio::task::spawn_blocking(move || archive::extract_country_file(&zip_path, &code))
        .await
        .map_err(join_error)??;
    // The archive is scratch; gone once extracted.
    drop(scratch);
    reporter.progress(Substatus::CountryZipFile, UNZIP_SHARE).await;

    stage(trace, &ctx.code, "scanning records");
    reporter.phase(Substatus::CountryFile).await;
    let kept = tokio::task::spawn_blocking(move || records::scan_records(&text))
        .await
        .map_err(join_error)??;
    reporter.progress(Substatus::CountryFile, SCAN_SHARE).await;

    stage(trace, &ctx.code, "joining admin regions");
    reporter
        .child(Substatus::FcpCountryFile, format!("fcp:{}.fcp", ctx.code))
        .await;
    let writer = cache.clone();
    let cities = tokio::task::spawn_blocking(move || {
        let cities = records::build_cities(&kept);
        writer.write(etag.as_deref(), fetched_at, &cities)?;
        Ok::<_, ServerError>(cities)
    })
    .await
    .map_err(join_error)??;
    reporter.progress(Substatus::FcpCountryFile, JOIN_SHARE).await;

    Ok(cities)
}

async fn read_cached(cache: &FcpCache, reporter: &Reporter) -> Result<Vec<City>, ServerError> {
    let reader = cache.clone();
    let cities = tokio::task::spawn_blocking(move || reader.read_cities())
        .await
        .map_err(join_error)??;
    reporter.phase_complete(Substatus::FcpCountryFile).await;
    Ok(cities)
}

fn join_error(e: tokio::task::JoinError) -> ServerError {
    ServerError::Other(format!("blocking task failed: {e}"))
}

fn stage(trace: &AtomicBool, code: &str, msg: &str) {
    if trace.load(Ordering::Relaxed) {
        info!(country = code, "{msg}");
    } else {
        debug!(country = code, "{msg}");
    }
}
