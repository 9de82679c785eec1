//! Shared test fixtures: a loopback geonames upstream and dump builders.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

pub(crate) const UPSTREAM_ETAG: &str = "\"v1\"";

/// A loopback server standing in for download.geonames.org.
pub(crate) struct FakeUpstream {
    pub base_url: String,
    gets: Arc<AtomicUsize>,
    heads: Arc<AtomicUsize>,
}

impl FakeUpstream {
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn heads(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }
}

/// Serve `zip` for every archive path, failing the first `failures` GETs
/// with a 500.
pub(crate) async fn fake_upstream(zip: Vec<u8>, failures: usize) -> FakeUpstream {
    let zip = Arc::new(zip);
    let gets = Arc::new(AtomicUsize::new(0));
    let heads = Arc::new(AtomicUsize::new(0));
    let remaining = Arc::new(AtomicUsize::new(failures));

    let handler = {
        let gets = gets.clone();
        let heads = heads.clone();
        move |method: Method| {
            let zip = zip.clone();
            let gets = gets.clone();
            let heads = heads.clone();
            let remaining = remaining.clone();
            async move {
                if method == Method::HEAD {
                    heads.fetch_add(1, Ordering::SeqCst);
                    return ([(header::ETAG, UPSTREAM_ETAG)], Vec::new()).into_response();
                }
                gets.fetch_add(1, Ordering::SeqCst);
                let failed = remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                    .is_ok();
                if failed {
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
                ([(header::ETAG, UPSTREAM_ETAG)], zip.as_ref().clone()).into_response()
            }
        }
    };

    let app = Router::new().route("/{file}", get(handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeUpstream {
        base_url,
        gets,
        heads,
    }
}

/// An upstream that accepts connections but never answers. Keeps data
/// servers pinned mid-download for shutdown/cancellation tests.
pub(crate) async fn stalled_upstream() -> String {
    let app = Router::new().route(
        "/{file}",
        get(|| async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            StatusCode::INTERNAL_SERVER_ERROR
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base_url
}

/// One geonames dump row (19 tab-separated columns, newline terminated).
#[allow(clippy::too_many_arguments)]
pub(crate) fn dump_row(
    name: &str,
    lat: &str,
    lng: &str,
    feature_class: &str,
    feature_code: &str,
    country_code: &str,
    admin1: &str,
    admin2: &str,
    admin3: &str,
    admin4: &str,
    population: &str,
    timezone: &str,
) -> String {
    [
        "1",
        name,
        name,
        "",
        lat,
        lng,
        feature_class,
        feature_code,
        country_code,
        "",
        admin1,
        admin2,
        admin3,
        admin4,
        population,
        "",
        "",
        timezone,
        "2024-01-01",
    ]
    .join("\t")
        + "\n"
}

/// A geonames-shaped archive: the dump member plus the readme.
pub(crate) fn zip_archive(code: &str, text: &str) -> Vec<u8> {
    let cursor = std::io::Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(cursor);
    let options = zip::write::SimpleFileOptions::default();

    writer.start_file(format!("{code}.txt"), options).unwrap();
    writer.write_all(text.as_bytes()).unwrap();
    writer.start_file("readme.txt", options).unwrap();
    writer.write_all(b"generated for tests").unwrap();

    writer.finish().unwrap().into_inner()
}
