//! Proxied HTTP access to the geonames dump export.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, Proxy};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use url::Url;

use crate::config::UpstreamConfig;

use super::error::ServerError;
use super::{Reporter, Settings, Substatus, DOWNLOAD_SHARE};

/// Upstream client shared by every data server.
#[derive(Debug)]
pub(crate) struct Downloader {
    client: Client,
    base_url: Url,
}

impl Downloader {
    pub fn new(upstream: &UpstreamConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder()
            .user_agent(concat!("gazetteer/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10));
        if let Some(proxy) = &upstream.proxy {
            builder = builder.proxy(Proxy::all(format!("http://{}:{}", proxy.host, proxy.port))?);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: Url::parse(upstream.base_url.trim_end_matches('/'))?,
        })
    }

    fn archive_url(&self, code: &str) -> String {
        format!("{}/{code}.zip", self.base_url.as_str().trim_end_matches('/'))
    }

    /// HEAD the country archive and return its validator token.
    pub async fn head_etag(&self, code: &str) -> Result<Option<String>, ServerError> {
        let url = self.archive_url(code);
        let resp = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| ServerError::Other(format!("HEAD {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(ServerError::Other(format!(
                "HEAD {url} returned {}",
                resp.status()
            )));
        }
        Ok(etag_of(&resp))
    }

    /// Download the country archive to a scratch file, retrying on failure
    /// with a fixed backoff. Returns the scratch file and the validator
    /// token the upstream sent with it.
    pub async fn fetch_archive(
        &self,
        code: &str,
        scratch_dir: &Path,
        settings: &Settings,
        reporter: &Reporter,
    ) -> Result<(NamedTempFile, Option<String>), ServerError> {
        let url = self.archive_url(code);
        // Progress points already awarded survive a retry, so the stage
        // never reports more than its share in total.
        let mut reported = 0u8;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self
                .try_fetch(&url, scratch_dir, reporter, &mut reported)
                .await
            {
                Ok(out) => {
                    if reported < DOWNLOAD_SHARE {
                        reporter
                            .progress(Substatus::CountryFileDownload, DOWNLOAD_SHARE - reported)
                            .await;
                    }
                    return Ok(out);
                }
                Err(e) => {
                    warn!(country = code, attempt, error = %e, "archive download failed");
                    if attempt >= settings.retry_limit {
                        return Err(ServerError::RetryLimitExceeded {
                            code: code.to_string(),
                            ext: "zip".to_string(),
                        });
                    }
                    tokio::time::sleep(settings.retry_wait).await;
                }
            }
        }
    }

    async fn try_fetch(
        &self,
        url: &str,
        scratch_dir: &Path,
        reporter: &Reporter,
        reported: &mut u8,
    ) -> anyhow::Result<(NamedTempFile, Option<String>)> {
        let resp = self.client.get(url).send().await?;
        anyhow::ensure!(
            resp.status().is_success(),
            "GET {url} returned {}",
            resp.status()
        );

        let etag = etag_of(&resp);
        let total = resp.content_length().filter(|t| *t > 0);
        let mut scratch = NamedTempFile::new_in(scratch_dir)?;
        let mut downloaded = 0u64;

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            scratch.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            if let Some(total) = total {
                let target =
                    ((downloaded.min(total) * u64::from(DOWNLOAD_SHARE)) / total) as u8;
                if target > *reported {
                    reporter
                        .progress(Substatus::CountryFileDownload, target - *reported)
                        .await;
                    *reported = target;
                }
            }
        }

        debug!(url, bytes = downloaded, "archive downloaded");
        Ok((scratch, etag))
    }
}

fn etag_of(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}
