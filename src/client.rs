use anyhow::anyhow;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::load_config;
use crate::download::stream_to_file;
use crate::error::{Error, IpumsErrorResponse, Result, format_ipums_error};
use crate::extract::{ExtractInfo, ExtractRef, ExtractStatus, NHGIS_COLLECTION, NhgisExtract};
use crate::metadata::{MetadataPage, MetadataQuery, MetadataTarget, MetadataType};
use crate::util::{backoff, guess_filename_from_url, retriable_status, urljoin, with_missing_query};

/// Default IPUMS API version.
pub const DEFAULT_API_VERSION: u32 = 2;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// IPUMS API key.
    pub key: String,
    /// API root, typically `https://api.ipums.org`.
    pub url: String,
    /// Whether to verify TLS certificates.
    pub verify: bool,
}

#[derive(Debug, Clone)]
pub struct Client {
    key: String,
    extracts_url: String,
    metadata_url: String,
    api_version: u32,

    timeout: Duration,
    retry_max: usize,
    sleep_max: Duration,
    wait_timeout: Option<Duration>,
    max_pages: Option<usize>,
    progress: bool,

    http: HttpClient,
}

#[derive(Debug, serde::Deserialize)]
struct SubmitReply {
    number: u64,
}

impl Client {
    /// Creates a client using environment variables and/or `.ipumsrc`.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `key`/`url` arguments
    /// - environment variables `IPUMS_API_KEY` / `IPUMS_API_URL`
    /// - config file from `IPUMS_RC` or `.ipumsrc`
    ///
    /// The URL defaults to `https://api.ipums.org`.
    pub fn new(key: Option<String>, url: Option<String>, verify: Option<bool>) -> Result<Self> {
        let cfg = load_config(key, url, verify)?;
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: ClientConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("nhgisapi-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("nhgisapi-rs")),
        );

        // JSON calls set their own timeout; downloads may legitimately run long.
        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(None::<Duration>);
        if !cfg.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| anyhow!(e).context("failed to build HTTP client"))?;

        Ok(Self {
            key: cfg.key,
            extracts_url: urljoin(&cfg.url, "extracts"),
            metadata_url: urljoin(&cfg.url, &format!("metadata/{}", NHGIS_COLLECTION)),
            api_version: DEFAULT_API_VERSION,
            timeout: Duration::from_secs(60),
            retry_max: 3,
            sleep_max: Duration::from_secs(120),
            wait_timeout: None,
            max_pages: None,
            progress: true,
            http,
        })
    }

    pub fn with_api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    /// Timeout for JSON API requests. File downloads are not limited.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total attempts for a GET on connection errors and 408/429/5xx
    /// responses, counting the first one. Extract submission is never retried.
    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max.max(1);
        self
    }

    /// Upper bound for the sleep between retries and between status polls.
    pub fn with_sleep_max(mut self, sleep_max: Duration) -> Self {
        self.sleep_max = sleep_max;
        self
    }

    /// Gives up [`Client::wait_for_extract`] after `timeout`.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Caps the number of pages a metadata listing may follow.
    ///
    /// Listings are otherwise bounded only by the server's `nextPage` links.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Submits `extract` and records the extract number the API assigns to it.
    pub fn submit_extract(&self, extract: &mut NhgisExtract) -> Result<u64> {
        let query = [
            ("collection", extract.collection().to_string()),
            ("version", self.api_version.to_string()),
        ];
        let reply: SubmitReply =
            self.api_json(Method::POST, &self.extracts_url, &query, Some(&extract.build()))?;

        extract.set_extract_id(reply.number);
        info!(
            extract = reply.number,
            collection = extract.collection(),
            "submitted extract"
        );
        Ok(reply.number)
    }

    /// The API's full record for one extract.
    pub fn get_extract_info<'a>(
        &self,
        extract: impl Into<ExtractRef<'a>>,
        collection: Option<&str>,
    ) -> Result<Value> {
        let (id, collection) = extract.into().resolve(collection)?;
        self.api_json::<Value, Value>(Method::GET, &self.extract_url(id), &self.extract_query(&collection), None)
    }

    /// Rebuilds the definition of a previous extract so it can be resubmitted.
    pub fn get_extract_by_id(&self, id: u64, collection: &str) -> Result<NhgisExtract> {
        let info = self.fetch_extract_info(id, collection)?;
        let definition = info.extract_definition.ok_or_else(|| {
            anyhow!("extract {} in collection {} came back without a definition", id, collection)
        })?;
        NhgisExtract::from_definition(&definition)
    }

    /// Current processing status; an unknown extract is [`ExtractStatus::NotFound`].
    pub fn extract_status<'a>(
        &self,
        extract: impl Into<ExtractRef<'a>>,
        collection: Option<&str>,
    ) -> Result<ExtractStatus> {
        let (id, collection) = extract.into().resolve(collection)?;
        Ok(self.lookup_extract(id, &collection)?.status)
    }

    /// Polls until the extract completes.
    pub fn wait_for_extract<'a>(
        &self,
        extract: impl Into<ExtractRef<'a>>,
        collection: Option<&str>,
    ) -> Result<()> {
        let (id, collection) = extract.into().resolve(collection)?;
        let started = Instant::now();
        let mut sleep = Duration::from_secs(1);
        let mut last_status: Option<ExtractStatus> = None;

        loop {
            let status = self.lookup_extract(id, &collection)?.status;
            if last_status.as_ref() != Some(&status) {
                info!(extract = id, collection = %collection, status = %status, "extract status");
                last_status = Some(status.clone());
            }

            match status {
                ExtractStatus::Completed => return Ok(()),
                ExtractStatus::Failed | ExtractStatus::Canceled => {
                    return Err(Error::ExtractFailure { id, collection });
                }
                ExtractStatus::NotFound => return Err(Error::ExtractNotFound { id, collection }),
                _ => {
                    if let Some(limit) = self.wait_timeout {
                        if started.elapsed() >= limit {
                            return Err(Error::ExtractNotReady(format!(
                                "IPUMS {} extract number {} is still {} after {:?}; try again later.",
                                collection, id, status, limit
                            )));
                        }
                    }
                    thread::sleep(sleep);
                    sleep = backoff(sleep, self.sleep_max);
                }
            }
        }
    }

    /// Downloads the table and GIS archives of a completed extract into `download_dir`.
    ///
    /// `extract` is a submitted [`NhgisExtract`] or a bare extract number; a bare
    /// number needs `collection`. `download_dir` defaults to the current
    /// directory and must already exist. Files are named after the last path
    /// segment of their download URL and overwrite existing files.
    pub fn download_extract<'a>(
        &self,
        extract: impl Into<ExtractRef<'a>>,
        collection: Option<&str>,
        download_dir: Option<&Path>,
    ) -> Result<Vec<PathBuf>> {
        let extract = extract.into();
        let (id, collection) = extract.resolve(collection)?;

        let download_dir = match download_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir()?,
        };
        if !download_dir.is_dir() {
            return Err(Error::NotFound(format!(
                "{} does not exist or is not a directory",
                download_dir.display()
            )));
        }

        let info = self.lookup_extract(id, &collection)?;
        match info.status {
            ExtractStatus::Completed => {}
            ExtractStatus::NotFound => return Err(Error::ExtractNotFound { id, collection }),
            ExtractStatus::Failed => return Err(Error::ExtractFailure { id, collection }),
            other => {
                return Err(Error::ExtractNotReady(format!(
                    "IPUMS {} extract number {} is not finished yet (status: {}).",
                    collection, id, other
                )));
            }
        }

        let urls = info.download_links.urls();
        if urls.is_empty() {
            let hint = match extract {
                ExtractRef::Extract(_) => {
                    "Use `Client::submit_extract` to resubmit this extract object as a new extract request."
                }
                ExtractRef::Id(_) => {
                    "Use `Client::get_extract_by_id` and then `Client::submit_extract` to resubmit this definition as a new extract request."
                }
            };
            return Err(Error::ExtractNotReady(format!(
                "IPUMS {} extract {} has expired and its files have been deleted.\n{}",
                collection, id, hint
            )));
        }

        let mut written = Vec::with_capacity(urls.len());
        for url in &urls {
            let file_name = guess_filename_from_url(url)
                .ok_or_else(|| anyhow!("cannot derive a file name from download URL {}", url))?;
            let target = download_dir.join(file_name);

            let resp = self.robust_request(|| self.authed(self.http.get(url)).send())?;
            let resp = resp.error_for_status()?;
            let bytes = stream_to_file(resp, &target, self.progress)?;

            info!(path = %target.display(), bytes, "downloaded extract file");
            written.push(target);
        }
        Ok(written)
    }

    /// Submits `extract`, waits for it to complete, then downloads its files.
    pub fn retrieve(&self, extract: &mut NhgisExtract, download_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
        self.submit_extract(extract)?;
        self.wait_for_extract(&*extract, None)?;
        self.download_extract(&*extract, None, download_dir)
    }

    /// Fetches NHGIS metadata.
    ///
    /// A listing query returns a JSON array holding the records of every page;
    /// a dataset, data table or time-series table query returns that record.
    pub fn metadata(&self, query: &MetadataQuery) -> Result<Value> {
        match query.target()? {
            MetadataTarget::Listing(kind) => Ok(Value::Array(self.metadata_listing(kind, query.page_size)?)),
            MetadataTarget::Record(path) => {
                let url = urljoin(&self.metadata_url, &path);
                self.api_json::<Value, Value>(Method::GET, &url, &self.page_query(query.page_size), None)
            }
        }
    }

    /// Every record of one metadata catalog, following `nextPage` links in order.
    pub fn metadata_listing(&self, kind: MetadataType, page_size: u32) -> Result<Vec<Value>> {
        let params = self.page_query(page_size);
        let url = urljoin(&self.metadata_url, kind.as_str());

        let mut page: MetadataPage = self.api_json::<Value, _>(Method::GET, &url, &params, None)?;
        let mut records = std::mem::take(&mut page.data);
        let mut pages = 1usize;

        while let Some(next) = page.next_page().map(str::to_string) {
            if let Some(limit) = self.max_pages {
                if pages >= limit {
                    return Err(Error::PageLimitExceeded { limit });
                }
            }
            let next_url = with_missing_query(&next, &params)?;
            debug!(endpoint = %kind, page = pages + 1, url = %next_url, "fetching metadata page");

            page = self.api_json::<Value, _>(Method::GET, next_url.as_str(), &[], None)?;
            records.append(&mut page.data);
            pages += 1;
        }

        debug!(endpoint = %kind, pages, records = records.len(), "metadata listing complete");
        Ok(records)
    }

    fn extract_url(&self, id: u64) -> String {
        format!("{}/{}", self.extracts_url.trim_end_matches('/'), id)
    }

    fn extract_query(&self, collection: &str) -> [(&'static str, String); 2] {
        [
            ("collection", collection.to_string()),
            ("version", self.api_version.to_string()),
        ]
    }

    fn page_query(&self, page_size: u32) -> [(&'static str, String); 2] {
        [
            ("version", self.api_version.to_string()),
            ("pageSize", page_size.to_string()),
        ]
    }

    fn fetch_extract_info(&self, id: u64, collection: &str) -> Result<ExtractInfo> {
        self.api_json::<Value, ExtractInfo>(Method::GET, &self.extract_url(id), &self.extract_query(collection), None)
    }

    // 404 becomes a `not found` status instead of an error.
    fn lookup_extract(&self, id: u64, collection: &str) -> Result<ExtractInfo> {
        match self.fetch_extract_info(id, collection) {
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => Ok(ExtractInfo {
                status: ExtractStatus::NotFound,
                download_links: Default::default(),
                extract_definition: None,
            }),
            other => other,
        }
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(AUTHORIZATION, self.key.trim())
    }

    fn api_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&TReq>,
    ) -> Result<TResp> {
        let send = || {
            let mut req = self.authed(self.http.request(method.clone(), url)).timeout(self.timeout);
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(body) = body {
                req = req.json(body);
            }
            req.send()
        };
        // A POST creates an extract; sending it twice would queue two.
        let resp = if method == Method::POST {
            send()?
        } else {
            self.robust_request(send)?
        };

        let status = resp.status();
        let text = resp.text()?;
        if !status.is_success() {
            // IPUMS error bodies carry validation details worth surfacing.
            if let Ok(err_json) = serde_json::from_str::<IpumsErrorResponse>(&text) {
                return Err(format_ipums_error(status, url, &err_json));
            }
            return Err(Error::Api {
                status,
                message: format!("API request failed: HTTP {} for url ({})\n{}", status, url, text),
            });
        }

        serde_json::from_str::<TResp>(&text).map_err(|e| {
            anyhow!(e)
                .context(format!("failed to parse API JSON (url={}, status={})", url, status))
                .into()
        })
    }

    fn robust_request<F>(&self, mut f: F) -> Result<Response>
    where
        F: FnMut() -> std::result::Result<Response, reqwest::Error>,
    {
        let mut tries = 0usize;
        let mut sleep = Duration::from_secs(1).min(self.sleep_max);
        loop {
            match f() {
                Ok(resp) => {
                    if retriable_status(resp.status().as_u16()) {
                        tries += 1;
                        if tries >= self.retry_max {
                            return Ok(resp);
                        }
                        debug!(status = %resp.status(), tries, "retrying request");
                        thread::sleep(sleep);
                        sleep = backoff(sleep, self.sleep_max);
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    tries += 1;
                    if tries >= self.retry_max {
                        return Err(Error::Http(err));
                    }
                    debug!(error = %err, tries, "retrying request");
                    thread::sleep(sleep);
                    sleep = backoff(sleep, self.sleep_max);
                }
            }
        }
    }
}
