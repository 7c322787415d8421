use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{SentinelHubConfig, load_config};
use crate::error::{ShErrorResponse, format_sh_error};
use crate::evalscript::Evalscript;
use crate::geometry::{BBox, TimeInterval, bbox_to_dimensions};
use crate::process::{ProcessRequest, TIFF_MIME, TokenResponse};
use crate::raster::{PixelArray, decode_tiff};
use crate::util::{truncate_body, urljoin};

/// Everything that selects one image: area, time window, bands and pixel size.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub bbox: BBox,
    pub interval: TimeInterval,
    pub evalscript: Evalscript,
    /// Ground sample distance in meters.
    pub resolution: f64,
}

impl ImageRequest {
    pub fn new(bbox: BBox, interval: TimeInterval, evalscript: Evalscript, resolution: f64) -> Self {
        Self {
            bbox,
            interval,
            evalscript,
            resolution,
        }
    }

    /// Output `(width, height)` in pixels.
    pub fn dimensions(&self) -> Result<(u32, u32)> {
        bbox_to_dimensions(&self.bbox, self.resolution)
    }

    pub fn to_process_request(&self) -> Result<ProcessRequest> {
        Ok(ProcessRequest::new(
            &self.bbox,
            self.interval,
            &self.evalscript,
            self.dimensions()?,
        ))
    }
}

/// Blocking Sentinel Hub Process API client.
#[derive(Debug, Clone)]
pub struct Client {
    config: SentinelHubConfig,
    timeout: Duration,
    progress: bool,
    http: HttpClient,
}

impl Client {
    /// Creates a client from a stored profile, with credentials from the
    /// environment taking precedence.
    pub fn from_profile(profile: &str) -> Result<Self> {
        Self::new(load_config(profile)?)
    }

    pub fn new(config: SentinelHubConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("s2fetch/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("s2fetch")),
        );

        let http = HttpClient::builder()
            .default_headers(default_headers)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            config,
            timeout: Duration::from_secs(60),
            progress: true,
            http,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Replaces the underlying HTTP client, e.g. to change proxy or TLS settings.
    pub fn with_http_client(mut self, http: HttpClient) -> Self {
        self.http = http;
        self
    }

    pub fn config(&self) -> &SentinelHubConfig {
        &self.config
    }

    /// Exchanges the client credentials for a bearer token.
    pub fn fetch_token(&self) -> Result<String> {
        let url = &self.config.token_url;
        let resp = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .timeout(self.timeout)
            .send()
            .with_context(|| format!("could not connect to token endpoint {}", url))?;

        let resp = check_status(resp, url)?;
        let token: TokenResponse = resp
            .json()
            .with_context(|| format!("failed to parse token response from {}", url))?;
        debug!(expires_in = ?token.expires_in, "obtained access token");
        Ok(token.access_token)
    }

    /// Sends one Process API request and returns the raw TIFF payload.
    pub fn process(&self, request: &ProcessRequest) -> Result<Vec<u8>> {
        let token = self.fetch_token()?;
        let url = urljoin(&self.config.base_url, "/api/v1/process");
        debug!(%url, evalscript = request.evalscript(), "submitting process request");

        let spinner = self.spinner(request)?;
        let sent = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header(ACCEPT, TIFF_MIME)
            .json(request)
            .timeout(self.timeout)
            .send();
        if let Some(pb) = &spinner {
            pb.finish_and_clear();
        }

        let resp = check_status(
            sent.with_context(|| format!("could not connect to {}", url))?,
            &url,
        )?;

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp.bytes().context("failed to read process response body")?;
        if content_type.starts_with("application/json") {
            bail!(
                "expected {} from {}, got JSON: {}",
                TIFF_MIME,
                url,
                truncate_body(&String::from_utf8_lossy(&body), 500)
            );
        }
        Ok(body.to_vec())
    }

    /// Requests the least-cloudy scene for `request` and decodes it.
    pub fn fetch_image(&self, request: &ImageRequest) -> Result<PixelArray> {
        let process = request.to_process_request()?;
        info!(
            bbox = ?request.bbox.to_array(),
            from = %request.interval.start,
            to = %request.interval.end,
            bands = request.evalscript.bands().len(),
            width = process.width(),
            height = process.height(),
            "requesting image"
        );

        let body = self.process(&process)?;
        let image = decode_tiff(&body).context("failed to decode process response")?;

        let expected = request.evalscript.bands().len();
        if image.channels() != expected {
            bail!(
                "response has {} channel(s) but {} band(s) were requested",
                image.channels(),
                expected
            );
        }
        info!(
            height = image.height(),
            width = image.width(),
            channels = image.channels(),
            dtype = image.dtype_name(),
            "image received"
        );
        Ok(image)
    }

    fn spinner(&self, request: &ProcessRequest) -> Result<Option<ProgressBar>> {
        if !self.progress {
            return Ok(None);
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::with_template(
            "{spinner:.green} {msg} [{elapsed}]",
        )?);
        pb.set_message(format!(
            "waiting for {}x{} image",
            request.width(),
            request.height()
        ));
        pb.enable_steady_tick(Duration::from_millis(120));
        Ok(Some(pb))
    }
}

fn check_status(resp: Response, url: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().unwrap_or_default();
    if let Ok(err_json) = serde_json::from_str::<ShErrorResponse>(&text) {
        return Err(format_sh_error(status, url, &err_json));
    }

    bail!(
        "API request failed: HTTP {} for url ({})\n{}",
        status,
        url,
        truncate_body(&text, 500)
    )
}
