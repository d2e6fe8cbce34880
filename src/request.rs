//! Resilient request layer.
//!
//! One GET per attempt, a fixed sleep between attempts and a small attempt
//! budget (the IMF service enforces per-IP and per-application rate limits).
//! A request that never produced a usable JSON document comes back as a
//! [`RequestFailure`] value; callers branch on it instead of unwinding.
//!
//! ```no_run
//! # use imfdata::config::Settings;
//! # use imfdata::report::LogReporter;
//! # use imfdata::request::{HttpTransport, Requester};
//! let settings = Settings::default();
//! let requester = Requester::new(Box::new(HttpTransport::new(&settings)?), &settings);
//! match requester.request(&settings.endpoint("Dataflow"), &LogReporter) {
//!     Ok(doc) => println!("{}", doc["Structure"]["Dataflows"]),
//!     Err(failure) => eprintln!("{failure}"),
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::config::Settings;
use crate::report::Reporter;
use anyhow::{Context, Result};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use reqwest::blocking::Client as HttpClient;
use reqwest::redirect::Policy;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Status line and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can perform a single GET. Errors are transport-level
/// (DNS, connect, timeout); HTTP error statuses are returned as replies.
pub trait Transport {
    fn get(&self, url: &str) -> Result<HttpReply>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout)
            .redirect(Policy::limited(5))
            .user_agent(concat!("imfdata/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self { http })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(&Settings::default()).expect("reqwest client build")
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<HttpReply> {
        let resp = self.http.get(url).send().with_context(|| format!("GET {url}"))?;
        let status = resp.status().as_u16();
        let body = resp.text().context("read response body")?;
        Ok(HttpReply { status, body })
    }
}

/// A request that exhausted its attempts without a usable document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    pub url: String,
    pub attempts: u32,
    pub reason: String,
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GET {} failed after {} attempt(s): {}",
            self.url, self.attempts, self.reason
        )
    }
}

impl std::error::Error for RequestFailure {}

pub struct Requester {
    transport: Box<dyn Transport>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Requester {
    pub fn new(transport: Box<dyn Transport>, settings: &Settings) -> Self {
        Self {
            transport,
            max_attempts: settings.max_attempts.max(1),
            retry_delay: settings.retry_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// GET `url` until it yields a non-empty JSON document or the attempt
    /// budget runs out.
    pub fn request(&self, url: &str, reporter: &dyn Reporter) -> Result<Value, RequestFailure> {
        let mut reason = String::from("no attempt made");
        for attempt in 1..=self.max_attempts {
            match self.attempt(url) {
                Ok(doc) => return Ok(doc),
                Err(why) => {
                    reporter.info(&format!(
                        "attempt {attempt}/{} for {url} failed: {why}",
                        self.max_attempts
                    ));
                    reason = why;
                }
            }
            if attempt < self.max_attempts && !self.retry_delay.is_zero() {
                std::thread::sleep(self.retry_delay);
            }
        }
        Err(RequestFailure {
            url: url.to_string(),
            attempts: self.max_attempts,
            reason,
        })
    }

    // Each attempt parses its own body; nothing carries over between attempts.
    fn attempt(&self, url: &str) -> Result<Value, String> {
        let reply = self.transport.get(url).map_err(|e| format!("{e:#}"))?;
        if !reply.is_success() {
            return Err(format!("HTTP {}", reply.status));
        }
        let doc: Value =
            serde_json::from_str(&reply.body).map_err(|e| format!("decode json: {e}"))?;
        if is_empty_document(&doc) {
            return Err("empty document".into());
        }
        Ok(doc)
    }
}

fn is_empty_document(doc: &Value) -> bool {
    match doc {
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => true,
    }
}

// Allow -, _, . unescaped in codes (dataset, codelist and indicator ids use them)
const SAFE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Percent-encode one path segment (dataset code, codelist id, indicator code).
pub fn encode_segment(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s.trim(), SAFE).to_string()
}
