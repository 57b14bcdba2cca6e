use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

/// Raw reply from an HTTP exchange. Non-2xx statuses are returned, not
/// raised, so callers can log the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Network seam used by provider clients and the URL image fetch.
pub trait Transport: Send + Sync {
    fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        payload: &Value,
    ) -> anyhow::Result<HttpReply>;

    fn get(&self, url: &str) -> anyhow::Result<HttpReply>;
}

pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new(timeout_s: f64) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs_f64(timeout_s))
            .build()?;
        Ok(Self { http })
    }
}

impl Transport for ReqwestTransport {
    fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        payload: &Value,
    ) -> anyhow::Result<HttpReply> {
        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(payload);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send()?;
        let status = response.status().as_u16();
        let body = response.bytes()?.to_vec();
        Ok(HttpReply { status, body })
    }

    fn get(&self, url: &str) -> anyhow::Result<HttpReply> {
        let response = self.http.get(url).send()?;
        let status = response.status().as_u16();
        let body = response.bytes()?.to_vec();
        Ok(HttpReply { status, body })
    }
}
