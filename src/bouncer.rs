use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

/// Outcome of screening one incoming call.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The call may proceed, dialed out to `destination` and presented with
    /// `caller_id`.
    Allow {
        destination: String,
        caller_id: String,
    },
    /// The call must not proceed.
    Deny,
}

/// The external policy service deciding whether an incoming call may proceed.
#[async_trait]
pub trait CallScreen: Send + Sync {
    async fn authorize(&self, endpoint: &str, extension: &str) -> Result<Verdict>;
}

#[derive(Debug, Serialize)]
struct ScreenRequest<'a> {
    endpoint: &'a str,
    extension: &'a str,
}

#[derive(Debug, Deserialize)]
struct ScreenResponse {
    allow: bool,
    #[serde(default)]
    destination: String,
    #[serde(default)]
    callerid: String,
}

impl From<ScreenResponse> for Verdict {
    fn from(res: ScreenResponse) -> Self {
        if res.allow {
            Verdict::Allow {
                destination: res.destination,
                caller_id: res.callerid,
            }
        } else {
            Verdict::Deny
        }
    }
}

pub struct BouncerClient {
    url: Url,
    http: Client,
}

impl BouncerClient {
    pub fn new(service_host: &str) -> Result<Self> {
        let mut url = Url::parse(service_host).context("failed to create service URL")?;
        let path = format!("{}/bouncer", url.path().trim_end_matches('/'));
        url.set_path(&path);
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { url, http })
    }
}

#[async_trait]
impl CallScreen for BouncerClient {
    async fn authorize(&self, endpoint: &str, extension: &str) -> Result<Verdict> {
        let body = ScreenRequest {
            endpoint,
            extension,
        };
        let res = self
            .http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .context("failed connection to service")?;
        let decision: ScreenResponse =
            res.json().await.context("failed to decode bouncer response")?;
        Ok(decision.into())
    }
}
