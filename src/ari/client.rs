use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AriError {
    #[error("resource not found")]
    NotFound,
    #[error("unexpected status code {0}")]
    Unexpected(StatusCode),
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type AriResult<T = ()> = Result<T, AriError>;

/// Control-plane operations against ARI.
///
/// Implemented over HTTP by [`AriClient`]; tests substitute a recording mock.
#[async_trait]
pub trait AriApi: Send + Sync {
    /// Create a bridge, returning its ID.
    async fn bridge_create(&self) -> AriResult<String>;

    async fn bridge_add_channel(&self, brid: &str, chid: &str) -> AriResult;

    async fn bridge_delete(&self, brid: &str) -> AriResult;

    /// Create a channel calling the given PJSIP endpoint, returning the new
    /// channel ID.
    async fn channel_dial(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        variables: &HashMap<String, String>,
    ) -> AriResult<String>;

    async fn channel_answer(&self, chid: &str) -> AriResult;

    /// Start (`true`) or stop (`false`) ringback signaling on a channel.
    async fn channel_ring(&self, chid: &str, state: bool) -> AriResult;

    async fn channel_play(&self, chid: &str, media: &str) -> AriResult;

    async fn channel_set_var(&self, chid: &str, name: &str, value: &str) -> AriResult;

    async fn channel_delete(&self, chid: &str) -> AriResult;
}

pub struct AriClient {
    base: Url,
    app: String,
    credentials: String,
    http: Client,
}

impl AriClient {
    pub fn new(host: &str, app: &str, credentials: &str) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let base = Url::parse(&format!("http://{host}"))?;
        Ok(Self {
            base,
            app: app.to_string(),
            credentials: credentials.to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url.query_pairs_mut()
            .append_pair("api_key", &self.credentials);
        url
    }
}

fn expect_no_content(res: Response) -> AriResult {
    match res.status() {
        StatusCode::NO_CONTENT => Ok(()),
        status => Err(AriError::Unexpected(status)),
    }
}

fn expect_deleted(res: Response) -> AriResult {
    match res.status() {
        StatusCode::NO_CONTENT => Ok(()),
        StatusCode::NOT_FOUND => Err(AriError::NotFound),
        status => Err(AriError::Unexpected(status)),
    }
}

#[async_trait]
impl AriApi for AriClient {
    async fn bridge_create(&self) -> AriResult<String> {
        let brid = Uuid::new_v4().to_string();
        let res = self
            .http
            .post(self.url(&format!("/ari/bridges/{brid}")))
            .send()
            .await?;
        match res.status() {
            StatusCode::OK => Ok(brid),
            status => Err(AriError::Unexpected(status)),
        }
    }

    async fn bridge_add_channel(&self, brid: &str, chid: &str) -> AriResult {
        let mut url = self.url(&format!("/ari/bridges/{brid}/addChannel"));
        url.query_pairs_mut().append_pair("channel", chid);
        expect_no_content(self.http.post(url).send().await?)
    }

    async fn bridge_delete(&self, brid: &str) -> AriResult {
        let url = self.url(&format!("/ari/bridges/{brid}"));
        expect_deleted(self.http.delete(url).send().await?)
    }

    async fn channel_dial(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        variables: &HashMap<String, String>,
    ) -> AriResult<String> {
        let chid = Uuid::new_v4().to_string();
        let mut url = self.url(&format!("/ari/channels/{chid}"));
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in params {
                query.append_pair(name, value);
            }
            query.append_pair("app", &self.app);
            query.append_pair("endpoint", &format!("PJSIP/{endpoint}"));
        }

        let res = self
            .http
            .post(url)
            .json(&serde_json::json!({ "variables": variables }))
            .send()
            .await?;
        match res.status() {
            StatusCode::OK => Ok(chid),
            status => Err(AriError::Unexpected(status)),
        }
    }

    async fn channel_answer(&self, chid: &str) -> AriResult {
        let url = self.url(&format!("/ari/channels/{chid}/answer"));
        expect_no_content(self.http.post(url).send().await?)
    }

    async fn channel_ring(&self, chid: &str, state: bool) -> AriResult {
        let url = self.url(&format!("/ari/channels/{chid}/ring"));
        let req = if state {
            self.http.post(url)
        } else {
            self.http.delete(url)
        };
        expect_no_content(req.send().await?)
    }

    async fn channel_play(&self, chid: &str, media: &str) -> AriResult {
        let mut url = self.url(&format!("/ari/channels/{chid}/play"));
        url.query_pairs_mut().append_pair("media", media);
        expect_no_content(self.http.post(url).send().await?)
    }

    async fn channel_set_var(&self, chid: &str, name: &str, value: &str) -> AriResult {
        let mut url = self.url(&format!("/ari/channels/{chid}/variable"));
        url.query_pairs_mut()
            .append_pair("variable", name)
            .append_pair("value", value);
        expect_no_content(self.http.post(url).send().await?)
    }

    async fn channel_delete(&self, chid: &str) -> AriResult {
        let url = self.url(&format!("/ari/channels/{chid}"));
        expect_deleted(self.http.delete(url).send().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_carry_api_key() {
        let client = AriClient::new("asterisk:8088", "vouncer", "user:secret").unwrap();
        let url = client.url("/ari/channels/abc/answer");
        assert_eq!(url.host_str(), Some("asterisk"));
        assert_eq!(url.port(), Some(8088));
        assert_eq!(url.path(), "/ari/channels/abc/answer");
        assert!(
            url.query_pairs()
                .any(|(k, v)| k == "api_key" && v == "user:secret")
        );
    }
}
