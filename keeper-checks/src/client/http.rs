//! HTTP client for a live node's API and debug API.

use super::types::{Addresses, Balance, Pong, Settlements, TagStatus, Topology, UploadOptions};
use super::{ClientError, NodeApi};
use async_trait::async_trait;
use keeper_types::{Address, Chunk, SingleOwnerChunk};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SWARM_TAG: &str = "Swarm-Tag";
const SWARM_PIN: &str = "Swarm-Pin";
const SWARM_BATCH: &str = "Swarm-Postage-Batch-Id";
const OCTET_STREAM: &str = "application/octet-stream";

/// Where to reach one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeEndpoint {
    /// Node name within its group
    pub name: String,
    /// Base URL of the API
    pub api_url: String,
    /// Base URL of the debug API
    pub debug_api_url: String,
    /// Accept self-signed certificates
    #[serde(default)]
    pub insecure_tls: bool,
}

impl NodeEndpoint {
    /// Endpoint for a node listening on the default ports of `host`.
    pub fn local(name: &str, host: &str) -> Self {
        Self {
            name: name.into(),
            api_url: format!("http://{host}:1633"),
            debug_api_url: format!("http://{host}:1635"),
            insecure_tls: false,
        }
    }
}

#[derive(Deserialize)]
struct ReferenceResponse {
    reference: Address,
}

#[derive(Deserialize)]
struct BalancesResponse {
    balances: Vec<Balance>,
}

#[derive(Deserialize)]
struct PeerEntry {
    address: Address,
}

#[derive(Deserialize)]
struct PeersResponse {
    peers: Vec<PeerEntry>,
}

/// Client for one node.
pub struct HttpNodeClient {
    endpoint: NodeEndpoint,
    http: reqwest::Client,
}

impl HttpNodeClient {
    /// Create a client; `request_timeout` bounds every single request.
    pub fn new(endpoint: NodeEndpoint, request_timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .danger_accept_invalid_certs(endpoint.insecure_tls)
            .build()?;
        Ok(Self { endpoint, http })
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &NodeEndpoint {
        &self.endpoint
    }

    /// Build an API URL.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.api_url.trim_end_matches('/'), path)
    }

    /// Build a debug API URL.
    pub fn debug_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.debug_api_url.trim_end_matches('/'),
            path
        )
    }

    async fn check(
        response: reqwest::Response,
        what: &str,
    ) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    // 200 means present, 404 means absent.
    async fn exists(&self, url: String) -> Result<bool, ClientError> {
        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response, &url).await?;
        Ok(true)
    }

    fn upload(&self, url: &str, options: &UploadOptions) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, OCTET_STREAM);
        if let Some(tag) = options.tag {
            request = request.header(SWARM_TAG, tag.to_string());
        }
        if options.pin {
            request = request.header(SWARM_PIN, "true");
        }
        if let Some(batch) = &options.batch_id {
            request = request.header(SWARM_BATCH, batch.as_str());
        }
        request
    }

    async fn post_reference(
        &self,
        url: String,
        body: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<Address, ClientError> {
        let response = self.upload(&url, options).body(body).send().await?;
        let response = Self::check(response, &url).await?;
        let reference: ReferenceResponse = response.json().await?;
        Ok(reference.reference)
    }

    async fn get_bytes(&self, url: String) -> Result<Vec<u8>, ClientError> {
        let response = self.http.get(&url).send().await?;
        let response = Self::check(response, &url).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, ClientError> {
        let response = self.http.get(&url).send().await?;
        let response = Self::check(response, &url).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl NodeApi for HttpNodeClient {
    async fn addresses(&self) -> Result<Addresses, ClientError> {
        self.get_json(self.debug_url("addresses")).await
    }

    async fn upload_chunk(
        &self,
        chunk: &Chunk,
        options: &UploadOptions,
    ) -> Result<Address, ClientError> {
        self.post_reference(self.api_url("chunks"), chunk.data(), options)
            .await
    }

    async fn download_chunk(&self, address: &Address) -> Result<Vec<u8>, ClientError> {
        self.get_bytes(self.api_url(&format!("chunks/{address}")))
            .await
    }

    async fn upload_bytes(
        &self,
        data: &[u8],
        options: &UploadOptions,
    ) -> Result<Address, ClientError> {
        self.post_reference(self.api_url("bytes"), data.to_vec(), options)
            .await
    }

    async fn download_bytes(&self, reference: &Address) -> Result<Vec<u8>, ClientError> {
        self.get_bytes(self.api_url(&format!("bytes/{reference}")))
            .await
    }

    async fn upload_soc(
        &self,
        soc: &SingleOwnerChunk,
        options: &UploadOptions,
    ) -> Result<Address, ClientError> {
        let url = self.api_url(&format!(
            "soc/{}/{}?sig={}",
            soc.owner(),
            hex::encode(soc.id()),
            hex::encode(soc.signature())
        ));
        self.post_reference(url, soc.chunk().data(), options).await
    }

    async fn has_chunk(&self, address: &Address) -> Result<bool, ClientError> {
        self.exists(self.debug_url(&format!("chunks/{address}")))
            .await
    }

    async fn remove_chunk(&self, address: &Address) -> Result<(), ClientError> {
        let url = self.debug_url(&format!("chunks/{address}"));
        let response = self.http.delete(&url).send().await?;
        Self::check(response, &url).await?;
        Ok(())
    }

    async fn create_tag(&self) -> Result<TagStatus, ClientError> {
        let url = self.api_url("tags");
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let response = Self::check(response, &url).await?;
        Ok(response.json().await?)
    }

    async fn tag(&self, uid: u32) -> Result<TagStatus, ClientError> {
        self.get_json(self.api_url(&format!("tags/{uid}"))).await
    }

    async fn pin(&self, reference: &Address) -> Result<(), ClientError> {
        let url = self.api_url(&format!("pins/{reference}"));
        let response = self.http.post(&url).send().await?;
        Self::check(response, &url).await?;
        Ok(())
    }

    async fn unpin(&self, reference: &Address) -> Result<(), ClientError> {
        let url = self.api_url(&format!("pins/{reference}"));
        let response = self.http.delete(&url).send().await?;
        Self::check(response, &url).await?;
        Ok(())
    }

    async fn is_pinned(&self, reference: &Address) -> Result<bool, ClientError> {
        self.exists(self.api_url(&format!("pins/{reference}")))
            .await
    }

    async fn balances(&self) -> Result<Vec<Balance>, ClientError> {
        let response: BalancesResponse = self.get_json(self.debug_url("balances")).await?;
        Ok(response.balances)
    }

    async fn settlements(&self) -> Result<Settlements, ClientError> {
        self.get_json(self.debug_url("settlements")).await
    }

    async fn peers(&self) -> Result<Vec<Address>, ClientError> {
        let response: PeersResponse = self.get_json(self.debug_url("peers")).await?;
        Ok(response.peers.into_iter().map(|p| p.address).collect())
    }

    async fn topology(&self) -> Result<Topology, ClientError> {
        self.get_json(self.debug_url("topology")).await
    }

    async fn ping(&self, peer: &Address) -> Result<Pong, ClientError> {
        let url = self.debug_url(&format!("pingpong/{peer}"));
        let response = self.http.post(&url).send().await?;
        let response = Self::check(response, &url).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api: &str, debug: &str) -> HttpNodeClient {
        let endpoint = NodeEndpoint {
            name: "bee-0".into(),
            api_url: api.into(),
            debug_api_url: debug.into(),
            insecure_tls: false,
        };
        HttpNodeClient::new(endpoint, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn url_building() {
        let c = client("http://bee-0:1633", "http://bee-0:1635/");
        assert_eq!(c.api_url("chunks"), "http://bee-0:1633/chunks");
        assert_eq!(c.debug_url("addresses"), "http://bee-0:1635/addresses");
    }

    #[test]
    fn local_endpoint_default_ports() {
        let endpoint = NodeEndpoint::local("bee-1", "127.0.0.1");
        assert_eq!(endpoint.api_url, "http://127.0.0.1:1633");
        assert_eq!(endpoint.debug_api_url, "http://127.0.0.1:1635");
    }

    #[test]
    fn endpoint_from_toml() {
        let endpoint: NodeEndpoint = toml::from_str(
            r#"
            name = "bee-2"
            api-url = "https://bee-2.example:1633"
            debug-api-url = "https://bee-2.example:1635"
            insecure-tls = true
            "#,
        )
        .unwrap();
        assert!(endpoint.insecure_tls);
        assert_eq!(endpoint.name, "bee-2");
    }

    #[tokio::test]
    async fn unreachable_node_is_connection_error() {
        // Port 9 (discard) is closed on test hosts.
        let c = client("http://127.0.0.1:9", "http://127.0.0.1:9");
        let err = c.addresses().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::ConnectionFailed(_) | ClientError::RequestFailed(_)
        ));
    }
}
