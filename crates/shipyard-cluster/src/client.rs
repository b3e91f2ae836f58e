//! HTTP cluster gateway.
//!
//! Speaks the Kubernetes REST API over HTTP/1.1 to an API-server proxy
//! (for example `kubectl proxy`), which handles authentication. Each
//! request uses its own connection and is bounded by the configured
//! request timeout.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};
use crate::gateway::ClusterGateway;
use crate::objects::*;

pub struct HttpCluster {
    /// Base URL as configured, for display.
    api_url: String,
    /// `host:port` to connect to.
    address: String,
    /// Value of the `Host` header.
    host: String,
    timeout: Duration,
}

impl HttpCluster {
    pub fn new(api_url: &str, timeout: Duration) -> ClusterResult<Self> {
        let uri: http::Uri = api_url
            .parse()
            .map_err(|e: http::uri::InvalidUri| ClusterError::Invalid(e.to_string()))?;
        if uri.scheme_str() != Some("http") {
            return Err(ClusterError::Invalid(format!(
                "unsupported API url {api_url}: only http:// endpoints are supported"
            )));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| ClusterError::Invalid(format!("API url {api_url} has no host")))?;
        let port = authority.port_u16().unwrap_or(80);
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            address: format!("{}:{port}", authority.host()),
            host: authority.as_str().to_string(),
            timeout,
        })
    }

    async fn request(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> ClusterResult<Bytes> {
        match tokio::time::timeout(self.timeout, self.exchange(method, path, body)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(path, "cluster request timed out");
                Err(ClusterError::Timeout(self.timeout))
            }
        }
    }

    async fn exchange(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> ClusterResult<Bytes> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| ClusterError::Transport(format!("connect {}: {e}", self.address)))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ClusterError::Transport(format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(path)
            .header(HOST, &self.host)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, "shipyard/0.1");
        let payload = match body {
            Some(bytes) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Bytes::from(bytes)
            }
            None => Bytes::new(),
        };
        let req = builder
            .body(Full::new(payload))
            .map_err(|e| ClusterError::Invalid(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?
            .to_bytes();

        debug!(%method, path, status = status.as_u16(), "cluster request");

        if status == StatusCode::NOT_FOUND {
            return Err(ClusterError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(ClusterError::Api {
                status: status.as_u16(),
                message: api_message(&bytes),
            });
        }
        Ok(bytes)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClusterResult<T> {
        let bytes = self.request(Method::GET, path, None).await?;
        serde_json::from_slice(&bytes).map_err(|e| ClusterError::Decode(e.to_string()))
    }

    async fn list<T: DeserializeOwned>(&self, path: &str) -> ClusterResult<Vec<T>> {
        let list: ObjectList<T> = self.get(path).await?;
        Ok(list.items)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> ClusterResult<T> {
        let payload = serde_json::to_vec(body).map_err(|e| ClusterError::Invalid(e.to_string()))?;
        let bytes = self.request(Method::POST, path, Some(payload)).await?;
        serde_json::from_slice(&bytes).map_err(|e| ClusterError::Decode(e.to_string()))
    }

    async fn delete(&self, path: &str) -> ClusterResult<()> {
        self.request(Method::DELETE, path, None).await?;
        Ok(())
    }
}

/// The `message` field of a Kubernetes `Status` body, or the raw text.
fn api_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

/// Validate a name before it is placed in a request path.
fn segment(value: &str) -> ClusterResult<&str> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if valid {
        Ok(value)
    } else {
        Err(ClusterError::Invalid(format!("invalid object name {value:?}")))
    }
}

#[async_trait]
impl ClusterGateway for HttpCluster {
    async fn get_namespace(&self, name: &str) -> ClusterResult<Namespace> {
        self.get(&format!("/api/v1/namespaces/{}", segment(name)?)).await
    }

    async fn create_namespace(&self, name: &str) -> ClusterResult<Namespace> {
        self.post("/api/v1/namespaces", &Namespace::new(segment(name)?)).await
    }

    async fn list_namespaces(&self) -> ClusterResult<Vec<Namespace>> {
        self.list("/api/v1/namespaces").await
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> ClusterResult<Workload> {
        self.get(&format!(
            "/apis/apps/v1/namespaces/{}/deployments/{}",
            segment(namespace)?,
            segment(name)?
        ))
        .await
    }

    async fn create_workload(&self, namespace: &str, workload: &Workload) -> ClusterResult<Workload> {
        self.post(
            &format!("/apis/apps/v1/namespaces/{}/deployments", segment(namespace)?),
            workload,
        )
        .await
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.delete(&format!(
            "/apis/apps/v1/namespaces/{}/deployments/{}",
            segment(namespace)?,
            segment(name)?
        ))
        .await
    }

    async fn list_workloads(&self) -> ClusterResult<Vec<Workload>> {
        self.list("/apis/apps/v1/deployments").await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> ClusterResult<Service> {
        self.get(&format!(
            "/api/v1/namespaces/{}/services/{}",
            segment(namespace)?,
            segment(name)?
        ))
        .await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> ClusterResult<Service> {
        self.post(
            &format!("/api/v1/namespaces/{}/services", segment(namespace)?),
            service,
        )
        .await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.delete(&format!(
            "/api/v1/namespaces/{}/services/{}",
            segment(namespace)?,
            segment(name)?
        ))
        .await
    }

    async fn list_services(&self) -> ClusterResult<Vec<Service>> {
        self.list("/api/v1/services").await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> ClusterResult<Pod> {
        self.get(&format!(
            "/api/v1/namespaces/{}/pods/{}",
            segment(namespace)?,
            segment(name)?
        ))
        .await
    }

    async fn list_pods(&self) -> ClusterResult<Vec<Pod>> {
        self.list("/api/v1/pods").await
    }

    async fn get_replica_set(&self, namespace: &str, name: &str) -> ClusterResult<ReplicaSet> {
        self.get(&format!(
            "/apis/apps/v1/namespaces/{}/replicasets/{}",
            segment(namespace)?,
            segment(name)?
        ))
        .await
    }

    async fn list_nodes(&self) -> ClusterResult<Vec<Node>> {
        self.list("/api/v1/nodes").await
    }

    async fn server_version(&self) -> ClusterResult<VersionInfo> {
        self.get("/version").await
    }

    fn endpoint(&self) -> String {
        self.api_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accept one connection, answer with the canned response, and return
    /// the request head that was received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&head).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn get_namespace_decodes_body() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"metadata":{"name":"team-x"},"status":{"phase":"Active"}}"#,
        )
        .await;
        let cluster = HttpCluster::new(&url, Duration::from_secs(5)).unwrap();

        let ns = cluster.get_namespace("team-x").await.unwrap();
        assert_eq!(ns.metadata.name, "team-x");
        assert_eq!(ns.phase(), "Active");

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /api/v1/namespaces/team-x HTTP/1.1"));
    }

    #[tokio::test]
    async fn not_found_maps_to_not_found() {
        let (url, _server) = serve_once("404 Not Found", r#"{"message":"deployments \"api\" not found"}"#).await;
        let cluster = HttpCluster::new(&url, Duration::from_secs(5)).unwrap();

        let err = cluster.get_workload("default", "api").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn server_error_carries_status_message() {
        let (url, _server) = serve_once("500 Internal Server Error", r#"{"message":"etcd unavailable"}"#).await;
        let cluster = HttpCluster::new(&url, Duration::from_secs(5)).unwrap();

        match cluster.list_pods().await.unwrap_err() {
            ClusterError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "etcd unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        let cluster = HttpCluster::new(&format!("http://{addr}"), Duration::from_millis(100)).unwrap();

        let err = cluster.list_nodes().await.unwrap_err();
        assert!(matches!(err, ClusterError::Timeout(_)));
    }

    #[tokio::test]
    async fn unsafe_names_are_rejected_before_sending() {
        let cluster = HttpCluster::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let err = cluster.get_service("default", "../secrets").await.unwrap_err();
        assert!(matches!(err, ClusterError::Invalid(_)));
    }

    #[test]
    fn https_urls_are_rejected() {
        assert!(HttpCluster::new("https://k8s.example.com", Duration::from_secs(1)).is_err());
        let cluster = HttpCluster::new("http://127.0.0.1:8001/", Duration::from_secs(1)).unwrap();
        assert_eq!(cluster.endpoint(), "http://127.0.0.1:8001");
    }
}
