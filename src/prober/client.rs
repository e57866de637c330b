//! CSI gRPC Client
//!
//! Issues the four read-only CSI calls over a tonic channel. The messages are
//! the hand-described subset in [`super::csi`], encoded with the prost codec,
//! so no generated service stubs are needed.

use crate::domain::ports::CsiClient;
use crate::error::{Error, Result};
use crate::prober::csi::{
    ControllerGetCapabilitiesRequest, ControllerGetCapabilitiesResponse,
    GetPluginCapabilitiesRequest, GetPluginCapabilitiesResponse, GetPluginInfoRequest,
    GetPluginInfoResponse, NodeGetCapabilitiesRequest, NodeGetCapabilitiesResponse,
    CONTROLLER_GET_CAPABILITIES, GET_PLUGIN_CAPABILITIES, GET_PLUGIN_INFO, NODE_GET_CAPABILITIES,
};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use std::time::Duration;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint, Uri};
use tracing::{debug, info, warn};

/// Where the CSI plugin listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsiAddress {
    /// Unix domain socket path
    Unix(String),
    /// `http://` or `https://` endpoint
    Tcp(String),
}

impl CsiAddress {
    /// Parse `unix:///run/csi/socket`, `/run/csi/socket`, `http://host:port`
    /// or a bare `host:port`
    pub fn parse(address: &str) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::Configuration("CSI address must not be empty".into()));
        }
        if let Some(path) = address.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(Error::Configuration(format!(
                    "CSI address {} has no socket path",
                    address
                )));
            }
            return Ok(CsiAddress::Unix(path.to_string()));
        }
        if address.starts_with('/') {
            return Ok(CsiAddress::Unix(address.to_string()));
        }
        if address.starts_with("http://") || address.starts_with("https://") {
            return Ok(CsiAddress::Tcp(address.to_string()));
        }
        Ok(CsiAddress::Tcp(format!("http://{}", address)))
    }
}

impl std::fmt::Display for CsiAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CsiAddress::Unix(path) => write!(f, "unix://{}", path),
            CsiAddress::Tcp(url) => write!(f, "{}", url),
        }
    }
}

/// CSI client over a tonic channel
#[derive(Debug, Clone)]
pub struct GrpcCsiClient {
    channel: Channel,
}

impl GrpcCsiClient {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Connect once
    pub async fn connect(address: &CsiAddress) -> Result<Self> {
        let channel = match address {
            CsiAddress::Unix(path) => {
                let path = path.clone();
                // The URI is required by the endpoint but ignored by the connector
                Endpoint::try_from("http://[::]:50051")?
                    .connect_with_connector(tower::service_fn(move |_: Uri| {
                        tokio::net::UnixStream::connect(path.clone())
                    }))
                    .await?
            }
            CsiAddress::Tcp(url) => Endpoint::from_shared(url.clone())?.connect().await?,
        };
        Ok(Self::new(channel))
    }

    /// Connect, retrying with exponential backoff until `max_elapsed` passes.
    /// `None` retries until it succeeds.
    pub async fn connect_with_retry(
        address: &CsiAddress,
        max_elapsed: Option<Duration>,
    ) -> Result<Self> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(30))
            .with_max_elapsed_time(max_elapsed)
            .build();

        let client = backoff::future::retry_notify(
            policy,
            || async move { Self::connect(address).await.map_err(backoff::Error::transient) },
            |e: Error, next: Duration| {
                warn!(address = %address, error = %e, retry_in = ?next, "Failed to connect to CSI plugin");
            },
        )
        .await?;

        info!(address = %address, "Connected to CSI plugin");
        Ok(client)
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let method = path.rsplit('/').next().unwrap_or(path);
        debug!(method, "Calling CSI plugin");

        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready().await?;

        let codec = tonic::codec::ProstCodec::<Req, Resp>::default();
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await
            .map_err(|status| Error::Rpc { method, status })?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl CsiClient for GrpcCsiClient {
    async fn get_plugin_info(&self) -> Result<GetPluginInfoResponse> {
        self.unary(GET_PLUGIN_INFO, GetPluginInfoRequest {}).await
    }

    async fn get_plugin_capabilities(&self) -> Result<GetPluginCapabilitiesResponse> {
        self.unary(GET_PLUGIN_CAPABILITIES, GetPluginCapabilitiesRequest {})
            .await
    }

    async fn controller_get_capabilities(&self) -> Result<ControllerGetCapabilitiesResponse> {
        self.unary(
            CONTROLLER_GET_CAPABILITIES,
            ControllerGetCapabilitiesRequest {},
        )
        .await
    }

    async fn node_get_capabilities(&self) -> Result<NodeGetCapabilitiesResponse> {
        self.unary(NODE_GET_CAPABILITIES, NodeGetCapabilitiesRequest {})
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_addresses() {
        assert_eq!(
            CsiAddress::parse("/run/csi/socket").unwrap(),
            CsiAddress::Unix("/run/csi/socket".into())
        );
        assert_eq!(
            CsiAddress::parse("unix:///var/lib/kubelet/plugins/csi.sock").unwrap(),
            CsiAddress::Unix("/var/lib/kubelet/plugins/csi.sock".into())
        );
        assert_eq!(
            CsiAddress::parse("localhost:10000").unwrap(),
            CsiAddress::Tcp("http://localhost:10000".into())
        );
        assert_eq!(
            CsiAddress::parse("https://csi.example.com:443").unwrap(),
            CsiAddress::Tcp("https://csi.example.com:443".into())
        );
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_matches!(CsiAddress::parse(""), Err(Error::Configuration(_)));
        assert_matches!(CsiAddress::parse("unix://"), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_display_round_trips_unix() {
        let address = CsiAddress::parse("/run/csi/socket").unwrap();
        assert_eq!(address.to_string(), "unix:///run/csi/socket");
    }

    #[tokio::test]
    async fn test_connect_missing_socket_fails() {
        let address = CsiAddress::Unix("/nonexistent/csi.sock".into());
        assert_matches!(
            GrpcCsiClient::connect(&address).await,
            Err(Error::Transport(_))
        );
    }
}
