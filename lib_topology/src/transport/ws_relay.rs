//! # WebSocket Relay Transport
//!
//! Subscribes through a relay that terminates the devices' telemetry
//! sessions and re-publishes each subscription on a WebSocket:
//!
//! ```text
//! ws[s]://{address}:{port}/subscriptions/{subscription-id}
//! ```
//!
//! Binary frames carry one encoded telemetry message each. Text frames carry
//! a JSON envelope `{"message": "<base64>"}` wrapping the same bytes. The
//! device's credentials go out as HTTP basic authorization on the upgrade
//! request. When the descriptor references a certificate, the connection
//! uses `wss://` and trusts exactly the certificates in that PEM file.

use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use futures_util::{future, StreamExt};
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::CertificateDer;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async_tls_with_config, Connector};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::model::{DeviceDescriptor, ResourceKind};
use crate::transport::{TelemetryStream, TelemetryTransport};

/// JSON envelope used by text frames.
#[derive(Deserialize)]
struct RelayEnvelope {
    /// Base64 encoded telemetry message.
    message: String,
}

/// [`TelemetryTransport`] over a WebSocket relay.
#[derive(Debug, Clone)]
pub struct WsRelayTransport {
    path_prefix: String,
}

impl Default for WsRelayTransport {
    fn default() -> Self {
        Self {
            path_prefix: "/subscriptions".to_string(),
        }
    }
}

impl WsRelayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the path segment in front of the subscription id.
    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = prefix.into();
        self
    }

    /// The URL a subscription for `device`/`kind` connects to.
    pub fn url(&self, device: &DeviceDescriptor, kind: ResourceKind) -> String {
        let scheme = if device.certificate.is_some() { "wss" } else { "ws" };
        format!(
            "{scheme}://{}{}/{}",
            device.target(),
            self.path_prefix,
            kind.subscription_id()
        )
    }
}

/// Builds a TLS connector trusting only the certificates in `path`.
async fn load_connector(path: &Path) -> Result<Connector, TransportError> {
    let cert_error = |reason: String| TransportError::Certificate {
        path: path.display().to_string(),
        reason,
    };

    let pem = tokio::fs::read(path).await.map_err(|e| cert_error(e.to_string()))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| cert_error(e.to_string()))?;
    if certs.is_empty() {
        return Err(cert_error("no certificates in file".to_string()));
    }

    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots.add(cert).map_err(|e| cert_error(e.to_string()))?;
    }

    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| cert_error(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Connector::Rustls(Arc::new(config)))
}

/// Maps one WebSocket frame to a telemetry item, or `None` for frames that
/// carry no telemetry.
fn frame_to_item(device: &str, frame: Result<WsMessage, tokio_tungstenite::tungstenite::Error>) -> Option<Result<Bytes, TransportError>> {
    match frame {
        Ok(WsMessage::Binary(data)) => Some(Ok(Bytes::copy_from_slice(&data))),
        Ok(WsMessage::Text(text)) => {
            let decoded = serde_json::from_str::<RelayEnvelope>(&text)
                .map_err(|e| e.to_string())
                .and_then(|env| general_purpose::STANDARD.decode(env.message).map_err(|e| e.to_string()));
            match decoded {
                Ok(bin) => Some(Ok(Bytes::from(bin))),
                Err(reason) => {
                    warn!(device, %reason, "dropping unreadable text frame");
                    None
                }
            }
        }
        Ok(WsMessage::Close(frame)) => {
            debug!(device, ?frame, "relay closed subscription");
            None
        }
        Ok(_) => None,
        Err(e) => Some(Err(TransportError::Stream(e.to_string()))),
    }
}

impl TelemetryTransport for WsRelayTransport {
    async fn subscribe(
        &self,
        device: &DeviceDescriptor,
        kind: ResourceKind,
    ) -> Result<TelemetryStream, TransportError> {
        let url = self.url(device, kind);
        let connect_error = |reason: String| TransportError::Connect {
            target: url.clone(),
            reason,
        };

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_error(e.to_string()))?;

        let creds = &device.credentials;
        if !creds.username.is_empty() {
            let token = general_purpose::STANDARD.encode(format!("{}:{}", creds.username, creds.password));
            let value = HeaderValue::from_str(&format!("Basic {token}"))
                .map_err(|e| connect_error(e.to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let connector = match &device.certificate {
            Some(path) => Some(load_connector(path).await?),
            None => None,
        };

        let (ws_stream, _) = connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        info!(device = %device.name, %kind, %url, "subscribed through relay");

        let name = device.name.clone();
        let stream = ws_stream.filter_map(move |frame| future::ready(frame_to_item(&name, frame)));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Credentials;

    fn device(certificate: Option<&str>) -> DeviceDescriptor {
        DeviceDescriptor {
            name: "R1".to_string(),
            address: "10.10.10.1".to_string(),
            port: 8443,
            credentials: Credentials::default(),
            certificate: certificate.map(Into::into),
        }
    }

    #[test]
    fn test_url_follows_certificate() {
        let relay = WsRelayTransport::new();
        assert_eq!(
            relay.url(&device(None), ResourceKind::Interface),
            "ws://10.10.10.1:8443/subscriptions/tviewerIFCS"
        );
        assert_eq!(
            relay.url(&device(Some("certs/R1.pem")), ResourceKind::Neighbor),
            "wss://10.10.10.1:8443/subscriptions/tviewerISIS"
        );
    }

    #[test]
    fn test_text_frames_are_unwrapped() {
        let text = format!(r#"{{"message":"{}"}}"#, general_purpose::STANDARD.encode([1u8, 2, 3]));
        let item = frame_to_item("R1", Ok(WsMessage::Text(text.into())));
        assert_eq!(item, Some(Ok(Bytes::from_static(&[1, 2, 3]))));

        assert_eq!(frame_to_item("R1", Ok(WsMessage::Text("not json".into()))), None);
    }

    #[tokio::test]
    async fn test_missing_certificate_file_is_reported() {
        let res = load_connector(Path::new("/nonexistent/R1.pem")).await;
        assert!(matches!(res, Err(TransportError::Certificate { .. })));
    }
}
