//! Minimal pooled HTTP/2-over-TLS client used to reach the DoH endpoint.
//!
//! This is the component's "HTTPS client": a connection pool keyed by hostname,
//! wired to the [`Dialer`] so every new connection goes through IP-confirmation
//! feedback, and TLS via `rustls`. Connect, TLS handshake and response-header
//! waits are all individually bounded; reading the response body is not (that's
//! left to upstream peer behaviour, same as the rest of the stack).

use std::{collections::HashMap, net::SocketAddr, sync::Arc, sync::Once, time::Duration};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use rustls_pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::auth::{CertResolver, ClientAuthProvider};
use crate::dialer::Dialer;

type SendRequest = hyper::client::conn::http2::SendRequest<Full<Bytes>>;

struct PooledConnection {
    send_request: SendRequest,
    peer: SocketAddr,
}

/// A response together with the peer address of the connection it arrived on.
/// Kept around so the pipeline can confirm/disconfirm that address without
/// re-deriving it from the connection pool.
pub struct HttpsResponse {
    pub response: http::Response<Bytes>,
    pub peer: SocketAddr,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpsError {
    #[error("TLS handshake timed out")]
    HandshakeTimeout,
    #[error("timed out waiting for response headers")]
    HeaderTimeout,
    /// The request reached the server and a response was received, but reading
    /// the body itself failed. Distinct from [`HttpsError::Other`] so the
    /// caller can tell a body-read failure (attributable to the response, per
    /// spec §4.5 step 9) apart from a failure to reach the server at all.
    #[error("failed to read response body: {0}")]
    BodyRead(#[source] anyhow::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A transport error together with the peer address, if a connection was ever
/// established before the error occurred (so the caller can still disconfirm it).
pub struct HttpsFailure {
    pub error: HttpsError,
    pub peer: Option<SocketAddr>,
}

pub struct HttpsClient {
    dialer: Arc<Dialer>,
    tls_config: Arc<rustls::ClientConfig>,
    handshake_timeout: Duration,
    header_timeout: Duration,
    pool: Mutex<HashMap<String, PooledConnection>>,
}

static INSTALL_CRYPTO_PROVIDER: Once = Once::new();

impl HttpsClient {
    pub fn new(dialer: Arc<Dialer>, auth: Option<Arc<dyn ClientAuthProvider>>) -> Self {
        INSTALL_CRYPTO_PROVIDER.call_once(|| {
            let _ = rustls::crypto::ring::default_provider().install_default();
        });

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let builder = rustls::ClientConfig::builder().with_root_certificates(root_store);
        let mut config = match auth {
            Some(provider) => builder.with_client_cert_resolver(Arc::new(CertResolver(provider))),
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = vec![b"h2".to_vec()];

        Self {
            dialer,
            tls_config: Arc::new(config),
            handshake_timeout: Duration::from_secs(10),
            header_timeout: Duration::from_secs(20),
            pool: Mutex::new(HashMap::new()),
        }
    }

    pub async fn post(
        &self,
        host: &str,
        port: u16,
        request: http::Request<Bytes>,
    ) -> Result<HttpsResponse, HttpsFailure> {
        let pooled = self.pool.lock().remove(host);

        let PooledConnection { mut send_request, peer } = match pooled {
            Some(conn) if !conn.send_request.is_closed() => conn,
            _ => self
                .connect(host, port)
                .await
                .map_err(|error| HttpsFailure { error, peer: None })?,
        };

        if let Err(error) = send_request.ready().await {
            return Err(HttpsFailure {
                error: anyhow::Error::new(error)
                    .context("HTTP/2 connection is no longer ready")
                    .into(),
                peer: Some(peer),
            });
        }

        let (parts, body) = request.into_parts();
        let request = http::Request::from_parts(parts, Full::new(body));

        let response = match tokio::time::timeout(self.header_timeout, send_request.send_request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                return Err(HttpsFailure {
                    error: anyhow::Error::new(error).context("failed to send HTTP/2 request").into(),
                    peer: Some(peer),
                });
            }
            Err(_) => {
                return Err(HttpsFailure {
                    error: HttpsError::HeaderTimeout,
                    peer: Some(peer),
                });
            }
        };

        self.pool
            .lock()
            .insert(host.to_owned(), PooledConnection { send_request, peer });

        let (parts, incoming) = response.into_parts();
        let body = incoming
            .collect()
            .await
            .map_err(|error| HttpsFailure {
                error: HttpsError::BodyRead(anyhow::Error::new(error)),
                peer: Some(peer),
            })?
            .to_bytes();

        Ok(HttpsResponse {
            response: http::Response::from_parts(parts, body),
            peer,
        })
    }

    async fn connect(&self, host: &str, port: u16) -> Result<PooledConnection, HttpsError> {
        let (tcp_stream, ip) = self
            .dialer
            .dial(host, port)
            .await
            .map_err(|e| HttpsError::Other(e.into()))?;
        let peer = SocketAddr::new(ip, port);

        let handshake = async {
            let connector = TlsConnector::from(self.tls_config.clone());
            let server_name = ServerName::try_from(host.to_owned())
                .map_err(|e| HttpsError::Other(anyhow::Error::new(e)))?;
            let tls_stream = connector
                .connect(server_name, tcp_stream)
                .await
                .map_err(|e| HttpsError::Other(anyhow::Error::new(e).context("TLS handshake failed")))?;

            let mut builder = hyper::client::conn::http2::Builder::new(hyper_util::rt::TokioExecutor::new());
            builder.timer(hyper_util::rt::TokioTimer::default());

            let (send_request, connection) = builder
                .handshake(hyper_util::rt::TokioIo::new(tls_stream))
                .await
                .map_err(|e| HttpsError::Other(anyhow::Error::new(e).context("HTTP/2 handshake failed")))?;

            tokio::spawn(async move {
                if let Err(error) = connection.await {
                    tracing::debug!(%error, "HTTP/2 connection terminated");
                }
            });

            Ok::<_, HttpsError>(send_request)
        };

        let send_request = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| HttpsError::HandshakeTimeout)??;

        Ok(PooledConnection { send_request, peer })
    }
}
