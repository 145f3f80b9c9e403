//! The Query Pipeline: the central algorithm tying every other component together.
//!
//! One [`Transport`] is built per configured DoH resolver and shared by every
//! inbound query. `Transport::query` is the entry point invoked per query by
//! the [`crate::acceptor`] loop.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::Uri;
use parking_lot::Mutex;

use crate::auth::ClientAuthProvider;
use crate::blocklist::{self, BlocklistOracle};
use crate::dialer::{Dialer, PlainDial, SplitRetryDial};
use crate::error::{QueryError, Status};
use crate::hangover::HangoverGate;
use crate::https_client::HttpsClient;
use crate::ip_map::{IpMap, Resolver};
use crate::listener::{Listener, Summary};

const USER_AGENT: &str = "Intra";
const DNS_MESSAGE_MIME: &str = "application/dns-message";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("DoH URL must use the https scheme")]
    NotHttps,
    #[error("DoH URL is missing a host")]
    MissingHost,
    #[error(transparent)]
    InvalidUrl(#[from] http::uri::InvalidUri),
}

/// A value configured once per DoH resolver, safely shareable by many concurrent
/// callers — one per inbound stub DNS request.
pub struct Transport {
    url: Uri,
    hostname: String,
    port: u16,
    ipmap: Arc<IpMap>,
    // Retained per the data model even though `http_client` holds its own handle;
    // nothing else on `Transport` needs to dial directly today.
    #[allow(dead_code)]
    dialer: Arc<Dialer>,
    http_client: HttpsClient,
    listener: Option<Arc<dyn Listener>>,
    blocklist_oracle: Mutex<Option<Arc<dyn BlocklistOracle>>>,
    hangover: HangoverGate,
}

impl Transport {
    /// Builds a transport for `url` (must be `https://host[:port]/path`), seeding
    /// the IP map from `bootstrap` addresses. `dialer` defaults to a plain TCP
    /// connect with no split-retry behaviour when `None`.
    pub fn new(
        url: &str,
        bootstrap: &[String],
        resolver: Arc<dyn Resolver>,
        split_retry: Option<Arc<dyn SplitRetryDial>>,
        auth: Option<Arc<dyn ClientAuthProvider>>,
        listener: Option<Arc<dyn Listener>>,
    ) -> Result<Self, TransportError> {
        let uri: Uri = url.parse()?;
        if uri.scheme_str() != Some("https") {
            return Err(TransportError::NotHttps);
        }
        let hostname = uri.host().ok_or(TransportError::MissingHost)?.to_owned();
        let port = uri.port_u16().unwrap_or(443);

        let ipmap = Arc::new(IpMap::new(resolver));
        ipmap.of(&hostname, bootstrap);

        let split_retry = split_retry.unwrap_or_else(|| Arc::new(PlainDial));
        let dialer = Arc::new(Dialer::new(ipmap.clone(), split_retry));
        let http_client = HttpsClient::new(dialer.clone(), auth);

        Ok(Self {
            url: uri,
            hostname,
            port,
            ipmap,
            dialer,
            http_client,
            listener,
            blocklist_oracle: Mutex::new(None),
            hangover: HangoverGate::new(),
        })
    }

    pub fn set_blocklist_oracle(&self, oracle: Option<Arc<dyn BlocklistOracle>>) {
        *self.blocklist_oracle.lock() = oracle;
    }

    /// Runs a single query through the pipeline. Always returns a byte string the
    /// caller can write back to the stub resolver (a synthesized SERVFAIL when no
    /// usable upstream response exists), alongside its classification.
    pub async fn query(&self, query: &[u8]) -> (Vec<u8>, Status) {
        let start = Instant::now();
        let token = self.listener.as_ref().map(|l| l.on_query(&self.url.to_string()));

        let oracle = self.blocklist_oracle.lock().clone();

        let outcome = self.run(query, oracle.as_ref()).await;

        let (response, status, http_status, blocklists, server_ip) = match outcome {
            Ok(Success {
                response,
                http_status,
                blocklists,
                server_ip,
            }) => (response, Status::Complete, http_status, blocklists, server_ip),
            Err(Failure {
                error,
                server_ip,
                http_status,
            }) => {
                if !matches!(error, QueryError::SendFailed(_)) {
                    self.hangover.arm();
                }

                let response = dns_wire::synthesize_servfail(query).unwrap_or_default();
                (
                    response,
                    error.status(),
                    http_status.unwrap_or_else(|| error.http_status()),
                    String::new(),
                    server_ip,
                )
            }
        };

        if let (Some(listener), Some(token)) = (&self.listener, token) {
            listener.on_response(
                token,
                Summary {
                    latency_seconds: start.elapsed().as_secs_f64(),
                    query_bytes: query.to_vec(),
                    response_bytes: response.clone(),
                    server_ip: server_ip.unwrap_or_default(),
                    status,
                    http_status,
                    blocklists,
                },
            );
        }

        (response, status)
    }

    async fn run(&self, query: &[u8], oracle: Option<&Arc<dyn BlocklistOracle>>) -> Result<Success, Failure> {
        if query.len() < 2 {
            return Err(Failure::before_network(QueryError::BadQuery));
        }

        if let blocklist::PreBlock::Blocked {
            response,
            blocklists,
        } = blocklist::apply_pre_block(oracle, query)
        {
            return Ok(Success {
                response,
                http_status: 200,
                blocklists,
                server_ip: None,
            });
        }

        if self.hangover.in_hangover() {
            return Err(Failure::before_network(QueryError::Hangover));
        }

        let mut padded = dns_wire::pad(query).map_err(|e| Failure::before_network(QueryError::Padding(e)))?;

        let original_id = dns_wire::read_id(&padded).unwrap_or(0);
        dns_wire::write_id(&mut padded, 0);

        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(&self.url)
            .header(http::header::CONTENT_TYPE, DNS_MESSAGE_MIME)
            .header(http::header::ACCEPT, DNS_MESSAGE_MIME)
            .header(http::header::USER_AGENT, USER_AGENT)
            .body(Bytes::from(padded))
            .expect("request is well-formed by construction");

        let send_result = self.http_client.post(&self.hostname, self.port, request).await;

        let response = match send_result {
            Ok(response) => response,
            Err(failure) => {
                if let Some(peer) = failure.peer {
                    self.ipmap.get(&self.hostname).disconfirm(peer.ip());
                }

                // A body-read failure means the request reached the server and a
                // response came back; that's attributable to the response, not the
                // transport, so it's classified BadResponse (and arms hangover)
                // rather than SendFailed.
                let error = match failure.error {
                    crate::https_client::HttpsError::BodyRead(source) => QueryError::BadResponseBody(source),
                    other => QueryError::SendFailed(anyhow::anyhow!(other)),
                };

                return Err(Failure {
                    error,
                    server_ip: None,
                    http_status: None,
                });
            }
        };

        let server_ip = response.peer.ip().to_string();

        if response.response.status() != http::StatusCode::OK {
            let status_code = response.response.status().as_u16();
            self.ipmap.get(&self.hostname).disconfirm(response.peer.ip());
            return Err(Failure {
                error: QueryError::HttpStatus(status_code),
                server_ip: Some(server_ip),
                http_status: Some(status_code),
            });
        }

        let mut answer = response.response.body().to_vec();
        if answer.len() < 2 || dns_wire::read_id(&answer) != Some(0) {
            self.ipmap.get(&self.hostname).disconfirm(response.peer.ip());
            return Err(Failure {
                error: QueryError::BadResponseId,
                server_ip: Some(server_ip),
                http_status: None,
            });
        }

        dns_wire::write_id(&mut answer, original_id);

        let post_block = blocklist::apply_post_block(oracle, query, response.response.headers(), &answer);
        if let Some(replacement) = post_block.replacement {
            answer = replacement;
        }

        self.ipmap.get(&self.hostname).confirm(response.peer.ip());

        Ok(Success {
            response: answer,
            http_status: 200,
            blocklists: post_block.blocklists,
            server_ip: Some(server_ip),
        })
    }
}

struct Success {
    response: Vec<u8>,
    http_status: u16,
    blocklists: String,
    server_ip: Option<String>,
}

struct Failure {
    error: QueryError,
    server_ip: Option<String>,
    http_status: Option<u16>,
}

impl Failure {
    fn before_network(error: QueryError) -> Self {
        Self {
            error,
            server_ip: None,
            http_status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    struct NoopResolver;
    impl crate::ip_map::Resolver for NoopResolver {
        fn resolve(&self, _host: &str) -> Vec<IpAddr> {
            Vec::new()
        }
    }

    fn sample_query(id: u16) -> Vec<u8> {
        use domain::base::{MessageBuilder, Name, Question, Rtype};
        let mut builder = MessageBuilder::new_vec().question();
        builder.header_mut().set_id(id);
        builder
            .push(Question::new_in(Name::vec_from_str("example.com").unwrap(), Rtype::A))
            .unwrap();
        builder.finish()
    }

    #[tokio::test]
    async fn bad_query_is_rejected_before_any_network_activity() {
        let transport = Transport::new(
            "https://doh.example/dns-query",
            &[],
            Arc::new(NoopResolver),
            None,
            None,
            None,
        )
        .unwrap();

        let (_response, status) = transport.query(&[0x01]).await;

        // Too short to even carry a DNS header, so there's nothing to synthesize
        // a SERVFAIL from either; the caller still gets a definitive classification.
        assert_eq!(status, Status::BadQuery);
    }

    #[tokio::test]
    async fn hangover_short_circuits_without_touching_network() {
        let transport = Transport::new(
            "https://doh.example/dns-query",
            &[],
            Arc::new(NoopResolver),
            None,
            None,
            None,
        )
        .unwrap();
        transport.hangover.arm();

        let query = sample_query(0x1234);
        let (response, status) = transport.query(&query).await;

        assert_eq!(status, Status::HttpError);
        assert_eq!(dns_wire::read_id(&response), Some(0x1234));
    }

    #[test]
    fn rejects_non_https_url() {
        let result = Transport::new(
            "http://doh.example/dns-query",
            &[],
            Arc::new(NoopResolver),
            None,
            None,
            None,
        );

        assert!(matches!(result, Err(TransportError::NotHttps)));
    }

    #[test]
    fn defaults_port_to_443() {
        let transport = Transport::new(
            "https://doh.example/dns-query",
            &[],
            Arc::new(NoopResolver),
            None,
            None,
            None,
        )
        .unwrap();

        assert_eq!(transport.port, 443);
        assert_eq!(transport.hostname, "doh.example");
    }
}
