//! Opens a TCP connection to the DoH server, preferring a known-good address.
//!
//! The actual connect is delegated to a [`SplitRetryDial`] external collaborator:
//! a TCP connector that performs a first-byte split to mitigate middlebox
//! interference, semantically equivalent to a plain connect for our purposes.

use std::{
    future::Future,
    io,
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use tokio::net::TcpStream;

use crate::ip_map::IpMap;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait SplitRetryDial: Send + Sync {
    fn dial(&self, addr: SocketAddr) -> BoxFuture<'static, io::Result<TcpStream>>;
}

/// Plain `connect(addr)`, used when no split-retry connector is supplied.
pub struct PlainDial;

impl SplitRetryDial for PlainDial {
    fn dial(&self, addr: SocketAddr) -> BoxFuture<'static, io::Result<TcpStream>> {
        Box::pin(async move { TcpStream::connect(addr).await })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to dial {host}:{port}: {source}")]
pub struct DialError {
    pub host: String,
    pub port: u16,
    #[source]
    pub source: io::Error,
}

pub struct Dialer {
    ipmap: Arc<IpMap>,
    connect_timeout: Duration,
    split_retry: Arc<dyn SplitRetryDial>,
}

impl Dialer {
    pub fn new(ipmap: Arc<IpMap>, split_retry: Arc<dyn SplitRetryDial>) -> Self {
        Self {
            ipmap,
            // Mutated only to set the connect timeout, per the transport's invariants.
            connect_timeout: Duration::from_secs(3),
            split_retry,
        }
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    /// Connects to `host:port`, trying the confirmed address first and falling
    /// back to the remaining candidates in insertion order. Returns the stream
    /// together with the address that succeeded, so the caller can confirm or
    /// disconfirm it without re-deriving which address was actually used.
    pub async fn dial(&self, host: &str, port: u16) -> Result<(TcpStream, IpAddr), DialError> {
        let set = self.ipmap.get(host);
        let confirmed = set.confirmed();

        let mut last_error = None;

        if let Some(ip) = confirmed {
            match self.try_connect(ip, port).await {
                Ok(stream) => return Ok((stream, ip)),
                Err(e) => {
                    set.disconfirm(ip);
                    last_error = Some(e);
                }
            }
        }

        for ip in set.get_all() {
            if Some(ip) == confirmed {
                continue;
            }

            match self.try_connect(ip, port).await {
                Ok(stream) => return Ok((stream, ip)),
                Err(e) => last_error = Some(e),
            }
        }

        Err(DialError {
            host: host.to_owned(),
            port,
            source: last_error
                .unwrap_or_else(|| io::Error::other("no candidate addresses for host")),
        })
    }

    async fn try_connect(&self, ip: IpAddr, port: u16) -> io::Result<TcpStream> {
        let addr = SocketAddr::new(ip, port);

        match tokio::time::timeout(self.connect_timeout, self.split_retry.dial(addr)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        }
    }
}
