//! TCP Acceptor: a framed read loop that multiplexes DNS-over-TCP queries from a
//! single stream onto the [`Transport`] pipeline, per RFC 1035 §4.2.2 framing.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

use crate::transport::Transport;

const MAX_MESSAGE_SIZE: usize = 65535;

/// Reads length-prefixed DNS queries from `stream`, dispatches each one
/// concurrently through `transport`, and writes back length-prefixed responses.
/// Returns once the stream is closed, either cleanly (zero-byte read) or due to
/// a read/write error or an oversize message.
pub async fn serve(transport: Arc<Transport>, stream: TcpStream) {
    let (mut reader, writer) = stream.into_split();
    let writer = Arc::new(AsyncMutex::new(writer));

    loop {
        let mut len_buf = [0u8; 2];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(error) => {
                tracing::debug!(%error, "TCP acceptor read error");
                break;
            }
        }

        let qlen = u16::from_be_bytes(len_buf) as usize;
        if qlen > MAX_MESSAGE_SIZE {
            tracing::debug!(qlen, "oversize query length prefix, closing stream");
            break;
        }

        let mut query = vec![0u8; qlen];
        if let Err(error) = reader.read_exact(&mut query).await {
            tracing::debug!(%error, "TCP acceptor short read");
            break;
        }

        let transport = transport.clone();
        let writer = writer.clone();
        tokio::spawn(async move {
            let (response, _status) = transport.query(&query).await;

            if response.len() > MAX_MESSAGE_SIZE {
                tracing::warn!(len = response.len(), "dropping oversize response");
                return;
            }

            let mut framed = Vec::with_capacity(2 + response.len());
            framed.extend_from_slice(&(response.len() as u16).to_be_bytes());
            framed.extend_from_slice(&response);

            let mut writer = writer.lock().await;
            if let Err(error) = writer.write_all(&framed).await {
                tracing::debug!(%error, "failed to write framed response, closing stream");
                let _ = writer.shutdown().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip_map::Resolver;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::net::TcpListener;

    struct NoopResolver;
    impl Resolver for NoopResolver {
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
    async fn bad_query_still_yields_a_well_framed_reply() {
        let transport = Arc::new(
            Transport::new(
                "https://doh.example/dns-query",
                &[],
                Arc::new(NoopResolver),
                None,
                None,
                None,
            )
            .unwrap(),
        );

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve(transport, stream).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let query = sample_query(0x9999);
        let mut framed = Vec::new();
        framed.extend_from_slice(&(query.len() as u16).to_be_bytes());
        framed.extend_from_slice(&query);
        client.write_all(&framed).await.unwrap();

        let mut len_buf = [0u8; 2];
        client.read_exact(&mut len_buf).await.unwrap();
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut response = vec![0u8; len];
        client.read_exact(&mut response).await.unwrap();

        assert_eq!(dns_wire::read_id(&response), Some(0x9999));

        drop(client);
        let _ = server_task.await;
    }
}
