//! Integration tests for Shadowline
//!
//! Runs a real local server on loopback against a fake upstream proxy that
//! decrypts the upstream stream, checks the header and one-time auth tags and
//! echoes every payload back encrypted.

use shadowline::crypto::{
    evp_bytes_to_key, prepare_key, Authenticator, Decryptor, Encryptor, HmacSha1, KeyMaterial,
    Method,
};
use shadowline::protocol::{CONNECT_REPLY, OTA_FLAG, OTA_TAG_LEN};
use shadowline::proxy::{LocalServer, SessionConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

const PASSWORD: &str = "integration-password";

/// Upstream side of the encrypted link
struct Upstream {
    stream: TcpStream,
    decryptor: Decryptor,
    plain: Vec<u8>,
}

impl Upstream {
    /// Read until `n` plaintext bytes are buffered. `false` on EOF.
    async fn fill(&mut self, n: usize) -> bool {
        let mut buf = vec![0u8; 32 * 1024];
        while self.plain.len() < n {
            let read = self.stream.read(&mut buf).await.unwrap();
            if read == 0 {
                return false;
            }
            let plain = self.decryptor.decrypt(&buf[..read]).unwrap();
            self.plain.extend_from_slice(&plain);
        }
        true
    }

    async fn take(&mut self, n: usize) -> Option<Vec<u8>> {
        if self.fill(n).await {
            Some(self.plain.drain(..n).collect())
        } else {
            None
        }
    }

    /// Whatever plaintext the next read yields
    async fn take_some(&mut self) -> Option<Vec<u8>> {
        if self.fill(1).await {
            Some(std::mem::take(&mut self.plain))
        } else {
            None
        }
    }

    fn iv(&self) -> Vec<u8> {
        self.decryptor.iv().unwrap().to_vec()
    }
}

/// Start a fake upstream proxy serving a single connection. Resolves the
/// channel with the requested target once the header has been verified.
async fn spawn_upstream(method: Method, one_time_auth: bool) -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (target_tx, target_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let key = evp_bytes_to_key(PASSWORD.as_bytes(), method.key_len());
        let mut upstream = Upstream {
            stream,
            decryptor: Decryptor::new(method, &key),
            plain: Vec::new(),
        };

        let mut header = upstream.take(1).await.unwrap();
        let atyp = header[0];
        assert_eq!(atyp & OTA_FLAG != 0, one_time_auth);

        let target = match atyp & 0x0f {
            0x01 => {
                let rest = upstream.take(6).await.unwrap();
                header.extend_from_slice(&rest);
                format!(
                    "{}.{}.{}.{}:{}",
                    rest[0],
                    rest[1],
                    rest[2],
                    rest[3],
                    u16::from_be_bytes([rest[4], rest[5]])
                )
            }
            0x03 => {
                let len = upstream.take(1).await.unwrap();
                let rest = upstream.take(len[0] as usize + 2).await.unwrap();
                header.extend_from_slice(&len);
                header.extend_from_slice(&rest);
                let (name, port) = rest.split_at(rest.len() - 2);
                format!(
                    "{}:{}",
                    String::from_utf8_lossy(name),
                    u16::from_be_bytes([port[0], port[1]])
                )
            }
            other => panic!("unexpected address type {:#x}", other),
        };

        let iv = upstream.iv();
        if one_time_auth {
            let tag = upstream.take(OTA_TAG_LEN).await.unwrap();
            let expected = HmacSha1
                .do_auth(&prepare_key(&iv, KeyMaterial::Bytes(&key)), &header)
                .unwrap();
            assert_eq!(tag, expected.to_vec(), "header tag mismatch");
        }
        target_tx.send(target).unwrap();

        let mut encryptor = Encryptor::with_random_iv(method, &key).unwrap();
        let mut counter: u32 = 0;
        loop {
            let payload = if one_time_auth {
                let Some(len) = upstream.take(2).await else { break };
                let len = u16::from_be_bytes([len[0], len[1]]) as usize;
                let tag = upstream.take(OTA_TAG_LEN).await.unwrap();
                let payload = upstream.take(len).await.unwrap();
                let expected = HmacSha1
                    .do_auth(&prepare_key(&iv, KeyMaterial::Counter(counter)), &payload)
                    .unwrap();
                assert_eq!(tag, expected.to_vec(), "chunk {} tag mismatch", counter);
                counter += 1;
                payload
            } else {
                let Some(payload) = upstream.take_some().await else { break };
                payload
            };

            let ciphertext = encryptor.encrypt(&payload).unwrap();
            if upstream.stream.write_all(&ciphertext).await.is_err() {
                break;
            }
        }
    });

    (addr, target_rx)
}

async fn spawn_local(config: SessionConfig) -> SocketAddr {
    let server = LocalServer::bind("127.0.0.1:0", config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

/// Greeting plus CONNECT; returns the stream once the connect reply arrived
async fn socks_connect(local: SocketAddr, request: &[u8]) -> TcpStream {
    let mut client = TcpStream::connect(local).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);

    client.write_all(request).await.unwrap();
    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, CONNECT_REPLY);

    client
}

fn domain_request(domain: &str, port: u16) -> Vec<u8> {
    let mut request = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
    request.extend_from_slice(domain.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    request
}

async fn echo(client: &mut TcpStream, data: &[u8]) {
    client.write_all(data).await.unwrap();
    let mut buf = vec![0u8; data.len()];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(buf, data);
}

#[tokio::test]
async fn test_domain_connect_and_echo() {
    let method = Method::Aes256Cfb;
    let (upstream, target) = spawn_upstream(method, false).await;
    let local = spawn_local(SessionConfig::new("127.0.0.1", upstream.port(), method, PASSWORD)).await;

    let mut client = socks_connect(local, &domain_request("example.com", 443)).await;
    assert_eq!(target.await.unwrap(), "example.com:443");

    echo(&mut client, b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").await;
    echo(&mut client, b"second request").await;
}

#[tokio::test]
async fn test_ipv4_echo_with_one_time_auth() {
    let method = Method::ChaCha20Ietf;
    let (upstream, target) = spawn_upstream(method, true).await;
    let config = SessionConfig::new("127.0.0.1", upstream.port(), method, PASSWORD)
        .with_one_time_auth(true);
    let local = spawn_local(config).await;

    let request = [0x05, 0x01, 0x00, 0x01, 10, 0, 0, 7, 0x1f, 0x90];
    let mut client = socks_connect(local, &request).await;
    assert_eq!(target.await.unwrap(), "10.0.0.7:8080");

    for message in [&b"alpha"[..], &b"beta"[..], &b"gamma delta"[..]] {
        echo(&mut client, message).await;
    }
}

#[tokio::test]
async fn test_request_pipelined_with_greeting() {
    let method = Method::Aes128Ctr;
    let (upstream, target) = spawn_upstream(method, false).await;
    let local = spawn_local(SessionConfig::new("127.0.0.1", upstream.port(), method, PASSWORD)).await;

    let mut client = TcpStream::connect(local).await.unwrap();
    let mut first = vec![0x05, 0x01, 0x00];
    first.extend_from_slice(&domain_request("pipelined.test", 80));
    first.extend_from_slice(b"early");
    client.write_all(&first).await.unwrap();

    let mut replies = [0u8; 12];
    client.read_exact(&mut replies).await.unwrap();
    assert_eq!(&replies[..2], &[0x05, 0x00]);
    assert_eq!(&replies[2..], &CONNECT_REPLY);
    assert_eq!(target.await.unwrap(), "pipelined.test:80");

    let mut echoed = [0u8; 5];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"early");
}

#[tokio::test]
async fn test_large_transfer() {
    let method = Method::Aes192Cfb;
    let (upstream, _target) = spawn_upstream(method, true).await;
    let config = SessionConfig::new("127.0.0.1", upstream.port(), method, PASSWORD)
        .with_one_time_auth(true);
    let local = spawn_local(config).await;

    let client = socks_connect(local, &domain_request("bulk.test", 9000)).await;
    let (mut rd, mut wr) = client.into_split();

    let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
    let expected = data.clone();
    let writer = tokio::spawn(async move {
        wr.write_all(&data).await.unwrap();
        wr
    });

    let mut received = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(10), rd.read_exact(&mut received))
        .await
        .expect("transfer timed out")
        .unwrap();
    assert_eq!(received, expected);
    writer.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_upstream_closes_client() {
    // Nothing listens on this port once the listener is dropped
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let local = spawn_local(SessionConfig::new("127.0.0.1", port, Method::Aes256Ctr, PASSWORD)).await;

    let mut client = TcpStream::connect(local).await.unwrap();
    let mut request = vec![0x05, 0x01, 0x00];
    request.extend_from_slice(&domain_request("example.com", 443));
    client.write_all(&request).await.unwrap();

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut received))
        .await
        .expect("client not closed")
        .unwrap();
    assert_eq!(received, vec![0x05, 0x00]);
}

#[tokio::test]
async fn test_bad_version_closes_client() {
    let local = spawn_local(SessionConfig::new("127.0.0.1", 1, Method::Aes256Cfb, PASSWORD)).await;

    let mut client = TcpStream::connect(local).await.unwrap();
    client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut received))
        .await
        .expect("client not closed")
        .unwrap();
    assert!(received.is_empty());
}
