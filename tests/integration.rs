//! Integration tests for queuewire-client.
//!
//! Each test plays the broker on the far end of an in-memory duplex
//! stream and drives a real connection through it.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use tempfile::NamedTempFile;
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use queuewire_client::config::ConnectionConfig;
use queuewire_client::connection::{ConnectionHandle, ConnectionState, ManagedConnection, QuitSignal};
use queuewire_client::filter::{deflate_pair, snappy_pair, Filter, FilterChain};
use queuewire_client::handler::{FeatureNegotiator, IdentifyOptions};
use queuewire_client::protocol::{
    build_frame, Command, FrameType, IncomingMessage, MessageId, HEARTBEAT, MAGIC_V2,
};
use queuewire_client::reconnect::{Node, ReconnectingConnection};
use queuewire_client::transport::{BoxedSocket, TlsSettings};
use queuewire_client::{QueuewireError, Result};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> ConnectionConfig {
    ConnectionConfig::default().idle_interval(Duration::from_millis(2))
}

type Received = Arc<Mutex<Vec<IncomingMessage>>>;

/// Start a connection over a duplex pipe; returns the broker end.
fn start(
    config: ConnectionConfig,
    negotiator: FeatureNegotiator,
) -> (
    ConnectionHandle,
    JoinHandle<Result<()>>,
    DuplexStream,
    Received,
) {
    init_tracing();
    let (client, server) = duplex(64 * 1024);
    let received: Received = Arc::new(Mutex::new(Vec::new()));

    let sink = received.clone();
    let connection = ManagedConnection::new(
        Box::new(client),
        "localhost",
        Arc::new(config),
        Arc::new(negotiator),
        Arc::new(move |_: &ConnectionHandle, msg: IncomingMessage| {
            sink.lock().unwrap().push(msg);
        }),
    );
    let handle = connection.handle();
    let task = tokio::spawn(connection.run());
    (handle, task, server, received)
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {}", what);
}

async fn read_line(server: &mut DuplexStream) -> String {
    let mut line = Vec::new();
    loop {
        let byte = server.read_u8().await.unwrap();
        if byte == b'\n' {
            return String::from_utf8(line).unwrap();
        }
        line.push(byte);
    }
}

/// Consume the magic and IDENTIFY; returns the IDENTIFY body.
async fn expect_handshake(server: &mut DuplexStream) -> serde_json::Value {
    let mut magic = [0u8; 4];
    server.read_exact(&mut magic).await.unwrap();
    assert_eq!(&magic, MAGIC_V2);

    assert_eq!(read_line(server).await, "IDENTIFY");
    let len = server.read_u32().await.unwrap() as usize;
    let mut body = vec![0u8; len];
    server.read_exact(&mut body).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn send_frame(server: &mut DuplexStream, frame_type: FrameType, payload: &[u8]) {
    server.write_all(&build_frame(frame_type, payload)).await.unwrap();
}

fn message(body: &'static [u8]) -> Bytes {
    IncomingMessage::new(0, 1, MessageId([0; 16]), Bytes::from_static(body)).encode()
}

#[tokio::test]
async fn test_handshake_reaches_steady_with_buffered_reads() {
    let (handle, task, mut server, _) = start(test_config(), FeatureNegotiator::default());

    let identify = expect_handshake(&mut server).await;
    assert_eq!(identify["feature_negotiation"], true);
    assert_eq!(handle.state(), ConnectionState::Handshaking);
    assert!(!handle.buffered_reads());

    send_frame(&mut server, FrameType::Response, br#"{"max_rdy_count":2500}"#).await;
    wait_for("steady", || handle.is_steady()).await;
    assert!(handle.buffered_reads());
    assert!(!handle.is_tls());

    handle.close();
    task.await.unwrap().unwrap();
    assert_eq!(handle.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_plain_ok_identify_response() {
    let negotiator = FeatureNegotiator::new(IdentifyOptions {
        feature_negotiation: false,
        ..IdentifyOptions::default()
    });
    let (handle, task, mut server, _) = start(test_config(), negotiator);

    let identify = expect_handshake(&mut server).await;
    assert_eq!(identify["feature_negotiation"], false);
    send_frame(&mut server, FrameType::Response, b"OK").await;
    wait_for("steady", || handle.is_steady()).await;

    handle.force_close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_heartbeat_and_message_in_one_read() {
    let (handle, task, mut server, received) = start(test_config(), FeatureNegotiator::default());

    expect_handshake(&mut server).await;
    send_frame(&mut server, FrameType::Response, br#"{"max_rdy_count":2500}"#).await;
    wait_for("steady", || handle.is_steady()).await;

    let mut wire = build_frame(FrameType::Response, HEARTBEAT);
    wire.extend(build_frame(FrameType::Message, &message(b"hello-body")));
    server.write_all(&wire).await.unwrap();

    assert_eq!(read_line(&mut server).await, "NOP");
    wait_for("message", || received.lock().unwrap().len() == 1).await;

    handle.close();
    task.await.unwrap().unwrap();

    let mut rest = Vec::new();
    server.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty(), "unexpected bytes after NOP: {:?}", rest);

    let messages = received.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(&messages[0].body()[..], b"hello-body");
    assert_eq!(messages[0].attempts(), 1);
    assert_eq!(messages[0].id(), &MessageId([0; 16]));
    assert_eq!(messages[0].timestamp_ns(), 0);
}

#[tokio::test]
async fn test_heartbeat_during_handshake_is_not_identify() {
    let (handle, task, mut server, _) = start(test_config(), FeatureNegotiator::default());

    expect_handshake(&mut server).await;
    send_frame(&mut server, FrameType::Response, HEARTBEAT).await;
    assert_eq!(read_line(&mut server).await, "NOP");

    send_frame(&mut server, FrameType::Response, br#"{"max_rdy_count":10}"#).await;
    wait_for("steady", || handle.is_steady()).await;

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_tls_without_trust_bundle_fails_before_touching_socket() {
    let (handle, task, mut server, _) = start(test_config(), FeatureNegotiator::default());

    expect_handshake(&mut server).await;
    send_frame(&mut server, FrameType::Response, br#"{"tls_v1":true}"#).await;

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, QueuewireError::Config(_)), "got {:?}", err);
    assert!(!err.is_retryable());
    assert_eq!(handle.state(), ConnectionState::Closed);

    let mut rest = Vec::new();
    server.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty(), "bytes sent after IDENTIFY: {:?}", rest);
}

#[tokio::test]
async fn test_fatal_error_closes_without_dispatch() {
    let (handle, task, mut server, received) = start(test_config(), FeatureNegotiator::default());

    expect_handshake(&mut server).await;
    send_frame(&mut server, FrameType::Response, br#"{"max_rdy_count":1}"#).await;
    wait_for("steady", || handle.is_steady()).await;

    let mut wire = build_frame(FrameType::Error, b"E_INVALID cannot SUB in current state");
    wire.extend(build_frame(FrameType::Message, &message(b"never")));
    server.write_all(&wire).await.unwrap();

    let err = task.await.unwrap().unwrap_err();
    match err {
        QueuewireError::ServerError(text) => assert!(text.starts_with("E_INVALID")),
        other => panic!("expected server error, got {:?}", other),
    }
    assert_eq!(handle.state(), ConnectionState::Closed);
    assert!(received.lock().unwrap().is_empty());

    let result = handle.send_command(Command::nop()).await;
    assert!(matches!(result, Err(QueuewireError::ConnectionClosed)));
}

#[tokio::test]
async fn test_passive_error_keeps_connection() {
    let (handle, task, mut server, received) = start(test_config(), FeatureNegotiator::default());

    expect_handshake(&mut server).await;
    send_frame(&mut server, FrameType::Response, br#"{"max_rdy_count":1}"#).await;
    wait_for("steady", || handle.is_steady()).await;

    let mut wire = build_frame(FrameType::Error, b"E_FIN_FAILED FIN 0000 failed");
    wire.extend(build_frame(FrameType::Message, &message(b"still-here")));
    server.write_all(&wire).await.unwrap();

    wait_for("message", || received.lock().unwrap().len() == 1).await;
    assert!(handle.is_steady());

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_request_receives_response() {
    let (handle, task, mut server, _) = start(test_config(), FeatureNegotiator::default());

    expect_handshake(&mut server).await;
    send_frame(&mut server, FrameType::Response, br#"{"max_rdy_count":1}"#).await;
    wait_for("steady", || handle.is_steady()).await;

    let requester = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.request(Command::new("SUB").arg("topic").arg("chan")).await })
    };
    assert_eq!(read_line(&mut server).await, "SUB topic chan");
    send_frame(&mut server, FrameType::Response, b"OK").await;

    let payload = requester.await.unwrap().unwrap();
    assert_eq!(&payload[..], b"OK");
    assert_eq!(handle.last_command().as_deref(), Some("SUB"));

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cls_forces_quit_even_when_ignoring_quit() {
    let (handle, task, mut server, _) = start(test_config().ignore_quit(true), FeatureNegotiator::default());

    expect_handshake(&mut server).await;
    send_frame(&mut server, FrameType::Response, br#"{"max_rdy_count":1}"#).await;
    wait_for("steady", || handle.is_steady()).await;

    handle.close();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(handle.is_steady(), "cooperative quit should be ignored");

    let closer = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.request(Command::cls()).await })
    };
    assert_eq!(read_line(&mut server).await, "CLS");
    send_frame(&mut server, FrameType::Response, b"CLOSE_WAIT").await;

    assert_eq!(&closer.await.unwrap().unwrap()[..], b"CLOSE_WAIT");
    task.await.unwrap().unwrap();
    assert_eq!(handle.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_broker_eof_is_an_error() {
    let (handle, task, mut server, _) = start(test_config(), FeatureNegotiator::default());

    expect_handshake(&mut server).await;
    send_frame(&mut server, FrameType::Response, br#"{"max_rdy_count":1}"#).await;
    wait_for("steady", || handle.is_steady()).await;
    drop(server);

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(handle.state(), ConnectionState::Closed);
}

/// Broker side of a compressed session.
struct CompressedPeer<S = DuplexStream> {
    stream: S,
    chain: FilterChain,
    inbound: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> CompressedPeer<S> {
    fn new(stream: S, (encoder, decoder): (Box<dyn Filter>, Box<dyn Filter>)) -> Self {
        let mut chain = FilterChain::new();
        chain.append_write_filter(encoder);
        chain.append_read_filter(decoder);
        Self {
            stream,
            chain,
            inbound: Vec::new(),
        }
    }

    async fn send_frame(&mut self, frame_type: FrameType, payload: &[u8]) {
        let wire = self
            .chain
            .apply_write(Bytes::from(build_frame(frame_type, payload)))
            .unwrap();
        self.stream.write_all(&wire).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Write `plain` unfiltered, then a filtered frame, in one write.
    async fn send_frame_after(&mut self, plain: &[u8], frame_type: FrameType, payload: &[u8]) {
        let mut wire = plain.to_vec();
        wire.extend_from_slice(
            &self
                .chain
                .apply_write(Bytes::from(build_frame(frame_type, payload)))
                .unwrap(),
        );
        self.stream.write_all(&wire).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    async fn read_exact(&mut self, n: usize) -> Vec<u8> {
        while self.inbound.len() < n {
            let mut buf = [0u8; 1024];
            let read = self.stream.read(&mut buf).await.unwrap();
            assert!(read > 0, "client closed the stream");
            let plain = self.chain.apply_read(Bytes::copy_from_slice(&buf[..read])).unwrap();
            self.inbound.extend_from_slice(&plain);
        }
        self.inbound.drain(..n).collect()
    }
}

async fn compressed_session(identify_response: &[u8], filters: (Box<dyn Filter>, Box<dyn Filter>)) {
    let (handle, task, mut server, received) = start(test_config(), FeatureNegotiator::default());

    expect_handshake(&mut server).await;
    send_frame(&mut server, FrameType::Response, identify_response).await;

    let mut peer = CompressedPeer::new(server, filters);
    peer.send_frame(FrameType::Response, b"OK").await;
    wait_for("steady", || handle.is_steady()).await;
    assert!(handle.buffered_reads());

    handle.send_command(Command::rdy(10)).await.unwrap();
    assert_eq!(peer.read_exact(7).await, b"RDY 10\n");

    peer.send_frame(FrameType::Response, HEARTBEAT).await;
    peer.send_frame(FrameType::Message, &message(b"squeezed")).await;
    assert_eq!(peer.read_exact(4).await, b"NOP\n");
    wait_for("message", || received.lock().unwrap().len() == 1).await;
    assert_eq!(&received.lock().unwrap()[0].body()[..], b"squeezed");

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_deflate_session() {
    compressed_session(br#"{"deflate":true,"deflate_level":6}"#, deflate_pair(6)).await;
}

#[tokio::test]
async fn test_snappy_session() {
    compressed_session(br#"{"snappy":true,"deflate":true}"#, snappy_pair()).await;
}

/// Self-signed certificate for `localhost`, its PEM written to a trust bundle.
struct TestCertificate {
    bundle: NamedTempFile,
    acceptor: TlsAcceptor,
}

fn test_certificate() -> TestCertificate {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

    let mut bundle = NamedTempFile::new().unwrap();
    bundle.write_all(certified.cert.pem().as_bytes()).unwrap();

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
    let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![certified.cert.der().clone()], key)
        .unwrap();

    TestCertificate {
        bundle,
        acceptor: TlsAcceptor::from(Arc::new(config)),
    }
}

#[tokio::test]
async fn test_tls_then_snappy_with_back_to_back_acks() {
    let certificate = test_certificate();
    let config = test_config().tls(TlsSettings::with_trust_bundle(certificate.bundle.path()));
    let (handle, task, mut server, received) = start(config, FeatureNegotiator::default());

    expect_handshake(&mut server).await;
    send_frame(&mut server, FrameType::Response, br#"{"tls_v1":true,"snappy":true}"#).await;

    let tls = certificate.acceptor.accept(server).await.unwrap();
    wait_for("tls", || handle.is_tls()).await;

    // Both acks land in the client's first read over TLS.
    let mut peer = CompressedPeer::new(tls, snappy_pair());
    let tls_ack = build_frame(FrameType::Response, b"OK");
    peer.send_frame_after(&tls_ack, FrameType::Response, b"OK").await;
    wait_for("steady", || handle.is_steady()).await;
    assert!(handle.buffered_reads());

    handle.send_command(Command::rdy(3)).await.unwrap();
    assert_eq!(peer.read_exact(6).await, b"RDY 3\n");

    peer.send_frame(FrameType::Message, &message(b"sealed")).await;
    wait_for("message", || received.lock().unwrap().len() == 1).await;
    assert_eq!(&received.lock().unwrap()[0].body()[..], b"sealed");

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_tls_only_upgrade() {
    let certificate = test_certificate();
    let config = test_config().tls(TlsSettings::with_trust_bundle(certificate.bundle.path()));
    let (handle, task, mut server, _) = start(config, FeatureNegotiator::default());

    expect_handshake(&mut server).await;
    send_frame(&mut server, FrameType::Response, br#"{"tls_v1":true}"#).await;

    let mut tls = certificate.acceptor.accept(server).await.unwrap();
    tls.write_all(&build_frame(FrameType::Response, b"OK")).await.unwrap();
    tls.flush().await.unwrap();
    wait_for("steady", || handle.is_steady()).await;
    assert!(handle.is_tls());
    assert!(handle.buffered_reads());

    tls.write_all(&build_frame(FrameType::Response, HEARTBEAT)).await.unwrap();
    tls.flush().await.unwrap();
    let mut nop = [0u8; 4];
    tls.read_exact(&mut nop).await.unwrap();
    assert_eq!(&nop, b"NOP\n");

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_auth_follow_up() {
    let negotiator = FeatureNegotiator::default().auth_secret("s3cret");
    let (handle, task, mut server, _) = start(test_config(), negotiator);

    expect_handshake(&mut server).await;
    send_frame(&mut server, FrameType::Response, br#"{"auth_required":true}"#).await;

    assert_eq!(read_line(&mut server).await, "AUTH");
    let len = server.read_u32().await.unwrap() as usize;
    let mut secret = vec![0u8; len];
    server.read_exact(&mut secret).await.unwrap();
    assert_eq!(secret, b"s3cret");

    send_frame(
        &mut server,
        FrameType::Response,
        br#"{"identity":"svc","permission_count":1}"#,
    )
    .await;
    wait_for("auth recorded", || handle.last_command().as_deref() == Some("AUTH")).await;
    assert!(handle.is_steady());

    handle.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_auth_required_without_secret() {
    let (_handle, task, mut server, _) = start(test_config(), FeatureNegotiator::default());

    expect_handshake(&mut server).await;
    send_frame(&mut server, FrameType::Response, br#"{"auth_required":true}"#).await;

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, QueuewireError::Config(_)));
}

/// Hands out duplex sockets; the broker ends arrive on a channel.
struct DuplexNode {
    brokers: mpsc::UnboundedSender<DuplexStream>,
}

#[async_trait]
impl Node for DuplexNode {
    fn server_name(&self) -> &str {
        "localhost"
    }

    async fn connect(&self, _quit: &QuitSignal) -> Result<BoxedSocket> {
        let (client, server) = duplex(64 * 1024);
        self.brokers
            .send(server)
            .map_err(|_| QueuewireError::ConnectionClosed)?;
        Ok(Box::new(client))
    }
}

#[tokio::test]
async fn test_reconnects_after_broker_drop() {
    init_tracing();
    let (tx, mut brokers) = mpsc::unbounded_channel();
    let connection = Arc::new(
        ReconnectingConnection::builder(DuplexNode { brokers: tx }, |_: &ConnectionHandle, _: IncomingMessage| {})
            .config(test_config())
            .retry_interval(Duration::from_millis(10))
            .build(),
    );

    let runner = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.run().await })
    };

    let mut first = brokers.recv().await.unwrap();
    expect_handshake(&mut first).await;
    send_frame(&mut first, FrameType::Response, b"OK").await;
    wait_for("first connection", || connection.is_connected()).await;
    drop(first);

    let mut second = brokers.recv().await.unwrap();
    expect_handshake(&mut second).await;
    send_frame(&mut second, FrameType::Response, br#"{"max_rdy_count":5}"#).await;
    wait_for("second connection", || connection.is_connected()).await;

    let current = connection.managed_connection().unwrap();
    assert!(current.is_steady());

    connection.close();
    tokio::time::timeout(WAIT, runner).await.unwrap().unwrap().unwrap();
    assert!(!connection.is_connected());
    assert_eq!(current.state(), ConnectionState::Closed);
}
