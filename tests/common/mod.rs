//! Common utilities for integration tests
#![allow(dead_code)]

use epp_relay::frame::{frame_channel, read_frame, write_frame, FrameChannel};
use epp_relay::{tls, Frame, RelayConfig, RelayServer, RewriteHooks, DEFAULT_MAX_FRAME_SIZE};
use std::net::TcpListener as StdTcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;

pub const GREETING: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?><epp xmlns="urn:ietf:params:xml:ns:epp-1.0"><greeting><svID>Mock Registry</svID></greeting></epp>"#;

/// Find an available port (nothing listens on it afterwards)
pub fn get_available_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Temporary certificate/key pair, removed on drop
pub struct TestCert {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TestCert {
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4();
        let temp_dir = std::env::temp_dir();
        let cert_path = temp_dir.join(format!("epp-relay-test-cert-{}.pem", id));
        let key_path = temp_dir.join(format!("epp-relay-test-key-{}.pem", id));

        tls::generate_self_signed_cert(
            "localhost",
            &["127.0.0.1".to_string(), "localhost".to_string()],
            &cert_path,
            &key_path,
        )
        .expect("Failed to generate test certificates");

        Self {
            cert_path,
            key_path,
        }
    }
}

impl Drop for TestCert {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.cert_path);
        let _ = std::fs::remove_file(&self.key_path);
    }
}

/// TLS config for the mock registry, optionally requiring client certificates
pub fn registry_tls_config(cert: &TestCert, client_ca: Option<&Path>) -> Arc<rustls::ServerConfig> {
    let certs = tls::load_certs(&cert.cert_path).unwrap();
    let key = tls::load_private_key(&cert.key_path).unwrap();

    let builder = rustls::ServerConfig::builder();
    let builder = match client_ca {
        Some(ca) => {
            let mut roots = rustls::RootCertStore::empty();
            for ca_cert in tls::load_certs(ca).unwrap() {
                roots.add(ca_cert).unwrap();
            }
            let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .unwrap();
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    Arc::new(builder.with_single_cert(certs, key).unwrap())
}

/// Mock EPP registry: sends a greeting, answers every command with
/// `<response>` + command + `</response>`, records the commands it receives
pub struct MockRegistry {
    pub port: u16,
    pub commands: Arc<Mutex<Vec<Vec<u8>>>>,
    pub connections: Arc<Mutex<usize>>,
    handle: JoinHandle<()>,
}

impl MockRegistry {
    pub async fn start(tls_config: Arc<rustls::ServerConfig>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock registry");
        let port = listener.local_addr().unwrap().port();
        let acceptor = TlsAcceptor::from(tls_config);

        let commands = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let recorded = commands.clone();
        let accepted = connections.clone();

        let handle = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                let recorded = recorded.clone();
                let accepted = accepted.clone();

                tokio::spawn(async move {
                    let Ok(tls_stream) = acceptor.accept(tcp).await else {
                        return;
                    };
                    *accepted.lock().unwrap() += 1;

                    let mut channel = frame_channel(tls_stream, DEFAULT_MAX_FRAME_SIZE);
                    if write_frame(&mut channel, Frame::from(GREETING)).await.is_err() {
                        return;
                    }

                    while let Ok(Some(command)) = read_frame(&mut channel).await {
                        recorded.lock().unwrap().push(command.as_bytes().to_vec());
                        if write_frame(&mut channel, Frame::from(echo_response(command.as_bytes())))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                });
            }
        });

        Self {
            port,
            commands,
            connections,
            handle,
        }
    }

    pub fn recorded_commands(&self) -> Vec<Vec<u8>> {
        self.commands.lock().unwrap().clone()
    }

    pub fn accepted_connections(&self) -> usize {
        *self.connections.lock().unwrap()
    }
}

impl Drop for MockRegistry {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn echo_response(command: &[u8]) -> Vec<u8> {
    let mut response = b"<response>".to_vec();
    response.extend_from_slice(command);
    response.extend_from_slice(b"</response>");
    response
}

/// Relay config pointing at a mock registry that trusts `ca`
pub fn relay_config_for(registry_port: u16, ca: &TestCert) -> RelayConfig {
    RelayConfig::builder()
        .remote_server("127.0.0.1")
        .remote_port(registry_port)
        .ca_cert_path(&ca.cert_path)
        .server_name("localhost")
        .build()
        .expect("Failed to build relay config")
}

/// A relay running on an ephemeral port
pub struct RunningRelay {
    pub port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl RunningRelay {
    pub async fn start(config: &RelayConfig, hooks: Arc<dyn RewriteHooks>) -> Self {
        let server = RelayServer::from_config(config, hooks).expect("Failed to create relay");
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind relay");
        let port = listener.local_addr().unwrap().port();

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(server.serve(listener, async {
            let _ = rx.await;
        }));

        Self {
            port,
            shutdown: Some(tx),
            handle,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub async fn stop(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.handle).await.expect("relay task panicked")
    }
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Connect a plain TCP EPP client to the relay
pub async fn connect_client(port: u16) -> FrameChannel<TcpStream> {
    let stream = TcpStream::connect(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to connect to relay");
    frame_channel(stream, DEFAULT_MAX_FRAME_SIZE)
}

/// Read a frame, `None` on clean close; panics on timeout
pub async fn recv<S>(channel: &mut FrameChannel<S>) -> Option<Frame>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    timeout(Duration::from_secs(5), read_frame(channel))
        .await
        .expect("Timeout waiting for frame")
        .ok()
        .flatten()
}

pub async fn send<S>(channel: &mut FrameChannel<S>, frame: impl Into<Frame>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    write_frame(channel, frame.into())
        .await
        .expect("Failed to send frame");
}
