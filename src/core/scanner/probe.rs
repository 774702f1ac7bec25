// src/core/scanner/probe.rs

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::system_conf::read_system_conf;
use hickory_resolver::TokioAsyncResolver;
use reqwest::Client;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{http_probe, tcp_probe};
use crate::config::ScanSettings;
use crate::core::models::{CheckResult, CheckSpec, HttpOutcome, TcpConnect};
use crate::core::target::Target;

/// Executes one check against one target.
///
/// Implementations never fail: every transport problem ends up in the returned `CheckResult`.
pub trait Probe: Send + Sync {
    fn run(&self, target: &Target, spec: &CheckSpec, timeout: Duration) -> impl Future<Output = CheckResult> + Send;
}

/// The real probe: a TCP connect, then one GET for http/https checks whose port is open.
///
/// For hostname targets the GET goes to the address the TCP leg connected to, not to whatever a
/// second lookup returns.
#[derive(Clone)]
pub struct NetworkProbe {
    client: Client,
    resolver: TokioAsyncResolver,
    settings: ScanSettings,
}

impl NetworkProbe {
    pub fn new(settings: &ScanSettings) -> reqwest::Result<Self> {
        let (config, opts) = read_system_conf().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read system resolver config, using defaults.");
            (ResolverConfig::default(), ResolverOpts::default())
        });

        Ok(Self {
            client: http_probe::build_client(settings)?,
            resolver: TokioAsyncResolver::tokio(config, opts),
            settings: settings.clone(),
        })
    }

    fn client_for(&self, target: &Target, peer: Option<SocketAddr>) -> reqwest::Result<Client> {
        match (target, peer) {
            (Target::Host(host), Some(addr)) => http_probe::build_pinned_client(&self.settings, host, addr),
            _ => Ok(self.client.clone()),
        }
    }

    async fn http_phase(
        &self,
        scheme: &str,
        target: &Target,
        spec: &CheckSpec,
        peer: Option<SocketAddr>,
        deadline: Instant,
    ) -> HttpOutcome {
        let url = match http_probe::probe_url(scheme, target, spec.port, spec.http_path()) {
            Ok(url) => url,
            Err(e) => return HttpOutcome::Failed { error: format!("Invalid probe URL: {}", e) },
        };
        let client = match self.client_for(target, peer) {
            Ok(client) => client,
            Err(e) => return HttpOutcome::Failed { error: format!("Failed to build HTTP client: {}", e) },
        };
        http_probe::fetch(&client, url, deadline, self.settings.body_snippet_chars).await
    }
}

impl Probe for NetworkProbe {
    async fn run(&self, target: &Target, spec: &CheckSpec, timeout: Duration) -> CheckResult {
        let started = Instant::now();
        let deadline = started + timeout;

        let connection = tcp_probe::connect(&self.resolver, target, spec.port, deadline).await;
        let tcp_connect = connection.outcome;

        // The HTTP phase only runs on an open port, within whatever budget the TCP phase left.
        let http = match (spec.protocol.scheme(), tcp_connect) {
            (Some(scheme), TcpConnect::Open) => {
                Some(self.http_phase(scheme, target, spec, connection.peer, deadline).await)
            }
            _ => None,
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(check = %spec.name, port = spec.port, tcp = %tcp_connect, duration_ms, "Probe finished.");
        CheckResult {
            name: spec.name.clone(),
            protocol: spec.protocol,
            port: spec.port,
            tcp_connect,
            http,
            error: connection.error,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Protocol;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn probe() -> NetworkProbe {
        NetworkProbe::new(&ScanSettings::default()).unwrap()
    }

    fn localhost() -> Target {
        Target::parse("127.0.0.1").unwrap()
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn serve_admin_page() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let body = "<html><title>Admin</title><body>Login</body></html>";
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nServer: TestAdmin/1.0\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn http_check_on_open_port_captures_response() {
        let port = serve_admin_page().await;
        let spec = CheckSpec::new("admin-ui", Protocol::Http, port).with_path("/");

        let result = probe().run(&localhost(), &spec, Duration::from_secs(3)).await;
        assert_eq!(result.tcp_connect, TcpConnect::Open);
        let http = result.http.expect("http block present");
        assert_eq!(http.status(), Some(200));
        assert!(http.headers().unwrap().contains("Server: TestAdmin/1.0"));
        assert!(http.body_snippet().unwrap().contains("Login"));
        assert!(result.duration_ms <= 3000);
    }

    #[tokio::test]
    async fn closed_port_skips_http_phase() {
        let spec = CheckSpec::new("admin-ui", Protocol::Http, closed_port().await);

        let result = probe().run(&localhost(), &spec, Duration::from_secs(2)).await;
        assert_eq!(result.tcp_connect, TcpConnect::Closed);
        assert!(result.http.is_none());
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn tcp_check_never_has_http_block() {
        let port = serve_admin_page().await;
        let spec = CheckSpec::new("raw", Protocol::Tcp, port);

        let result = probe().run(&localhost(), &spec, Duration::from_secs(2)).await;
        assert_eq!(result.tcp_connect, TcpConnect::Open);
        assert!(result.http.is_none());
    }

    #[tokio::test]
    async fn unresolvable_hostname_is_an_error() {
        let target = Target::parse("gatekeeper-test.invalid").unwrap();
        let spec = CheckSpec::new("ssh", Protocol::Tcp, 22);

        let result = probe().run(&target, &spec, Duration::from_secs(3)).await;
        assert!(matches!(result.tcp_connect, TcpConnect::Error | TcpConnect::Timeout));
        assert!(result.http.is_none());
        assert!(result.duration_ms <= 3000 + 200);
    }
}
