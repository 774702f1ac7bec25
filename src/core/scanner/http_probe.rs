// src/core/scanner/http_probe.rs

use std::net::SocketAddr;

use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ScanSettings;
use crate::core::models::HttpOutcome;
use crate::core::target::Target;

/// Builds the HTTP client shared by every probe of a scan service.
///
/// Gateways almost never carry certificates a browser would trust, so certificate validation is
/// off; this client only observes, it never submits anything. Connections are not pooled so that
/// every probe talks to the device on a fresh socket.
pub fn build_client(settings: &ScanSettings) -> reqwest::Result<Client> {
    client_builder(settings).build()
}

/// Like [`build_client`], but every lookup of `host` returns `addr`.
pub fn build_pinned_client(settings: &ScanSettings, host: &str, addr: SocketAddr) -> reqwest::Result<Client> {
    client_builder(settings).resolve(host, addr).build()
}

fn client_builder(settings: &ScanSettings) -> ClientBuilder {
    Client::builder()
        .user_agent(settings.user_agent.clone())
        .danger_accept_invalid_certs(true)
        .redirect(redirect_policy(settings.max_redirects))
        .pool_max_idle_per_host(0)
        .no_proxy()
}

/// Follows at most `max_redirects` hops, and only while they stay on the original host and port.
/// A redirect elsewhere is returned as the response itself.
fn redirect_policy(max_redirects: usize) -> Policy {
    if max_redirects == 0 {
        return Policy::none();
    }

    Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            return attempt.error("too many redirects");
        }
        let leaves_target = attempt
            .previous()
            .first()
            .is_some_and(|origin| !same_endpoint(origin, attempt.url()));
        if leaves_target {
            attempt.stop()
        } else {
            attempt.follow()
        }
    })
}

fn same_endpoint(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// The URL a check requests: `scheme://host:port` followed by `path`, which may carry a query.
/// The authority always comes from the target, whatever `path` contains.
pub fn probe_url(scheme: &str, target: &Target, port: u16, path: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!("{}://{}:{}/", scheme, target.url_host(), port))?;
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };
    url.set_path(path);
    url.set_query(query);
    Ok(url)
}

/// Issues one GET and captures status, headers and the start of the body before `deadline`.
///
/// A response whose body is still streaming at the deadline keeps what arrived so far.
pub async fn fetch(client: &Client, url: Url, deadline: Instant, snippet_chars: usize) -> HttpOutcome {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return HttpOutcome::Failed { error: "no time left for the HTTP request".to_string() };
    }

    debug!(url = %url, remaining_ms = remaining.as_millis() as u64, "Sending HTTP request.");
    let request = client.get(url.clone()).timeout(remaining).send();
    let mut response = match timeout_at(deadline, request).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!(url = %url, error = %e, "HTTP request failed.");
            return HttpOutcome::Failed { error: describe_request_error(&e) };
        }
        Err(_elapsed) => {
            warn!(url = %url, "HTTP request timed out.");
            return HttpOutcome::Failed { error: "HTTP request timed out".to_string() };
        }
    };

    let status = response.status().as_u16();
    let headers = normalize_headers(response.headers());
    info!(url = %url, status, "Received HTTP response.");

    // UTF-8 needs at most four bytes per character.
    let byte_cap = snippet_chars.saturating_mul(4);
    let mut body: Vec<u8> = Vec::new();
    while body.len() < byte_cap {
        match timeout_at(deadline, response.chunk()).await {
            Ok(Ok(Some(chunk))) => body.extend_from_slice(&chunk),
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "Failed to read response body.");
                return HttpOutcome::Failed { error: format!("Failed to read response body: {}", e) };
            }
            Err(_elapsed) => {
                debug!(url = %url, bytes = body.len(), "Body still streaming at deadline, keeping partial snippet.");
                break;
            }
        }
    }

    HttpOutcome::Response {
        status,
        headers,
        body_snippet: snippet(&body, snippet_chars),
    }
}

/// Renders headers as `Name: value` lines joined by CRLF, with canonical name casing.
pub fn normalize_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            format!("{}: {}", canonical_header_name(name.as_str()), String::from_utf8_lossy(value.as_bytes()))
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}

fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn snippet(body: &[u8], max_chars: usize) -> String {
    String::from_utf8_lossy(body).chars().take(max_chars).collect()
}

fn describe_request_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "HTTP request timed out".to_string()
    } else if e.is_connect() {
        format!("HTTP connection failed: {}", e)
    } else if e.is_redirect() {
        format!("Too many redirects: {}", e)
    } else {
        format!("HTTP request failed: {}", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `response` verbatim to every connection on a loopback port.
    async fn serve_raw(response: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        port
    }

    /// Serves a fixed response per request path on a loopback port; unknown paths get a 404.
    async fn serve_routes(routes: &'static [(&'static str, &'static str)]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let path = request.split_whitespace().nth(1).unwrap_or("/");
                    let response = routes
                        .iter()
                        .find(|(route, _)| *route == path)
                        .map(|(_, response)| *response)
                        .unwrap_or("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        port
    }

    fn client() -> Client {
        build_client(&ScanSettings::default()).unwrap()
    }

    fn local_url(port: u16, path: &str) -> Url {
        probe_url("http", &Target::parse("127.0.0.1").unwrap(), port, path).unwrap()
    }

    #[test]
    fn builds_probe_urls() {
        let v4 = Target::parse("192.168.1.1").unwrap();
        assert_eq!(probe_url("http", &v4, 8080, "/").unwrap().as_str(), "http://192.168.1.1:8080/");
        assert_eq!(
            probe_url("https", &v4, 8443, "/cgi-bin/login?lang=en").unwrap().as_str(),
            "https://192.168.1.1:8443/cgi-bin/login?lang=en"
        );
        let v6 = Target::parse("fe80::1").unwrap();
        assert_eq!(probe_url("http", &v6, 8080, "/").unwrap().as_str(), "http://[fe80::1]:8080/");
    }

    #[test]
    fn path_cannot_change_the_host() {
        let gateway = Target::parse("192.168.1.1").unwrap();
        let url = probe_url("http", &gateway, 8080, "//example.com/x").unwrap();
        assert_eq!(url.host_str(), Some("192.168.1.1"));
        assert_eq!(url.port(), Some(8080));
        assert_eq!(url.path(), "//example.com/x");

        let url = probe_url("https", &gateway, 8443, "https://example.com/").unwrap();
        assert_eq!(url.host_str(), Some("192.168.1.1"));
    }

    #[test]
    fn endpoints_compare_host_and_port() {
        let origin = Url::parse("http://192.168.1.1/").unwrap();
        assert!(same_endpoint(&origin, &Url::parse("http://192.168.1.1:80/login").unwrap()));
        assert!(!same_endpoint(&origin, &Url::parse("http://192.168.1.1:8080/").unwrap()));
        assert!(!same_endpoint(&origin, &Url::parse("http://example.com/").unwrap()));
    }

    #[test]
    fn normalizes_header_block() {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("server"), HeaderValue::from_static("TestAdmin/1.0"));
        headers.insert(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("DENY"));
        assert_eq!(normalize_headers(&headers), "Server: TestAdmin/1.0\r\nX-Frame-Options: DENY");
    }

    #[test]
    fn snippet_truncates_on_character_boundaries() {
        assert_eq!(snippet("héllo wörld".as_bytes(), 5), "héllo");
        assert_eq!(snippet(&[0x66, 0xff, 0x6f], 10), "f\u{fffd}o");
    }

    #[tokio::test]
    async fn captures_status_headers_and_body() {
        let port = serve_raw(
            b"HTTP/1.1 200 OK\r\nServer: TestAdmin/1.0\r\nContent-Length: 32\r\nConnection: close\r\n\r\n<html><form>Login</form></html>\n",
        )
        .await;

        let deadline = Instant::now() + Duration::from_secs(3);
        let outcome = fetch(&client(), local_url(port, "/"), deadline, 512).await;
        match outcome {
            HttpOutcome::Response { status, headers, body_snippet } => {
                assert_eq!(status, 200);
                assert!(headers.contains("Server: TestAdmin/1.0"), "{headers}");
                assert!(body_snippet.contains("Login"));
            }
            HttpOutcome::Failed { error } => panic!("unexpected failure: {error}"),
        }
    }

    #[tokio::test]
    async fn body_is_cut_to_snippet_length() {
        let port = serve_raw(
            b"HTTP/1.1 200 OK\r\nContent-Length: 26\r\nConnection: close\r\n\r\nabcdefghijklmnopqrstuvwxyz",
        )
        .await;

        let deadline = Instant::now() + Duration::from_secs(3);
        let outcome = fetch(&client(), local_url(port, "/"), deadline, 10).await;
        assert_eq!(outcome.body_snippet(), Some("abcdefghij"));
    }

    #[tokio::test]
    async fn garbage_response_is_an_http_error() {
        let port = serve_raw(b"SSH-2.0-dropbear_2019.78\r\n").await;

        let deadline = Instant::now() + Duration::from_secs(3);
        let outcome = fetch(&client(), local_url(port, "/"), deadline, 512).await;
        assert!(matches!(outcome, HttpOutcome::Failed { .. }), "{outcome:?}");
    }

    #[tokio::test]
    async fn silent_server_times_out_within_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // Accept and hold the socket open without answering.
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let started = Instant::now();
        let deadline = started + Duration::from_millis(300);
        let outcome = fetch(&client(), local_url(port, "/"), deadline, 512).await;
        assert!(matches!(outcome, HttpOutcome::Failed { .. }));
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn expired_deadline_fails_without_request() {
        let outcome = fetch(&client(), local_url(9, "/"), Instant::now(), 512).await;
        assert_eq!(
            outcome,
            HttpOutcome::Failed { error: "no time left for the HTTP request".to_string() }
        );
    }

    #[tokio::test]
    async fn follows_redirects_on_the_same_host() {
        let port = serve_routes(&[
            ("/old", "HTTP/1.1 302 Found\r\nLocation: /new\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"),
            ("/new", "HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\nMoved here"),
        ])
        .await;

        let deadline = Instant::now() + Duration::from_secs(3);
        let outcome = fetch(&client(), local_url(port, "/old"), deadline, 512).await;
        assert_eq!(outcome.status(), Some(200));
        assert_eq!(outcome.body_snippet(), Some("Moved here"));
    }

    #[tokio::test]
    async fn does_not_follow_redirects_off_the_target() {
        let port = serve_routes(&[(
            "/",
            "HTTP/1.1 302 Found\r\nLocation: http://gatekeeper-test.invalid/\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )])
        .await;

        let deadline = Instant::now() + Duration::from_secs(3);
        let outcome = fetch(&client(), local_url(port, "/"), deadline, 512).await;
        assert_eq!(outcome.status(), Some(302));
        assert!(outcome.headers().unwrap().contains("Location: http://gatekeeper-test.invalid/"));
    }

    #[tokio::test]
    async fn pinned_client_reaches_the_given_address() {
        let port = serve_raw(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\nConnection: close\r\n\r\npinned").await;
        let host = "gatekeeper-pinned.invalid";
        let client =
            build_pinned_client(&ScanSettings::default(), host, SocketAddr::from(([127, 0, 0, 1], port))).unwrap();
        let url = probe_url("http", &Target::parse(host).unwrap(), port, "/").unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        let outcome = fetch(&client, url, deadline, 512).await;
        assert_eq!(outcome.body_snippet(), Some("pinned"));
    }
}
