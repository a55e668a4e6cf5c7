//! HTTP-backed cache store
//!
//! Speaks the versioned wire protocol of a remote cache service:
//! `GET/PUT {base}/{namespace}/{group}/{name}/{digest}/{fileName}` with raw
//! byte bodies. A 404 is a clean miss, any other non-2xx a storage fault.
//!
//! Every server response carries [`PROTOCOL_VERSION_HEADER`]. A client
//! configured with a minimum version refuses to talk to an older server by
//! raising [`kiln_core::Error::ProtocolMismatch`], which is fatal rather than
//! isolatable: an incompatible wire format must fail the operation, not
//! degrade into a silent cache miss.

use crate::CacheStore;
use kiln_core::{CacheKey, Error, Result, validate_file_name};
use std::time::Duration;

/// Protocol version this client speaks
pub const PROTOCOL_VERSION: u32 = 1;

/// Response header advertising the server's protocol version
pub const PROTOCOL_VERSION_HEADER: &str = "x-kiln-cache-protocol";

/// Remote HTTP cache store
pub struct HttpStore {
    client: reqwest::blocking::Client,
    base_url: String,
    min_protocol_version: Option<u32>,
}

impl HttpStore {
    /// Create a store against `base_url` with the given timeouts.
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(io_timeout)
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            min_protocol_version: None,
        })
    }

    /// Enforce a minimum server protocol version on every response.
    #[must_use]
    pub fn with_min_protocol_version(mut self, minimum: u32) -> Self {
        self.min_protocol_version = Some(minimum);
        self
    }

    fn entry_url(&self, key: &CacheKey, file_name: &str) -> String {
        format!("{}/{}/{}", self.base_url, key.canonical(), file_name)
    }

    /// Compare the server's advertised protocol version against the
    /// configured minimum. A server that is too old (or does not advertise a
    /// version at all) is a hard, non-recoverable error.
    fn check_protocol(&self, response: &reqwest::blocking::Response) -> Result<()> {
        let Some(minimum) = self.min_protocol_version else {
            return Ok(());
        };
        let server = response
            .headers()
            .get(PROTOCOL_VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0);
        if server < minimum {
            return Err(Error::ProtocolMismatch { server, minimum });
        }
        Ok(())
    }
}

impl CacheStore for HttpStore {
    fn read(&self, key: &CacheKey, file_name: &str) -> Result<Option<Vec<u8>>> {
        validate_file_name(file_name)?;
        let url = self.entry_url(key, file_name);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::storage_fault(format!("GET {url} failed: {e}")))?;

        self.check_protocol(&response)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::storage_fault(format!(
                "GET {url} returned unexpected status {status}"
            )));
        }
        let bytes = response
            .bytes()
            .map_err(|e| Error::storage_fault(format!("GET {url} body read failed: {e}")))?;
        Ok(Some(bytes.to_vec()))
    }

    fn write(&self, key: &CacheKey, file_name: &str, bytes: &[u8]) -> Result<u64> {
        validate_file_name(file_name)?;
        let url = self.entry_url(key, file_name);
        let response = self
            .client
            .put(&url)
            .body(bytes.to_vec())
            .send()
            .map_err(|e| Error::storage_fault(format!("PUT {url} failed: {e}")))?;

        self.check_protocol(&response)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::storage_fault(format!(
                "PUT {url} returned unexpected status {status}"
            )));
        }
        // The remote service manages its own eviction; nothing to report.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serve exactly one canned HTTP response on a loopback socket, returning
    /// the base URL to reach it.
    fn serve_once(status_line: &str, headers: &[(&str, &str)], body: &[u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut response = format!("{status_line}\r\ncontent-length: {}\r\n", body.len());
        for (name, value) in headers {
            response.push_str(&format!("{name}: {value}\r\n"));
        }
        response.push_str("connection: close\r\n\r\n");
        let mut response = response.into_bytes();
        response.extend_from_slice(body);

        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            // Drain the request headers and body before answering.
            let mut buf = [0u8; 4096];
            let mut seen = Vec::new();
            loop {
                let n = stream.read(&mut buf).unwrap_or(0);
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
                if let Some(header_end) = seen.windows(4).position(|w| w == b"\r\n\r\n") {
                    let headers = String::from_utf8_lossy(&seen[..header_end]).to_lowercase();
                    let body_len = headers
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if seen.len() >= header_end + 4 + body_len {
                        break;
                    }
                }
            }
            stream.write_all(&response).unwrap();
        });

        format!("http://{addr}")
    }

    fn key() -> CacheKey {
        CacheKey::new("t", "com.acme", "lib", "abc123").unwrap()
    }

    fn store(base: String) -> HttpStore {
        HttpStore::new(base, Duration::from_secs(2), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn entry_url_uses_canonical_key_path() {
        let s = store("http://cache.example.com/cache/".to_string());
        assert_eq!(
            s.entry_url(&key(), "output.json"),
            "http://cache.example.com/cache/t/com.acme/lib/abc123/output.json"
        );
    }

    #[test]
    fn ok_response_returns_body() {
        let base = serve_once(
            "HTTP/1.1 200 OK",
            &[(PROTOCOL_VERSION_HEADER, "1")],
            b"payload",
        );
        let found = store(base).read(&key(), "output.json").unwrap();
        assert_eq!(found, Some(b"payload".to_vec()));
    }

    #[test]
    fn not_found_is_a_clean_miss() {
        let base = serve_once("HTTP/1.1 404 Not Found", &[(PROTOCOL_VERSION_HEADER, "1")], b"");
        assert_eq!(store(base).read(&key(), "output.json").unwrap(), None);
    }

    #[test]
    fn server_error_is_a_storage_fault() {
        let base = serve_once(
            "HTTP/1.1 500 Internal Server Error",
            &[(PROTOCOL_VERSION_HEADER, "1")],
            b"",
        );
        let err = store(base).read(&key(), "output.json").unwrap_err();
        assert!(err.is_storage_fault());
    }

    #[test]
    fn connection_failure_is_a_storage_fault() {
        // Bind then drop so the port is very likely closed.
        let closed = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            format!("http://{}", listener.local_addr().unwrap())
        };
        let err = store(closed).read(&key(), "output.json").unwrap_err();
        assert!(err.is_storage_fault());
    }

    #[test]
    fn old_server_protocol_is_a_hard_error() {
        let base = serve_once("HTTP/1.1 200 OK", &[(PROTOCOL_VERSION_HEADER, "1")], b"x");
        let err = store(base)
            .with_min_protocol_version(2)
            .read(&key(), "output.json")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ProtocolMismatch {
                server: 1,
                minimum: 2
            }
        ));
        assert!(!err.is_storage_fault());
    }

    #[test]
    fn protocol_check_is_skipped_when_not_configured() {
        let base = serve_once("HTTP/1.1 200 OK", &[], b"payload");
        let found = store(base).read(&key(), "output.json").unwrap();
        assert_eq!(found, Some(b"payload".to_vec()));
    }

    #[test]
    fn write_put_succeeds_on_2xx() {
        let base = serve_once("HTTP/1.1 200 OK", &[(PROTOCOL_VERSION_HEADER, "1")], b"");
        let evicted = store(base).write(&key(), "output.json", b"payload").unwrap();
        assert_eq!(evicted, 0);
    }
}
