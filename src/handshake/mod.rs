use crate::tunnel::TunnelError;
use crate::upgrade::{version_str, UpgradeRequest};
use bytes::Bytes;
use hyper::Version;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const MAX_RESPONSE_HEADERS: usize = 64;

/// The target's handshake response head, parsed so the filter chain can
/// rewrite headers before it reaches the client.
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub version: Version,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl HandshakeResponse {
    /// Serialize back to HTTP/1.1 wire form.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(version_str(self.version).as_bytes());
        out.extend_from_slice(format!(" {} {}\r\n", self.status, self.reason).as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        Bytes::from(out)
    }

    /// Value of the named header, if present (ASCII case-insensitive).
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

/// Rewrites handshake responses on their way back to the client.
///
/// Implementations may add, drop, or change headers but must preserve the
/// upgrade semantics (the 101 status and the `Upgrade`/`Connection` headers).
pub trait ResponseFilter: Send + Sync {
    fn filter_response(&self, request: &UpgradeRequest, response: HandshakeResponse)
        -> HandshakeResponse;
}

/// Identity filter.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughFilter;

impl ResponseFilter for PassthroughFilter {
    fn filter_response(
        &self,
        _request: &UpgradeRequest,
        response: HandshakeResponse,
    ) -> HandshakeResponse {
        response
    }
}

/// Forward the upgrade handshake: write the client's request to the target,
/// read the target's response head, run it through `filter`, and write the
/// result to the client.
///
/// Returns whatever the target sent beyond the response head (frames that
/// arrived together with the 101); the caller must forward those to the
/// client ahead of any further target reads. On error the tunnel must be
/// aborted; no relay is allowed to start after a failed handshake.
pub async fn relay_handshake<T, C>(
    request: &UpgradeRequest,
    target: &mut T,
    client: &mut C,
    filter: &dyn ResponseFilter,
    max_head_bytes: usize,
) -> Result<Bytes, TunnelError>
where
    T: AsyncRead + AsyncWrite + Unpin + ?Sized,
    C: AsyncWrite + Unpin + ?Sized,
{
    target
        .write_all(&request.to_bytes())
        .await
        .map_err(TunnelError::HandshakeWrite)?;
    target.flush().await.map_err(TunnelError::HandshakeWrite)?;

    let (response, remainder) = read_response_head(target, max_head_bytes).await?;
    debug!(
        "handshake response: {} {} ({} headers, {} buffered bytes)",
        response.status,
        response.reason,
        response.headers.len(),
        remainder.len()
    );

    let response = filter.filter_response(request, response);

    client
        .write_all(&response.to_bytes())
        .await
        .map_err(TunnelError::HandshakeWrite)?;
    client.flush().await.map_err(TunnelError::HandshakeWrite)?;

    Ok(remainder)
}

/// Read from `target` until a complete response head has been parsed.
/// Returns the head and any bytes read past it.
async fn read_response_head<T>(
    target: &mut T,
    max_head_bytes: usize,
) -> Result<(HandshakeResponse, Bytes), TunnelError>
where
    T: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    loop {
        if let Some((response, head_len)) = parse_response_head(&buf)? {
            let remainder = Bytes::copy_from_slice(&buf[head_len..]);
            return Ok((response, remainder));
        }
        if buf.len() >= max_head_bytes {
            return Err(TunnelError::HandshakeRead(format!(
                "response head exceeds {} bytes",
                max_head_bytes
            )));
        }

        let n = target
            .read(&mut chunk)
            .await
            .map_err(|e| TunnelError::HandshakeRead(e.to_string()))?;
        if n == 0 {
            return Err(TunnelError::HandshakeRead(
                "connection closed before response head".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn parse_response_head(buf: &[u8]) -> Result<Option<(HandshakeResponse, usize)>, TunnelError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);

    match parsed.parse(buf) {
        Ok(httparse::Status::Complete(head_len)) => {
            let version = match parsed.version {
                Some(0) => Version::HTTP_10,
                _ => Version::HTTP_11,
            };
            let response = HandshakeResponse {
                version,
                // Complete guarantees the status line was parsed
                status: parsed.code.unwrap_or(0),
                reason: parsed.reason.unwrap_or("").to_string(),
                headers: parsed
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), h.value.to_vec()))
                    .collect(),
            };
            Ok(Some((response, head_len)))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(TunnelError::HandshakeRead(e.to_string())),
    }
}
