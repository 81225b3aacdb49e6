use crate::aggregation::snapshot::{FrameSnapshot, SnapshotPayload};
use crate::publish::{PublishAck, SinkError, SnapshotSink};
use serde::Deserialize;
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Responses larger than this are treated as a misbehaving consumer.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;
const READ_CHUNK: usize = 1024;

/// POSTs each snapshot as JSON over plain HTTP/1.1.
///
/// `timeout` bounds the whole exchange: lookup, connect, request write and
/// response read share a single deadline, so a consumer that trickles bytes
/// cannot hold the frame loop past it.
pub struct HttpSink {
    endpoint: String,
    target: Endpoint,
    timeout: Duration,
}

impl HttpSink {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, SinkError> {
        let target = Endpoint::parse(&endpoint)?;
        Ok(Self {
            endpoint,
            target,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Debug for HttpSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSink")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SnapshotSink for HttpSink {
    fn publish(&self, snapshot: &FrameSnapshot) -> Result<PublishAck, SinkError> {
        let payload = serde_json::to_vec(&SnapshotPayload::from_snapshot(snapshot)?)?;
        let deadline = Deadline::after(self.timeout);
        let response = post_json(&self.target, &payload, deadline)?;
        interpret_ack(response)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    host: String,
    port: u16,
    path: String,
}

impl Endpoint {
    fn parse(url: &str) -> Result<Self, SinkError> {
        let rest = url
            .strip_prefix("http://")
            .ok_or_else(|| SinkError::InvalidUrl(format!("{url}: only http:// is supported")))?;
        let (authority, path) = match rest.find('/') {
            Some(slash) => rest.split_at(slash),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| SinkError::InvalidUrl(format!("{url}: bad port {port:?}")))?;
                (host, port)
            }
            None => (authority, 80),
        };
        if host.is_empty() {
            return Err(SinkError::InvalidUrl(format!("{url}: missing host")));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline(Instant);

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    /// Time left, or a timeout error naming the stage that ran out.
    fn remaining(&self, stage: &str) -> Result<Duration, SinkError> {
        let left = self.0.saturating_duration_since(Instant::now());
        if left.is_zero() {
            Err(timed_out(stage))
        } else {
            Ok(left)
        }
    }
}

fn timed_out(stage: &str) -> SinkError {
    SinkError::Io(io::Error::new(
        ErrorKind::TimedOut,
        format!("{stage} exceeded publish deadline"),
    ))
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[derive(Debug)]
struct HttpResponse {
    status: u16,
    body: String,
}

fn post_json(target: &Endpoint, body: &[u8], deadline: Deadline) -> Result<HttpResponse, SinkError> {
    let mut stream = connect(target, deadline)?;

    let head = format!(
        "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        target.path,
        target.host_header(),
        body.len(),
    );
    write_by(&mut stream, head.as_bytes(), deadline)?;
    write_by(&mut stream, body, deadline)?;

    read_response(&mut stream, deadline)
}

fn connect(target: &Endpoint, deadline: Deadline) -> Result<TcpStream, SinkError> {
    let mut last_error = None;
    for addr in resolve(target, deadline)? {
        match TcpStream::connect_timeout(&addr, deadline.remaining("connect")?) {
            Ok(stream) => return Ok(stream),
            Err(err) if is_timeout(&err) => return Err(timed_out("connect")),
            Err(err) => last_error = Some(err),
        }
    }
    Err(SinkError::Connect(last_error.unwrap_or_else(|| {
        io::Error::new(ErrorKind::NotFound, "no address to connect to")
    })))
}

/// Literal addresses skip the lookup. Names are resolved on a helper thread
/// so a stuck resolver only costs the remaining deadline.
fn resolve(target: &Endpoint, deadline: Deadline) -> Result<Vec<SocketAddr>, SinkError> {
    if let Ok(ip) = target.host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, target.port)]);
    }

    let query = (target.host.clone(), target.port);
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("sink-dns".to_string())
        .spawn(move || {
            let resolved = query
                .to_socket_addrs()
                .map(|addrs| addrs.collect::<Vec<_>>());
            let _ = tx.send(resolved);
        })
        .map_err(|err| SinkError::Dns(format!("cannot start lookup: {err}")))?;

    match rx.recv_timeout(deadline.remaining("dns lookup")?) {
        Ok(Ok(addrs)) if !addrs.is_empty() => Ok(addrs),
        Ok(Ok(_)) => Err(SinkError::Dns(format!("{}: no addresses", target.host))),
        Ok(Err(err)) => Err(SinkError::Dns(format!("{}: {err}", target.host))),
        Err(RecvTimeoutError::Timeout) => Err(timed_out("dns lookup")),
        Err(RecvTimeoutError::Disconnected) => {
            Err(SinkError::Dns(format!("{}: lookup aborted", target.host)))
        }
    }
}

fn write_by(stream: &mut TcpStream, mut bytes: &[u8], deadline: Deadline) -> Result<(), SinkError> {
    while !bytes.is_empty() {
        stream
            .set_write_timeout(Some(deadline.remaining("request write")?))
            .map_err(SinkError::Io)?;
        match stream.write(bytes) {
            Ok(0) => return Err(SinkError::Io(ErrorKind::WriteZero.into())),
            Ok(written) => bytes = &bytes[written..],
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) if is_timeout(&err) => return Err(timed_out("request write")),
            Err(err) => return Err(SinkError::Io(err)),
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct ResponseHead {
    status: u16,
    content_length: Option<usize>,
    chunked: bool,
}

impl ResponseHead {
    fn parse(raw: &[u8]) -> Result<Self, SinkError> {
        let text = String::from_utf8_lossy(raw);
        let mut lines = text.split("\r\n");
        let status = lines
            .next()
            .filter(|line| line.starts_with("HTTP/"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| SinkError::Http(0, "malformed status line".to_string()))?;

        let mut head = Self {
            status,
            content_length: None,
            chunked: false,
        };
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                let length = value
                    .parse::<usize>()
                    .map_err(|_| SinkError::Http(status, format!("bad content-length {value:?}")))?;
                head.content_length = Some(length);
            } else if name.eq_ignore_ascii_case("transfer-encoding") {
                head.chunked = value.to_ascii_lowercase().contains("chunked");
            }
        }
        Ok(head)
    }

    /// Whether `body` already holds everything the head announced.
    /// Without a length or chunking the body runs to end of stream.
    fn body_complete(&self, body: &[u8]) -> bool {
        if self.chunked {
            body.starts_with(b"0\r\n\r\n") || body.ends_with(b"\r\n0\r\n\r\n")
        } else if let Some(length) = self.content_length {
            body.len() >= length
        } else {
            false
        }
    }
}

fn find_head_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn read_response(stream: &mut TcpStream, deadline: Deadline) -> Result<HttpResponse, SinkError> {
    let mut raw = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    let mut parsed: Option<(ResponseHead, usize)> = None;

    loop {
        if let Some((head, body_start)) = &parsed
            && head.body_complete(&raw[*body_start..])
        {
            break;
        }

        stream
            .set_read_timeout(Some(deadline.remaining("response read")?))
            .map_err(SinkError::Io)?;
        let read = match stream.read(&mut chunk) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if is_timeout(&err) => return Err(timed_out("response read")),
            Err(err) => return Err(SinkError::Io(err)),
        };
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if raw.len() > MAX_RESPONSE_BYTES {
            return Err(SinkError::Http(0, "response too large".to_string()));
        }

        if parsed.is_none()
            && let Some(end) = find_head_end(&raw)
        {
            parsed = Some((ResponseHead::parse(&raw[..end])?, end + 4));
        }
    }

    let (head, body_start) = parsed
        .ok_or_else(|| SinkError::Http(0, "connection closed before response head".to_string()))?;
    let body = &raw[body_start..];
    let body = if head.chunked {
        decode_chunked(body)?
    } else if let Some(length) = head.content_length {
        if body.len() < length {
            return Err(SinkError::Io(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("response body ended after {} of {length} bytes", body.len()),
            )));
        }
        body[..length].to_vec()
    } else {
        body.to_vec()
    };

    Ok(HttpResponse {
        status: head.status,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn decode_chunked(mut body: &[u8]) -> Result<Vec<u8>, SinkError> {
    let malformed = |reason: &str| SinkError::Http(0, format!("malformed chunked body: {reason}"));
    let mut decoded = Vec::new();
    loop {
        let line_end = body
            .windows(2)
            .position(|window| window == b"\r\n")
            .ok_or_else(|| malformed("missing chunk size"))?;
        let size_line = String::from_utf8_lossy(&body[..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size =
            usize::from_str_radix(size_hex, 16).map_err(|_| malformed("bad chunk size"))?;
        body = &body[line_end + 2..];
        if size == 0 {
            return Ok(decoded);
        }
        if body.len() < size + 2 {
            return Err(malformed("truncated chunk"));
        }
        decoded.extend_from_slice(&body[..size]);
        body = &body[size + 2..];
    }
}

/// Consumer reply, e.g. `{"success": true, "message": "...", "alertsTriggered": 2}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumerReply {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    alerts_triggered: Option<u32>,
}

fn parse_reply(body: &str) -> ConsumerReply {
    serde_json::from_str(body.trim()).unwrap_or_default()
}

fn interpret_ack(response: HttpResponse) -> Result<PublishAck, SinkError> {
    let reply = parse_reply(&response.body);
    if !(200..300).contains(&response.status) {
        let detail = reply
            .message
            .unwrap_or_else(|| response.body.trim().to_string());
        return Err(SinkError::Http(response.status, detail));
    }
    if reply.success == Some(false) {
        return Err(SinkError::Rejected(
            reply
                .message
                .unwrap_or_else(|| "consumer reported failure".to_string()),
        ));
    }
    Ok(PublishAck {
        status: response.status,
        alerts_triggered: reply.alerts_triggered,
    })
}
