//! One-shot HTTP/1.1 stub server for exercising the API clients.

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StubResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.to_string(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// When the stub answers relative to reading the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Respond {
    AfterBody,
    /// Answers, then keeps draining the body.
    BeforeBody,
    /// Answers, then holds the connection open without reading anything.
    /// The server task never finishes; abort its handle.
    Stall,
}

/// Accepts a single connection, answers it with `response` and yields what
/// the client sent. Returns the base URL to point a client at.
pub async fn serve_once(response: StubResponse, respond: Respond) -> (String, JoinHandle<RecordedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        handle_connection(stream, response, respond).await
    });
    (format!("http://{addr}"), handle)
}

async fn handle_connection(stream: TcpStream, response: StubResponse, respond: Respond) -> RecordedRequest {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.unwrap();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let mut recorded = RecordedRequest {
        method,
        path,
        headers,
        body: Vec::new(),
    };

    if respond == Respond::Stall {
        write_response(&mut write_half, &response).await;
        let _held = (&reader, &write_half);
        std::future::pending::<()>().await;
    }

    if respond == Respond::BeforeBody {
        write_response(&mut write_half, &response).await;
        // Keep draining so the client never sees a reset while still sending.
        let _ = read_body(&mut reader, &recorded).await;
        return recorded;
    }

    recorded.body = read_body(&mut reader, &recorded).await.unwrap_or_default();
    write_response(&mut write_half, &response).await;
    recorded
}

async fn read_body<R>(reader: &mut BufReader<R>, request: &RecordedRequest) -> std::io::Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut body = Vec::new();
    let chunked = request
        .header("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));

    if chunked {
        loop {
            let mut size_line = String::new();
            if reader.read_line(&mut size_line).await? == 0 {
                break;
            }
            let size_hex = size_line.trim().split(';').next().unwrap_or_default();
            let size = usize::from_str_radix(size_hex, 16).unwrap_or(0);
            if size == 0 {
                let mut trailer = String::new();
                while reader.read_line(&mut trailer).await? > 0 && !trailer.trim_end().is_empty() {
                    trailer.clear();
                }
                break;
            }
            let mut chunk = vec![0u8; size];
            reader.read_exact(&mut chunk).await?;
            body.extend_from_slice(&chunk);
            let mut crlf = [0u8; 2];
            reader.read_exact(&mut crlf).await?;
        }
    } else if let Some(len) = request.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        body.resize(len, 0);
        reader.read_exact(&mut body).await?;
    }
    Ok(body)
}

async fn write_response<W: tokio::io::AsyncWrite + Unpin>(out: &mut W, response: &StubResponse) {
    let mut head = format!("HTTP/1.1 {} Stub\r\n", response.status);
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        response.body.len()
    ));
    out.write_all(head.as_bytes()).await.unwrap();
    out.write_all(response.body.as_bytes()).await.unwrap();
    out.flush().await.unwrap();
}

/// Splits a multipart body into `(headers, content)` pairs.
pub fn split_multipart(body: &[u8], boundary: &str) -> Vec<(String, Vec<u8>)> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut rest = body
        .strip_prefix(delimiter.as_bytes())
        .expect("body starts with delimiter");
    let separator = format!("\r\n--{boundary}");

    while rest.starts_with(b"\r\n") {
        rest = &rest[2..];
        let end = find(rest, separator.as_bytes()).expect("part is terminated");
        let part = &rest[..end];
        let header_end = find(part, b"\r\n\r\n").expect("part has headers");
        parts.push((
            String::from_utf8_lossy(&part[..header_end]).into_owned(),
            part[header_end + 4..].to_vec(),
        ));
        rest = &rest[end + separator.len()..];
    }
    assert!(rest.starts_with(b"--"), "closing delimiter present");
    parts
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
