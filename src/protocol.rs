//! munin-node protocol client
//!
//! munin-node speaks a line-oriented text protocol over TCP. On connect the
//! node greets with `# munin node at <hostname>`. Commands are single lines;
//! `list` answers with one line of plugin names, `config` and `fetch` answer
//! with several lines terminated by a line holding a single `.`. Lines starting
//! with `#` inside a response are comments.
//!
//! [`ProtocolClient`] owns the only live [`Connection`]. When the node closes
//! the stream it reconnects through the [`ConnectionSupervisor`] and re-issues
//! the command; every supported command is read-only so this is safe.

use super::*;
use crate::errors::from_io_error;
use crate::supervisor::{ConnectionSupervisor, RetryPolicy};
use lazy_static::lazy_static;
use regex::Regex;
use std::io::ErrorKind;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// Line terminating a multi-line response
pub const END_MARKER: &str = ".";

/// Extract the hostname from a munin-node banner line
///
/// # Examples
/// ```rust
/// use tyl_munin_exporter::parse_banner;
///
/// assert_eq!(parse_banner("# munin node at node1.example.org\n"), Some("node1.example.org".to_string()));
/// assert_eq!(parse_banner("220 smtp ready"), None);
/// ```
pub fn parse_banner(line: &str) -> Option<String> {
    lazy_static! {
        static ref BANNER_REGEX: Regex = Regex::new(r"^# munin node at (.+)$").unwrap();
    }

    BANNER_REGEX
        .captures(line.trim_end_matches(['\r', '\n']))
        .and_then(|caps| caps.get(1))
        .map(|hostname| hostname.as_str().trim().to_string())
        .filter(|hostname| !hostname.is_empty())
}

/// Whether an I/O error means the peer has gone away
fn is_stream_end(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
    )
}

/// A live transport session with a munin-node
#[derive(Debug)]
pub struct Connection {
    stream: BufReader<TcpStream>,
    hostname: String,
}

impl Connection {
    /// Connect to `address` and validate the banner
    pub async fn open(address: &str) -> Result<Self> {
        info!(address, "Connecting to munin-node");
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| from_io_error(address, e))?;
        let mut stream = BufReader::new(stream);

        let mut raw = Vec::new();
        let read = stream
            .read_until(b'\n', &mut raw)
            .await
            .map_err(|e| from_io_error(address, e))?;
        if read == 0 {
            return Err(connection_error(address, "connection closed before banner"));
        }
        let banner = String::from_utf8_lossy(&raw);

        let hostname = parse_banner(&banner).ok_or_else(|| {
            connection_error(
                address,
                format!("Unexpected line: {}", banner.trim_end()),
            )
        })?;
        info!(hostname = %hostname, "Found hostname");

        Ok(Self { stream, hostname })
    }

    /// Hostname announced in the banner
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn send_line(&mut self, command: &str) -> std::io::Result<()> {
        let writer = self.stream.get_mut();
        writer.write_all(format!("{command}\n").as_bytes()).await?;
        writer.flush().await
    }

    /// Peek for the first byte of the response; `true` means end-of-stream
    async fn at_end_of_stream(&mut self) -> std::io::Result<bool> {
        Ok(self.stream.fill_buf().await?.is_empty())
    }

    /// Read one line; bytes that are not UTF-8 (Latin-1 plugin output) are replaced
    async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut raw = Vec::new();
        if self.stream.read_until(b'\n', &mut raw).await? == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&raw);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    async fn close(mut self) {
        let _ = self.stream.get_mut().shutdown().await;
    }
}

/// Lifecycle of the client's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// An unexpected transport error occurred; the stream can no longer be trusted
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Expected layout of a command response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// A single line (`list`)
    Line,
    /// Lines up to the `.` terminator (`config`, `fetch`)
    Block,
}

/// Response to a command, with comment lines separated out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub lines: Vec<String>,
    pub comments: Vec<String>,
}

/// Client for a single munin-node
pub struct ProtocolClient {
    address: String,
    connection: Option<Connection>,
    supervisor: ConnectionSupervisor,
    state: ConnectionState,
    hostname: String,
}

impl ProtocolClient {
    pub fn new(address: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            address: address.into(),
            connection: None,
            supervisor: ConnectionSupervisor::new(policy),
            state: ConnectionState::Disconnected,
            hostname: String::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Hostname from the most recent banner; empty before the first connect
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    /// Health derived from the connection state
    pub fn health(&self) -> HealthStatus {
        let status = match self.state {
            ConnectionState::Connected => HealthStatus::healthy(),
            state => HealthStatus::unhealthy(format!("munin-node connection is {state}")),
        };
        status
            .with_metadata("address", self.address.clone())
            .with_metadata("hostname", self.hostname.clone())
            .with_metadata("reconnects", self.supervisor.reconnects().to_string())
    }

    /// Open the initial connection (single attempt, no retry)
    pub async fn connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        match Connection::open(&self.address).await {
            Ok(connection) => {
                info!(address = %self.address, "connected!");
                self.install(connection);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Send `list` and return the single response line
    pub async fn list(&mut self) -> Result<String> {
        let response = self.command("list", ResponseShape::Line).await?;
        Ok(response.lines.into_iter().next().unwrap_or_default())
    }

    /// Send `config <plugin>`
    pub async fn config(&mut self, plugin: &str) -> Result<Response> {
        self.command(&format!("config {plugin}"), ResponseShape::Block)
            .await
    }

    /// Send `fetch <plugin>`
    pub async fn fetch(&mut self, plugin: &str) -> Result<Response> {
        self.command(&format!("fetch {plugin}"), ResponseShape::Block)
            .await
    }

    /// Send a command and read its response
    ///
    /// If the stream has ended by the time the response should start, the
    /// connection is closed, re-established through the supervisor, and the
    /// same command sent again. The loop ends once a response starts, when the
    /// supervisor gives up, or on an unexpected transport error (state
    /// becomes [`ConnectionState::Failed`]).
    pub async fn command(&mut self, command: &str, shape: ResponseShape) -> Result<Response> {
        if self.state == ConnectionState::Failed {
            return Err(protocol_error(
                command,
                "connection failed earlier and cannot be reused",
            ));
        }

        loop {
            let connection = match self.connection.as_mut() {
                Some(connection) => connection,
                None => {
                    self.reconnect().await?;
                    continue;
                }
            };

            debug!(command, "Sending command");
            let outcome = match connection.send_line(command).await {
                Ok(()) => connection.at_end_of_stream().await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(false) => break,
                Ok(true) => {
                    warn!(command, "not connected anymore, closing connection");
                    self.drop_connection().await;
                }
                Err(e) if is_stream_end(&e) => {
                    warn!(command, error = %e, "connection lost, closing connection");
                    self.drop_connection().await;
                }
                Err(e) => return Err(self.fail(command, e)),
            }
        }

        self.read_response(command, shape).await
    }

    async fn read_response(&mut self, command: &str, shape: ResponseShape) -> Result<Response> {
        let mut response = Response::default();

        loop {
            let read = match self.connection.as_mut() {
                Some(connection) => connection.read_line().await,
                None => return Err(protocol_error(command, "no connection")),
            };

            let line = match read {
                Ok(Some(line)) => line,
                Ok(None) => {
                    return Err(self
                        .abandon(command, "stream ended in the middle of a response")
                        .await)
                }
                Err(e) if is_stream_end(&e) => {
                    return Err(self.abandon(command, e.to_string()).await)
                }
                Err(e) => return Err(self.fail(command, e)),
            };

            if shape == ResponseShape::Line {
                response.lines.push(line);
                return Ok(response);
            }

            if line == END_MARKER {
                return Ok(response);
            }

            if line.starts_with('#') {
                response.comments.push(line);
            } else {
                response.lines.push(line);
            }
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        match self.supervisor.establish(&self.address).await {
            Ok(connection) => {
                self.install(connection);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn install(&mut self, connection: Connection) {
        if !self.hostname.is_empty() && self.hostname != connection.hostname() {
            warn!(
                previous = %self.hostname,
                current = connection.hostname(),
                "munin-node hostname changed"
            );
        }
        self.hostname = connection.hostname().to_string();
        self.connection = Some(connection);
        self.state = ConnectionState::Connected;
    }

    async fn drop_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Drop a connection left mid-response; the next command reconnects
    async fn abandon(&mut self, command: &str, message: impl Into<String>) -> TylError {
        self.drop_connection().await;
        protocol_error(command, message)
    }

    fn fail(&mut self, command: &str, e: std::io::Error) -> TylError {
        error!(command, error = %e, "Unexpected error");
        self.connection = None;
        self.state = ConnectionState::Failed;
        from_io_error(self.address.clone(), e).with_command(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Serve one connection that answers every command with `reply`
    async fn single_reply_node(reply: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            write.write_all(b"# munin node at node1\n").await.unwrap();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                write.write_all(reply.as_bytes()).await.unwrap();
            }
        });
        address
    }

    #[test]
    fn test_parse_banner() {
        assert_eq!(parse_banner("# munin node at node1\n"), Some("node1".to_string()));
        assert_eq!(
            parse_banner("# munin node at db-01.example.org\r\n"),
            Some("db-01.example.org".to_string())
        );
        assert_eq!(parse_banner("# munin node at \n"), None);
        assert_eq!(parse_banner("# lrrd node at node1"), None);
        assert_eq!(parse_banner(""), None);
    }

    #[test]
    fn test_stream_end_classification() {
        assert!(is_stream_end(&std::io::Error::from(ErrorKind::ConnectionReset)));
        assert!(is_stream_end(&std::io::Error::from(ErrorKind::BrokenPipe)));
        assert!(!is_stream_end(&std::io::Error::from(ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_new_client_is_disconnected() {
        let client = ProtocolClient::new("localhost:4949", RetryPolicy::default());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.hostname(), "");
        assert!(!client.health().is_healthy);
    }

    #[tokio::test]
    async fn test_block_response_separates_comments() {
        let address =
            single_reply_node("# a comment\nuser.value 12.5\nsystem.value 99\n.\n").await;
        let mut client = ProtocolClient::new(address, RetryPolicy::bounded(1, Duration::ZERO));
        client.connect().await.unwrap();

        let response = client.fetch("cpu").await.unwrap();
        assert_eq!(response.lines, vec!["user.value 12.5", "system.value 99"]);
        assert_eq!(response.comments, vec!["# a comment"]);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.hostname(), "node1");
        assert!(client.health().is_healthy);
    }

    #[tokio::test]
    async fn test_line_response() {
        let address = single_reply_node("cpu load memory\n").await;
        let mut client = ProtocolClient::new(address, RetryPolicy::bounded(1, Duration::ZERO));
        client.connect().await.unwrap();

        assert_eq!(client.list().await.unwrap(), "cpu load memory");
    }

    #[tokio::test]
    async fn test_latin1_lines_are_decoded_lossily() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            write.write_all(b"# munin node at node1\n").await.unwrap();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                write
                    .write_all(b"graph_title Temp\xe9rature\n# r\xe9seau\ntemp.label t\n.\n")
                    .await
                    .unwrap();
            }
        });

        let mut client = ProtocolClient::new(address, RetryPolicy::bounded(1, Duration::ZERO));
        client.connect().await.unwrap();

        let response = client.config("temp").await.unwrap();
        assert_eq!(response.lines, vec!["graph_title Temp\u{FFFD}rature", "temp.label t"]);
        assert_eq!(response.comments.len(), 1);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_truncated_response_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            write.write_all(b"# munin node at node1\n").await.unwrap();
            let mut lines = BufReader::new(read).lines();
            let _ = lines.next_line().await;
            write.write_all(b"user.value 1\n").await.unwrap();
            // Hang up before the terminator
        });

        let mut client = ProtocolClient::new(address, RetryPolicy::bounded(1, Duration::ZERO));
        client.connect().await.unwrap();

        let result = client.fetch("cpu").await;
        assert!(result.is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"SSH-2.0-OpenSSH\n").await.unwrap();
        });

        let mut client = ProtocolClient::new(address, RetryPolicy::default());
        let result = client.connect().await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Unexpected line"));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
