//! send-only stomp client used to publish alerts onto broker topics
//!
//! every publish opens a fresh connection: connect, login, send one message,
//! disconnect. the broker never pushes frames to us except the reply to
//! `CONNECT`.
use std::io;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufStream},
    net::TcpStream,
};

use crate::alert::Alert;

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub addr: String,
    pub login: String,
    pub passcode: String,
}

/// connection or login handshake failure
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("broker refused connection: {0}")]
    Refused(String),
}

/// failure of a single publish attempt
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to connect to stomp broker: {0}")]
    Connect(#[from] ConnectError),
    #[error("failed to encode alert: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to send message frame: {0}")]
    Send(#[source] io::Error),
}

/// seam between the forwarder and the broker
#[async_trait]
pub trait AlertPublisher: Send + Sync {
    /// publish one alert as a json message onto `topic`
    async fn publish(&self, topic: &str, alert: &Alert) -> Result<(), PublishError>;
}

/// publishes each alert over a fresh connection to the configured broker
#[derive(Debug, Clone)]
pub struct StompPublisher {
    addr: String,
    host: String,
    login: String,
    passcode: String,
}

impl StompPublisher {
    pub fn new(settings: &BrokerSettings) -> Self {
        // the `host` header names the virtual host, which for our brokers is
        // the hostname part of the address
        let host = settings
            .addr
            .rsplit_once(':')
            .map_or(settings.addr.as_str(), |(host, _)| host)
            .to_string();

        Self {
            addr: settings.addr.clone(),
            host,
            login: settings.login.clone(),
            passcode: settings.passcode.clone(),
        }
    }

    /// open a connection and perform the login handshake
    async fn connect(&self) -> Result<Connection, ConnectError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let mut stream = BufStream::new(stream);

        Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", &self.host)
            .header("login", &self.login)
            .header("passcode", &self.passcode)
            .write_to(&mut stream)
            .await?;
        stream.flush().await?;

        let reply = Frame::read_from(&mut stream).await?;
        if reply.command != "CONNECTED" {
            return Err(ConnectError::Refused(reply.error_message()));
        }

        tracing::debug!(broker = self.addr.as_str(), "connected to stomp broker");

        Ok(Connection { stream })
    }
}

#[async_trait]
impl AlertPublisher for StompPublisher {
    async fn publish(&self, topic: &str, alert: &Alert) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(alert)?;

        let mut connection = self.connect().await?;
        let sent = connection.send(topic, &payload).await;
        connection.disconnect().await;

        sent.map_err(PublishError::Send)
    }
}

/// an established, logged-in broker connection
struct Connection {
    stream: BufStream<TcpStream>,
}

impl Connection {
    async fn send(&mut self, destination: &str, payload: &[u8]) -> io::Result<()> {
        Frame::new("SEND")
            .header("destination", destination)
            .header("content-type", "application/json")
            .header("content-length", &payload.len().to_string())
            .body(payload)
            .write_to(&mut self.stream)
            .await?;
        self.stream.flush().await
    }

    /// best effort, failures are not surfaced to the caller
    async fn disconnect(mut self) {
        let result = async {
            Frame::new("DISCONNECT").write_to(&mut self.stream).await?;
            self.stream.flush().await
        }
        .await;

        if let Err(err) = result {
            tracing::debug!(error = %err, "failed to disconnect from stomp broker");
        }
    }
}

/// a single stomp wire frame
///
/// `COMMAND\nheader:value\n...\n\nbody\0` with escaped header values
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) command: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
}

impl Frame {
    pub(crate) fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub(crate) fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub(crate) fn body(mut self, body: &[u8]) -> Self {
        self.body = body.to_vec();
        self
    }

    pub(crate) fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header == name)
            .map(|(_, value)| value.as_str())
    }

    /// human readable reason of an unexpected reply frame, usually `ERROR`
    fn error_message(&self) -> String {
        match self.header_value("message") {
            Some(message) => message.to_string(),
            None if !self.body.is_empty() => String::from_utf8_lossy(&self.body).into_owned(),
            None => format!("unexpected {} frame", self.command),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.body.len() + 64);

        raw.extend_from_slice(self.command.as_bytes());
        raw.push(b'\n');
        for (name, value) in &self.headers {
            raw.extend_from_slice(escape_header(name).as_bytes());
            raw.push(b':');
            raw.extend_from_slice(escape_header(value).as_bytes());
            raw.push(b'\n');
        }
        raw.push(b'\n');
        raw.extend_from_slice(&self.body);
        raw.push(0);

        raw
    }

    pub(crate) async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode()).await
    }

    /// read the next frame, skipping heartbeat newlines preceding it
    pub(crate) async fn read_from<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Self> {
        let mut raw = Vec::new();

        loop {
            raw.clear();
            let read = reader.read_until(0, &mut raw).await?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "broker closed the connection before a complete frame arrived",
                ));
            }
            if raw.last() == Some(&0) {
                raw.pop();
            }

            match raw.iter().position(|&byte| byte != b'\n' && byte != b'\r') {
                Some(start) => {
                    raw.drain(..start);
                    break;
                }
                // only heartbeats so far
                None => continue,
            }
        }

        Self::parse(&raw)
    }

    fn parse(raw: &[u8]) -> io::Result<Self> {
        let malformed =
            |reason| io::Error::new(io::ErrorKind::InvalidData, format!("malformed frame: {}", reason));

        // headers end at the first empty line, the rest is the body
        let mut boundary = None;
        for (index, &byte) in raw.iter().enumerate() {
            if byte != b'\n' {
                continue;
            }
            if raw.get(index + 1) == Some(&b'\n') {
                boundary = Some((index, index + 2));
                break;
            }
            if raw.get(index + 1) == Some(&b'\r') && raw.get(index + 2) == Some(&b'\n') {
                boundary = Some((index, index + 3));
                break;
            }
        }
        let (header_end, body_start) = boundary.ok_or_else(|| malformed("missing header terminator"))?;

        let head = std::str::from_utf8(&raw[..header_end])
            .map_err(|_| malformed("headers are not utf-8"))?;
        // str::lines only strips \r before a \n, the last line keeps its own
        let mut lines = head.lines().map(|line| line.strip_suffix('\r').unwrap_or(line));
        let command = lines
            .next()
            .filter(|command| !command.is_empty())
            .ok_or_else(|| malformed("missing command"))?
            .to_string();

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| malformed("header without separator"))?;
            headers.push((unescape_header(name), unescape_header(value)));
        }

        Ok(Self {
            command,
            headers,
            body: raw[body_start..].to_vec(),
        })
    }
}

fn escape_header(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        match character {
            '\\' => escaped.push_str("\\\\"),
            '\r' => escaped.push_str("\\r"),
            '\n' => escaped.push_str("\\n"),
            ':' => escaped.push_str("\\c"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape_header(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut characters = value.chars();
    while let Some(character) = characters.next() {
        if character != '\\' {
            unescaped.push(character);
            continue;
        }
        match characters.next() {
            Some('\\') => unescaped.push('\\'),
            Some('r') => unescaped.push('\r'),
            Some('n') => unescaped.push('\n'),
            Some('c') => unescaped.push(':'),
            other => {
                unescaped.push('\\');
                if let Some(other) = other {
                    unescaped.push(other);
                }
            }
        }
    }
    unescaped
}
