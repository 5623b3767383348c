//! Device ingest: line transports, record parsing and reconnect policy
//!
//! A [`Connector`] opens a line stream to the device. [`DeviceIngest`] reads
//! one record per call under a bounded timeout, stamps it with the local
//! capture instant and, when the transport is lost, reopens it with
//! exponential backoff until the retry budget runs out.

use crate::config::IngestConfig;
use async_trait::async_trait;
use ecg_core::{Clock, EcgError, EcgResult, ElectrodeRecord, RawSample};
use ecg_simulation::{spawn_line_stream, SimulatorConfig};
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Buffered line source handed out by a connector
pub type LineStream = Box<dyn AsyncBufRead + Send + Unpin>;

/// Where the device lines come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP producer, `host:port`
    Tcp(String),
    /// Serial device, pty symlink or FIFO
    Device(PathBuf),
}

impl FromStr for Endpoint {
    type Err = EcgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EcgError::config("empty endpoint"));
        }
        match s.strip_prefix("tcp://") {
            Some(address) => match address.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                    Ok(Endpoint::Tcp(address.to_string()))
                }
                _ => Err(EcgError::config(format!(
                    "TCP endpoint must look like tcp://host:port, got {s}"
                ))),
            },
            None => Ok(Endpoint::Device(PathBuf::from(s))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(address) => write!(f, "tcp://{address}"),
            Endpoint::Device(path) => write!(f, "{}", path.display()),
        }
    }
}

/// An open transport
pub struct Connection {
    pub reader: LineStream,
    /// The first line after opening is likely a partial record
    pub discard_first_line: bool,
}

impl Connection {
    pub fn new(reader: LineStream) -> Self {
        Self {
            reader,
            discard_first_line: false,
        }
    }

    pub fn discarding_first_line(mut self) -> Self {
        self.discard_first_line = true;
        self
    }
}

/// Opens a line stream to the device
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh transport
    async fn connect(&self) -> EcgResult<Connection>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Dials a TCP producer
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> EcgResult<Connection> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        Ok(Connection::new(Box::new(BufReader::new(stream))))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

/// Opens a character device, pty or FIFO for reading
pub struct DeviceConnector {
    path: PathBuf,
}

impl DeviceConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Connector for DeviceConnector {
    async fn connect(&self) -> EcgResult<Connection> {
        let file = tokio::fs::File::open(&self.path).await.map_err(|e| {
            EcgError::disconnected(format!("cannot open {}: {e}", self.path.display()))
        })?;
        Ok(Connection::new(Box::new(BufReader::new(file))).discarding_first_line())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Serves lines from an in-process simulated device
pub struct SimulatedConnector {
    config: SimulatorConfig,
}

impl SimulatedConnector {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&self) -> EcgResult<Connection> {
        // The device task ends on its own once the reader is dropped
        let (reader, _device) = spawn_line_stream(self.config.clone(), None)?;
        Ok(Connection::new(Box::new(BufReader::new(reader))))
    }

    fn describe(&self) -> String {
        format!("simulated device at {} Hz", self.config.sample_rate)
    }
}

/// Connector for a configured endpoint
pub fn connector_for(endpoint: &Endpoint) -> Box<dyn Connector> {
    match endpoint {
        Endpoint::Tcp(address) => Box::new(TcpConnector::new(address.clone())),
        Endpoint::Device(path) => Box::new(DeviceConnector::new(path.clone())),
    }
}

/// Parse one device line into electrode voltages.
///
/// Accepts a JSON object `{"RA":..,"LA":..,"LL":..}` or three numbers
/// separated by commas, semicolons or whitespace. Blank lines yield
/// `Ok(None)`.
pub fn parse_record(line: &str) -> EcgResult<Option<ElectrodeRecord>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let record = if line.starts_with('{') {
        serde_json::from_str::<ElectrodeRecord>(line)
            .map_err(|e| EcgError::malformed(line, e.to_string()))?
    } else {
        let fields: Vec<&str> = line
            .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .filter(|field| !field.is_empty())
            .collect();
        if fields.len() != 3 {
            return Err(EcgError::malformed(
                line,
                format!("expected 3 fields, found {}", fields.len()),
            ));
        }

        let mut channels = [0.0; 3];
        for (value, field) in channels.iter_mut().zip(&fields) {
            *value = field
                .parse::<f64>()
                .map_err(|_| EcgError::malformed(line, format!("non-numeric field {field:?}")))?;
        }
        ElectrodeRecord::from_channels(channels)
    };

    if record.channels().iter().any(|v| !v.is_finite()) {
        return Err(EcgError::malformed(line, "non-finite voltage"));
    }
    Ok(Some(record))
}

/// Reads timestamped samples off the device transport
pub struct DeviceIngest {
    connector: Box<dyn Connector>,
    clock: Arc<dyn Clock>,
    config: IngestConfig,
    reader: Option<LineStream>,
    skip_line: bool,
    line: String,
    /// Reconnect attempts spent since a sample last came through
    spent_attempts: u32,
    last_error: Option<String>,
}

impl DeviceIngest {
    pub fn new(connector: Box<dyn Connector>, clock: Arc<dyn Clock>, config: IngestConfig) -> Self {
        Self {
            connector,
            clock,
            config,
            reader: None,
            skip_line: false,
            line: String::new(),
            spent_attempts: 0,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    pub fn describe(&self) -> String {
        self.connector.describe()
    }

    /// Single connection attempt
    pub async fn connect(&mut self) -> EcgResult<()> {
        let connection = self.connector.connect().await?;
        self.reader = Some(connection.reader);
        self.skip_line = connection.discard_first_line;
        info!(device = %self.connector.describe(), "Device connected");
        Ok(())
    }

    /// Drop the transport after a session was lost to `error`
    pub fn mark_lost(&mut self, error: &EcgError) {
        self.last_error = Some(error.to_string());
        self.disconnect();
    }

    /// Drop the transport, discarding any partially read data
    pub fn disconnect(&mut self) {
        if self.reader.take().is_some() {
            debug!(device = %self.connector.describe(), "Transport released");
        }
        self.line.clear();
    }

    /// Drop the transport and reopen it with exponential backoff.
    ///
    /// The budget of `max_reconnect_attempts` covers every attempt since
    /// the last delivered sample, so a device that accepts connections
    /// but never produces data still runs out of retries. Returns the
    /// attempt number that succeeded, or `RetryBudgetExhausted`.
    pub async fn reconnect(&mut self) -> EcgResult<u32> {
        self.disconnect();

        let max_attempts = self.config.max_reconnect_attempts;
        while self.spent_attempts < max_attempts {
            self.spent_attempts += 1;
            let attempt = self.spent_attempts;
            let delay = self.config.backoff(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to device"
            );
            tokio::time::sleep(delay).await;

            match self.connect().await {
                Ok(()) => return Ok(attempt),
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    self.last_error = Some(e.to_string());
                }
            }
        }

        Err(EcgError::RetryBudgetExhausted {
            attempts: max_attempts,
            last_error: self
                .last_error
                .clone()
                .unwrap_or_else(|| "never attempted".to_string()),
        })
    }

    /// Next sample from the device, waiting at most `read_timeout` per line.
    ///
    /// Blank lines are skipped. A malformed line is reported but leaves the
    /// transport open; a timeout, EOF or read failure is reported and the
    /// caller is expected to reconnect.
    pub async fn next_sample(&mut self) -> EcgResult<RawSample> {
        let timeout = self.config.read_timeout();

        loop {
            let reader = self
                .reader
                .as_mut()
                .ok_or_else(|| EcgError::disconnected("not connected"))?;

            self.line.clear();
            let read = tokio::time::timeout(timeout, reader.read_line(&mut self.line)).await;
            match read {
                Err(_) => {
                    return Err(EcgError::DeviceTimeout {
                        timeout_ms: self.config.read_timeout_ms,
                    })
                }
                Ok(Ok(0)) => {
                    self.disconnect();
                    return Err(EcgError::disconnected("end of stream"));
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) if e.kind() == ErrorKind::InvalidData => {
                    return Err(EcgError::malformed("<binary>", e.to_string()));
                }
                Ok(Err(e)) => {
                    self.disconnect();
                    return Err(e.into());
                }
            }

            if self.skip_line {
                self.skip_line = false;
                continue;
            }

            if let Some(record) = parse_record(&self.line)? {
                self.spent_attempts = 0;
                return Ok(record.stamp(self.clock.now()));
            }
        }
    }
}
