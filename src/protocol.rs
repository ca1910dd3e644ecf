//! Control-channel wire format for the iperf3 protocol.
//!
//! The control connection carries two frame shapes: single-byte state
//! commands, and JSON documents framed by a 4-byte big-endian length prefix.
//! Every connection of a run (control and data streams alike) opens by
//! sending the same fixed-length session cookie so the server can associate
//! them.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default iperf3 control port. Stream `i` connects to `port + i`.
pub const CONTROL_PORT: u16 = 5201;

/// Length of the session cookie in bytes.
pub const COOKIE_SIZE: usize = 37;

// Length is checked at compile time by the array pattern.
const DEFAULT_COOKIE: [u8; COOKIE_SIZE] = *b"nsperf.tokio.012345678901234567890123";

/// Control states exchanged as single bytes on the control connection.
///
/// Values 1 through 16 are the iperf3 command set. The two negative sentinels
/// are peer-reported failures; the client never sends them and
/// [`ControlState::try_from`] never produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum ControlState {
    TestStart = 1,
    TestRunning = 2,
    ResultRequest = 3,
    TestEnd = 4,
    StreamBegin = 5,
    StreamRunning = 6,
    StreamEnd = 7,
    AllStreamsEnd = 8,
    ParamExchange = 9,
    CreateStreams = 10,
    ServerTerminate = 11,
    ClientTerminate = 12,
    ExchangeResults = 13,
    DisplayResults = 14,
    IperfStart = 15,
    IperfDone = 16,
    AccessDenied = -1,
    ServerError = -2,
}

impl ControlState {
    /// The canonical iperf3 name of this state.
    pub fn name(&self) -> &'static str {
        match self {
            ControlState::TestStart => "TEST_START",
            ControlState::TestRunning => "TEST_RUNNING",
            ControlState::ResultRequest => "RESULT_REQUEST",
            ControlState::TestEnd => "TEST_END",
            ControlState::StreamBegin => "STREAM_BEGIN",
            ControlState::StreamRunning => "STREAM_RUNNING",
            ControlState::StreamEnd => "STREAM_END",
            ControlState::AllStreamsEnd => "ALL_STREAMS_END",
            ControlState::ParamExchange => "PARAM_EXCHANGE",
            ControlState::CreateStreams => "CREATE_STREAMS",
            ControlState::ServerTerminate => "SERVER_TERMINATE",
            ControlState::ClientTerminate => "CLIENT_TERMINATE",
            ControlState::ExchangeResults => "EXCHANGE_RESULTS",
            ControlState::DisplayResults => "DISPLAY_RESULTS",
            ControlState::IperfStart => "IPERF_START",
            ControlState::IperfDone => "IPERF_DONE",
            ControlState::AccessDenied => "ACCESS_DENIED",
            ControlState::ServerError => "SERVER_ERROR",
        }
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for ControlState {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => ControlState::TestStart,
            2 => ControlState::TestRunning,
            3 => ControlState::ResultRequest,
            4 => ControlState::TestEnd,
            5 => ControlState::StreamBegin,
            6 => ControlState::StreamRunning,
            7 => ControlState::StreamEnd,
            8 => ControlState::AllStreamsEnd,
            9 => ControlState::ParamExchange,
            10 => ControlState::CreateStreams,
            11 => ControlState::ServerTerminate,
            12 => ControlState::ClientTerminate,
            13 => ControlState::ExchangeResults,
            14 => ControlState::DisplayResults,
            15 => ControlState::IperfStart,
            16 => ControlState::IperfDone,
            other => {
                return Err(Error::Protocol(format!("unknown control state: {other}")));
            }
        })
    }
}

/// Fixed-length session identifier sent unframed after every connect.
///
/// The server uses the cookie to associate the control connection and the
/// data streams of one test run, so its value is constant for a given client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie([u8; COOKIE_SIZE]);

impl Cookie {
    /// Builds a cookie from `value`, rejecting any length other than
    /// [`COOKIE_SIZE`].
    pub fn new(value: &str) -> Result<Self> {
        let bytes = value.as_bytes();
        if bytes.len() != COOKIE_SIZE {
            return Err(Error::Protocol(format!(
                "cookie must be exactly {COOKIE_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut buf = [0u8; COOKIE_SIZE];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; COOKIE_SIZE] {
        &self.0
    }
}

impl Default for Cookie {
    fn default() -> Self {
        Self(DEFAULT_COOKIE)
    }
}

/// Test parameters negotiated during PARAM_EXCHANGE.
///
/// Serialized to JSON and sent exactly once per run, immediately after the
/// server asks for the parameter exchange. Field names are the iperf3 wire
/// names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestParameters {
    pub tcp: bool,
    pub omit: u64,
    pub time: u64,
    pub parallel: u16,
    pub len: usize,
    pub client_version: String,
}

/// Writes the session cookie verbatim on a freshly connected socket.
pub async fn send_cookie<W>(w: &mut W, cookie: &Cookie) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(cookie.as_bytes()).await?;
    Ok(())
}

/// Serializes `doc` and writes it as a 4-byte big-endian length prefix
/// followed by the JSON body, as two separate writes.
pub async fn send_json<W, T>(w: &mut W, doc: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(doc)?;
    let len = body.len() as u32;
    w.write_all(&len.to_be_bytes()).await?;
    w.write_all(&body).await?;
    Ok(())
}

/// Reads exactly one byte off the control connection and decodes it.
///
/// A half-closed control connection and any byte outside the defined command
/// set are both protocol errors. A read that would block suspends until the
/// connection is readable again.
pub async fn read_control_state<R>(r: &mut R) -> Result<ControlState>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1];
    match r.read_exact(&mut buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::Protocol(
                "control connection closed by peer".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    }
    let state = ControlState::try_from(buf[0])?;
    log::debug!("control: {state}");
    Ok(state)
}
