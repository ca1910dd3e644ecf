//! The iperf3 control-channel state machine.
//!
//! One [`Client`] drives one test run: it opens the control connection,
//! exchanges the cookie and the parameter document, opens the data streams,
//! and then supervises the stream workers and the throughput reporter until
//! the negotiated duration elapses or something fails. The sequence is
//! single-pass; any control byte other than the expected next state aborts
//! the whole run.

use crate::config::Config;
use crate::counter::ByteCounter;
use crate::protocol::{self, ControlState, Cookie};
use crate::reporter::{RateSample, SampleHistory, ThroughputReporter};
use crate::stream;
use crate::{Error, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Events delivered to the run loop by background tasks.
///
/// The control reader and every stream worker report through this single
/// channel, so no background failure can go unobserved.
#[derive(Debug)]
pub(crate) enum RunEvent {
    /// The peer moved the test to TEST_RUNNING.
    Running,
    /// The peer sent a control state the client does not handle.
    UnexpectedState(ControlState),
    /// The control reader failed.
    ControlLost(Error),
    /// A stream worker stopped writing.
    StreamClosed { stream: usize, error: Error },
}

/// Throughput test client speaking the iperf3 control protocol.
///
/// # Examples
///
/// ```no_run
/// use nsperf::{Client, Config};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("192.168.1.100".to_string())
///     .with_time(Duration::from_secs(10))
///     .with_parallel(2);
///
/// let client = Client::new(config);
/// client.run().await?;
/// println!("sent {} bytes", client.bytes_sent());
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Config,
    cookie: Cookie,
    counter: ByteCounter,
    cancel: CancellationToken,
    samples: SampleHistory,
    sample_sink: Option<mpsc::UnboundedSender<RateSample>>,
}

impl Client {
    /// Creates a client for `config` with the default session cookie.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cookie: Cookie::default(),
            counter: ByteCounter::new(),
            cancel: CancellationToken::new(),
            samples: Arc::new(Mutex::new(Vec::new())),
            sample_sink: None,
        }
    }

    /// Replaces the session cookie sent on every connection of the run.
    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookie = cookie;
        self
    }

    /// Streams every throughput sample to `sink` as it is taken.
    pub fn with_sample_sink(mut self, sink: mpsc::UnboundedSender<RateSample>) -> Self {
        self.sample_sink = Some(sink);
        self
    }

    /// Token observed at every suspension point of the run; cancelling it
    /// unwinds the handshake or the running test deterministically.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Total payload bytes sent so far across all streams.
    pub fn bytes_sent(&self) -> u64 {
        self.counter.total()
    }

    /// The throughput samples taken during the run.
    pub fn samples(&self) -> Vec<RateSample> {
        self.samples.lock().clone()
    }

    /// Runs one complete test: handshake, stream creation, and the
    /// supervised data phase.
    ///
    /// Handshake-phase errors abort immediately. Once the test is running,
    /// worker failures arrive asynchronously and likewise abort the run.
    /// A run either reaches the data phase and completes its negotiated
    /// duration, or fails wholesale.
    pub async fn run(&self) -> Result<()> {
        let (control, streams) = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "run cancelled during handshake",
                )));
            }
            handshake = self.handshake() => handshake?,
        };

        self.supervise(control, streams).await
    }

    /// The linear part of the run: connect, cookie, parameter exchange,
    /// stream creation, TEST_START.
    async fn handshake(&self) -> Result<(TcpStream, Vec<TcpStream>)> {
        let addr = format!("{}:{}", self.config.server_addr, self.config.port);
        info!("connecting to {addr}");
        let mut control = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::Connect(format!("control connect to {addr}: {e}")))?;
        info!("control connection established");

        protocol::send_cookie(&mut control, &self.cookie).await?;

        self.expect(&mut control, ControlState::ParamExchange).await?;
        let params = self.config.params();
        protocol::send_json(&mut control, &params).await?;
        debug!("sent parameters: {params:?}");

        self.expect(&mut control, ControlState::CreateStreams).await?;
        let mut streams = Vec::with_capacity(usize::from(self.config.parallel));
        for index in 0..self.config.parallel {
            streams.push(self.connect_stream(index).await?);
        }

        self.expect(&mut control, ControlState::TestStart).await?;

        Ok((control, streams))
    }

    /// Reads the next control byte and demands it match `want`.
    async fn expect(&self, control: &mut TcpStream, want: ControlState) -> Result<()> {
        let got = protocol::read_control_state(control).await?;
        if got != want {
            return Err(Error::Protocol(format!("expected {want}, got {got}")));
        }
        debug!("handshake: {got}");
        Ok(())
    }

    /// Opens the data connection for stream `index` and sends the cookie on
    /// it, using the same connect pattern as the control socket.
    async fn connect_stream(&self, index: u16) -> Result<TcpStream> {
        let addr = stream_addr(&self.config.server_addr, self.config.port, index);
        let mut conn = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::Connect(format!("stream {index} connect to {addr}: {e}")))?;
        protocol::send_cookie(&mut conn, &self.cookie).await?;
        debug!("stream {index} connected to {addr}");
        Ok(conn)
    }

    /// Supervises the running test: a background reader forwards control
    /// bytes onto the event channel, TEST_RUNNING starts the workers, and
    /// everything is unwound once the negotiated duration elapses, the run
    /// is cancelled, or any task fails.
    async fn supervise(&self, control: TcpStream, streams: Vec<TcpStream>) -> Result<()> {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let cancel = self.cancel.clone();

        // The write half keeps the control connection open for the run.
        let (mut control_rx, _control_tx) = control.into_split();
        let reader_tx = events_tx.clone();
        let reader_cancel = cancel.clone();
        let reader: JoinHandle<()> = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = reader_cancel.cancelled() => return,
                    state = protocol::read_control_state(&mut control_rx) => {
                        let event = match state {
                            Ok(ControlState::TestRunning) => RunEvent::Running,
                            Ok(other) => RunEvent::UnexpectedState(other),
                            Err(e) => RunEvent::ControlLost(e),
                        };
                        let stop = !matches!(&event, RunEvent::Running);
                        if reader_tx.send(event).is_err() || stop {
                            return;
                        }
                    }
                }
            }
        });

        let mut pending = streams;
        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let run_for = self.config.omit + self.config.time;
        // Armed once TEST_RUNNING arrives.
        let deadline = tokio::time::sleep(Duration::MAX);
        tokio::pin!(deadline);

        let mut result = Ok(());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("run cancelled");
                    break;
                }
                _ = deadline.as_mut() => {
                    info!("test duration elapsed, stopping streams");
                    break;
                }
                event = events.recv() => match event {
                    Some(RunEvent::Running) => {
                        if !workers.is_empty() {
                            result = Err(Error::Protocol(
                                "TEST_RUNNING received twice".to_string(),
                            ));
                            break;
                        }
                        info!("test running: {} streams", pending.len());
                        for (id, conn) in pending.drain(..).enumerate() {
                            workers.push(tokio::spawn(stream::run_stream_worker(
                                id,
                                conn,
                                self.counter.clone(),
                                events_tx.clone(),
                                cancel.clone(),
                            )));
                        }
                        let mut reporter = ThroughputReporter::new(
                            self.counter.clone(),
                            self.config.interval,
                            self.samples.clone(),
                        );
                        if let Some(sink) = &self.sample_sink {
                            reporter = reporter.with_sink(sink.clone());
                        }
                        workers.push(tokio::spawn(reporter.run(cancel.clone())));
                        deadline.as_mut().reset(tokio::time::Instant::now() + run_for);
                    }
                    Some(RunEvent::UnexpectedState(state)) => {
                        result = Err(Error::Protocol(format!(
                            "unexpected control state: {state}"
                        )));
                        break;
                    }
                    Some(RunEvent::ControlLost(e)) => {
                        result = Err(e);
                        break;
                    }
                    Some(RunEvent::StreamClosed { stream, error }) => {
                        warn!("stream {stream} failed: {error}");
                        result = Err(error);
                        break;
                    }
                    // Unreachable while this loop holds a sender; kept so
                    // the dispatch stays exhaustive.
                    None => break,
                }
            }
        }

        cancel.cancel();
        for worker in workers {
            let _ = worker.await;
        }
        let _ = reader.await;

        match &result {
            Ok(()) => info!("run complete: {} bytes sent", self.counter.total()),
            Err(e) => warn!("run failed: {e}"),
        }
        result
    }
}

/// Address of data stream `index`: the control port plus the stream index.
fn stream_addr(host: &str, base_port: u16, index: u16) -> String {
    format!("{host}:{}", base_port + index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_addr_offsets_port_by_index() {
        assert_eq!(stream_addr("10.0.0.1", 5201, 0), "10.0.0.1:5201");
        assert_eq!(stream_addr("10.0.0.1", 5201, 1), "10.0.0.1:5202");
        assert_eq!(stream_addr("10.0.0.1", 5201, 7), "10.0.0.1:5208");
    }

    #[test]
    fn test_client_accessors() {
        let client = Client::new(Config::client("127.0.0.1".to_string()));
        assert_eq!(client.bytes_sent(), 0);
        assert!(client.samples().is_empty());
        assert!(!client.cancellation_token().is_cancelled());
    }
}
