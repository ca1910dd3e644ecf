use crate::protocol::{TestParameters, CONTROL_PORT};
use std::time::Duration;

/// Client configuration for one test run.
///
/// Built with the `with_*` methods; the defaults match a plain
/// `iperf3 -c <host>` invocation.
///
/// # Examples
///
/// ```
/// use nsperf::Config;
/// use std::time::Duration;
///
/// let config = Config::client("192.168.1.100".to_string())
///     .with_time(Duration::from_secs(30))
///     .with_parallel(4);
///
/// assert_eq!(config.port, 5201);
/// assert_eq!(config.parallel, 4);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Server address to connect to.
    pub server_addr: String,

    /// Control port. Stream `i` connects to `port + i`.
    pub port: u16,

    /// Measured test duration.
    pub time: Duration,

    /// Warm-up period omitted from the measured duration.
    pub omit: Duration,

    /// Number of parallel data streams.
    pub parallel: u16,

    /// Negotiated block length in bytes, as advertised to the server.
    pub len: usize,

    /// Client version string advertised during parameter exchange.
    pub client_version: String,

    /// Interval between throughput samples.
    pub interval: Duration,
}

impl Config {
    /// Creates a client configuration for `server_addr` with defaults.
    pub fn client(server_addr: String) -> Self {
        Self {
            server_addr,
            port: CONTROL_PORT,
            time: Duration::from_secs(10),
            omit: Duration::ZERO,
            parallel: 1,
            len: 131072,
            client_version: "3-CURRENT".to_string(),
            interval: Duration::from_secs(1),
        }
    }

    /// Sets the control port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the measured test duration.
    pub fn with_time(mut self, time: Duration) -> Self {
        self.time = time;
        self
    }

    /// Sets the warm-up period omitted from the measured duration.
    pub fn with_omit(mut self, omit: Duration) -> Self {
        self.omit = omit;
        self
    }

    /// Sets the number of parallel data streams.
    pub fn with_parallel(mut self, parallel: u16) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the negotiated block length in bytes.
    pub fn with_len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Sets the interval between throughput samples.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The parameter document sent during PARAM_EXCHANGE.
    pub fn params(&self) -> TestParameters {
        TestParameters {
            tcp: true,
            omit: self.omit.as_secs(),
            time: self.time.as_secs(),
            parallel: self.parallel,
            len: self.len,
            client_version: self.client_version.clone(),
        }
    }
}
