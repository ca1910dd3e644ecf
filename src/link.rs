//! Link-layer impairment for exercising a transport under loss.
//!
//! [`ImpairedLink`] wraps a lower link endpoint and sits beneath every
//! connection of the stack above it. Outgoing frames are counted and every
//! Nth frame is deliberately dropped; TCP segments carrying the configured
//! retransmit flag are written to the lower layer twice to stress the
//! impaired path further. Inbound frames pass through unchanged.

use log::{debug, warn};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// EtherType for IPv4, the only network protocol the shim inspects.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

const IP_PROTO_TCP: u8 = 6;

/// Default drop cadence: every 800th outgoing frame is lost.
pub const DROP_CADENCE: u64 = 800;

/// Default TCP flag treated as marking a retransmitted segment.
///
/// This is the literal bit the original impairment tool tests (the PSH
/// bit); use [`ImpairedLink::with_retransmit_flag`] to select another.
pub const RETRANSMIT_FLAG: u8 = 0x08;

/// Upward frame delivery, registered by the network stack on attach.
pub trait FrameDispatcher: Send + Sync {
    fn deliver(&self, protocol: u16, frame: &[u8]);
}

/// A link-layer endpoint as seen by the stack above it.
pub trait LinkEndpoint: Send {
    /// Registers the dispatcher that receives inbound frames.
    fn attach(&mut self, dispatcher: Arc<dyn FrameDispatcher>);

    /// Hands one inbound frame up to the attached dispatcher.
    fn deliver_inbound(&mut self, protocol: u16, frame: &[u8]);

    /// Writes one outbound frame, split into headers and payload.
    fn send(&mut self, header: &[u8], payload: &[u8], protocol: u16) -> io::Result<()>;

    fn mtu(&self) -> u32;
    fn max_header_length(&self) -> usize;
    fn link_address(&self) -> [u8; 6];
}

/// Forwards inbound frames from the lower link to the real dispatcher.
struct InboundTap {
    upper: Arc<dyn FrameDispatcher>,
    delay: Option<Duration>,
}

impl FrameDispatcher for InboundTap {
    fn deliver(&self, protocol: u16, frame: &[u8]) {
        // Inbound impairment hook; disabled unless configured.
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.upper.deliver(protocol, frame);
    }
}

/// Deterministic loss and retransmit duplication over a lower link.
///
/// The shim introduces no failure modes of its own: lower-layer send errors
/// propagate unchanged, and a deliberately dropped frame reports success to
/// the caller.
pub struct ImpairedLink<L> {
    lower: L,
    sent: u64,
    drop_cadence: u64,
    retransmit_flag: u8,
    inbound_delay: Option<Duration>,
    dispatcher: Option<Arc<dyn FrameDispatcher>>,
}

impl<L: LinkEndpoint> ImpairedLink<L> {
    pub fn new(lower: L) -> Self {
        Self {
            lower,
            sent: 0,
            drop_cadence: DROP_CADENCE,
            retransmit_flag: RETRANSMIT_FLAG,
            inbound_delay: None,
            dispatcher: None,
        }
    }

    /// Drops every `every`th outgoing frame instead of every
    /// [`DROP_CADENCE`]th.
    pub fn with_drop_cadence(mut self, every: u64) -> Self {
        self.drop_cadence = every;
        self
    }

    /// Selects the TCP flag bit treated as a retransmission marker.
    pub fn with_retransmit_flag(mut self, flag: u8) -> Self {
        self.retransmit_flag = flag;
        self
    }

    /// Delays every inbound frame by `delay` before delivery.
    pub fn with_inbound_delay(mut self, delay: Duration) -> Self {
        self.inbound_delay = Some(delay);
        self
    }

    /// Number of outgoing frames seen so far, dropped ones included.
    pub fn frames_sent(&self) -> u64 {
        self.sent
    }
}

impl<L: LinkEndpoint> LinkEndpoint for ImpairedLink<L> {
    fn attach(&mut self, dispatcher: Arc<dyn FrameDispatcher>) {
        let tap = InboundTap {
            upper: dispatcher.clone(),
            delay: self.inbound_delay,
        };
        self.dispatcher = Some(dispatcher);
        self.lower.attach(Arc::new(tap));
    }

    fn deliver_inbound(&mut self, protocol: u16, frame: &[u8]) {
        if let Some(delay) = self.inbound_delay {
            std::thread::sleep(delay);
        }
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.deliver(protocol, frame);
        }
    }

    fn send(&mut self, header: &[u8], payload: &[u8], protocol: u16) -> io::Result<()> {
        self.sent += 1;
        if self.sent % self.drop_cadence == 0 {
            debug!("dropping outgoing frame {}", self.sent);
            return Ok(());
        }
        self.lower.send(header, payload, protocol)?;
        if is_retransmit(protocol, header, self.retransmit_flag) {
            debug!("duplicating retransmitted segment");
            return self.lower.send(header, payload, protocol);
        }
        Ok(())
    }

    fn mtu(&self) -> u32 {
        self.lower.mtu()
    }

    fn max_header_length(&self) -> usize {
        self.lower.max_header_length()
    }

    fn link_address(&self) -> [u8; 6] {
        self.lower.link_address()
    }
}

/// Returns true when `header` holds an IPv4 packet whose TCP flags include
/// `flag`. Anything the parser does not understand is logged and treated as
/// an ordinary send.
fn is_retransmit(protocol: u16, header: &[u8], flag: u8) -> bool {
    if protocol != ETHERTYPE_IPV4 {
        debug!("not inspecting network protocol {protocol:#06x}");
        return false;
    }
    let Some(&version_ihl) = header.first() else {
        warn!("empty frame header");
        return false;
    };
    if version_ihl >> 4 != 4 {
        warn!("malformed IPv4 header");
        return false;
    }
    let ihl = usize::from(version_ihl & 0x0f) * 4;
    if ihl < 20 || header.len() < ihl {
        warn!("truncated IPv4 header");
        return false;
    }
    if header[9] != IP_PROTO_TCP {
        return false;
    }
    // The TCP flag byte sits at offset 13 of the transport header.
    match header.get(ihl + 13) {
        Some(&flags) => flags & flag != 0,
        None => {
            warn!("truncated TCP header");
            false
        }
    }
}
