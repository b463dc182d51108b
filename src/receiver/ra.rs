//! Passive Router Advertisement listener (spec §4.B1).
//!
//! Grounded on this codebase's own `hr-ipv6::ra` Router Advertisement
//! *sender* (raw ICMPv6 socket, `bind_device`, `tokio::net::UdpSocket`
//! bridging) — this receiver runs the same raw-socket setup in the
//! opposite direction, parsing inbound RAs instead of constructing
//! outbound ones.

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ReceiverError;
use crate::prefix::{classify_update, Prefix, ReceiverEvent, SourceTag};
use crate::receiver::{CurrentPrefix, EventChannel, EventSender};

/// ICMPv6 message type for Router Advertisement (RFC 4861).
const ICMPV6_ROUTER_ADVERTISEMENT: u8 = 134;
/// Option type for Prefix Information (RFC 4861 §4.6.2).
const OPT_PREFIX_INFORMATION: u8 = 3;

/// How long a single `recv_from` waits before looping back to check for
/// cancellation. Spec calls for "a short deadline (~1s)".
const READ_DEADLINE: Duration = Duration::from_secs(1);

pub struct RaReceiver {
    interface: String,
    current: Arc<CurrentPrefix>,
    events: EventChannel,
}

impl RaReceiver {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            current: Arc::new(CurrentPrefix::default()),
            events: EventChannel::new(),
        }
    }

    pub async fn start(&self, cancel: CancellationToken) -> Result<(), ReceiverError> {
        let socket = build_socket(&self.interface)?;
        let sender = self.events.sender();
        let current = self.current.clone();
        tokio::spawn(run_listen_loop(socket, sender, current, cancel));
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ReceiverError> {
        // Cancellation is driven by the `CancellationToken` passed to
        // `start`; the background task owns the raw socket and releases
        // it on exit, so there is nothing further to tear down here.
        Ok(())
    }

    pub fn events(&self) -> Vec<ReceiverEvent> {
        self.events.poll()
    }

    pub fn current_prefix(&self) -> Option<Prefix> {
        self.current.get()
    }

    pub fn source(&self) -> SourceTag {
        SourceTag::RouterAdvertisement
    }
}

fn build_socket(interface: &str) -> Result<Socket, ReceiverError> {
    if interface.is_empty() {
        return Err(ReceiverError::MissingInterface("router advertisement"));
    }

    let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))
        .map_err(ReceiverError::Socket)?;

    #[cfg(target_os = "linux")]
    socket
        .bind_device(Some(interface.as_bytes()))
        .map_err(ReceiverError::Socket)?;

    socket.set_nonblocking(true).map_err(ReceiverError::Socket)?;
    Ok(socket)
}

async fn run_listen_loop(
    socket: Socket,
    sender: EventSender,
    current: Arc<CurrentPrefix>,
    cancel: CancellationToken,
) {
    let socket = match UdpSocket::from_std(socket.into()) {
        Ok(s) => s,
        Err(e) => {
            sender.send(ReceiverEvent::Failed(e.to_string()));
            return;
        }
    };

    let mut buf = [0u8; 1500];
    loop {
        let recv = tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio::time::timeout(READ_DEADLINE, socket.recv_from(&mut buf)) => result,
        };

        match recv {
            Err(_elapsed) => continue, // read deadline hit, loop to recheck cancellation
            Ok(Err(e)) => {
                warn!("RA socket read error: {}", e);
                sender.send(ReceiverEvent::Failed(e.to_string()));
            }
            Ok(Ok((n, _from))) => {
                if let Some(candidate) = select_prefix(&buf[..n]) {
                    let previous = current.get();
                    let prefix = Prefix::new(
                        candidate.address,
                        candidate.length,
                        candidate.valid_lifetime,
                        candidate.preferred_lifetime,
                        SourceTag::RouterAdvertisement,
                        Utc::now(),
                    );
                    let event = classify_update(previous.as_ref(), prefix.clone());
                    current.set(Some(prefix));
                    sender.send(event);
                }
            }
        }
    }
}

struct PrefixCandidate {
    address: Ipv6Addr,
    length: u8,
    valid_lifetime: u32,
    preferred_lifetime: u32,
}

/// Address classification per spec §4.B1 step 3.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    None,
    UniqueLocal,
    GlobalUnicast,
}

fn classify_address(addr: &Ipv6Addr) -> Rank {
    let first = addr.octets()[0];
    if first & 0b1110_0000 == 0b0010_0000 {
        Rank::GlobalUnicast
    } else if first & 0b1111_1110 == 0b1111_1100 {
        Rank::UniqueLocal
    } else {
        Rank::None
    }
}

/// Parses an ICMPv6 message, iterates its Prefix Information Options, and
/// selects the best on-link, non-deprecated candidate per spec §4.B1.
fn select_prefix(packet: &[u8]) -> Option<PrefixCandidate> {
    if packet.len() < 16 || packet[0] != ICMPV6_ROUTER_ADVERTISEMENT {
        return None;
    }

    // RA fixed header is 16 bytes (type, code, checksum, hop limit, flags,
    // router lifetime, reachable time, retrans timer); options follow.
    let mut offset = 16usize;
    let mut best: Option<(Rank, PrefixCandidate)> = None;

    while offset + 2 <= packet.len() {
        let opt_type = packet[offset];
        let opt_len_words = packet[offset + 1] as usize;
        if opt_len_words == 0 {
            break; // malformed: zero-length option would loop forever
        }
        let opt_len_bytes = opt_len_words * 8;
        if offset + opt_len_bytes > packet.len() {
            break;
        }

        if opt_type == OPT_PREFIX_INFORMATION && opt_len_bytes >= 32 {
            let prefix_len = packet[offset + 2];
            let flags = packet[offset + 3];
            let on_link = flags & 0x80 != 0;
            let valid_lifetime = u32::from_be_bytes(packet[offset + 4..offset + 8].try_into().unwrap());
            let preferred_lifetime = u32::from_be_bytes(packet[offset + 8..offset + 12].try_into().unwrap());
            let addr_bytes: [u8; 16] = packet[offset + 16..offset + 32].try_into().unwrap();
            let address = Ipv6Addr::from(addr_bytes);

            if on_link && valid_lifetime != 0 {
                let rank = classify_address(&address);
                if rank != Rank::None {
                    let better = match &best {
                        None => true,
                        Some((best_rank, _)) => rank > *best_rank,
                    };
                    if better {
                        best = Some((
                            rank,
                            PrefixCandidate {
                                address,
                                length: prefix_len,
                                valid_lifetime,
                                preferred_lifetime,
                            },
                        ));
                    }
                }
            }
        }

        offset += opt_len_bytes;
    }

    best.map(|(_, candidate)| candidate)
}
