//! Stateful DHCPv6 Prefix Delegation client (spec §4.B2).
//!
//! Wire messages are built and parsed with `dhcproto`, grounded on this
//! pack's `nispor-mozim` lease-extraction pattern (`DhcpV6Lease::try_from`
//! matching on `DhcpOption::IAPD`/`IAPrefix`/`StatusCode`) rather than
//! hand-rolled option encoding.

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dhcproto::v6::{
    DhcpOption, DhcpOptions, IAPrefix, MessageType, OptionCode, Status, IAPD, ORO,
};
use dhcproto::{Decodable, Decoder, Encodable, Encoder};
use rand::Rng;
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ReceiverError;
use crate::prefix::{classify_update, Prefix, ReceiverEvent, SourceTag};
use crate::receiver::{CurrentPrefix, EventChannel, EventSender};

const DHCPV6_CLIENT_PORT: u16 = 546;
const DHCPV6_SERVER_PORT: u16 = 547;
const ALL_DHCP_RELAY_AGENTS_AND_SERVERS: &str = "ff02::1:2";

const DEFAULT_REQUESTED_PREFIX_LENGTH: u8 = 56;
const MIN_REQUESTED_PREFIX_LENGTH: u8 = 48;
const MAX_REQUESTED_PREFIX_LENGTH: u8 = 64;

/// Fallback T1/T2 (seconds) used when a server grants a lease with
/// `validLifetime == 0` and omits both timers — spec §3's "conservative
/// fallbacks" for the degenerate case.
const FALLBACK_T1: u32 = 1800;
const FALLBACK_T2: u32 = 2880;

/// Spec: "the loop sleeps in chunks <= 1 minute so shutdown/cancellation
/// is responsive".
const MAX_SLEEP_CHUNK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Soliciting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
    Stopped,
}

/// The lease currently held by this client, per spec §3's DHCPv6 lease
/// invariants (`0 < T1 <= T2 <= validLifetime`, defaulted when the server
/// omits them).
#[derive(Debug, Clone)]
pub struct Lease {
    pub iaid: u32,
    pub network: Ipv6Addr,
    pub prefix_len: u8,
    pub t1: u32,
    pub t2: u32,
    pub valid_lifetime: u32,
    pub preferred_lifetime: u32,
    pub received_at: DateTime<Utc>,
    pub server_id: Vec<u8>,
}

impl Lease {
    fn to_prefix(&self) -> Prefix {
        Prefix::new(
            self.network,
            self.prefix_len,
            self.valid_lifetime,
            self.preferred_lifetime,
            SourceTag::Dhcpv6Pd,
            self.received_at,
        )
    }
}

/// Derives effective T1/T2 from a server-granted `valid_lifetime` and the
/// optional T1/T2 the server supplied, applying spec §3's defaulting
/// rules. Integer-only arithmetic throughout.
fn derive_timers(valid_lifetime: u32, t1: Option<u32>, t2: Option<u32>) -> (u32, u32) {
    if valid_lifetime == 0 {
        return (FALLBACK_T1, FALLBACK_T2);
    }

    let default_t1 = ((valid_lifetime as u64) / 2) as u32;
    let default_t2 = ((valid_lifetime as u64) * 4 / 5) as u32;

    let t1 = t1.filter(|&v| v > 0).unwrap_or(default_t1).max(1);
    let t2 = t2.filter(|&v| v > 0).unwrap_or(default_t2).max(t1);
    let t2 = t2.min(valid_lifetime).max(t1);
    (t1, t2)
}

fn clamp_requested_length(requested: Option<u8>) -> u8 {
    requested
        .unwrap_or(DEFAULT_REQUESTED_PREFIX_LENGTH)
        .clamp(MIN_REQUESTED_PREFIX_LENGTH, MAX_REQUESTED_PREFIX_LENGTH)
}

/// Builds a DUID-LL (RFC 8415 §11.2) from an interface MAC address.
fn duid_ll(mac: [u8; 6]) -> Vec<u8> {
    let mut duid = Vec::with_capacity(10);
    duid.extend_from_slice(&3u16.to_be_bytes()); // DUID-LL type
    duid.extend_from_slice(&1u16.to_be_bytes()); // hardware type: Ethernet
    duid.extend_from_slice(&mac);
    duid
}

fn random_iaid() -> u32 {
    rand::rng().random()
}

fn random_xid() -> [u8; 3] {
    let mut xid = [0u8; 3];
    rand::rng().fill(&mut xid);
    xid
}

fn build_ia_pd_request(iaid: u32, requested_length: u8) -> IAPD {
    let mut opts = DhcpOptions::new();
    opts.insert(DhcpOption::IAPrefix(IAPrefix {
        preferred_lifetime: 0,
        valid_lifetime: 0,
        prefix_len: requested_length,
        prefix_ip: Ipv6Addr::UNSPECIFIED,
        opts: DhcpOptions::new(),
    }));
    IAPD {
        id: iaid,
        t1: 0,
        t2: 0,
        opts,
    }
}

fn build_message(
    msg_type: MessageType,
    xid: [u8; 3],
    client_duid: &[u8],
    server_duid: Option<&[u8]>,
    iapd: IAPD,
) -> dhcproto::v6::Message {
    let mut opts = DhcpOptions::new();
    opts.insert(DhcpOption::ClientId(client_duid.to_vec()));
    if let Some(server_id) = server_duid {
        opts.insert(DhcpOption::ServerId(server_id.to_vec()));
    }
    opts.insert(DhcpOption::IAPD(iapd));
    opts.insert(DhcpOption::ORO(ORO {
        opts: vec![OptionCode::DomainNameServers],
    }));

    let mut msg = dhcproto::v6::Message::new(msg_type);
    msg.set_xid(xid);
    msg.set_opts(opts);
    msg
}

fn encode_message(msg: &dhcproto::v6::Message) -> Result<Vec<u8>, ReceiverError> {
    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf);
    msg.encode(&mut encoder)
        .map_err(|e| ReceiverError::Protocol(e.to_string()))?;
    Ok(buf)
}

fn decode_message(buf: &[u8]) -> Result<dhcproto::v6::Message, ReceiverError> {
    let mut decoder = Decoder::new(buf);
    dhcproto::v6::Message::decode(&mut decoder).map_err(|e| ReceiverError::Protocol(e.to_string()))
}

/// What processing a REPLY (or the RENEW/REBIND variant of one) produced.
enum ReplyOutcome {
    Bound(Lease),
    /// The server returned a non-success status code, or a structurally
    /// valid IA_PD with every lifetime at zero (spec boundary behavior
    /// 12: "all IA_PD lifetimes zero is treated as a failure, not an
    /// acquisition").
    Failed(String),
}

fn extract_ia_pd(msg: &dhcproto::v6::Message, expected_iaid: Option<u32>) -> Option<IAPD> {
    msg.opts().iter().find_map(|opt| match opt {
        DhcpOption::IAPD(iapd) if expected_iaid.is_none_or(|id| id == iapd.id) => Some(iapd.clone()),
        _ => None,
    })
}

fn extract_server_id(msg: &dhcproto::v6::Message) -> Option<Vec<u8>> {
    msg.opts().iter().find_map(|opt| match opt {
        DhcpOption::ServerId(id) => Some(id.clone()),
        _ => None,
    })
}

/// Processes a REPLY's IA_PD into a bound lease, or a failure if the
/// server signalled an error or granted nothing usable.
fn process_reply(
    msg: &dhcproto::v6::Message,
    iaid: u32,
    fallback_server_id: Vec<u8>,
    now: DateTime<Utc>,
) -> ReplyOutcome {
    let iapd = match extract_ia_pd(msg, Some(iaid)) {
        Some(v) => v,
        None => return ReplyOutcome::Failed("REPLY carried no matching IA_PD".to_string()),
    };

    for opt in iapd.opts.iter() {
        if let DhcpOption::StatusCode(status) = opt {
            if status.status != Status::Success {
                return ReplyOutcome::Failed(format!(
                    "server returned status {:?}: {}",
                    status.status, status.msg
                ));
            }
        }
    }

    let prefix_opt = iapd.opts.iter().find_map(|opt| match opt {
        DhcpOption::IAPrefix(p) => Some(p.clone()),
        _ => None,
    });

    let Some(prefix) = prefix_opt else {
        return ReplyOutcome::Failed("IA_PD carried no IAPrefix option".to_string());
    };

    if prefix.valid_lifetime == 0 {
        return ReplyOutcome::Failed("server granted a prefix with valid_lifetime == 0".to_string());
    }

    let server_id = extract_server_id(msg).unwrap_or(fallback_server_id);
    let (t1, t2) = derive_timers(prefix.valid_lifetime, non_zero(iapd.t1), non_zero(iapd.t2));

    ReplyOutcome::Bound(Lease {
        iaid,
        network: prefix.prefix_ip,
        prefix_len: prefix.prefix_len,
        t1,
        t2,
        valid_lifetime: prefix.valid_lifetime,
        preferred_lifetime: prefix.preferred_lifetime,
        received_at: now,
        server_id,
    })
}

fn non_zero(v: u32) -> Option<u32> {
    if v == 0 {
        None
    } else {
        Some(v)
    }
}

pub struct Dhcpv6PdReceiver {
    interface: String,
    requested_prefix_length: u8,
    mac: [u8; 6],
    current: Arc<CurrentPrefix>,
    events: EventChannel,
}

impl Dhcpv6PdReceiver {
    pub fn new(interface: impl Into<String>, requested_prefix_length: Option<u8>, mac: [u8; 6]) -> Self {
        Self {
            interface: interface.into(),
            requested_prefix_length: clamp_requested_length(requested_prefix_length),
            mac,
            current: Arc::new(CurrentPrefix::default()),
            events: EventChannel::new(),
        }
    }

    pub async fn start(&self, cancel: CancellationToken) -> Result<(), ReceiverError> {
        if self.interface.is_empty() {
            return Err(ReceiverError::MissingInterface("dhcpv6-pd"));
        }

        let socket = build_socket(&self.interface)?;
        let sender = self.events.sender();
        let current = self.current.clone();
        let client_duid = duid_ll(self.mac);
        let requested_length = self.requested_prefix_length;

        tokio::spawn(run_client_loop(socket, sender, current, client_duid, requested_length, cancel));
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ReceiverError> {
        Ok(())
    }

    pub fn events(&self) -> Vec<ReceiverEvent> {
        self.events.poll()
    }

    pub fn current_prefix(&self) -> Option<Prefix> {
        self.current.get()
    }

    pub fn source(&self) -> SourceTag {
        SourceTag::Dhcpv6Pd
    }
}

fn build_socket(interface: &str) -> Result<Socket, ReceiverError> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, None).map_err(ReceiverError::Socket)?;

    #[cfg(target_os = "linux")]
    socket
        .bind_device(Some(interface.as_bytes()))
        .map_err(ReceiverError::Socket)?;

    let bind_addr: std::net::SocketAddr =
        format!("[::]:{}", DHCPV6_CLIENT_PORT).parse().expect("valid bind address");
    socket.bind(&bind_addr.into()).map_err(ReceiverError::Socket)?;
    socket.set_nonblocking(true).map_err(ReceiverError::Socket)?;
    Ok(socket)
}

async fn run_client_loop(
    socket: Socket,
    sender: EventSender,
    current: Arc<CurrentPrefix>,
    client_duid: Vec<u8>,
    requested_length: u8,
    cancel: CancellationToken,
) {
    let socket = match UdpSocket::from_std(socket.into()) {
        Ok(s) => s,
        Err(e) => {
            sender.send(ReceiverEvent::Failed(e.to_string()));
            return;
        }
    };

    let dest: std::net::SocketAddr = format!(
        "[{}]:{}",
        ALL_DHCP_RELAY_AGENTS_AND_SERVERS, DHCPV6_SERVER_PORT
    )
    .parse()
    .expect("valid multicast destination");

    let iaid = random_iaid();
    let mut state = State::Init;
    let mut lease: Option<Lease> = None;
    let mut server_id: Vec<u8> = Vec::new();
    let mut recv_buf = [0u8; 1500];

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match state {
            State::Init => {
                state = State::Soliciting;
            }
            State::Soliciting => {
                let xid = random_xid();
                let msg = build_message(
                    MessageType::Solicit,
                    xid,
                    &client_duid,
                    None,
                    build_ia_pd_request(iaid, requested_length),
                );
                if send(&socket, dest, &msg).await.is_err() {
                    sender.send(ReceiverEvent::Failed("failed to send SOLICIT".to_string()));
                }

                match recv_with_timeout(&socket, &mut recv_buf, Duration::from_secs(5), &cancel).await {
                    RecvOutcome::Cancelled => return,
                    RecvOutcome::Timeout => continue,
                    RecvOutcome::Message(reply) => {
                        if reply.msg_type() == MessageType::Advertise && extract_ia_pd(&reply, Some(iaid)).is_some() {
                            if let Some(id) = extract_server_id(&reply) {
                                server_id = id;
                            }
                            state = State::Requesting;
                        }
                    }
                    RecvOutcome::Error(e) => {
                        sender.send(ReceiverEvent::Failed(e));
                    }
                }
            }
            State::Requesting => {
                let xid = random_xid();
                let msg = build_message(
                    MessageType::Request,
                    xid,
                    &client_duid,
                    Some(&server_id),
                    build_ia_pd_request(iaid, requested_length),
                );
                if send(&socket, dest, &msg).await.is_err() {
                    sender.send(ReceiverEvent::Failed("failed to send REQUEST".to_string()));
                }

                match recv_with_timeout(&socket, &mut recv_buf, Duration::from_secs(5), &cancel).await {
                    RecvOutcome::Cancelled => return,
                    RecvOutcome::Timeout => continue,
                    RecvOutcome::Error(e) => sender.send(ReceiverEvent::Failed(e)),
                    RecvOutcome::Message(reply) if reply.msg_type() == MessageType::Reply => {
                        match process_reply(&reply, iaid, server_id.clone(), Utc::now()) {
                            ReplyOutcome::Bound(new_lease) => {
                                let previous = lease.as_ref().map(Lease::to_prefix);
                                let prefix = new_lease.to_prefix();
                                let event = classify_update(previous.as_ref(), prefix.clone());
                                current.set(Some(prefix));
                                lease = Some(new_lease);
                                state = State::Bound;
                                sender.send(event);
                            }
                            ReplyOutcome::Failed(msg) => {
                                sender.send(ReceiverEvent::Failed(msg));
                                state = State::Init;
                            }
                        }
                    }
                    RecvOutcome::Message(_) => continue,
                }
            }
            State::Bound => {
                let Some(active) = lease.clone() else {
                    state = State::Init;
                    continue;
                };
                let elapsed = (Utc::now() - active.received_at).num_seconds().max(0) as u64;
                let t1 = active.t1 as u64;
                if elapsed >= t1 {
                    state = State::Renewing;
                    continue;
                }
                let remaining = Duration::from_secs(t1 - elapsed).min(MAX_SLEEP_CHUNK);
                if sleep_or_cancel(remaining, &cancel).await {
                    return;
                }
            }
            State::Renewing => {
                let Some(active) = lease.clone() else {
                    state = State::Init;
                    continue;
                };
                let xid = random_xid();
                let mut iapd_opts = DhcpOptions::new();
                iapd_opts.insert(DhcpOption::IAPrefix(IAPrefix {
                    preferred_lifetime: active.preferred_lifetime,
                    valid_lifetime: active.valid_lifetime,
                    prefix_len: active.prefix_len,
                    prefix_ip: active.network,
                    opts: DhcpOptions::new(),
                }));
                let iapd = IAPD {
                    id: active.iaid,
                    t1: active.t1,
                    t2: active.t2,
                    opts: iapd_opts,
                };
                let msg = build_message(MessageType::Renew, xid, &client_duid, Some(&active.server_id), iapd);
                let _ = send(&socket, dest, &msg).await;

                match recv_with_timeout(&socket, &mut recv_buf, Duration::from_secs(5), &cancel).await {
                    RecvOutcome::Cancelled => return,
                    RecvOutcome::Timeout => {
                        let elapsed = (Utc::now() - active.received_at).num_seconds().max(0) as u64;
                        if elapsed >= active.t2 as u64 {
                            state = State::Rebinding;
                        }
                    }
                    RecvOutcome::Error(e) => sender.send(ReceiverEvent::Failed(e)),
                    RecvOutcome::Message(reply) if reply.msg_type() == MessageType::Reply => {
                        match process_reply(&reply, active.iaid, active.server_id.clone(), Utc::now()) {
                            ReplyOutcome::Bound(new_lease) => {
                                let previous = Some(active.to_prefix());
                                let prefix = new_lease.to_prefix();
                                let event = classify_update(previous.as_ref(), prefix.clone());
                                current.set(Some(prefix));
                                lease = Some(new_lease);
                                state = State::Bound;
                                sender.send(event);
                            }
                            ReplyOutcome::Failed(msg) => {
                                sender.send(ReceiverEvent::Failed(msg));
                                let elapsed = (Utc::now() - active.received_at).num_seconds().max(0) as u64;
                                state = if elapsed >= active.t2 as u64 {
                                    State::Rebinding
                                } else {
                                    State::Bound
                                };
                            }
                        }
                    }
                    RecvOutcome::Message(_) => {}
                }

                if is_expired(&active) {
                    current.set(None);
                    lease = None;
                    sender.send(ReceiverEvent::Expired);
                    state = State::Init;
                }
            }
            State::Rebinding => {
                let Some(active) = lease.clone() else {
                    state = State::Init;
                    continue;
                };
                let xid = random_xid();
                let mut iapd_opts = DhcpOptions::new();
                iapd_opts.insert(DhcpOption::IAPrefix(IAPrefix {
                    preferred_lifetime: active.preferred_lifetime,
                    valid_lifetime: active.valid_lifetime,
                    prefix_len: active.prefix_len,
                    prefix_ip: active.network,
                    opts: DhcpOptions::new(),
                }));
                let iapd = IAPD {
                    id: active.iaid,
                    t1: active.t1,
                    t2: active.t2,
                    opts: iapd_opts,
                };
                // REBIND omits server identifier per spec §4.B2.
                let msg = build_message(MessageType::Rebind, xid, &client_duid, None, iapd);
                let _ = send(&socket, dest, &msg).await;

                match recv_with_timeout(&socket, &mut recv_buf, Duration::from_secs(5), &cancel).await {
                    RecvOutcome::Cancelled => return,
                    RecvOutcome::Timeout => {}
                    RecvOutcome::Error(e) => sender.send(ReceiverEvent::Failed(e)),
                    RecvOutcome::Message(reply) if reply.msg_type() == MessageType::Reply => {
                        match process_reply(&reply, active.iaid, Vec::new(), Utc::now()) {
                            ReplyOutcome::Bound(new_lease) => {
                                let previous = Some(active.to_prefix());
                                let prefix = new_lease.to_prefix();
                                let event = classify_update(previous.as_ref(), prefix.clone());
                                current.set(Some(prefix));
                                lease = Some(new_lease);
                                state = State::Bound;
                                sender.send(event);
                            }
                            ReplyOutcome::Failed(msg) => {
                                sender.send(ReceiverEvent::Failed(msg));
                            }
                        }
                    }
                    RecvOutcome::Message(_) => {}
                }

                if is_expired(&active) {
                    current.set(None);
                    lease = None;
                    sender.send(ReceiverEvent::Expired);
                    state = State::Init;
                }
            }
            State::Stopped => return,
        }
    }
}

fn is_expired(lease: &Lease) -> bool {
    let elapsed = (Utc::now() - lease.received_at).num_seconds().max(0) as u64;
    elapsed >= lease.valid_lifetime as u64
}

async fn send(socket: &UdpSocket, dest: std::net::SocketAddr, msg: &dhcproto::v6::Message) -> Result<(), ReceiverError> {
    let buf = encode_message(msg)?;
    socket.send_to(&buf, dest).await.map_err(ReceiverError::Io)?;
    Ok(())
}

enum RecvOutcome {
    Message(dhcproto::v6::Message),
    Timeout,
    Error(String),
    Cancelled,
}

async fn recv_with_timeout(
    socket: &UdpSocket,
    buf: &mut [u8],
    timeout: Duration,
    cancel: &CancellationToken,
) -> RecvOutcome {
    tokio::select! {
        _ = cancel.cancelled() => RecvOutcome::Cancelled,
        result = tokio::time::timeout(timeout, socket.recv_from(buf)) => {
            match result {
                Err(_) => RecvOutcome::Timeout,
                Ok(Err(e)) => RecvOutcome::Error(e.to_string()),
                Ok(Ok((n, _))) => match decode_message(&buf[..n]) {
                    Ok(msg) => RecvOutcome::Message(msg),
                    Err(e) => RecvOutcome::Error(e.to_string()),
                },
            }
        }
    }
}

/// Sleeps up to `duration`, waking early on cancellation. Returns `true`
/// if cancelled.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_timers_defaults_when_missing() {
        let (t1, t2) = derive_timers(1000, None, None);
        assert_eq!(t1, 500);
        assert_eq!(t2, 800);
    }

    #[test]
    fn derive_timers_respects_server_values() {
        let (t1, t2) = derive_timers(1000, Some(100), Some(200));
        assert_eq!(t1, 100);
        assert_eq!(t2, 200);
    }

    #[test]
    fn derive_timers_enforces_ordering_invariant() {
        // Server-supplied T2 below T1 is clamped up so 0 < T1 <= T2 <= valid holds.
        let (t1, t2) = derive_timers(1000, Some(600), Some(100));
        assert!(t1 <= t2);
        assert!(t2 <= 1000);
    }

    #[test]
    fn derive_timers_falls_back_when_both_zero() {
        let (t1, t2) = derive_timers(0, None, None);
        assert_eq!(t1, FALLBACK_T1);
        assert_eq!(t2, FALLBACK_T2);
    }

    #[test]
    fn clamp_requested_length_applies_default_and_bounds() {
        assert_eq!(clamp_requested_length(None), 56);
        assert_eq!(clamp_requested_length(Some(40)), 48);
        assert_eq!(clamp_requested_length(Some(96)), 64);
        assert_eq!(clamp_requested_length(Some(60)), 60);
    }

    fn reply_with_prefix(iaid: u32, prefix: Ipv6Addr, len: u8, valid: u32, preferred: u32) -> dhcproto::v6::Message {
        let mut iapd_opts = DhcpOptions::new();
        iapd_opts.insert(DhcpOption::IAPrefix(IAPrefix {
            preferred_lifetime: preferred,
            valid_lifetime: valid,
            prefix_len: len,
            prefix_ip: prefix,
            opts: DhcpOptions::new(),
        }));
        let iapd = IAPD { id: iaid, t1: 0, t2: 0, opts: iapd_opts };
        let mut opts = DhcpOptions::new();
        opts.insert(DhcpOption::ServerId(vec![1, 2, 3]));
        opts.insert(DhcpOption::IAPD(iapd));
        let mut msg = dhcproto::v6::Message::new(MessageType::Reply);
        msg.set_opts(opts);
        msg
    }

    #[test]
    fn process_reply_all_zero_lifetimes_is_a_failure_not_acquisition() {
        let reply = reply_with_prefix(1, "2001:db8::".parse().unwrap(), 48, 0, 0);
        let outcome = process_reply(&reply, 1, Vec::new(), Utc::now());
        assert!(matches!(outcome, ReplyOutcome::Failed(_)));
    }

    #[test]
    fn process_reply_success_binds_lease() {
        let reply = reply_with_prefix(1, "2001:db8::".parse().unwrap(), 48, 3600, 1800);
        let outcome = process_reply(&reply, 1, Vec::new(), Utc::now());
        match outcome {
            ReplyOutcome::Bound(lease) => {
                assert_eq!(lease.network, "2001:db8::".parse::<Ipv6Addr>().unwrap());
                assert_eq!(lease.prefix_len, 48);
            }
            ReplyOutcome::Failed(_) => panic!("expected bound lease"),
        }
    }

    #[test]
    fn process_reply_status_failure_rejected() {
        let mut iapd_opts = DhcpOptions::new();
        iapd_opts.insert(DhcpOption::StatusCode(dhcproto::v6::StatusCode {
            status: Status::NoPrefixAvail,
            msg: "no prefixes".to_string(),
        }));
        let iapd = IAPD { id: 1, t1: 0, t2: 0, opts: iapd_opts };
        let mut opts = DhcpOptions::new();
        opts.insert(DhcpOption::IAPD(iapd));
        let mut msg = dhcproto::v6::Message::new(MessageType::Reply);
        msg.set_opts(opts);

        let outcome = process_reply(&msg, 1, Vec::new(), Utc::now());
        assert!(matches!(outcome, ReplyOutcome::Failed(_)));
    }

    #[test]
    fn duid_ll_encodes_type_and_hardware_type() {
        let duid = duid_ll([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&duid[0..2], &3u16.to_be_bytes());
        assert_eq!(&duid[2..4], &1u16.to_be_bytes());
        assert_eq!(&duid[4..10], &[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    }
}
