// Wake-on-LAN proxy: listens on the daemon gateway's addresses and relays
// each valid magic packet to the addressed host's own gateway.
//
// Everything runs on the calling thread. One readiness wait covers all
// listening sockets and ready sockets are drained one datagram at a time,
// so two relays never overlap.

use crate::error::Error;
use crate::metrics;
use crate::model::{GatewayId, HostId, Registry, Target};
use crate::packet::{self, MagicPacket};
use crate::resolve::Overrides;
use crate::send::{retry, Sender, Transmit};
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;

// Larger than any magic packet so oversized datagrams are seen whole.
const RECV_BUFFER_SIZE: usize = 2048;
const WAIT_FOREVER: i32 = -1;

struct Listener {
    target: Target,
    socket: UdpSocket,
}

pub struct Daemon<T: Transmit> {
    sender: Sender<T>,
    gateway: GatewayId,
    listeners: Vec<Listener>,
}

fn discard_reason(err: &Error) -> &'static str {
    match err {
        Error::Packet(packet::Error::ShortPacket(_)) => "short",
        Error::Packet(packet::Error::OversizedPacket(_)) => "oversized",
        Error::Packet(packet::Error::BadHeader) => "bad_header",
        Error::Packet(packet::Error::BadMacReplication) => "bad_mac",
        Error::SecretMismatch => "secret",
        Error::UnknownHost(_) => "unknown_host",
        _ => "send_failed",
    }
}

// A host with no gateway of its own is relayed through the default gateway.
// If that lands on a port the daemon listens on, the relay can arrive back
// at the daemon and be relayed again.
fn shares_default_port(registry: &Registry, listen: &[Target]) -> Option<u16> {
    let default = registry.gateway(registry.default_gateway());
    listen
        .iter()
        .map(|l| l.addr().port())
        .find(|port| default.targets().iter().any(|t| t.addr().port() == *port))
}

/// Binds the listeners for `gateway` and relays until a fatal error.
pub fn run_daemon<T: Transmit>(sender: Sender<T>, gateway: GatewayId) -> Result<(), Error> {
    let mut daemon = Daemon::bind(sender, gateway)?;
    info!("relaying magic packets");
    daemon.run()
}

impl<T: Transmit> Daemon<T> {
    /// Binds one socket per target of `gateway`. Any failure here is fatal.
    pub fn bind(sender: Sender<T>, gateway: GatewayId) -> Result<Self, Error> {
        let targets = sender.registry().gateway(gateway).targets().to_vec();
        if targets.is_empty() {
            return Err(Error::ConfigResolution(
                "daemon gateway has no addresses to listen on".to_string(),
            ));
        }
        if let Some(port) = shares_default_port(sender.registry(), &targets) {
            warn!(
                "listening on port {}, which the default gateway also sends to; \
                 hosts without their own gateway may be relayed back here",
                port
            );
        }
        let mut listeners = Vec::with_capacity(targets.len());
        for target in targets {
            let socket = UdpSocket::bind(target.addr())?;
            info!("Listening on {}", socket.local_addr()?);
            listeners.push(Listener { target, socket });
        }
        Ok(Daemon {
            sender,
            gateway,
            listeners,
        })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.socket.local_addr().ok())
            .collect()
    }

    pub fn sender(&self) -> &Sender<T> {
        &self.sender
    }

    /// Relays until a socket fails. Never returns `Ok`.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            self.poll_once()?;
        }
    }

    /// Waits for at least one socket to become readable and processes one
    /// datagram from each ready socket. Returns how many were read.
    pub fn poll_once(&mut self) -> Result<usize, Error> {
        let ready = self.wait_ready()?;
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        for &i in &ready {
            let listener = &self.listeners[i];
            let (len, peer) = retry(|| listener.socket.recv_from(&mut buf))?;
            metrics::DATAGRAMS_RECEIVED.inc();
            debug!("{} bytes from {} on {}", len, peer, listener.target);
            match self.handle_datagram(&buf[..len]) {
                Ok(host) => {
                    metrics::RELAYS.inc();
                    info!(
                        "relayed wakeup from {} for {}",
                        peer,
                        self.sender.registry().host(host).name()
                    );
                }
                Err(err) => {
                    let reason = discard_reason(&err);
                    metrics::DATAGRAMS_DISCARDED
                        .with_label_values(&[reason])
                        .inc();
                    if reason == "send_failed" {
                        info!("{}: relay failed: {}", peer, err);
                    } else {
                        debug!("{}: discarding datagram: {}", peer, err);
                    }
                }
            }
        }
        Ok(ready.len())
    }

    fn wait_ready(&self) -> Result<Vec<usize>, Error> {
        let mut fds: Vec<PollFd> = self
            .listeners
            .iter()
            .map(|l| PollFd::new(l.socket.as_raw_fd(), PollFlags::POLLIN))
            .collect();
        loop {
            match poll(&mut fds, WAIT_FOREVER) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(Error::Socket(errno.into())),
            }
        }
        Ok(fds
            .iter()
            .enumerate()
            .filter(|(_, fd)| fd.revents().map_or(false, |r| !r.is_empty()))
            .map(|(i, _)| i)
            .collect())
    }

    /// Validates one inbound datagram and relays it. Every error is a
    /// reason the datagram was not relayed; none of them is fatal.
    pub fn handle_datagram(&mut self, data: &[u8]) -> Result<HostId, Error> {
        let packet = MagicPacket::from_raw(data)?;
        let registry = self.sender.registry();
        // No configured secret only admits packets without one.
        let expected = registry
            .gateway(self.gateway)
            .secret
            .clone()
            .unwrap_or_default();
        if packet.secret != expected {
            return Err(Error::SecretMismatch);
        }
        let host = registry
            .find_host_by_mac(&packet.mac)
            .ok_or(Error::UnknownHost(packet.mac))?;
        self.sender
            .send_host(host, &Overrides::default())
            .map_err(|err| err.source)?;
        Ok(host)
    }
}

#[cfg(test)]
mod tests {
    use crate::daemon::*;
    use crate::mac::MacAddr;
    use crate::model::Gateway;
    use crate::secret::Secret;
    use crate::send::noop::RecordingTransmitter;

    const MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

    fn relay_target() -> Target {
        Target::new("192.0.2.9:9".parse().unwrap())
    }

    fn daemon(listen_secret: Option<Secret>) -> Daemon<RecordingTransmitter> {
        let mut registry = Registry::new();
        let lab = registry.create_gateway("lab");
        registry.gateway_mut(lab).set_targets(vec![relay_target()]);
        registry.gateway_mut(lab).copies = Some(2);
        let h = registry.create_host("pc1", Some(lab));
        registry.host_mut(h).mac = MAC;

        let mut listen = Gateway::anonymous("127.0.0.1", "0");
        listen.secret = listen_secret;
        listen.set_targets(vec![Target::new("127.0.0.1:0".parse().unwrap())]);
        let listen = registry.add_anonymous_gateway(listen);

        let sender = Sender::new(registry, RecordingTransmitter::default());
        Daemon::bind(sender, listen).unwrap()
    }

    fn send_to(daemon: &Daemon<RecordingTransmitter>, payload: &[u8]) {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(payload, daemon.local_addrs()[0]).unwrap();
    }

    #[test]
    fn test_relays_valid_packet_to_host_gateway() {
        let mut daemon = daemon(None);
        send_to(&daemon, &MagicPacket::new(MAC, Secret::default()).payload());
        assert_eq!(daemon.poll_once().unwrap(), 1);
        let sent = &daemon.sender().transmit().sent;
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(t, _)| *t == relay_target()));
        assert_eq!(&sent[0].1[6..12], MAC.octets());
    }

    #[test]
    fn test_secret_mismatch_is_discarded() {
        let secret = Secret::new(&[1, 2, 3, 4]).unwrap();
        let mut daemon = daemon(Some(secret.clone()));
        let wrong = Secret::new(&[1, 2]).unwrap();
        send_to(&daemon, &MagicPacket::new(MAC, wrong).payload());
        assert_eq!(daemon.poll_once().unwrap(), 1);
        assert!(daemon.sender().transmit().sent.is_empty());

        // Still serving: the right secret goes through.
        send_to(&daemon, &MagicPacket::new(MAC, secret).payload());
        daemon.poll_once().unwrap();
        assert_eq!(daemon.sender().transmit().sent.len(), 2);
    }

    #[test]
    fn test_missing_secret_only_accepts_empty_payload() {
        let mut daemon = daemon(None);
        let data = MagicPacket::new(MAC, Secret::new(b"extra").unwrap()).payload();
        assert!(matches!(
            daemon.handle_datagram(&data),
            Err(Error::SecretMismatch)
        ));
    }

    #[test]
    fn test_unknown_mac_is_discarded() {
        let mut daemon = daemon(None);
        let stranger = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
        send_to(&daemon, &MagicPacket::new(stranger, Secret::default()).payload());
        daemon.poll_once().unwrap();
        assert!(daemon.sender().transmit().sent.is_empty());

        send_to(&daemon, &MagicPacket::new(MAC, Secret::default()).payload());
        daemon.poll_once().unwrap();
        assert_eq!(daemon.sender().transmit().sent.len(), 2);
    }

    #[test]
    fn test_malformed_datagrams_are_discarded() {
        let mut daemon = daemon(None);
        let mut bad_mac = MagicPacket::new(MAC, Secret::default()).payload();
        bad_mac[50] ^= 0xff;
        for data in [vec![0xffu8; 40], vec![0u8; 102], bad_mac] {
            send_to(&daemon, &data);
            daemon.poll_once().unwrap();
        }
        assert!(daemon.sender().transmit().sent.is_empty());
    }

    #[test]
    fn test_send_failure_is_not_fatal() {
        let mut daemon = daemon(None);
        daemon.sender.transmit_mut().fail_after = Some(0);
        send_to(&daemon, &MagicPacket::new(MAC, Secret::default()).payload());
        assert_eq!(daemon.poll_once().unwrap(), 1);

        daemon.sender.transmit_mut().fail_after = None;
        send_to(&daemon, &MagicPacket::new(MAC, Secret::default()).payload());
        assert_eq!(daemon.poll_once().unwrap(), 1);
        assert_eq!(daemon.sender().transmit().sent.len(), 2);
    }

    #[test]
    fn test_listen_port_shared_with_default_gateway() {
        let mut registry = Registry::new();
        let default = registry.default_gateway();
        registry
            .gateway_mut(default)
            .set_targets(vec![Target::new("255.255.255.255:7".parse().unwrap())]);
        let on = |s: &str| vec![Target::new(s.parse().unwrap())];
        assert_eq!(shares_default_port(&registry, &on("0.0.0.0:7")), Some(7));
        assert_eq!(shares_default_port(&registry, &on("[::]:7")), Some(7));
        assert_eq!(shares_default_port(&registry, &on("0.0.0.0:9")), None);
    }

    #[test]
    fn test_bind_without_targets_fails() {
        let mut registry = Registry::new();
        let listen = registry.add_anonymous_gateway(Gateway::anonymous("127.0.0.1", "0"));
        let sender = Sender::new(registry, RecordingTransmitter::default());
        assert!(matches!(
            Daemon::bind(sender, listen),
            Err(Error::ConfigResolution(_))
        ));
    }
}
