//! UDP datagram transport
//!
//! One non-blocking socket, split into a send half for the mix loop and a
//! receive half for the ingest pump. Peers are interned by socket address;
//! the numeric id is what the rest of the server sees.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use parking_lot::Mutex;

use es_core::{EsError, EsResult};
use es_server::{PeerId, Transport};

/// Magic prefix on every server-sent datagram
const SEND_HEADER: [u8; 4] = *b"ESMX";

/// Largest datagram we accept from a client
const MAX_DATAGRAM: usize = 1500;

/// Address book shared by both halves
#[derive(Default)]
struct PeerTable {
    by_addr: HashMap<SocketAddr, PeerId>,
    by_peer: HashMap<PeerId, SocketAddr>,
    next_id: u64,
}

impl PeerTable {
    fn intern(&mut self, addr: SocketAddr) -> PeerId {
        if let Some(&peer) = self.by_addr.get(&addr) {
            return peer;
        }
        self.next_id += 1;
        let peer = PeerId(self.next_id);
        self.by_addr.insert(addr, peer);
        self.by_peer.insert(peer, addr);
        peer
    }

    fn forget(&mut self, peer: PeerId) {
        if let Some(addr) = self.by_peer.remove(&peer) {
            self.by_addr.remove(&addr);
        }
    }
}

/// Send half, owned by the frame scheduler
pub struct UdpSender {
    socket: UdpSocket,
    peers: Arc<Mutex<PeerTable>>,
    scratch: Vec<u8>,
}

impl Transport for UdpSender {
    fn send(&mut self, peer: PeerId, payload: &[u8]) -> EsResult<()> {
        let addr = self
            .peers
            .lock()
            .by_peer
            .get(&peer)
            .copied()
            .ok_or_else(|| EsError::Transport(format!("no address for {}", peer)))?;

        self.scratch.clear();
        self.scratch.extend_from_slice(&SEND_HEADER);
        self.scratch.extend_from_slice(payload);
        self.socket
            .send_to(&self.scratch, addr)
            .map_err(|e| EsError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Receive half, polled by the ingest pump between frames
pub struct UdpReceiver {
    socket: UdpSocket,
    peers: Arc<Mutex<PeerTable>>,
    buffer: [u8; MAX_DATAGRAM],
}

impl UdpReceiver {
    /// Pull one pending datagram, if any
    pub fn try_recv(&mut self) -> Option<(PeerId, Vec<u8>)> {
        match self.socket.recv_from(&mut self.buffer) {
            Ok((len, addr)) => {
                let peer = self.peers.lock().intern(addr);
                Some((peer, self.buffer[..len].to_vec()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
            Err(e) => {
                log::warn!("recv error: {}", e);
                None
            }
        }
    }

    /// Drop a peer from the address book
    pub fn forget(&self, peer: PeerId) {
        self.peers.lock().forget(peer);
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Bind the mixer socket and split it into its two halves
pub fn bind(addr: impl ToSocketAddrs) -> EsResult<(UdpSender, UdpReceiver)> {
    let socket = UdpSocket::bind(addr)?;
    socket.set_nonblocking(true)?;
    let peers = Arc::new(Mutex::new(PeerTable::default()));

    let sender = UdpSender {
        socket: socket.try_clone()?,
        peers: Arc::clone(&peers),
        scratch: Vec::with_capacity(MAX_DATAGRAM),
    };
    let receiver = UdpReceiver {
        socket,
        peers,
        buffer: [0; MAX_DATAGRAM],
    };
    Ok((sender, receiver))
}
