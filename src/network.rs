use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::warn;

use crate::error::KademliaError;
use crate::key::Key;
use crate::rpc::Rpc;
use crate::MESSAGE_LENGTH;

/// The datagram channel the node runs over.
///
/// Implementations are assumed unreliable: no delivery, ordering, or
/// de-duplication guarantees. The node never finds out whether a sent
/// datagram arrived except by receiving an answer.
pub trait Transport: Send + Sync {
    /// Blocks until the next datagram arrives. An error ends the reader.
    fn recv(&self) -> Result<Vec<u8>, KademliaError>;

    /// Sends one datagram to `addr` (`ip:port`).
    fn send_to(&self, addr: &str, data: &[u8]) -> Result<(), KademliaError>;

    /// The local `ip:port` this transport is bound to.
    fn local_addr(&self) -> String;
}

/// [`Transport`] over a standard UDP socket.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds a UDP socket on `addr`. Port 0 asks the OS for a free port.
    pub fn bind(addr: &str) -> Result<Self, KademliaError> {
        let socket =
            UdpSocket::bind(addr).map_err(|err| KademliaError::Transport(err.to_string()))?;
        Ok(UdpTransport { socket })
    }
}

impl Transport for UdpTransport {
    fn recv(&self) -> Result<Vec<u8>, KademliaError> {
        let mut buffer = [0u8; MESSAGE_LENGTH];
        let (len, _src) = self
            .socket
            .recv_from(&mut buffer)
            .map_err(|err| KademliaError::Transport(err.to_string()))?;
        Ok(buffer[..len].to_vec())
    }

    fn send_to(&self, addr: &str, data: &[u8]) -> Result<(), KademliaError> {
        self.socket
            .send_to(data, addr)
            .map(|_| ())
            .map_err(|err| KademliaError::Transport(err.to_string()))
    }

    fn local_addr(&self) -> String {
        self.socket
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default()
    }
}

/// Matches asynchronous inbound datagrams to outstanding requests by
/// request id.
///
/// Outbound callers block in [`Network::send_request`] on a per-request
/// waiter until the correlated response arrives or the timeout elapses. The
/// single reader thread stays non-blocking apart from the socket read
/// itself: it hands matched responses to their waiters and forwards
/// everything else on the inbound channel as unsolicited traffic.
pub struct Network {
    transport: Arc<dyn Transport>,
    pending_requests: Arc<Mutex<HashMap<Key, Sender<Rpc>>>>,
    request_timeout: Duration,
}

impl Network {
    /// Constructs a correlation layer over `transport`.
    pub fn new(transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        Network {
            transport,
            pending_requests: Arc::new(Mutex::new(HashMap::new())),
            request_timeout,
        }
    }

    /// Spawns the reader thread. Messages that fail to decode or validate
    /// are dropped with a log line; a message whose id matches no pending
    /// request is forwarded on `inbound_tx`, whatever its direction flag
    /// claims.
    pub fn start(&self, inbound_tx: Sender<Rpc>) {
        let transport = Arc::clone(&self.transport);
        let pending_requests = Arc::clone(&self.pending_requests);
        thread::spawn(move || loop {
            let data = match transport.recv() {
                Ok(data) => data,
                Err(err) => {
                    warn!("network: receive failed, reader stopping: {}", err);
                    break;
                }
            };
            let rpc = match Rpc::decode(&data) {
                Ok(rpc) => rpc,
                Err(err) => {
                    warn!("network: dropping undecodable datagram: {}", err);
                    continue;
                }
            };
            if let Err(err) = rpc.validate() {
                warn!("network: dropping message: {}", err);
                continue;
            }

            let waiter = {
                let pending_requests = pending_requests.lock().unwrap();
                pending_requests.get(&rpc.id).cloned()
            };
            match waiter {
                // the waiter may have timed out and gone away in the meantime
                Some(tx) => {
                    let _ = tx.send(rpc);
                }
                None => {
                    if inbound_tx.send(rpc).is_err() {
                        warn!("network: inbound channel closed, reader stopping");
                        break;
                    }
                }
            }
        });
    }

    /// Sends `rpc` and blocks until the correlated response arrives or the
    /// timeout elapses. The waiter entry is removed on every exit path.
    pub fn send_request(&self, mut rpc: Rpc) -> Result<Rpc, KademliaError> {
        let (response_tx, response_rx) = channel();
        {
            let mut pending_requests = self.pending_requests.lock().unwrap();
            while pending_requests.contains_key(&rpc.id) {
                rpc.id = Key::rand();
            }
            pending_requests.insert(rpc.id, response_tx);
        }
        let token = rpc.id;
        let addr = rpc.destination.address();

        let sent = rpc
            .encode()
            .and_then(|data| self.transport.send_to(&addr, &data));
        if let Err(err) = sent {
            self.pending_requests.lock().unwrap().remove(&token);
            return Err(err);
        }

        match response_rx.recv_timeout(self.request_timeout) {
            Ok(response) => {
                self.pending_requests.lock().unwrap().remove(&token);
                Ok(response)
            }
            Err(_) => {
                self.pending_requests.lock().unwrap().remove(&token);
                warn!(
                    "network: request {} to {} timed out after {:?}",
                    token, addr, self.request_timeout
                );
                Err(KademliaError::Timeout)
            }
        }
    }

    /// Sends a response datagram. Failures are logged, not surfaced: the
    /// requester will time out and recover on its own.
    pub fn send_response(&self, rpc: &Rpc) {
        let addr = rpc.destination.address();
        match rpc.encode() {
            Ok(data) => {
                if let Err(err) = self.transport.send_to(&addr, &data) {
                    warn!("network: could not send response to {}: {}", addr, err);
                }
            }
            Err(err) => warn!("network: could not encode response: {}", err),
        }
    }
}
