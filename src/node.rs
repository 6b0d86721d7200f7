use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::contact::Contact;
use crate::error::KademliaError;
use crate::key::Key;
use crate::network::{Network, Transport, UdpTransport};
use crate::routing::RoutingTable;
use crate::rpc::{Payload, Rpc, RpcKind};
use crate::shortlist::Shortlist;
use crate::storage::Storage;
use crate::{
    BUCKET_REFRESH_INTERVAL, CONCURRENCY_PARAM, REPLICATION_PARAM, REQUEST_TIMEOUT,
    ROUTING_TABLE_SIZE,
};

/// Tunable parameters supplied by the process configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Bucket capacity and replication factor.
    pub k: usize,
    /// Fan-out of one lookup round.
    pub alpha: usize,
    /// Round-trip wait for a correlated response, in milliseconds.
    pub request_timeout: u64,
    /// How long a bucket may go untouched before the refresher looks up a
    /// random key in its range, in seconds.
    pub bucket_refresh_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            k: REPLICATION_PARAM,
            alpha: CONCURRENCY_PARAM,
            request_timeout: REQUEST_TIMEOUT,
            bucket_refresh_interval: BUCKET_REFRESH_INTERVAL,
        }
    }
}

/// The outcome of one iterative lookup run.
enum LookupResult {
    Contacts(Vec<Contact>),
    Value(Vec<u8>, Contact),
}

/// A node in the Kademlia DHT.
///
/// All collaborators are explicit instances owned by the node; cloning a
/// `Node` yields another handle onto the same shared state.
#[derive(Clone)]
pub struct Node {
    me: Arc<Contact>,
    config: Arc<Config>,
    routing_table: Arc<Mutex<RoutingTable>>,
    storage: Arc<Mutex<Storage>>,
    network: Arc<Network>,
    is_active: Arc<AtomicBool>,
}

impl Node {
    /// Constructs a node with a random id on a UDP socket bound to
    /// `ip:port`.
    pub fn new(ip: &str, port: u16, config: Config) -> Result<Self, KademliaError> {
        let transport = UdpTransport::bind(&format!("{}:{}", ip, port))?;
        Ok(Node::with_transport(Arc::new(transport), Key::rand(), config))
    }

    /// Constructs a node with an explicit id over any datagram transport.
    pub fn with_transport(transport: Arc<dyn Transport>, id: Key, config: Config) -> Self {
        let addr = transport.local_addr();
        let (ip, port) = match addr.rsplit_once(':') {
            Some((ip, port)) => (ip.to_string(), port.parse().unwrap_or(0)),
            None => (addr, 0),
        };
        let me = Arc::new(Contact::new(id, &ip, port));
        info!("{} - starting node {}", me.address(), me.id);

        let routing_table =
            RoutingTable::new((*me).clone(), config.k, config.bucket_refresh_interval);
        let network = Arc::new(Network::new(
            transport,
            Duration::from_millis(config.request_timeout),
        ));
        let (inbound_tx, inbound_rx) = channel();
        network.start(inbound_tx);

        let node = Node {
            me,
            config: Arc::new(config),
            routing_table: Arc::new(Mutex::new(routing_table)),
            storage: Arc::new(Mutex::new(Storage::new())),
            network,
            is_active: Arc::new(AtomicBool::new(true)),
        };
        node.start_request_handler(inbound_rx);
        node.start_bucket_refresher();
        node
    }

    /// The contact other peers reach this node under.
    pub fn contact(&self) -> Contact {
        (*self.me).clone()
    }

    /// This node's identifier.
    pub fn id(&self) -> Key {
        self.me.id
    }

    fn lock_routing_table(&self) -> MutexGuard<RoutingTable> {
        match self.routing_table.lock() {
            Ok(routing_table) => routing_table,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Starts the thread that serves unsolicited inbound messages.
    fn start_request_handler(&self, rx: Receiver<Rpc>) {
        let node = self.clone();
        thread::spawn(move || {
            for request in rx.iter() {
                if !node.is_active.load(Ordering::Acquire) {
                    info!("{} - request handler stopped", node.me.address());
                    break;
                }
                node.handle_request(&request);
            }
        });
    }

    /// Starts the thread that periodically refreshes stale buckets by
    /// looking up a random key in their range.
    fn start_bucket_refresher(&self) {
        let node = self.clone();
        thread::spawn(move || {
            let interval = Duration::from_secs(node.config.bucket_refresh_interval);
            thread::sleep(interval);
            while node.is_active.load(Ordering::Acquire) {
                let stale_indexes = { node.lock_routing_table().stale_indexes() };
                for index in stale_indexes {
                    node.lookup_contact(&Key::rand_in_bucket(index, &node.me.id));
                }
                thread::sleep(interval);
            }
        });
    }

    /// Serves one unsolicited message. The sender is folded into the
    /// routing table; genuine requests are answered, while stray responses
    /// that matched no pending request carry nothing else to do.
    fn handle_request(&self, request: &Rpc) {
        debug!(
            "{} - {:?} from {}",
            self.me.address(),
            request.kind,
            request.source.address()
        );
        self.update_routing_table(request.source.clone());
        if request.is_response {
            warn!(
                "{} - response {} matched no pending request",
                self.me.address(),
                request.id
            );
            return;
        }

        let payload = match (request.kind, request.payload.as_ref()) {
            (RpcKind::Ping, _) => None,
            (RpcKind::Store, Some(payload)) => match (payload.key, payload.data.as_ref()) {
                (Some(key), Some(data)) => {
                    self.storage.lock().unwrap().insert(key, data.clone());
                    Some(Payload::with_key(key))
                }
                _ => return,
            },
            (RpcKind::FindNode, Some(payload)) => match payload.key {
                Some(key) => Some(Payload::with_contacts(self.closest_contacts(&key))),
                None => return,
            },
            (RpcKind::FindValue, Some(payload)) => match payload.key {
                Some(key) => {
                    let value = { self.storage.lock().unwrap().get(&key).cloned() };
                    match value {
                        Some(data) => Some(Payload::with_data(data)),
                        None => Some(Payload::with_contacts(self.closest_contacts(&key))),
                    }
                }
                None => return,
            },
            _ => return,
        };
        let response = Rpc::response(request, (*self.me).clone(), payload);
        self.network.send_response(&response);
    }

    /// Folds `contact` into the routing table under the classic admission
    /// policy. When the target bucket is full, the least recently seen
    /// contact is pinged with the table lock released; only the resulting
    /// keep-or-evict decision is committed under the lock. A live long-term
    /// peer is kept and the new contact dropped; a dead one is evicted.
    fn update_routing_table(&self, contact: Contact) {
        if contact.id == self.me.id {
            return;
        }
        let node = self.clone();
        thread::spawn(move || {
            let lrs = {
                let mut routing_table = node.lock_routing_table();
                if routing_table.touch(contact.clone()) {
                    return;
                }
                routing_table.least_recently_seen(&contact.id)
            };
            let lrs = match lrs {
                Some(lrs) => lrs,
                None => return,
            };
            if node.ping(&lrs).is_ok() {
                node.lock_routing_table().touch(lrs);
            } else {
                debug!(
                    "{} - evicting {} for {}",
                    node.me.address(),
                    lrs.id,
                    contact.id
                );
                node.lock_routing_table().replace(&lrs.id, contact);
            }
        });
    }

    fn closest_contacts(&self, key: &Key) -> Vec<Contact> {
        self.lock_routing_table().find_closest_contacts(key)
    }

    /// Sends one request and waits for its response. A peer that answers
    /// refreshes its routing table entry; one that does not is pruned.
    fn send_request(
        &self,
        dest: &Contact,
        kind: RpcKind,
        payload: Option<Payload>,
    ) -> Result<Rpc, KademliaError> {
        let request = Rpc::request(kind, (*self.me).clone(), dest.clone(), payload);
        match self.network.send_request(request) {
            Ok(response) => {
                self.update_routing_table(response.source.clone());
                Ok(response)
            }
            Err(err) => {
                self.lock_routing_table().remove(&dest.id);
                Err(err)
            }
        }
    }

    /// Sends a `Ping` RPC and waits for the pong.
    pub fn ping(&self, dest: &Contact) -> Result<(), KademliaError> {
        self.send_request(dest, RpcKind::Ping, None).map(|_| ())
    }

    /// Sends a `Store` RPC.
    fn rpc_store(&self, dest: &Contact, key: Key, value: Vec<u8>) -> Result<Rpc, KademliaError> {
        let payload = Payload {
            key: Some(key),
            data: Some(value),
            contacts: None,
        };
        self.send_request(dest, RpcKind::Store, Some(payload))
    }

    /// Sends a `FindNode` RPC.
    fn rpc_find_node(&self, dest: &Contact, key: &Key) -> Result<Rpc, KademliaError> {
        self.send_request(dest, RpcKind::FindNode, Some(Payload::with_key(*key)))
    }

    /// Sends a `FindValue` RPC.
    fn rpc_find_value(&self, dest: &Contact, key: &Key) -> Result<Rpc, KademliaError> {
        self.send_request(dest, RpcKind::FindValue, Some(Payload::with_key(*key)))
    }

    /// Spawns a thread that sends a `FindNode` or `FindValue` RPC and
    /// reports the result for the current lookup round.
    fn spawn_find_rpc(
        &self,
        dest: Contact,
        key: Key,
        sender: Sender<(Contact, Result<Rpc, KademliaError>)>,
        find_node: bool,
    ) {
        let node = self.clone();
        thread::spawn(move || {
            let result = if find_node {
                node.rpc_find_node(&dest, &key)
            } else {
                node.rpc_find_value(&dest, &key)
            };
            if sender.send((dest, result)).is_err() {
                debug!("lookup round finished before rpc returned");
            }
        });
    }

    /// The iterative lookup shared by node and value lookups.
    ///
    /// Each round takes the `alpha` closest uncontacted candidates, marks
    /// them contacted before the RPCs resolve, and fires the RPCs
    /// concurrently. A failed peer is pruned from the shortlist; a
    /// successful one contributes its closest-contacts list. Termination is
    /// evaluated only once the whole round has resolved. The single
    /// exception is a value-bearing response, which returns immediately and
    /// abandons its siblings; their waiters clean up on their own timeout
    /// path.
    fn lookup(&self, target: &Key, find_node: bool) -> LookupResult {
        let mut shortlist = Shortlist::new(*target, self.config.k);
        let mut contacted: HashSet<Key> = HashSet::new();
        contacted.insert(self.me.id);

        for contact in self.closest_contacts(target) {
            shortlist.add_candidate(contact);
        }
        let mut closest = shortlist.closest().map(|c| c.id);

        loop {
            let batch = shortlist.closest_uncontacted(self.config.alpha, &contacted);
            if batch.is_empty() {
                return LookupResult::Contacts(shortlist.contacts(self.config.k));
            }

            let (tx, rx) = channel();
            for contact in batch {
                contacted.insert(contact.id);
                self.spawn_find_rpc(contact, *target, tx.clone(), find_node);
            }
            drop(tx);

            for (dest, result) in rx.iter() {
                match result {
                    Ok(response) => {
                        if let Some(payload) = response.payload {
                            if let Some(data) = payload.data {
                                return LookupResult::Value(data, response.source);
                            }
                            for contact in payload.contacts.unwrap_or_default() {
                                if contact.id != self.me.id {
                                    shortlist.add_candidate(contact);
                                }
                            }
                        }
                    }
                    Err(_) => shortlist.remove_candidate(&dest.id),
                }
            }

            let new_closest = shortlist.closest().map(|c| c.id);
            let converged = if find_node {
                // no closer node found this round, everyone queried, or the
                // exact target identity has been reached
                new_closest.is_none()
                    || new_closest == closest
                    || shortlist.all_contacted(&contacted)
                    || shortlist.contains(target)
            } else {
                // a value lookup keeps probing while uncontacted candidates
                // remain, even without distance progress
                new_closest.is_none() || shortlist.all_contacted(&contacted)
            };
            if converged {
                return LookupResult::Contacts(shortlist.contacts(self.config.k));
            }
            closest = new_closest;
        }
    }

    /// Iteratively looks up the `k` closest known contacts to `target`.
    pub fn lookup_contact(&self, target: &Key) -> Vec<Contact> {
        match self.lookup(target, true) {
            LookupResult::Contacts(contacts) => contacts,
            // find-node responses never carry a value payload
            LookupResult::Value(..) => Vec::new(),
        }
    }

    /// Looks up the value stored under `key` and returns it together with
    /// the contact that served it.
    pub fn lookup_data(&self, key: &Key) -> Result<(Vec<u8>, Contact), KademliaError> {
        match self.lookup(key, false) {
            LookupResult::Value(data, source) => Ok((data, source)),
            LookupResult::Contacts(_) => Err(KademliaError::NotFound),
        }
    }

    /// Stores `value` in the DHT and returns its content-derived key. The
    /// value is offered to the `k` closest nodes; one acknowledgement is
    /// enough for success.
    pub fn store(&self, value: &[u8]) -> Result<Key, KademliaError> {
        let key = Key::from_content(value);
        let targets = self.lookup_contact(&key);
        let total = targets.len();

        let (tx, rx) = channel();
        for dest in targets {
            let node = self.clone();
            let tx = tx.clone();
            let value = value.to_vec();
            thread::spawn(move || {
                let _ = tx.send(node.rpc_store(&dest, key, value).is_ok());
            });
        }
        drop(tx);

        let acked = rx.iter().filter(|ok| *ok).count();
        if acked == 0 {
            return Err(KademliaError::StoreFailed);
        }
        info!(
            "{} - stored {} on {}/{} peers",
            self.me.address(),
            key,
            acked,
            total
        );
        Ok(key)
    }

    /// Joins the network through `bootstrap`: ping it, look up our own id
    /// to discover our neighborhood, then refresh every bucket farther away
    /// than the closest neighbor so distant regions of the id space become
    /// reachable too.
    pub fn join(&self, bootstrap: &Contact) -> Result<(), KademliaError> {
        info!(
            "{} - joining the network via {}",
            self.me.address(),
            bootstrap.address()
        );
        if self.ping(bootstrap).is_err() {
            return Err(KademliaError::BootstrapUnreachable);
        }
        self.lock_routing_table().touch(bootstrap.clone());

        for contact in self.lookup_contact(&self.me.id) {
            self.update_routing_table(contact);
        }
        self.refresh_far_buckets();
        info!("{} - joined the network", self.me.address());
        Ok(())
    }

    /// Refreshes all buckets farther away than the closest known neighbor.
    fn refresh_far_buckets(&self) {
        let neighbor = self
            .closest_contacts(&self.me.id)
            .into_iter()
            .next();
        let neighbor = match neighbor {
            Some(neighbor) => neighbor,
            None => return,
        };
        let start = { self.lock_routing_table().bucket_index(&neighbor.id) } + 1;
        for index in start..ROUTING_TABLE_SIZE {
            for contact in self.lookup_contact(&Key::rand_in_bucket(index, &self.me.id)) {
                self.update_routing_table(contact);
            }
        }
    }

    /// Deactivates the node's background threads. In-flight operations may
    /// still finish; the socket is released when the last handle drops.
    pub fn shutdown(&self) {
        self.is_active.store(false, Ordering::Release);
        // a fire-and-forget datagram to ourselves wakes the request handler
        // so it can observe the flag
        let wake = Rpc::request(RpcKind::Ping, (*self.me).clone(), (*self.me).clone(), None);
        self.network.send_response(&wake);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{Config, Node};
    use crate::contact::Contact;
    use crate::error::KademliaError;
    use crate::key::Key;
    use crate::network::UdpTransport;
    use crate::ID_LENGTH;

    fn test_config(request_timeout: u64) -> Config {
        Config {
            request_timeout,
            ..Config::default()
        }
    }

    fn spawn_node(id: Key, config: Config) -> Node {
        let transport = UdpTransport::bind("127.0.0.1:0").expect("bind localhost");
        Node::with_transport(Arc::new(transport), id, config)
    }

    fn key_with_last_byte(byte: u8) -> Key {
        let mut bytes = [0u8; ID_LENGTH];
        bytes[ID_LENGTH - 1] = byte;
        Key::new(bytes)
    }

    fn dead_contact(id: Key) -> Contact {
        // nothing listens on port 9; RPCs to it always time out
        Contact::new(id, "127.0.0.1", 9)
    }

    #[test]
    fn test_join_discovers_the_bootstrap_neighborhood() {
        let a = spawn_node(key_with_last_byte(0), test_config(1000));
        let b = spawn_node(key_with_last_byte(1), test_config(1000));

        a.join(&b.contact()).expect("bootstrap answers");

        let closest = a.closest_contacts(&a.id());
        assert!(!closest.is_empty());
        assert_eq!(closest[0].id, b.id());
        assert_eq!(closest[0].distance_to(&a.id()), key_with_last_byte(1));

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn test_join_fails_fast_when_bootstrap_is_dead() {
        let node = spawn_node(Key::rand(), test_config(200));
        match node.join(&dead_contact(Key::rand())) {
            Err(KademliaError::BootstrapUnreachable) => {}
            other => panic!("expected BootstrapUnreachable, got {:?}", other),
        }
        node.shutdown();
    }

    #[test]
    fn test_store_get_round_trip() {
        let a = spawn_node(Key::rand(), test_config(1000));
        let b = spawn_node(Key::rand(), test_config(1000));
        a.join(&b.contact()).expect("join");

        let value = b"the quick brown fox";
        let key = a.store(value).expect("one peer acknowledges");
        assert_eq!(key, Key::from_content(value));

        let (data, source) = a.lookup_data(&key).expect("value is on the network");
        assert_eq!(data, value.to_vec());
        assert_eq!(source.id, b.id());

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn test_lookup_data_not_found() {
        let a = spawn_node(Key::rand(), test_config(500));
        let b = spawn_node(Key::rand(), test_config(500));
        a.join(&b.contact()).expect("join");

        match a.lookup_data(&Key::from_content(b"never stored")) {
            Err(KademliaError::NotFound) => {}
            other => panic!("expected NotFound, got {:?}", other),
        }

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn test_store_with_no_peers_fails() {
        let node = spawn_node(Key::rand(), test_config(200));
        match node.store(b"nowhere to go") {
            Err(KademliaError::StoreFailed) => {}
            other => panic!("expected StoreFailed, got {:?}", other),
        }
        node.shutdown();
    }

    #[test]
    fn test_lookup_terminates_when_every_peer_times_out() {
        let node = spawn_node(Key::rand(), test_config(200));
        {
            let mut routing_table = node.routing_table.lock().unwrap();
            for _ in 0..6 {
                routing_table.touch(dead_contact(Key::rand()));
            }
        }

        let started = Instant::now();
        let result = node.lookup_contact(&Key::rand());
        // two rounds of three dead peers each, then exhaustion
        assert!(result.is_empty());
        assert!(started.elapsed() < Duration::from_secs(3));
        node.shutdown();
    }

    #[test]
    fn test_full_bucket_evicts_dead_lrs() {
        let me = Key::default();
        let node = spawn_node(me, Config {
            k: 2,
            request_timeout: 200,
            ..Config::default()
        });

        let lrs = dead_contact(Key::rand_in_bucket(140, &me));
        let filler = dead_contact(Key::rand_in_bucket(140, &me));
        {
            let mut routing_table = node.routing_table.lock().unwrap();
            routing_table.touch(lrs.clone());
            routing_table.touch(filler);
        }

        let newcomer = dead_contact(Key::rand_in_bucket(140, &me));
        node.update_routing_table(newcomer.clone());
        thread::sleep(Duration::from_millis(1000));

        let routing_table = node.routing_table.lock().unwrap();
        assert!(!routing_table.contains(&lrs.id));
        assert!(routing_table.contains(&newcomer.id));
        drop(routing_table);
        node.shutdown();
    }

    #[test]
    fn test_full_bucket_keeps_live_lrs() {
        let me = Key::default();
        let live = spawn_node(Key::rand_in_bucket(140, &me), test_config(500));
        let node = spawn_node(me, Config {
            k: 2,
            request_timeout: 500,
            ..Config::default()
        });

        let filler = dead_contact(Key::rand_in_bucket(140, &me));
        {
            let mut routing_table = node.routing_table.lock().unwrap();
            routing_table.touch(live.contact());
            routing_table.touch(filler);
        }

        let newcomer = dead_contact(Key::rand_in_bucket(140, &me));
        node.update_routing_table(newcomer.clone());
        thread::sleep(Duration::from_millis(1000));

        let routing_table = node.routing_table.lock().unwrap();
        assert!(routing_table.contains(&live.id()));
        assert!(!routing_table.contains(&newcomer.id));
        drop(routing_table);
        node.shutdown();
        live.shutdown();
    }

    #[test]
    fn test_three_node_value_flow() {
        let a = spawn_node(Key::rand(), test_config(1000));
        let b = spawn_node(Key::rand(), test_config(1000));
        let c = spawn_node(Key::rand(), test_config(1000));
        b.join(&a.contact()).expect("join b");
        c.join(&a.contact()).expect("join c");

        let value = b"replicated bytes";
        let key = c.store(value).expect("store succeeds");

        // a node that did not initiate the store can still retrieve it
        let (data, _source) = b.lookup_data(&key).expect("value found");
        assert_eq!(data, value.to_vec());

        a.shutdown();
        b.shutdown();
        c.shutdown();
    }
}
