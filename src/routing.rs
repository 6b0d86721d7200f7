use time::{Duration, SteadyTime};

use crate::contact::Contact;
use crate::key::Key;
use crate::ROUTING_TABLE_SIZE;

/// A k-bucket holding up to `k` contacts that share a common prefix length
/// with the local node's id.
///
/// Contacts are ordered by the time of the most recent communication, with
/// the most recently seen contact at the end of the list. The bucket has no
/// eviction policy of its own; when it is full, [`Bucket::touch`] refuses
/// the new contact and the routing table's admission policy decides what to
/// do with the least recently seen entry.
#[derive(Clone, Debug)]
pub struct Bucket {
    contacts: Vec<Contact>,
    k: usize,
    last_update_time: SteadyTime,
}

impl Bucket {
    fn new(k: usize) -> Self {
        Bucket {
            contacts: Vec::new(),
            k,
            last_update_time: SteadyTime::now(),
        }
    }

    /// Moves `contact` to the most-recently-seen position, inserting it if
    /// there is room. Returns `false` if the bucket is full and the contact
    /// was not already present.
    pub fn touch(&mut self, contact: Contact) -> bool {
        self.last_update_time = SteadyTime::now();
        if let Some(index) = self.contacts.iter().position(|c| c.id == contact.id) {
            self.contacts.remove(index);
            self.contacts.push(contact);
            true
        } else if self.contacts.len() < self.k {
            self.contacts.push(contact);
            true
        } else {
            false
        }
    }

    /// Removes the contact with `id` from the bucket.
    pub fn remove(&mut self, id: &Key) -> Option<Contact> {
        self.contacts
            .iter()
            .position(|c| c.id == *id)
            .map(|index| self.contacts.remove(index))
    }

    /// Returns the least recently seen contact, if any.
    pub fn least_recently_seen(&self) -> Option<&Contact> {
        self.contacts.first()
    }

    /// Returns `true` if a contact with `id` is in the bucket.
    pub fn contains(&self, id: &Key) -> bool {
        self.contacts.iter().any(|c| c.id == *id)
    }

    /// Returns a point-in-time copy of the bucket's contacts. Callers sort
    /// by distance themselves; no live references escape the bucket.
    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts.clone()
    }

    /// Returns `true` if the bucket has not been touched for
    /// `refresh_interval` seconds.
    fn is_stale(&self, refresh_interval: u64) -> bool {
        SteadyTime::now() - self.last_update_time > Duration::seconds(refresh_interval as i64)
    }

    /// Returns the number of contacts in the bucket.
    pub fn len(&self) -> usize {
        self.contacts.len()
    }
}

/// The local node's long-term routing state: a fixed array of
/// `ROUTING_TABLE_SIZE` k-buckets indexed by shared-prefix length.
///
/// The table only exposes the primitives of the classic admission policy.
/// The policy itself, which pings the least recently seen contact of a full
/// bucket, lives in `Node` so the ping round-trip happens with the table
/// lock released.
#[derive(Clone, Debug)]
pub struct RoutingTable {
    buckets: Vec<Bucket>,
    me: Contact,
    k: usize,
    refresh_interval: u64,
}

impl RoutingTable {
    /// Constructs an empty routing table for the node `me`.
    pub fn new(me: Contact, k: usize, refresh_interval: u64) -> Self {
        let buckets = (0..ROUTING_TABLE_SIZE).map(|_| Bucket::new(k)).collect();
        RoutingTable {
            buckets,
            me,
            k,
            refresh_interval,
        }
    }

    /// The bucket index for `id`: `ROUTING_TABLE_SIZE - 1` minus the number
    /// of leading zero bits of the XOR distance, so higher indices hold more
    /// distant regions of the id space. The degenerate all-zero distance to
    /// our own id has no defined index and clamps to the sentinel bucket 0.
    pub fn bucket_index(&self, id: &Key) -> usize {
        let zeros = self.me.id.xor(id).leading_zeros();
        if zeros >= ROUTING_TABLE_SIZE {
            return 0;
        }
        ROUTING_TABLE_SIZE - zeros - 1
    }

    /// Touches `contact` in its bucket. Returns `false` if the bucket is
    /// full and the contact is new; the caller then arbitrates with
    /// [`RoutingTable::least_recently_seen`] and [`RoutingTable::replace`].
    pub fn touch(&mut self, contact: Contact) -> bool {
        let index = self.bucket_index(&contact.id);
        self.buckets[index].touch(contact)
    }

    /// Returns `true` if a contact with `id` is in the table.
    pub fn contains(&self, id: &Key) -> bool {
        self.buckets[self.bucket_index(id)].contains(id)
    }

    /// Removes the contact with `id` from the table.
    pub fn remove(&mut self, id: &Key) -> Option<Contact> {
        let index = self.bucket_index(id);
        self.buckets[index].remove(id)
    }

    /// Returns a copy of the least recently seen contact in the bucket that
    /// `id` maps to.
    pub fn least_recently_seen(&self, id: &Key) -> Option<Contact> {
        self.buckets[self.bucket_index(id)]
            .least_recently_seen()
            .cloned()
    }

    /// Evicts the contact with `evicted` from `contact`'s bucket and inserts
    /// `contact` in its place.
    pub fn replace(&mut self, evicted: &Key, contact: Contact) {
        let index = self.bucket_index(&contact.id);
        self.buckets[index].remove(evicted);
        self.buckets[index].touch(contact);
    }

    /// Returns up to `k` contacts ordered by ascending XOR distance to
    /// `target`.
    ///
    /// The bucket the target maps to may be sparse while neighboring buckets
    /// still hold useful candidates, so collection starts at the target's
    /// bucket and expands outward over adjacent indices before the global
    /// sort and truncation.
    pub fn find_closest_contacts(&self, target: &Key) -> Vec<Contact> {
        let index = self.bucket_index(target);
        let mut candidates = self.buckets[index].contacts();

        let mut i = 1;
        while (index >= i || index + i < ROUTING_TABLE_SIZE) && candidates.len() < self.k {
            if index >= i {
                candidates.extend(self.buckets[index - i].contacts());
            }
            if index + i < ROUTING_TABLE_SIZE {
                candidates.extend(self.buckets[index + i].contacts());
            }
            i += 1;
        }

        candidates.sort_by_key(|contact| contact.id.xor(target));
        candidates.truncate(self.k);
        candidates
    }

    /// Returns the indices of all buckets that have not been touched for the
    /// refresh interval.
    pub fn stale_indexes(&self) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| bucket.is_stale(self.refresh_interval))
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Bucket, RoutingTable};
    use crate::contact::Contact;
    use crate::key::Key;
    use crate::{ID_LENGTH, ROUTING_TABLE_SIZE};

    fn contact_with_last_byte(byte: u8) -> Contact {
        let mut bytes = [0u8; ID_LENGTH];
        bytes[ID_LENGTH - 1] = byte;
        Contact::new(Key::new(bytes), "127.0.0.1", 8080)
    }

    fn zero_table(k: usize) -> RoutingTable {
        let me = Contact::new(Key::default(), "127.0.0.1", 8000);
        RoutingTable::new(me, k, 3600)
    }

    #[test]
    fn test_bucket_bounded_lru() {
        let k = 20;
        let mut bucket = Bucket::new(k);

        // a full bucket refuses the 21st distinct contact
        for byte in 0..=20u8 {
            bucket.touch(contact_with_last_byte(byte));
        }
        assert_eq!(bucket.len(), k);
        assert!(!bucket.contains(&contact_with_last_byte(20).id));

        // re-touching the oldest entry moves it to the fresh end, so the
        // second insert becomes least recently seen
        assert!(bucket.touch(contact_with_last_byte(0)));
        assert_eq!(bucket.len(), k);
        let lrs = bucket.least_recently_seen().expect("bucket is not empty");
        assert_eq!(lrs.id, contact_with_last_byte(1).id);
    }

    #[test]
    fn test_bucket_remove() {
        let mut bucket = Bucket::new(20);
        bucket.touch(contact_with_last_byte(1));
        bucket.touch(contact_with_last_byte(2));
        assert!(bucket.remove(&contact_with_last_byte(1).id).is_some());
        assert_eq!(bucket.len(), 1);
        assert!(!bucket.contains(&contact_with_last_byte(1).id));
        assert!(bucket.remove(&contact_with_last_byte(1).id).is_none());
    }

    #[test]
    fn test_bucket_index_matches_leading_bit() {
        let table = zero_table(20);
        for position in 0..ROUTING_TABLE_SIZE {
            let mut bytes = [0u8; ID_LENGTH];
            bytes[ID_LENGTH - 1 - position / 8] = 1 << (position % 8);
            assert_eq!(table.bucket_index(&Key::new(bytes)), position);
        }
    }

    #[test]
    fn test_bucket_index_for_self_is_sentinel() {
        let table = zero_table(20);
        assert_eq!(table.bucket_index(&Key::default()), 0);
    }

    #[test]
    fn test_replace_swaps_contacts() {
        let mut table = zero_table(2);
        let old = contact_with_last_byte(1);
        let new = contact_with_last_byte(3);
        table.touch(old.clone());
        table.touch(contact_with_last_byte(2));
        assert!(!table.touch(new.clone()));

        table.replace(&old.id, new.clone());
        assert!(!table.contains(&old.id));
        assert!(table.contains(&new.id));
    }

    #[test]
    fn test_find_closest_contacts_sorted_and_bounded() {
        let k = 20;
        let mut table = zero_table(k);
        for _ in 0..100 {
            table.touch(Contact::new(Key::rand(), "127.0.0.1", 8080));
        }

        let target = Key::rand();
        let closest = table.find_closest_contacts(&target);
        assert!(!closest.is_empty());
        assert!(closest.len() <= k);
        for pair in closest.windows(2) {
            assert!(pair[0].id.xor(&target) <= pair[1].id.xor(&target));
        }
    }

    #[test]
    fn test_find_closest_contacts_spans_sparse_buckets() {
        // one contact per distant bucket still yields k candidates
        let mut table = zero_table(4);
        let me = Key::default();
        for index in 100..110 {
            let id = Key::rand_in_bucket(index, &me);
            table.touch(Contact::new(id, "127.0.0.1", 8080));
        }
        let target = Key::rand_in_bucket(105, &me);
        assert_eq!(table.find_closest_contacts(&target).len(), 4);
    }

    #[test]
    fn test_stale_indexes_cleared_by_touch() {
        let me = Contact::new(Key::default(), "127.0.0.1", 8000);
        let mut table = RoutingTable::new(me, 20, 1);
        let contact = contact_with_last_byte(1);
        let index = table.bucket_index(&contact.id);

        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(table.stale_indexes().contains(&index));
        table.touch(contact);
        assert!(!table.stale_indexes().contains(&index));
    }
}
