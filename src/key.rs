use std::fmt::{self, Debug, Display, Formatter};

use serde_derive::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::error::KademliaError;
use crate::{ID_LENGTH, ROUTING_TABLE_SIZE};

/// A 160-bit identifier for nodes and stored values.
///
/// Keys are compared byte-wise for equality. The derived lexicographic order
/// is only ever used to order XOR distances, never identities directly.
#[derive(Ord, PartialOrd, PartialEq, Eq, Clone, Hash, Serialize, Deserialize, Default, Copy)]
pub struct Key(pub [u8; ID_LENGTH]);

impl Key {
    /// Constructs a new `Key` from a byte array.
    pub fn new(data: [u8; ID_LENGTH]) -> Self {
        Key(data)
    }

    /// Parses a key from a hex string of exactly `2 * ID_LENGTH` digits.
    pub fn from_hex(hex: &str) -> Result<Self, KademliaError> {
        if hex.len() != ID_LENGTH * 2 || !hex.is_ascii() {
            return Err(KademliaError::MalformedId(hex.to_string()));
        }
        let mut ret = Key::default();
        for (i, byte) in ret.0.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
                .map_err(|_| KademliaError::MalformedId(hex.to_string()))?;
        }
        Ok(ret)
    }

    /// Derives the content key for `data`: a SHA3-256 digest truncated to
    /// the key width.
    pub fn from_content(data: &[u8]) -> Self {
        let digest = Sha3_256::digest(data);
        let mut ret = Key::default();
        ret.0.copy_from_slice(&digest[..ID_LENGTH]);
        ret
    }

    /// Constructs a new, random `Key`.
    pub fn rand() -> Self {
        let mut ret = Key::default();
        for byte in &mut ret.0 {
            *byte = rand::random::<u8>();
        }
        ret
    }

    /// Constructs a random key that falls in bucket `index` of `reference`'s
    /// routing table: the XOR distance to `reference` has exactly
    /// `ROUTING_TABLE_SIZE - index - 1` leading zero bits.
    pub fn rand_in_bucket(index: usize, reference: &Key) -> Self {
        let prefix = ROUTING_TABLE_SIZE - index - 1;
        let bytes = prefix / 8;
        let bit = prefix % 8;

        let mut ret = Key::rand();
        ret.0[..bytes].copy_from_slice(&reference.0[..bytes]);

        // share the top `bit` bits of the boundary byte, flip the next one
        let keep = !(0xFFu8 >> bit);
        ret.0[bytes] = (reference.0[bytes] & keep) | (ret.0[bytes] & !keep);
        let flip = 1 << (8 - bit - 1);
        ret.0[bytes] = (ret.0[bytes] & !flip) | ((reference.0[bytes] ^ flip) & flip);
        ret
    }

    /// Returns the XOR distance between `self` and `key`.
    pub fn xor(&self, key: &Key) -> Key {
        let mut ret = Key::default();
        for (i, byte) in ret.0.iter_mut().enumerate() {
            *byte = self.0[i] ^ key.0[i];
        }
        ret
    }

    /// Returns the number of leading zero bits in `self`.
    pub fn leading_zeros(&self) -> usize {
        let mut ret = 0;
        for i in 0..ID_LENGTH {
            if self.0[i] == 0 {
                ret += 8;
            } else {
                return ret + self.0[i].leading_zeros() as usize;
            }
        }
        ret
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}
