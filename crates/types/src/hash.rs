//! Content addressing: hashes, addresses and account ids.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of bytes in a [`Hash`].
pub const HASH_LEN: usize = 32;

/// A 32-byte SHA-256 digest.
///
/// Used for block hashes, transaction hashes and state roots.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// The all-zero hash. Used as the previous hash of the genesis block and
    /// as the root of the empty state.
    pub const ZERO: Hash = Hash([0u8; HASH_LEN]);

    /// Hash arbitrary bytes.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Wrap an existing 32-byte digest.
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Wrap a digest held in a slice. Returns `None` when the length is wrong.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Borrow the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Check whether this is the all-zero hash.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A raw account address.
///
/// Production addresses are opaque bytes handed in by the wallet layer; the
/// test harness derives them from human-readable names. Contract addresses
/// are synthesized from the creator and nonce at deployment time.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Address(Vec<u8>);

impl Address {
    /// Wrap raw address bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Address of a named account (test-harness style addressing).
    pub fn from_name(name: &str) -> Self {
        Self(name.as_bytes().to_vec())
    }

    /// Synthesize the address of a contract created by `creator` at `nonce`:
    /// `SHA256(creator || nonce_le)`.
    pub fn contract(creator: &Address, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&creator.0);
        hasher.update(nonce.to_le_bytes());
        Self(hasher.finalize().to_vec())
    }

    /// Borrow the raw address bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check whether this address is empty (no recipient).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "addr:{}", hex::encode(&self.0))
    }
}

/// Number of bytes in an [`AccountId`]: a one-byte tag plus a SHA-256 digest.
pub const ACCOUNT_ID_LEN: usize = 33;

/// Tag byte prefixed to every account id.
const ACCOUNT_ID_TAG: u8 = 0x0C;

/// The state-db key of an account: `0x0C || SHA256(address)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId([u8; ACCOUNT_ID_LEN]);

// `serde`'s derive macros only implement `Serialize`/`Deserialize` for
// arrays up to length 32, so `[u8; ACCOUNT_ID_LEN]` (33) needs a manual
// impl. These mirror exactly what the derive would generate if it
// supported this array length (a 33-element tuple), keeping the wire
// format identical to the other fixed-size array newtypes in this module.
impl Serialize for AccountId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeTuple;
        let mut tup = serializer.serialize_tuple(ACCOUNT_ID_LEN)?;
        for byte in &self.0 {
            tup.serialize_element(byte)?;
        }
        tup.end()
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct AccountIdVisitor;

        impl<'de> serde::de::Visitor<'de> for AccountIdVisitor {
            type Value = AccountId;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(formatter, "a tuple of {} bytes", ACCOUNT_ID_LEN)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut id = [0u8; ACCOUNT_ID_LEN];
                for (i, slot) in id.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                Ok(AccountId(id))
            }
        }

        deserializer.deserialize_tuple(ACCOUNT_ID_LEN, AccountIdVisitor)
    }
}

impl AccountId {
    /// Derive the account id of an address.
    pub fn from_address(address: &Address) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(address.as_bytes());
        let digest = hasher.finalize();

        let mut id = [0u8; ACCOUNT_ID_LEN];
        id[0] = ACCOUNT_ID_TAG;
        id[1..].copy_from_slice(&digest);
        Self(id)
    }

    /// Borrow the raw id bytes.
    pub fn as_bytes(&self) -> &[u8; ACCOUNT_ID_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "acct:{}", hex::encode(&self.0[1..9]))
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(Hash::digest(b"block"), Hash::digest(b"block"));
        assert_ne!(Hash::digest(b"block"), Hash::digest(b"other"));
    }

    #[test]
    fn test_account_id_is_tagged_sha256() {
        let addr = Address::from_name("alice");
        let id = AccountId::from_address(&addr);

        assert_eq!(id.as_bytes()[0], 0x0C);
        assert_eq!(&id.as_bytes()[1..], Hash::digest(b"alice").as_bytes());
    }

    #[test]
    fn test_contract_address_depends_on_nonce() {
        let creator = Address::from_name("alice");
        assert_ne!(Address::contract(&creator, 1), Address::contract(&creator, 2));
    }

    #[test]
    fn test_empty_address_means_no_recipient() {
        assert!(Address::default().is_empty());
        assert!(!Address::from_name("bob").is_empty());
    }
}
