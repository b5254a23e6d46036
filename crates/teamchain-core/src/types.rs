//! Strong type definitions for team sig-chains.
//!
//! All identifiers are fixed-size newtypes so a block hash can never be
//! passed where a public key is expected.

use serde::{Deserialize, Serialize};

/// Serde adapter for fixed-size byte arrays.
///
/// Binary formats (CBOR) get a byte string; human-readable formats (JSON)
/// get lowercase hex.
pub mod fixed_bytes {
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(FixedVisitor::<N>)
        } else {
            deserializer.deserialize_bytes(FixedVisitor::<N>)
        }
    }

    struct FixedVisitor<const N: usize>;

    impl<'de, const N: usize> Visitor<'de> for FixedVisitor<N> {
        type Value = [u8; N];

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} bytes", N)
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            v.try_into().map_err(|_| E::invalid_length(v.len(), &self))
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            self.visit_bytes(&v)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            let bytes = hex::decode(v).map_err(E::custom)?;
            self.visit_bytes(&bytes)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = [0u8; N];
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(i, &self))?;
            }
            Ok(out)
        }
    }
}

/// Implements the shared accessor, formatting and conversion surface of a
/// fixed-size byte newtype.
macro_rules! impl_fixed_bytes {
    ($name:ident, $len:expr, $label:literal) => {
        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                let arr: [u8; $len] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", $label, &self.to_hex()[..16])
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                let arr: [u8; $len] = slice.try_into()?;
                Ok(Self(arr))
            }
        }
    };
}

pub(crate) use impl_fixed_bytes;

/// A 32-byte block hash: the chain-link value of a signed block.
///
/// Computed by [`SignedMessage::hash`](crate::SignedMessage::hash); two
/// blocks with the same signer and message bytes share a hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHash(#[serde(with = "fixed_bytes")] pub [u8; 32]);

impl_fixed_bytes!(BlockHash, 32, "BlockHash");

/// A 32-byte X25519 public key used to seal payloads to a member.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BoxPublicKey(#[serde(with = "fixed_bytes")] pub [u8; 32]);

impl_fixed_bytes!(BoxPublicKey, 32, "BoxPub");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_hex_roundtrip() {
        let hash = BlockHash::from_bytes([0x42; 32]);
        let recovered = BlockHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, recovered);
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        let result = BlockHash::from_hex("abcd");
        assert!(matches!(result, Err(hex::FromHexError::InvalidStringLength)));
    }

    #[test]
    fn test_block_hash_display() {
        let hash = BlockHash::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", hash), "abababababababab");
        assert!(format!("{:?}", hash).starts_with("BlockHash("));
    }

    #[test]
    fn test_json_uses_hex() {
        let key = BoxPublicKey::from_bytes([0x01; 32]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));

        let back: BoxPublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_cbor_uses_byte_string() {
        let hash = BlockHash::from_bytes([0x07; 32]);
        let mut buf = Vec::new();
        ciborium::into_writer(&hash, &mut buf).unwrap();

        // Major type 2, one-byte length 32
        assert_eq!(&buf[..2], &[0x58, 32]);
        let back: BlockHash = ciborium::from_reader(&buf[..]).unwrap();
        assert_eq!(back, hash);
    }
}
