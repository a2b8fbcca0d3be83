//! Fixed-size byte identifiers.
//!
//! Identifiers serialize as hex strings for human-readable formats (JSON wire
//! protocol, logs) and as raw byte arrays for binary formats (snapshots).

/// Implement hex-or-bytes serde for a tuple struct wrapping `[u8; N]`.
macro_rules! impl_hex_serde {
    ($ty:ident, $len:expr) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&hex::encode(self.0))
                } else {
                    serde::Serialize::serialize(&self.0, serializer)
                }
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let text = <String as serde::Deserialize>::deserialize(deserializer)?;
                    $crate::core::bytes::decode_hex_array::<$len>(&text)
                        .map($ty)
                        .ok_or_else(|| {
                            serde::de::Error::custom(concat!(
                                "expected ",
                                stringify!($len),
                                " hex-encoded bytes"
                            ))
                        })
                } else {
                    <[u8; $len] as serde::Deserialize>::deserialize(deserializer).map($ty)
                }
            }
        }
    };
}

pub(crate) use impl_hex_serde;

/// Decode a hex string (optionally `0x`-prefixed) into a fixed-size array.
pub fn decode_hex_array<const N: usize>(text: &str) -> Option<[u8; N]> {
    let trimmed = text.strip_prefix("0x").unwrap_or(text);
    let bytes = hex::decode(trimmed).ok()?;
    bytes.try_into().ok()
}

/// `#[serde(with = "hex_bytes")]` for raw `[u8; N]` fields on wire types.
pub mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    /// Serialize as a hex string.
    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    /// Deserialize from a hex string of exactly `N` bytes.
    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let text = String::deserialize(deserializer)?;
        super::decode_hex_array::<N>(&text)
            .ok_or_else(|| D::Error::custom(format!("expected {} hex-encoded bytes", N)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Wire {
        #[serde(with = "hex_bytes")]
        nonce: [u8; 4],
    }

    #[test]
    fn test_hex_bytes_field() {
        let wire = Wire { nonce: [1, 2, 3, 4] };
        let json = serde_json::to_string(&wire).unwrap();
        assert_eq!(json, r#"{"nonce":"01020304"}"#);
        assert_eq!(serde_json::from_str::<Wire>(&json).unwrap(), wire);
        assert!(serde_json::from_str::<Wire>(r#"{"nonce":"0102"}"#).is_err());
    }

    #[test]
    fn test_decode_hex_array() {
        assert_eq!(decode_hex_array::<2>("beef"), Some([0xbe, 0xef]));
        assert_eq!(decode_hex_array::<2>("0xbeef"), Some([0xbe, 0xef]));
        assert_eq!(decode_hex_array::<2>("be"), None);
        assert_eq!(decode_hex_array::<2>("zz00"), None);
    }
}
