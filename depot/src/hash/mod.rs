//! Hashing utilities.

#[cfg(test)]
mod tests;

use displaydoc::Display;
use serde::{de, ser, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::DepotResult;

/// A hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hash {
    /// An SHA-256 hash.
    Sha256([u8; 32]),
}

/// A hashing error.
#[derive(Debug, Display)]
pub enum Error {
    /// Invalid length for SHA-256 string: Must be {expected} hexadecimal characters, got {actual}.
    InvalidHashStringLength { expected: usize, actual: usize },

    /// Invalid hexadecimal hash: {0}
    InvalidHexHash(hex::FromHexError),
}

impl Hash {
    /// Convenience function to generate a SHA-256 hash from a slice.
    pub fn sha256_from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self::Sha256(hasher.finalize().into())
    }

    /// Generates a SHA-256 hash from an async stream, returning the
    /// hash along with the number of bytes read.
    pub async fn sha256_from_reader<R: AsyncRead + Unpin>(
        reader: &mut R,
    ) -> std::io::Result<(Self, u64)> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 65536];
        let mut total = 0u64;

        loop {
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
            total += read as u64;
        }

        Ok((Self::Sha256(hasher.finalize().into()), total))
    }

    /// Parses a 64-character hexadecimal representation of a SHA-256 hash.
    ///
    /// Uppercase input is accepted and normalized away; the parsed
    /// value always renders back as lowercase.
    pub fn from_hex(s: &str) -> DepotResult<Self> {
        let s = s.trim();

        if s.len() != 64 {
            return Err(Error::InvalidHashStringLength {
                expected: 64,
                actual: s.len(),
            }
            .into());
        }

        let v = hex::decode(s.to_ascii_lowercase()).map_err(Error::InvalidHexHash)?;
        Ok(Self::Sha256(v.try_into().unwrap()))
    }

    /// Returns the hash in lowercase hexadecimal format.
    ///
    /// This is the canonical representation of hashes in the Depot
    /// database.
    pub fn to_hex(&self) -> String {
        hex::encode(self.data())
    }

    /// Compares two hashes in constant time.
    ///
    /// All comparisons against client-supplied checksums must go
    /// through here.
    pub fn verify(&self, other: &Self) -> bool {
        self.data().ct_eq(other.data()).into()
    }

    fn data(&self) -> &[u8] {
        match self {
            Self::Sha256(d) => d,
        }
    }
}

impl<'de> Deserialize<'de> for Hash {
    /// Deserializes a hexadecimal hash string.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;

        String::deserialize(deserializer)
            .and_then(|s| Self::from_hex(&s).map_err(|e| Error::custom(e.to_string())))
    }
}

impl Serialize for Hash {
    /// Serializes a hash into a hexadecimal hash string.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}
