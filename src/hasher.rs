use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use sha2::Digest as _;

use crate::config::HashAlgorithm;

/// 256-bit identity of a chunk's content.
///
/// At this width the birthday bound puts an accidental collision far beyond any realistic number
/// of chunks, so two chunks with equal digests are treated as equal content.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Digest([u8; Digest::SIZE]);

impl Digest {
    pub const SIZE: usize = 32;

    pub const fn new(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; Self::SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// Computes chunk digests. Pure and deterministic.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ChunkHasher {
    algorithm: HashAlgorithm,
}

impl ChunkHasher {
    pub const fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn digest(&self, data: &[u8]) -> Digest {
        match self.algorithm {
            HashAlgorithm::Blake3 => Digest(*blake3::hash(data).as_bytes()),
            HashAlgorithm::Sha256 => Digest(sha2::Sha256::digest(data).into()),
        }
    }
}

impl Default for ChunkHasher {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        let blake3 = ChunkHasher::new(HashAlgorithm::Blake3);
        assert_eq!(
            blake3.digest(b"").to_hex(),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
        let sha256 = ChunkHasher::new(HashAlgorithm::Sha256);
        assert_eq!(
            sha256.digest(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn algorithms_differ() {
        let data = b"some chunk";
        assert_ne!(
            ChunkHasher::new(HashAlgorithm::Blake3).digest(data),
            ChunkHasher::new(HashAlgorithm::Sha256).digest(data)
        );
    }

    #[test]
    fn hex_round_trip() {
        let digest = ChunkHasher::default().digest(b"hello");
        let parsed: Digest = digest.to_hex().parse().unwrap();
        assert_eq!(parsed, digest);
        assert_eq!(format!("{digest}"), digest.to_hex());
        assert!("abcd".parse::<Digest>().is_err());
    }
}
