//! Erasure coding of sealed chunks into `N` fragments, any `K` of which rebuild the payload.
//!
//! The code is systematic: fragments `0..K` are the payload itself split into equal shards
//! (zero padded), fragments `K..N` are parity.

use std::fmt::{Display, Formatter};

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::config::MAX_FRAGMENTS;
use crate::error::{EncodeError, UsageError};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FragmentKind {
    Data(usize),
    Parity(usize),
}

impl Display for FragmentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data(i) => write!(f, "D{i}"),
            Self::Parity(i) => write!(f, "P{i}"),
        }
    }
}

/// One erasure-coded piece of a sealed chunk.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Fragment {
    /// Position in `0..total_fragments`.
    pub index: usize,
    /// `K`, fragments needed to reconstruct.
    pub data_fragments: usize,
    /// `N`, fragments produced.
    pub total_fragments: usize,
    /// Length of the encoded payload, used to strip shard padding.
    pub encoded_len: usize,
    pub payload: Vec<u8>,
}

impl Fragment {
    pub fn kind(&self) -> FragmentKind {
        if self.index < self.data_fragments {
            FragmentKind::Data(self.index)
        } else {
            FragmentKind::Parity(self.index - self.data_fragments)
        }
    }
}

pub trait ErasureCoder: Send + Sync {
    /// `K`
    fn data_fragments(&self) -> usize;
    /// `N`
    fn total_fragments(&self) -> usize;
    fn encode(&self, data: &[u8]) -> Result<Vec<Fragment>, EncodeError>;
    /// Rebuild the payload from any `K` distinct fragments, in any order.
    fn reconstruct(&self, fragments: &[Fragment]) -> Result<Vec<u8>, EncodeError>;
}

/// True when `fragments` holds at least `k` distinct fragment indices.
pub fn is_recoverable(fragments: &[Fragment], k: usize) -> bool {
    let mut seen = [false; MAX_FRAGMENTS];
    let mut distinct = 0;
    for frag in fragments {
        if frag.index < MAX_FRAGMENTS && !seen[frag.index] {
            seen[frag.index] = true;
            distinct += 1;
        }
    }
    distinct >= k
}

pub struct ReedSolomonCoder {
    k: usize,
    n: usize,
    /// `None` when `k == n`, there is no parity to compute.
    rs: Option<ReedSolomon>,
}

impl ReedSolomonCoder {
    pub fn new(k: usize, n: usize) -> Result<Self, UsageError> {
        if k == 0 || k > n || n > MAX_FRAGMENTS {
            return Err(UsageError::InvalidConfig(format!(
                "invalid erasure parameters K={k}, N={n}"
            )));
        }
        let rs = if n > k {
            Some(ReedSolomon::new(k, n - k).map_err(|e| {
                UsageError::InvalidConfig(format!("invalid erasure parameters: {e:?}"))
            })?)
        } else {
            None
        };
        Ok(Self { k, n, rs })
    }

    fn shard_len(&self, encoded_len: usize) -> usize {
        // empty shards are rejected by the coder
        ((encoded_len + self.k - 1) / self.k).max(1)
    }
}

impl ErasureCoder for ReedSolomonCoder {
    fn data_fragments(&self) -> usize {
        self.k
    }

    fn total_fragments(&self) -> usize {
        self.n
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<Fragment>, EncodeError> {
        let shard_len = self.shard_len(data.len());
        let mut shards: Vec<Vec<u8>> = (0..self.n)
            .map(|i| {
                let start = (i * shard_len).min(data.len());
                let end = ((i + 1) * shard_len).min(data.len());
                let mut shard = if i < self.k {
                    data[start..end].to_vec()
                } else {
                    Vec::with_capacity(shard_len)
                };
                shard.resize(shard_len, 0);
                shard
            })
            .collect();

        if let Some(rs) = &self.rs {
            rs.encode(&mut shards)
                .map_err(|e| EncodeError::Erasure(format!("{e:?}")))?;
        }

        Ok(shards
            .into_iter()
            .enumerate()
            .map(|(index, payload)| Fragment {
                index,
                data_fragments: self.k,
                total_fragments: self.n,
                encoded_len: data.len(),
                payload,
            })
            .collect())
    }

    fn reconstruct(&self, fragments: &[Fragment]) -> Result<Vec<u8>, EncodeError> {
        let Some(first) = fragments.first() else {
            return Err(EncodeError::NotEnoughFragments {
                required: self.k,
                present: 0,
            });
        };
        let encoded_len = first.encoded_len;
        let shard_len = self.shard_len(encoded_len);

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; self.n];
        for frag in fragments {
            if frag.data_fragments != self.k
                || frag.total_fragments != self.n
                || frag.encoded_len != encoded_len
                || frag.index >= self.n
                || frag.payload.len() != shard_len
            {
                return Err(EncodeError::Erasure(format!(
                    "fragment {} does not belong to this {}-of-{} set",
                    frag.kind(),
                    self.k,
                    self.n
                )));
            }
            shards[frag.index] = Some(frag.payload.clone());
        }

        let present = shards.iter().filter(|s| s.is_some()).count();
        if present < self.k {
            return Err(EncodeError::NotEnoughFragments {
                required: self.k,
                present,
            });
        }

        // without parity every data shard has to be present already
        if let Some(rs) = &self.rs {
            rs.reconstruct_data(&mut shards)
                .map_err(|e| EncodeError::Erasure(format!("{e:?}")))?;
        }

        let mut data = Vec::with_capacity(shard_len * self.k);
        for (i, shard) in shards.into_iter().take(self.k).enumerate() {
            let shard = shard.ok_or(EncodeError::NotEnoughFragments {
                required: self.k,
                present: i,
            })?;
            data.extend_from_slice(&shard);
        }
        data.truncate(encoded_len);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::random_bytes;

    #[test]
    fn fragment_labels() {
        let coder = ReedSolomonCoder::new(2, 4).unwrap();
        let labels: Vec<String> = coder
            .encode(b"abcdef")
            .unwrap()
            .iter()
            .map(|f| f.kind().to_string())
            .collect();
        assert_eq!(labels, ["D0", "D1", "P0", "P1"]);
    }

    #[test]
    fn systematic_layout() {
        let coder = ReedSolomonCoder::new(3, 5).unwrap();
        let frags = coder.encode(b"abcdefgh").unwrap();
        assert_eq!(frags.len(), 5);
        assert_eq!(frags[0].payload, b"abc");
        assert_eq!(frags[1].payload, b"def");
        assert_eq!(frags[2].payload, b"gh\0");
        assert!(frags.iter().all(|f| f.payload.len() == 3 && f.encoded_len == 8));
    }

    #[test]
    fn any_k_of_n() {
        let coder = ReedSolomonCoder::new(4, 6).unwrap();
        let data = random_bytes(3, 10_001);
        let frags = coder.encode(&data).unwrap();

        for skip_a in 0..6 {
            for skip_b in (skip_a + 1)..6 {
                let subset: Vec<Fragment> = frags
                    .iter()
                    .filter(|f| f.index != skip_a && f.index != skip_b)
                    .cloned()
                    .collect();
                assert!(is_recoverable(&subset, 4));
                assert_eq!(coder.reconstruct(&subset).unwrap(), data, "without {skip_a},{skip_b}");
            }
        }
    }

    #[test]
    fn out_of_order_fragments() {
        let coder = ReedSolomonCoder::new(2, 3).unwrap();
        let data = random_bytes(8, 333);
        let mut frags = coder.encode(&data).unwrap();
        frags.reverse();
        frags.truncate(2);
        assert_eq!(coder.reconstruct(&frags).unwrap(), data);
    }

    #[test]
    fn too_few_fragments() {
        let coder = ReedSolomonCoder::new(4, 6).unwrap();
        let frags = coder.encode(&random_bytes(1, 100)).unwrap();
        assert!(!is_recoverable(&frags[..3], 4));
        assert!(matches!(
            coder.reconstruct(&frags[..3]),
            Err(EncodeError::NotEnoughFragments { required: 4, present: 3 })
        ));
        // duplicates do not count twice
        let dupes = vec![frags[0].clone(), frags[0].clone(), frags[1].clone(), frags[2].clone()];
        assert!(!is_recoverable(&dupes, 4));
        assert!(coder.reconstruct(&[]).is_err());
    }

    #[test]
    fn no_parity() {
        let coder = ReedSolomonCoder::new(3, 3).unwrap();
        let data = random_bytes(4, 50);
        let frags = coder.encode(&data).unwrap();
        assert_eq!(frags.len(), 3);
        assert_eq!(coder.reconstruct(&frags).unwrap(), data);
        assert!(coder.reconstruct(&frags[1..]).is_err());
    }

    #[test]
    fn tiny_payload() {
        let coder = ReedSolomonCoder::new(4, 6).unwrap();
        let frags = coder.encode(b"x").unwrap();
        assert!(frags.iter().all(|f| f.payload.len() == 1));
        assert_eq!(coder.reconstruct(&frags[2..]).unwrap(), b"x");
    }

    #[test]
    fn mismatched_fragment_rejected() {
        let coder = ReedSolomonCoder::new(2, 3).unwrap();
        let mut frags = coder.encode(b"abcd").unwrap();
        frags[1].payload.push(0);
        assert!(matches!(coder.reconstruct(&frags), Err(EncodeError::Erasure(_))));
    }

    #[test]
    fn invalid_parameters() {
        assert!(ReedSolomonCoder::new(0, 3).is_err());
        assert!(ReedSolomonCoder::new(4, 3).is_err());
        assert!(ReedSolomonCoder::new(10, 300).is_err());
    }
}
