//! Swarm addresses and the XOR distance metric.

use crate::error::AddressError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Highest proximity order reported by [`proximity`].
pub const MAX_PO: u8 = 31;

/// A network address: chunk address or node overlay.
///
/// Variable length so that mismatched inputs can be reported rather than
/// silently truncated. Displayed and serialized as lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(Vec<u8>);

impl Address {
    /// Create an address from owned bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Create an address by copying a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Get the raw bytes of this address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes in this address.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this address has no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes.to_vec())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        hex::decode(trimmed)
            .map(Self)
            .map_err(|e| AddressError::InvalidHex(format!("{s}: {e}")))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = self.to_string();
        write!(f, "Address({})", &full[..full.len().min(16)])
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn check_len(reference: &Address, other: &Address) -> Result<(), AddressError> {
    if reference.len() != other.len() {
        return Err(AddressError::LengthMismatch {
            expected: reference.len(),
            actual: other.len(),
        });
    }
    Ok(())
}

/// XOR distance between two addresses, as big-endian bytes.
pub fn distance(x: &Address, y: &Address) -> Result<Vec<u8>, AddressError> {
    check_len(x, y)?;
    Ok(x.0.iter().zip(y.0.iter()).map(|(a, b)| a ^ b).collect())
}

/// Compare the distances of `a` and `b` to `reference`.
///
/// Returns [`Ordering::Less`] when `a` is strictly closer, `Greater` when
/// `b` is closer and `Equal` on a tie.
pub fn distance_cmp(
    reference: &Address,
    a: &Address,
    b: &Address,
) -> Result<Ordering, AddressError> {
    check_len(reference, a)?;
    check_len(reference, b)?;
    for ((r, x), y) in reference.0.iter().zip(a.0.iter()).zip(b.0.iter()) {
        let dx = r ^ x;
        let dy = r ^ y;
        if dx != dy {
            return Ok(dx.cmp(&dy));
        }
    }
    Ok(Ordering::Equal)
}

/// Index of the candidate closest to `reference`.
///
/// Ties keep the earliest candidate in iteration order. Every candidate is
/// length-checked, even after a closer one was found.
pub fn closest_index<'a, I>(reference: &Address, candidates: I) -> Result<usize, AddressError>
where
    I: IntoIterator<Item = &'a Address>,
{
    let mut best: Option<(usize, &Address)> = None;
    for (i, candidate) in candidates.into_iter().enumerate() {
        check_len(reference, candidate)?;
        match best {
            None => best = Some((i, candidate)),
            Some((_, current)) => {
                if distance_cmp(reference, candidate, current)? == Ordering::Less {
                    best = Some((i, candidate));
                }
            }
        }
    }
    best.map(|(i, _)| i).ok_or(AddressError::EmptyCandidateSet)
}

/// The candidate closest to `reference`, first-in-order on ties.
pub fn closest<'a>(
    reference: &Address,
    candidates: &'a [Address],
) -> Result<&'a Address, AddressError> {
    let idx = closest_index(reference, candidates)?;
    Ok(&candidates[idx])
}

/// Number of leading bits two addresses share, capped at [`MAX_PO`].
pub fn proximity(x: &Address, y: &Address) -> Result<u8, AddressError> {
    check_len(x, y)?;
    let mut po: u32 = 0;
    for (a, b) in x.0.iter().zip(y.0.iter()) {
        let diff = a ^ b;
        if diff != 0 {
            po += diff.leading_zeros();
            break;
        }
        po += 8;
        if po >= u32::from(MAX_PO) {
            break;
        }
    }
    Ok(po.min(u32::from(MAX_PO)) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(bytes: &[u8]) -> Address {
        Address::from_bytes(bytes)
    }

    #[test]
    fn hex_roundtrip() {
        let a: Address = "0aff10".parse().unwrap();
        assert_eq!(a.as_bytes(), &[0x0a, 0xff, 0x10]);
        assert_eq!(a.to_string(), "0aff10");
        let prefixed: Address = "0x0aff10".parse().unwrap();
        assert_eq!(prefixed, a);
    }

    #[test]
    fn invalid_hex_rejected() {
        assert!(matches!(
            "zz".parse::<Address>(),
            Err(AddressError::InvalidHex(_))
        ));
    }

    #[test]
    fn serde_as_hex_string() {
        let a = addr(&[1, 2, 3]);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"010203\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn distance_is_xor() {
        let d = distance(&addr(&[0b1010, 0xff]), &addr(&[0b0110, 0x0f])).unwrap();
        assert_eq!(d, vec![0b1100, 0xf0]);
    }

    #[test]
    fn distance_cmp_big_endian() {
        let reference = addr(&[0x00, 0x00]);
        // High byte dominates low byte.
        let a = addr(&[0x00, 0xff]);
        let b = addr(&[0x01, 0x00]);
        assert_eq!(distance_cmp(&reference, &a, &b).unwrap(), Ordering::Less);
        assert_eq!(distance_cmp(&reference, &b, &a).unwrap(), Ordering::Greater);
        assert_eq!(distance_cmp(&reference, &a, &a).unwrap(), Ordering::Equal);
    }

    #[test]
    fn closest_picks_minimum_xor() {
        let reference = addr(&[0b1000_0000]);
        let candidates = vec![
            addr(&[0b0000_0001]),
            addr(&[0b1000_0011]),
            addr(&[0b1000_0100]),
        ];
        assert_eq!(closest(&reference, &candidates).unwrap(), &candidates[1]);
    }

    #[test]
    fn closest_tie_keeps_first_in_input_order() {
        let reference = addr(&[0x10, 0x20]);
        let a = addr(&[0x11, 0x00]);
        let candidates = vec![addr(&[0xff, 0xff]), a.clone(), a.clone()];
        assert_eq!(closest_index(&reference, &candidates).unwrap(), 1);

        // Reversing the input changes the winner only by position.
        let reversed: Vec<Address> = candidates.iter().rev().cloned().collect();
        assert_eq!(closest_index(&reference, &reversed).unwrap(), 0);
    }

    #[test]
    fn closest_is_reference_itself_when_present() {
        let reference = addr(&[7, 7, 7]);
        let candidates = vec![addr(&[7, 7, 6]), reference.clone(), addr(&[0, 0, 0])];
        assert_eq!(closest(&reference, &candidates).unwrap(), &reference);
    }

    #[test]
    fn closest_empty_candidate_set() {
        let reference = addr(&[1]);
        assert_eq!(
            closest(&reference, &[]).unwrap_err(),
            AddressError::EmptyCandidateSet
        );
    }

    #[test]
    fn closest_length_mismatch() {
        let reference = addr(&[1, 2]);
        let candidates = vec![addr(&[1, 2]), addr(&[1, 2, 3])];
        assert_eq!(
            closest(&reference, &candidates).unwrap_err(),
            AddressError::LengthMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn closest_does_not_mutate_input() {
        let reference = addr(&[0x42]);
        let candidates = vec![addr(&[0x40]), addr(&[0x43])];
        let before = candidates.clone();
        let _ = closest(&reference, &candidates).unwrap();
        assert_eq!(candidates, before);
    }

    #[test]
    fn proximity_counts_shared_prefix_bits() {
        assert_eq!(proximity(&addr(&[0xff, 0]), &addr(&[0x7f, 0])).unwrap(), 0);
        assert_eq!(proximity(&addr(&[0xf0, 0]), &addr(&[0xf8, 0])).unwrap(), 4);
        assert_eq!(proximity(&addr(&[0xab, 0x80]), &addr(&[0xab, 0x00])).unwrap(), 8);
    }

    #[test]
    fn proximity_caps_at_max_po() {
        let a = addr(&[0u8; 32]);
        assert_eq!(proximity(&a, &a).unwrap(), MAX_PO);
    }
}
