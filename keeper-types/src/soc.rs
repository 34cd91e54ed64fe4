//! Single-owner chunks.
//!
//! A single-owner chunk wraps a content-addressed chunk with an identifier
//! and a secp256k1 signature. Its address is `keccak256(id || owner)`, so it
//! is bound to the signing key rather than to the payload. The signature
//! covers `keccak256(id || chunk_address)` using the Ethereum personal
//! message prefix and is encoded as `r || s || v` with `v = recovery_id + 27`.

use crate::address::Address;
use crate::chunk::{keccak256, Chunk, SPAN_SIZE};
use crate::error::SocError;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use std::fmt;

/// Size of a single-owner chunk identifier.
pub const ID_SIZE: usize = 32;

/// Size of an encoded signature.
pub const SIGNATURE_SIZE: usize = 65;

/// Size of an owner (Ethereum) address.
pub const OWNER_SIZE: usize = 20;

const ETH_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Ethereum address of a chunk owner.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner([u8; OWNER_SIZE]);

impl Owner {
    /// Get the raw bytes of this owner.
    pub fn as_bytes(&self) -> &[u8; OWNER_SIZE] {
        &self.0
    }

    fn from_key(key: &VerifyingKey) -> Self {
        let point = key.as_affine().to_encoded_point(false);
        // Skip the 0x04 uncompressed-point tag.
        let hash = keccak256(&[&point.as_bytes()[1..]]);
        let mut owner = [0u8; OWNER_SIZE];
        owner.copy_from_slice(&hash[32 - OWNER_SIZE..]);
        Self(owner)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owner({self})")
    }
}

fn eth_prehash(digest: &[u8; 32]) -> [u8; 32] {
    keccak256(&[ETH_MESSAGE_PREFIX, digest])
}

fn signed_digest(id: &[u8; ID_SIZE], chunk_address: &Address) -> [u8; 32] {
    keccak256(&[id, chunk_address.as_bytes()])
}

/// A secp256k1 key that signs single-owner chunks.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
}

impl Signer {
    /// Build a signer from a 32-byte secret scalar.
    pub fn from_secret(secret: &[u8]) -> Result<Self, SocError> {
        SigningKey::from_slice(secret)
            .map(|key| Self { key })
            .map_err(|_| SocError::InvalidKey)
    }

    /// The Ethereum address of this key.
    pub fn owner(&self) -> Owner {
        Owner::from_key(self.key.verifying_key())
    }

    /// Sign a 32-byte digest with the Ethereum message prefix.
    pub fn sign(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_SIZE], SocError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&eth_prehash(digest))
            .map_err(|e| SocError::Signing(e.to_string()))?;
        let mut out = [0u8; SIGNATURE_SIZE];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte() + 27;
        Ok(out)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signer({})", self.owner())
    }
}

/// Recover the owner that produced `signature` over `digest`.
pub fn recover_owner(
    digest: &[u8; 32],
    signature: &[u8; SIGNATURE_SIZE],
) -> Result<Owner, SocError> {
    let v = signature[64];
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_byte(recovery_byte)
        .ok_or_else(|| SocError::InvalidSignature(format!("recovery byte {v}")))?;
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| SocError::InvalidSignature(e.to_string()))?;
    let key = VerifyingKey::recover_from_prehash(&eth_prehash(digest), &sig, recovery_id)
        .map_err(|e| SocError::InvalidSignature(e.to_string()))?;
    Ok(Owner::from_key(&key))
}

/// Address of the single-owner chunk with this id and owner.
pub fn soc_address(id: &[u8; ID_SIZE], owner: &Owner) -> Address {
    Address::from(keccak256(&[id, owner.as_bytes()]))
}

/// A signed single-owner chunk.
#[derive(Clone, PartialEq, Eq)]
pub struct SingleOwnerChunk {
    id: [u8; ID_SIZE],
    owner: Owner,
    signature: [u8; SIGNATURE_SIZE],
    chunk: Chunk,
}

impl SingleOwnerChunk {
    /// Sign `chunk` under `id`.
    pub fn sign(id: [u8; ID_SIZE], chunk: Chunk, signer: &Signer) -> Result<Self, SocError> {
        let signature = signer.sign(&signed_digest(&id, chunk.address()))?;
        Ok(Self {
            id,
            owner: signer.owner(),
            signature,
            chunk,
        })
    }

    /// Parse the wire form `id || signature || span || payload`.
    ///
    /// The owner is recovered from the signature.
    pub fn from_data(data: &[u8]) -> Result<Self, SocError> {
        let header = ID_SIZE + SIGNATURE_SIZE;
        if data.len() < header + SPAN_SIZE {
            return Err(SocError::DataTooShort { len: data.len() });
        }
        let mut id = [0u8; ID_SIZE];
        id.copy_from_slice(&data[..ID_SIZE]);
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&data[ID_SIZE..header]);
        let chunk = Chunk::from_data(&data[header..])?;
        let owner = recover_owner(&signed_digest(&id, chunk.address()), &signature)?;
        Ok(Self {
            id,
            owner,
            signature,
            chunk,
        })
    }

    /// Check the signature against the carried owner.
    pub fn verify(&self) -> Result<(), SocError> {
        let digest = signed_digest(&self.id, self.chunk.address());
        let recovered = recover_owner(&digest, &self.signature)?;
        if recovered != self.owner {
            return Err(SocError::OwnerMismatch {
                claimed: self.owner.to_string(),
                recovered: recovered.to_string(),
            });
        }
        Ok(())
    }

    /// Address of this chunk: `keccak256(id || owner)`.
    pub fn address(&self) -> Address {
        soc_address(&self.id, &self.owner)
    }

    /// The identifier.
    pub fn id(&self) -> &[u8; ID_SIZE] {
        &self.id
    }

    /// The signing owner.
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// The encoded signature.
    pub fn signature(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.signature
    }

    /// The wrapped content-addressed chunk.
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// The wire form `id || signature || span || payload`.
    pub fn data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(
            ID_SIZE + SIGNATURE_SIZE + SPAN_SIZE + self.chunk.payload().len(),
        );
        data.extend_from_slice(&self.id);
        data.extend_from_slice(&self.signature);
        data.extend_from_slice(&self.chunk.data());
        data
    }
}

impl fmt::Debug for SingleOwnerChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleOwnerChunk")
            .field("id", &hex::encode(self.id))
            .field("owner", &self.owner)
            .field("chunk", &self.chunk)
            .finish()
    }
}
