/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.
//!
//! Every signature in this crate is made over `digest ‖ network_id`, where `digest` is either a
//! ballot's body hash or a fact hash.

use super::data_types::{CryptoHash, NetworkID, PublicKeyBytes, SignatureBytes};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// A facade around [`SigningKey`] that implements method for [`sign`](Self::sign)-ing messages as well
/// as a getter for the [`public`](Self::public) key associated with the signing key.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Sign `digest ‖ network_id`.
    pub fn sign_digest(&self, digest: &CryptoHash, network_id: &NetworkID) -> SignatureBytes {
        self.sign(&signing_payload(digest, network_id))
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    /// Get the `VerifyingKey` of this `Keypair`, in its serializable form.
    pub fn public_bytes(&self) -> PublicKeyBytes {
        PublicKeyBytes::from(self.0.verifying_key())
    }
}

/// SHA256 over the concatenation of `parts`.
pub fn hash_all(parts: &[&[u8]]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    for part in parts {
        hasher.update(part);
    }
    CryptoHash::new(hasher.finalize().into())
}

/// The bytes that are actually signed for a `digest` on a given network.
pub fn signing_payload(digest: &CryptoHash, network_id: &NetworkID) -> Vec<u8> {
    let mut payload = digest.bytes().to_vec();
    payload.extend_from_slice(network_id.bytes());
    payload
}

/// Check that `signature` was made by `signer` over `digest ‖ network_id`.
///
/// Returns false both when the signature does not verify and when `signer` is not a valid Ed25519
/// point.
pub fn verify_digest(
    signer: &PublicKeyBytes,
    digest: &CryptoHash,
    network_id: &NetworkID,
    signature: &SignatureBytes,
) -> bool {
    let Ok(verifying_key) = signer.verifying_key() else {
        return false;
    };
    let signature = Signature::from_bytes(&signature.bytes());
    verifying_key
        .verify(&signing_payload(digest, network_id), &signature)
        .is_ok()
}
