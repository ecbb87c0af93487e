use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::Rng;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Upper bound for registration ids, matching the 14-bit range Signal uses.
pub const MAX_REGISTRATION_ID: u32 = 16380;

/// A party's long-term identity.
///
/// The Ed25519 key signs pre-keys; its Montgomery form is the identity half
/// of every X3DH agreement.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Get the public key as raw bytes (32 bytes).
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message with this identity's private key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Verify a signature against a public key.
    pub fn verify(
        public_key: &VerifyingKey,
        message: &[u8],
        signature: &Signature,
    ) -> Result<(), CryptoError> {
        public_key
            .verify(message, signature)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }

    /// Derive the X25519 static secret used for Diffie-Hellman.
    ///
    /// Uses the SHA-512-expanded scalar so that the matching public key equals
    /// `peer_ed25519_to_x25519()` applied to our public key.
    pub fn to_x25519_secret(&self) -> x25519_dalek::StaticSecret {
        x25519_dalek::StaticSecret::from(self.signing_key.to_scalar_bytes())
    }

    /// Hex form of the public key, for logs.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Convert a peer's Ed25519 public key to its X25519 form (RFC 7748 map).
    pub fn peer_ed25519_to_x25519(
        verifying_key: &VerifyingKey,
    ) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(verifying_key.to_montgomery().to_bytes())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Pick a random registration id in `1..=MAX_REGISTRATION_ID`.
pub fn generate_registration_id() -> u32 {
    OsRng.gen_range(1..=MAX_REGISTRATION_ID)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_sign() {
        let identity = Identity::generate();
        let message = b"hello postbox";

        let signature = identity.sign(message);
        assert!(Identity::verify(&identity.public_key(), message, &signature).is_ok());
        assert!(Identity::verify(&identity.public_key(), b"other", &signature).is_err());
    }

    #[test]
    fn peer_conversion_matches_own_derivation() {
        let identity = Identity::generate();
        let from_secret = x25519_dalek::PublicKey::from(&identity.to_x25519_secret());
        let from_public = Identity::peer_ed25519_to_x25519(&identity.public_key());
        assert_eq!(from_secret.as_bytes(), from_public.as_bytes());
    }

    #[test]
    fn peer_x25519_dh_agreement() {
        let alice = Identity::generate();
        let bob = Identity::generate();

        let shared_a = alice
            .to_x25519_secret()
            .diffie_hellman(&Identity::peer_ed25519_to_x25519(&bob.public_key()));
        let shared_b = bob
            .to_x25519_secret()
            .diffie_hellman(&Identity::peer_ed25519_to_x25519(&alice.public_key()));

        assert_eq!(shared_a.as_bytes(), shared_b.as_bytes());
    }

    #[test]
    fn registration_ids_stay_in_range() {
        for _ in 0..256 {
            let id = generate_registration_id();
            assert!((1..=MAX_REGISTRATION_ID).contains(&id));
        }
    }
}
