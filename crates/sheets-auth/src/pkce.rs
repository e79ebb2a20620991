//! PKCE (RFC 7636) verifier/challenge and OAuth `state` generation
//!
//! The verifier stays server-side with the pending authorization; the S256
//! challenge goes into the consent URL. The `state` value ties the callback
//! back to the subject that started the flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Random PKCE code verifier: 64 random bytes as URL-safe base64 (86 chars,
/// inside the 43-128 range RFC 7636 allows).
pub fn generate_verifier() -> String {
    random_token::<64>()
}

/// `BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Opaque CSRF `state` for the consent redirect.
pub fn generate_state() -> String {
    random_token::<32>()
}

fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}
