// ABOUTME: PKCE code challenge verification (RFC 7636) with S256 and plain methods
// ABOUTME: Comparisons are constant-time to keep verifier probing off the table
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// SHA-256 challenge method
pub const METHOD_S256: &str = "S256";
/// Plaintext challenge method
pub const METHOD_PLAIN: &str = "plain";

/// Whether `method` names a challenge method this server accepts
#[must_use]
pub fn is_supported_method(method: &str) -> bool {
    method == METHOD_S256 || method == METHOD_PLAIN
}

/// Verify a code verifier against the challenge recorded at issuance
///
/// For S256 the verifier hashes (SHA-256, base64url without padding) to the
/// challenge; for plain the verifier must equal the challenge exactly.
/// Unknown methods never verify.
#[must_use]
pub fn verify_code_challenge(verifier: &str, challenge: &str, method: &str) -> bool {
    match method {
        METHOD_S256 => {
            let mut hasher = Sha256::new();
            hasher.update(verifier.as_bytes());
            let computed = general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize());
            computed.as_bytes().ct_eq(challenge.as_bytes()).into()
        }
        METHOD_PLAIN => verifier.as_bytes().ct_eq(challenge.as_bytes()).into(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge_for(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    #[test]
    fn s256_round_trip_verifies() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = challenge_for(verifier);
        assert!(verify_code_challenge(verifier, &challenge, METHOD_S256));
    }

    #[test]
    fn s256_rejects_any_other_verifier() {
        let challenge = challenge_for("the-real-verifier-the-real-verifier-12345678");
        assert!(!verify_code_challenge(
            "some-other-verifier-some-other-verifier-9999",
            &challenge,
            METHOD_S256
        ));
    }

    #[test]
    fn plain_requires_exact_equality() {
        assert!(verify_code_challenge("abc123", "abc123", METHOD_PLAIN));
        assert!(!verify_code_challenge("abc123", "abc124", METHOD_PLAIN));
    }

    #[test]
    fn unknown_method_never_verifies() {
        assert!(!verify_code_challenge("abc", "abc", "S512"));
    }

    #[test]
    fn supported_methods_are_s256_and_plain() {
        assert!(is_supported_method("S256"));
        assert!(is_supported_method("plain"));
        assert!(!is_supported_method("s256"));
        assert!(!is_supported_method(""));
    }
}
