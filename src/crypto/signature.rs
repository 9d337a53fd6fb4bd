//! C1 — Signature Verifier.
//!
//! Constant-time HMAC verification of raw webhook bytes, exactly as
//! received, before any parsing/whitespace-stripping/re-serialization.
//! Same `hmac`+`sha2`+`hex` crates as the teacher's `webhooks.rs` signer,
//! inverted to verify, with a `subtle`-based constant-time compare (the
//! teacher compares signatures with `==`, which is not constant-time).

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algo {
    Sha1,
    Sha256,
}

impl Algo {
    fn hex_len(self) -> usize {
        match self {
            Algo::Sha1 => 40,
            Algo::Sha256 => 64,
        }
    }
}

/// Parse a `"<algo>=<hex>"` header value. Missing algo prefix defaults to
/// sha256 per spec §4.1.
fn parse_header(header: &str) -> (Algo, &str) {
    match header.split_once('=') {
        Some(("sha1", hex)) => (Algo::Sha1, hex),
        Some(("sha256", hex)) => (Algo::Sha256, hex),
        Some((_, hex)) => (Algo::Sha256, hex),
        None => (Algo::Sha256, header),
    }
}

/// Verify `body` against the signature `header` using `secret`. Returns
/// `Ok(())` on match, `Err(AppError::Auth(..))` on any mismatch or
/// malformed input. The secret is checked for emptiness separately by
/// callers so they can surface `BAD_SECRET` (500, non-leaking) distinctly
/// from `INVALID_SIGNATURE` (401).
pub fn verify(body: &[u8], header: &str, secret: &[u8]) -> Result<(), AppError> {
    let (algo, hex_sig) = parse_header(header);

    if hex_sig.len() != algo.hex_len() {
        return Err(AppError::Auth("INVALID_SIGNATURE".into()));
    }

    let given = match hex::decode(hex_sig) {
        Ok(b) => b,
        Err(_) => return Err(AppError::Auth("INVALID_SIGNATURE".into())),
    };

    let computed = match algo {
        Algo::Sha256 => {
            let mut mac = HmacSha256::new_from_slice(secret)
                .map_err(|_| AppError::Internal("BAD_SECRET".into()))?;
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
        Algo::Sha1 => {
            let mut mac = HmacSha1::new_from_slice(secret)
                .map_err(|_| AppError::Internal("BAD_SECRET".into()))?;
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
    };

    if given.len() != computed.len() {
        return Err(AppError::Auth("INVALID_SIGNATURE".into()));
    }

    // Constant-time over equal-length buffers, per spec §4.1 and the
    // timing-indistinguishability property in spec §8.
    if given.ct_eq(&computed).into() {
        Ok(())
    } else {
        Err(AppError::Auth("INVALID_SIGNATURE".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(body: &[u8], secret: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_verifies() {
        let secret = b"shhh";
        let body = b"{\"hello\":\"world\"}";
        let header = sign(body, secret);
        assert!(verify(body, &header, secret).is_ok());
    }

    #[test]
    fn tampered_body_rejected() {
        let secret = b"shhh";
        let header = sign(b"original", secret);
        assert!(verify(b"tampered", &header, secret).is_err());
    }

    #[test]
    fn wrong_hex_length_rejected() {
        let secret = b"shhh";
        assert!(verify(b"body", "sha256=deadbeef", secret).is_err());
    }

    #[test]
    fn all_zero_signature_rejected() {
        let secret = b"shhh";
        let header = format!("sha256={}", "0".repeat(64));
        assert!(verify(b"hello", &header, secret).is_err());
    }

    #[test]
    fn missing_algo_prefix_defaults_to_sha256() {
        let secret = b"shhh";
        let body = b"payload";
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(body);
        let hex_sig = hex::encode(mac.finalize().into_bytes());
        assert!(verify(body, &hex_sig, secret).is_ok());
    }

    #[test]
    fn sha1_algo_supported() {
        let secret = b"shhh";
        let body = b"payload";
        let mut mac = HmacSha1::new_from_slice(secret).unwrap();
        mac.update(body);
        let header = format!("sha1={}", hex::encode(mac.finalize().into_bytes()));
        assert!(verify(body, &header, secret).is_ok());
    }
}
