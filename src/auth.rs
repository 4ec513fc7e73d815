// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bearer-token minting and verification: a hand-rolled HMAC-SHA256 envelope
//! over a base64-encoded user id, avoiding a full OAuth/JWT stack for what is
//! meant to be a stateless signer over a single shared secret.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("signature verification failed")]
    BadSignature,
}

pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Mints `base64(userId).base64(signature)` over the user id and secret.
    pub fn sign(&self, user_id: &str) -> String {
        let payload = URL_SAFE_NO_PAD.encode(user_id.as_bytes());
        let signature = self.signature_for(&payload);
        format!("{payload}.{signature}")
    }

    /// Verifies a token minted by [`TokenSigner::sign`] and extracts the user id.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let expected = self.signature_for(payload);
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(TokenError::BadSignature);
        }
        let user_id_bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|_| TokenError::Malformed)?;
        String::from_utf8(user_id_bytes).map_err(|_| TokenError::Malformed)
    }

    fn signature_for(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_user_id() {
        let signer = TokenSigner::new("shared-secret");
        let token = signer.sign("alice");
        assert_eq!(signer.verify(&token), Ok("alice".to_string()));
    }

    #[test]
    fn rejects_tampered_payload() {
        let signer = TokenSigner::new("shared-secret");
        let token = signer.sign("alice");
        let (_, signature) = token.split_once('.').unwrap();
        let forged = format!("{}.{signature}", URL_SAFE_NO_PAD.encode("mallory"));
        assert_eq!(signer.verify(&forged), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_token_signed_with_a_different_secret() {
        let signer_a = TokenSigner::new("secret-a");
        let signer_b = TokenSigner::new("secret-b");
        let token = signer_a.sign("alice");
        assert_eq!(signer_b.verify(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_malformed_token() {
        let signer = TokenSigner::new("shared-secret");
        assert_eq!(signer.verify("not-a-token"), Err(TokenError::Malformed));
    }
}
