//! RS256 signing keypair management.
//!
//! A keypair is generated on first start and stored as PEM files under
//! the configured keys directory; subsequent starts reuse it. The public
//! half is exposed as a JWKS document so clients can verify our tokens.

use std::path::Path;

use anyhow::Context;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;

/// RSA modulus size for generated keys.
const KEY_BITS: usize = 2048;

const PRIVATE_PEM: &str = "private.pem";
const PUBLIC_PEM: &str = "public.pem";

/// The loaded signing keypair plus derived verification material.
pub struct SigningKeys {
    /// Key for signing access tokens.
    pub encoding: EncodingKey,
    /// Key for verifying our own tokens.
    pub decoding: DecodingKey,
    /// Key id advertised in token headers and the JWKS.
    pub kid: String,
    jwks: serde_json::Value,
}

impl SigningKeys {
    /// Load the keypair from `keys_dir`, generating one on first start.
    pub fn load_or_generate(keys_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(keys_dir)
            .with_context(|| format!("failed to create keys dir {}", keys_dir.display()))?;
        let private_path = keys_dir.join(PRIVATE_PEM);

        let private = if private_path.exists() {
            let pem = std::fs::read_to_string(&private_path)
                .context("failed to read private key PEM")?;
            RsaPrivateKey::from_pkcs8_pem(&pem).context("failed to parse private key PEM")?
        } else {
            info!(dir = %keys_dir.display(), "generating RS256 signing keypair");
            let mut rng = rand::thread_rng();
            let private = RsaPrivateKey::new(&mut rng, KEY_BITS)
                .context("RSA key generation failed")?;
            let pem = private
                .to_pkcs8_pem(LineEnding::LF)
                .context("failed to encode private key")?;
            std::fs::write(&private_path, pem.as_bytes())
                .context("failed to write private key PEM")?;
            let public_pem = RsaPublicKey::from(&private)
                .to_public_key_pem(LineEnding::LF)
                .context("failed to encode public key")?;
            std::fs::write(keys_dir.join(PUBLIC_PEM), public_pem.as_bytes())
                .context("failed to write public key PEM")?;
            private
        };

        Self::from_private(private)
    }

    fn from_private(private: RsaPrivateKey) -> anyhow::Result<Self> {
        let public = RsaPublicKey::from(&private);
        let n = URL_SAFE_NO_PAD.encode(public.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public.e().to_bytes_be());

        // kid: truncated digest of the public modulus.
        let kid = hex::encode(&Sha256::digest(public.n().to_bytes_be())[..8]);

        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .context("failed to re-encode private key")?;
        let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .context("failed to build encoding key")?;
        let decoding = DecodingKey::from_rsa_components(&n, &e)
            .context("failed to build decoding key")?;

        let jwks = json!({
            "keys": [{
                "kty": "RSA",
                "use": "sig",
                "alg": "RS256",
                "kid": kid,
                "n": n,
                "e": e,
            }]
        });

        Ok(Self {
            encoding,
            decoding,
            kid,
            jwks,
        })
    }

    /// The JWKS document for the well-known endpoint.
    pub fn jwks_document(&self) -> &serde_json::Value {
        &self.jwks
    }
}

impl std::fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeys")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_reload_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = SigningKeys::load_or_generate(dir.path()).expect("generate");
        let second = SigningKeys::load_or_generate(dir.path()).expect("reload");
        assert_eq!(first.kid, second.kid);
        assert!(dir.path().join(PRIVATE_PEM).exists());
        assert!(dir.path().join(PUBLIC_PEM).exists());
    }

    #[test]
    fn test_jwks_document_shape() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keys = SigningKeys::load_or_generate(dir.path()).expect("generate");
        let jwks = keys.jwks_document();
        let key = &jwks["keys"][0];
        assert_eq!(key["kty"], "RSA");
        assert_eq!(key["alg"], "RS256");
        assert_eq!(key["kid"], serde_json::json!(keys.kid));
        assert!(key["n"].as_str().map(|s| !s.is_empty()).unwrap_or(false));
    }
}
