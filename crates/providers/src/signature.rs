//! Webhook authentication helpers shared by the provider adapters.
//!
//! GitHub, Gitea, Bitbucket and the generic Git endpoint sign the raw request
//! body with HMAC-SHA256 keyed by the webhook secret and send the hex digest in
//! a header (GitHub and Bitbucket prefix it with `sha256=`). GitLab instead
//! echoes the secret itself in `X-Gitlab-Token`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use gitops::ProviderError;

type HmacSha256 = Hmac<Sha256>;

fn keyed(secret: &str, body: &[u8]) -> Result<HmacSha256, ProviderError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| ProviderError::Configuration {
            message: format!("unusable webhook secret: {e}"),
        })?;
    mac.update(body);
    Ok(mac)
}

/// Computes the lowercase hex HMAC-SHA256 of `body` keyed by `secret`.
pub fn sign_hmac_sha256(secret: &str, body: &[u8]) -> Result<String, ProviderError> {
    Ok(hex::encode(keyed(secret, body)?.finalize().into_bytes()))
}

/// Verifies a hex-encoded HMAC-SHA256 signature of `body`.
///
/// `signature` may carry a `sha256=` prefix. The digest comparison is
/// constant-time.
pub fn verify_hmac_sha256(
    secret: &str,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), ProviderError> {
    let signature = signature.ok_or(ProviderError::MissingSignature)?;
    let hex_digest = signature
        .trim()
        .strip_prefix("sha256=")
        .unwrap_or(signature.trim());
    let expected = hex::decode(hex_digest).map_err(|_| ProviderError::InvalidSignature)?;

    keyed(secret, body)?
        .verify_slice(&expected)
        .map_err(|_| ProviderError::InvalidSignature)
}

/// Checks a shared-secret token in constant time by comparing the HMACs of
/// both values rather than the values themselves.
pub fn verify_token(secret: &str, token: Option<&str>) -> Result<(), ProviderError> {
    let token = token.ok_or(ProviderError::MissingSignature)?;
    let expected = keyed(secret, secret.as_bytes())?.finalize().into_bytes();
    keyed(secret, token.as_bytes())?
        .verify_slice(&expected)
        .map_err(|_| ProviderError::InvalidSignature)
}
