use super::artifact::signed_payload;
use crate::error::ValidationFailure;
use crate::security::UpdateKey;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn keyed_mac(key: &UpdateKey, raw: &[u8], header: &str) -> Result<HmacSha256, ValidationFailure> {
    let mut mac =
        HmacSha256::new_from_slice(key.expose()).map_err(|_| ValidationFailure::KeyNotConfigured)?;
    mac.update(&signed_payload(raw, header));
    Ok(mac)
}

/// Hex HMAC-SHA256 of `raw` (minus its signature line) under `key`.
pub fn sign(raw: &[u8], header: &str, key: &UpdateKey) -> Result<String, ValidationFailure> {
    let mac = keyed_mac(key, raw, header)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a declared hex signature against the payload. The comparison of
/// MAC bytes is constant-time.
pub fn verify(
    raw: &[u8],
    header: &str,
    key: &UpdateKey,
    declared_hex: &str,
) -> Result<(), ValidationFailure> {
    let declared = hex::decode(declared_hex.trim()).map_err(|_| ValidationFailure::MalformedSignature)?;
    let mac = keyed_mac(key, raw, header)?;
    mac.verify_slice(&declared)
        .map_err(|_| ValidationFailure::SignatureMismatch)
}
