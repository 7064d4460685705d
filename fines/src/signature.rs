//! Gateway callback signatures
//!
//! `hex(HMAC-SHA256(secret, "{order_id}|{payment_id}"))`

use hmac::{Hmac, Mac};
use library_core::{Error, Result};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, order_id: &str, payment_id: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("Invalid gateway secret: {}", e)))?;
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    Ok(mac)
}

/// Signature the gateway produces for a completed payment
pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> Result<String> {
    Ok(hex::encode(mac(secret, order_id, payment_id)?.finalize().into_bytes()))
}

/// Constant-time check of a hex signature; malformed hex never matches
pub fn verify(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> Result<bool> {
    let provided = match hex::decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(false),
    };
    Ok(mac(secret, order_id, payment_id)?
        .verify_slice(&provided)
        .is_ok())
}
