//! RPC signature version 1.0
//!
//! See https://help.aliyun.com/document_detail/25492.html

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::BTreeMap;

use crate::error::EcsError;

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986 percent-encoding, as the signature requires
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Sorted, encoded `k=v&k=v` query
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Signs the canonical query of a GET request.
pub fn sign(params: &BTreeMap<String, String>, access_key_secret: &str) -> Result<String, EcsError> {
    let string_to_sign = format!(
        "GET&{}&{}",
        percent_encode("/"),
        percent_encode(&canonical_query(params))
    );
    let mut mac = HmacSha1::new_from_slice(format!("{}&", access_key_secret).as_bytes())
        .map_err(|e| EcsError::InvalidRequest(format!("invalid signing key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}
