// src/codec.rs
use base64ct::{Base64UrlUnpadded, Encoding};

/// URL-safe base64 without padding, the alphabet used in every token segment.
pub fn encode(bytes: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(bytes)
}

/// Inverse of [`encode`]. Trailing `=` padding is tolerated.
pub fn decode(text: &str) -> Result<Vec<u8>, base64ct::Error> {
    Base64UrlUnpadded::decode_vec(text.trim_end_matches('='))
}
