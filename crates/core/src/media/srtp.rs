use base64::prelude::{BASE64_STANDARD, Engine as _};

/// Length of the SRTP master salt for every supported suite (RFC 3711 §8.2).
pub const SALT_LEN: usize = 14;

/// SRTP crypto suite negotiated with the client.
///
/// Discriminants match the values carried in the host's setup-endpoints
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoSuite {
    AesCm128HmacSha1_80 = 0,
    Aes256CmHmacSha1_80 = 1,
    None = 2,
}

impl CryptoSuite {
    /// Suite name as used in SDP `a=crypto` lines and the transcoder's
    /// `-srtp_out_suite` option. `None` for unencrypted RTP.
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Self::AesCm128HmacSha1_80 => Some("AES_CM_128_HMAC_SHA1_80"),
            Self::Aes256CmHmacSha1_80 => Some("AES_256_CM_HMAC_SHA1_80"),
            Self::None => None,
        }
    }

    /// Master key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Self::AesCm128HmacSha1_80 => 16,
            Self::Aes256CmHmacSha1_80 => 32,
            Self::None => 0,
        }
    }
}

/// SRTP keying material for one media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrtpParams {
    pub suite: CryptoSuite,
    pub key: Vec<u8>,
    pub salt: Vec<u8>,
}

impl SrtpParams {
    pub fn new(suite: CryptoSuite, key: Vec<u8>, salt: Vec<u8>) -> Self {
        Self { suite, key, salt }
    }

    /// Plain RTP, no keying material.
    pub fn none() -> Self {
        Self::new(CryptoSuite::None, Vec::new(), Vec::new())
    }

    /// Split a concatenated `key || salt` buffer (30 bytes for the
    /// 128-bit suite). Returns `None` if the length does not match the suite.
    pub fn from_key_salt(suite: CryptoSuite, key_salt: &[u8]) -> Option<Self> {
        if suite == CryptoSuite::None {
            return Some(Self::none());
        }
        let key_len = suite.key_len();
        if key_salt.len() != key_len + SALT_LEN {
            return None;
        }
        Some(Self::new(
            suite,
            key_salt[..key_len].to_vec(),
            key_salt[key_len..].to_vec(),
        ))
    }

    /// Concatenated master key and salt.
    pub fn key_salt(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.key.len() + self.salt.len());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.salt);
        buf
    }

    /// Base64 `key || salt`, as used by `inline:` in SDP and by
    /// `-srtp_out_params`.
    pub fn inline(&self) -> String {
        BASE64_STANDARD.encode(self.key_salt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_128_bit_key_salt() {
        let buf: Vec<u8> = (0u8..30).collect();
        let params = SrtpParams::from_key_salt(CryptoSuite::AesCm128HmacSha1_80, &buf).unwrap();
        assert_eq!(params.key.len(), 16);
        assert_eq!(params.salt.len(), 14);
        assert_eq!(params.key_salt(), buf);
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(SrtpParams::from_key_salt(CryptoSuite::AesCm128HmacSha1_80, &[0; 29]).is_none());
        assert!(SrtpParams::from_key_salt(CryptoSuite::Aes256CmHmacSha1_80, &[0; 30]).is_none());
    }

    #[test]
    fn inline_is_base64_of_key_and_salt() {
        let params = SrtpParams::new(
            CryptoSuite::AesCm128HmacSha1_80,
            vec![0u8; 16],
            vec![0u8; 14],
        );
        assert_eq!(params.inline(), "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
    }

    #[test]
    fn none_suite_has_no_name() {
        assert_eq!(SrtpParams::none().suite.name(), None);
        assert_eq!(CryptoSuite::None.name(), None);
        assert_eq!(
            CryptoSuite::AesCm128HmacSha1_80.name(),
            Some("AES_CM_128_HMAC_SHA1_80")
        );
    }
}
