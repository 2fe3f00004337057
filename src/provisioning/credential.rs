//! Certificate/key pair used to authenticate the pub/sub session

use std::fmt;

/// An issued client certificate and its private key
///
/// Immutable once created; the keystore alias identifies it across runs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub certificate_id: String,
    /// Principal ARN the access policy is attached to
    pub certificate_arn: String,
    pub certificate_pem: Vec<u8>,
    pub private_key: Vec<u8>,
}

// Keep key material out of logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("certificate_id", &self.certificate_id)
            .field("certificate_arn", &self.certificate_arn)
            .field("certificate_pem", &format_args!("{} bytes", self.certificate_pem.len()))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_private_key() {
        let credential = Credential {
            certificate_id: "cert-1".into(),
            certificate_arn: "arn:aws:iot:us-east-1:123:cert/cert-1".into(),
            certificate_pem: b"-----BEGIN CERTIFICATE-----".to_vec(),
            private_key: b"super secret".to_vec(),
        };

        let rendered = format!("{:?}", credential);
        assert!(rendered.contains("cert-1"));
        assert!(!rendered.contains("super secret"));
    }
}
