//! # Webhook Verification
//!
//! GitHub deliveries are signed with HMAC-SHA256 over the raw body; GitLab,
//! the message-bus relay and Testing Farm send a shared token. Every
//! comparison is constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::{ApiError, unauthorized};

type HmacSha256 = Hmac<Sha256>;

pub const GITHUB_SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const GITLAB_TOKEN_HEADER: &str = "X-Gitlab-Token";

/// Errors that can occur during webhook verification
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Missing required signature header: {header}")]
    MissingSignature { header: String },

    #[error("Invalid signature format: {header}")]
    InvalidSignatureFormat { header: String },

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Webhook verification not configured for: {source_name}")]
    NotConfigured { source_name: String },
}

impl From<VerificationError> for ApiError {
    fn from(err: VerificationError) -> Self {
        unauthorized(Some(&err.to_string()))
    }
}

/// Result type for webhook verification
pub type VerificationResult<T> = Result<T, VerificationError>;

/// Verifies GitHub webhook signature using HMAC-SHA256
pub fn verify_github_signature(
    body: &[u8],
    signature_header: &str,
    secret: &str,
) -> VerificationResult<()> {
    debug!(
        body_size = body.len(),
        "Starting GitHub signature verification"
    );

    if signature_header.is_empty() {
        return Err(VerificationError::MissingSignature {
            header: GITHUB_SIGNATURE_HEADER.to_string(),
        });
    }

    let Some(provided_hex) = signature_header.strip_prefix("sha256=") else {
        return Err(VerificationError::InvalidSignatureFormat {
            header: format!("{GITHUB_SIGNATURE_HEADER} must start with 'sha256='"),
        });
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    let provided =
        hex::decode(provided_hex).map_err(|_| VerificationError::InvalidSignatureFormat {
            header: format!("{GITHUB_SIGNATURE_HEADER} contains invalid hex"),
        })?;

    if expected.as_slice().ct_eq(&provided[..]).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Compares a shared token in constant time.
pub fn verify_shared_token(
    provided: Option<&str>,
    expected: &str,
    header: &str,
) -> VerificationResult<()> {
    let provided = provided
        .filter(|token| !token.is_empty())
        .ok_or_else(|| VerificationError::MissingSignature {
            header: header.to_string(),
        })?;
    if provided.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(body: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn github_signature_verification_success() {
        let body = br#"{"zen":"Keep it logically awesome."}"#;
        let header = sign(body, "s3cret");
        assert_eq!(verify_github_signature(body, &header, "s3cret"), Ok(()));
    }

    #[test]
    fn github_signature_verification_rejects_other_secret() {
        let body = br#"{"action":"opened"}"#;
        let header = sign(body, "other");
        assert_eq!(
            verify_github_signature(body, &header, "s3cret"),
            Err(VerificationError::VerificationFailed)
        );
    }

    #[test]
    fn github_signature_requires_prefix_and_hex() {
        assert!(matches!(
            verify_github_signature(b"{}", "abcdef", "s3cret"),
            Err(VerificationError::InvalidSignatureFormat { .. })
        ));
        assert!(matches!(
            verify_github_signature(b"{}", "sha256=zz", "s3cret"),
            Err(VerificationError::InvalidSignatureFormat { .. })
        ));
        assert!(matches!(
            verify_github_signature(b"{}", "", "s3cret"),
            Err(VerificationError::MissingSignature { .. })
        ));
    }

    #[test]
    fn shared_token_must_match_exactly() {
        assert_eq!(verify_shared_token(Some("t0ken"), "t0ken", GITLAB_TOKEN_HEADER), Ok(()));
        assert_eq!(
            verify_shared_token(Some("t0ke"), "t0ken", GITLAB_TOKEN_HEADER),
            Err(VerificationError::VerificationFailed)
        );
        assert!(matches!(
            verify_shared_token(None, "t0ken", GITLAB_TOKEN_HEADER),
            Err(VerificationError::MissingSignature { .. })
        ));
    }
}
