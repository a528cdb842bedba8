//! Signature algorithms and verification for Kassa traffic.
//!
//! Header wire format, shared by every scheme below:
//!
//! ```text
//! Kassa-Signature: {unix_timestamp}.{base64_signature}
//! ```
//!
//! Schemes:
//!
//! * **Body signing** (outbound notifications):
//!   `HMAC-SHA256("{timestamp}.{json_body}", secret)`
//!
//! * **Protocol message signing** (counterparty threads):
//!   `Ed25519("{created_at}.{json(metadata, body)}")`
//!
//! * **Request signing** (counterparty reads):
//!   `Ed25519("{path_and_query}.{timestamp}")`

use crate::objects::protocol::{Message, MessageBody, MessageMetadata, PROTOCOL_VERSION};
use ring::signature::{ED25519, Ed25519KeyPair, KeyPair, UnparsedPublicKey};
use serde::Serialize;

/// Header name for all Kassa signatures.
pub const SIGNATURE_HEADER: &str = "Kassa-Signature";

/// Header naming the signing party on signed requests.
pub const SIGNER_HEADER: &str = "Kassa-Signer";

/// Maximum allowed age of a signature (in seconds).
pub const MAX_SIGNATURE_AGE: i64 = 5 * 60;

/// Marker trait for types that can participate in body signing via
/// [`SignedObject`].
pub trait Signature: for<'de> serde::Deserialize<'de> + serde::Serialize {}

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid header format")]
    InvalidFormat,
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature expired")]
    Expired,
    #[error("rejected key: {0}")]
    InvalidKey(String),
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

impl From<ring::error::KeyRejected> for SignatureError {
    fn from(e: ring::error::KeyRejected) -> Self {
        Self::InvalidKey(e.to_string())
    }
}

fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

// ---------------------------------------------------------------------------
// SignedObject: body signing
// ---------------------------------------------------------------------------

/// A signed body carrying its typed payload, timestamp, raw JSON, and
/// HMAC-SHA256 signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedObject<T: Signature> {
    pub body: T,
    pub timestamp: i64,
    pub json: String,
    pub signature: Box<[u8]>,
}

impl<T: Signature> SignedObject<T> {
    /// Serializes `body` to JSON and signs
    /// `HMAC-SHA256("{timestamp}.{json}", key)`.
    pub fn new(body: T, key: &[u8]) -> Result<Self, serde_json::Error> {
        let now = unix_now();
        let json = serde_json::to_string(&body)?;
        let data = format!("{now}.{json}");
        let signature = ring::hmac::sign(
            &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
            data.as_bytes(),
        );
        let signature = signature.as_ref().to_owned().into_boxed_slice();
        Ok(Self {
            body,
            timestamp: now,
            json,
            signature,
        })
    }

    /// Reconstruct a [`SignedObject`] from a raw `Kassa-Signature` header
    /// value and the JSON body. Does **not** verify; call
    /// [`verify`](Self::verify).
    pub fn from_header_and_body(
        header_value: &str,
        body_json: String,
    ) -> Result<Self, SignatureError> {
        let (timestamp, signature) = parse_signature_header(header_value)?;
        let body: T = serde_json::from_str(&body_json)?;
        Ok(Self {
            body,
            timestamp,
            json: body_json,
            signature,
        })
    }

    /// Verify the HMAC and timestamp freshness, returning the payload.
    pub fn verify(self, key: &[u8]) -> Result<T, SignatureError> {
        let data = format!("{}.{}", self.timestamp, self.json);
        ring::hmac::verify(
            &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
            data.as_bytes(),
            self.signature.as_ref(),
        )?;
        check_timestamp(self.timestamp)?;
        Ok(self.body)
    }

    /// Format the full `Kassa-Signature` header value.
    pub fn to_header(&self) -> String {
        format_signature_header(self.timestamp, &self.signature)
    }
}

// ---------------------------------------------------------------------------
// Header parsing / formatting
// ---------------------------------------------------------------------------

/// Parse a `{timestamp}.{base64}` header value.
pub fn parse_signature_header(value: &str) -> Result<(i64, Box<[u8]>), SignatureError> {
    let (timestamp, encoded) = value.split_once('.').ok_or(SignatureError::InvalidFormat)?;
    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidFormat)?;
    let signature_bytes = decode_base64(encoded)?.into_boxed_slice();
    Ok((timestamp, signature_bytes))
}

/// Format a `{timestamp}.{base64}` header value from its parts.
pub fn format_signature_header(timestamp: i64, signature: &[u8]) -> String {
    format!(
        "{}.{}",
        timestamp,
        fast32::base64::RFC4648_NOPAD.encode(signature)
    )
}

/// Decode base64 with or without trailing padding.
pub fn decode_base64(value: &str) -> Result<Vec<u8>, SignatureError> {
    fast32::base64::RFC4648_NOPAD
        .decode_str(value.trim().trim_end_matches('='))
        .map_err(|_| SignatureError::InvalidBase64)
}

/// Check that a signature timestamp is within [`MAX_SIGNATURE_AGE`].
pub fn check_timestamp(timestamp: i64) -> Result<(), SignatureError> {
    if (unix_now() - timestamp).abs() > MAX_SIGNATURE_AGE {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Protocol signing (Ed25519)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SigningPayload<'a> {
    metadata: &'a MessageMetadata,
    body: &'a MessageBody,
}

fn message_signing_input(
    metadata: &MessageMetadata,
    body: &MessageBody,
) -> Result<String, SignatureError> {
    let json = serde_json::to_string(&SigningPayload { metadata, body })?;
    Ok(format!("{}.{}", metadata.created_at, json))
}

/// Signs protocol messages and requests on behalf of one party.
pub struct ProtocolSigner {
    id: String,
    key_pair: Ed25519KeyPair,
}

impl std::fmt::Debug for ProtocolSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSigner")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl ProtocolSigner {
    /// Build a signer from a PKCS#8 v2 Ed25519 document.
    pub fn from_pkcs8(id: impl Into<String>, pkcs8: &[u8]) -> Result<Self, SignatureError> {
        Ok(Self {
            id: id.into(),
            key_pair: Ed25519KeyPair::from_pkcs8(pkcs8)?,
        })
    }

    /// Generate a fresh PKCS#8 document. Intended for provisioning and tests.
    pub fn generate_pkcs8() -> Result<Vec<u8>, SignatureError> {
        let rng = ring::rand::SystemRandom::new();
        Ok(Ed25519KeyPair::generate_pkcs8(&rng)?.as_ref().to_vec())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key(&self) -> &[u8] {
        self.key_pair.public_key().as_ref()
    }

    /// Sign `body` addressed to `to`, stamped with the current time.
    pub fn sign_message(
        &self,
        to: &str,
        exchange_id: Option<String>,
        body: MessageBody,
    ) -> Result<Message, SignatureError> {
        let metadata = MessageMetadata {
            from: self.id.clone(),
            to: to.to_owned(),
            exchange_id,
            protocol: PROTOCOL_VERSION.to_owned(),
            created_at: unix_now(),
        };
        let input = message_signing_input(&metadata, &body)?;
        let signature = self.key_pair.sign(input.as_bytes());
        Ok(Message {
            metadata,
            body,
            signature: fast32::base64::RFC4648_NOPAD.encode(signature.as_ref()),
        })
    }

    /// Sign a request target: `Ed25519("{path_and_query}.{timestamp}")`.
    ///
    /// Returns the formatted `Kassa-Signature` header value.
    pub fn sign_request(&self, path_and_query: &str) -> String {
        let timestamp = unix_now();
        let data = format!("{path_and_query}.{timestamp}");
        let sig = self.key_pair.sign(data.as_bytes());
        format_signature_header(timestamp, sig.as_ref())
    }
}

/// Verify a protocol message against the author's raw Ed25519 public key.
///
/// Freshness is not checked: thread messages are replayed verbatim on every
/// read and may be arbitrarily old.
pub fn verify_message(message: &Message, public_key: &[u8]) -> Result<(), SignatureError> {
    let signature = decode_base64(&message.signature)?;
    let input = message_signing_input(&message.metadata, &message.body)?;
    UnparsedPublicKey::new(&ED25519, public_key).verify(input.as_bytes(), &signature)?;
    Ok(())
}

/// Verify a signed request header for `path_and_query`.
pub fn verify_request(
    path_and_query: &str,
    header_value: &str,
    public_key: &[u8],
) -> Result<(), SignatureError> {
    let (timestamp, signature) = parse_signature_header(header_value)?;
    let data = format!("{path_and_query}.{timestamp}");
    UnparsedPublicKey::new(&ED25519, public_key).verify(data.as_bytes(), &signature)?;
    check_timestamp(timestamp)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::protocol::{Close, Rfq};
    use rust_decimal_macros::dec;

    fn signer(id: &str) -> ProtocolSigner {
        let pkcs8 = ProtocolSigner::generate_pkcs8().unwrap();
        ProtocolSigner::from_pkcs8(id, &pkcs8).unwrap()
    }

    fn rfq() -> MessageBody {
        MessageBody::Rfq(Rfq {
            offering_id: "off_1".into(),
            payin_amount: dec!(100),
            payin_currency: "USD".into(),
            payout_currency: "EUR".into(),
            client_reference: "hop-1".into(),
        })
    }

    #[test]
    fn signed_message_verifies_with_author_key() {
        let platform = signer("kassa");
        let message = platform.sign_message("pfi-a", None, rfq()).unwrap();
        assert_eq!(message.metadata.from, "kassa");
        assert!(verify_message(&message, platform.public_key()).is_ok());
    }

    #[test]
    fn message_from_other_key_is_rejected() {
        let platform = signer("kassa");
        let impostor = signer("kassa");
        let message = impostor.sign_message("pfi-a", None, rfq()).unwrap();
        assert!(matches!(
            verify_message(&message, platform.public_key()),
            Err(SignatureError::SignatureMismatch)
        ));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let counterparty = signer("pfi-a");
        let mut message = counterparty
            .sign_message(
                "kassa",
                Some("ex_1".into()),
                MessageBody::Close(Close {
                    reason: None,
                    success: false,
                }),
            )
            .unwrap();
        message.body = MessageBody::Close(Close {
            reason: None,
            success: true,
        });
        assert!(verify_message(&message, counterparty.public_key()).is_err());
    }

    #[test]
    fn request_signature_round_trip() {
        let platform = signer("kassa");
        let header = platform.sign_request("/exchanges?id=ex_1");
        assert!(verify_request("/exchanges?id=ex_1", &header, platform.public_key()).is_ok());
        assert!(verify_request("/exchanges?id=ex_2", &header, platform.public_key()).is_err());
    }

    #[test]
    fn hmac_body_signing() {
        #[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        struct Ping {
            n: u32,
        }
        impl Signature for Ping {}

        let signed = SignedObject::new(Ping { n: 7 }, b"secret").unwrap();
        let header = signed.to_header();
        let parsed = SignedObject::<Ping>::from_header_and_body(&header, signed.json.clone()).unwrap();
        assert_eq!(parsed.verify(b"secret").unwrap(), Ping { n: 7 });

        let parsed = SignedObject::<Ping>::from_header_and_body(&header, signed.json).unwrap();
        assert!(parsed.verify(b"other").is_err());
    }

    #[test]
    fn padded_base64_is_accepted() {
        let (ts, sig) = parse_signature_header("1700000000.AAE=").unwrap();
        assert_eq!(ts, 1_700_000_000);
        assert_eq!(&*sig, &[0u8, 1]);
    }
}
