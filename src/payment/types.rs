//! Payment requirement and proof types, and their header encodings.

use crate::config::ProtocolVersion;
use crate::error::PaymentError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Base58 ledger address.
pub type Address = String;

/// Base58 transaction signature.
pub type Signature = String;

/// What a client must pay to get through the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequirement {
    /// Network identifier.
    pub network: String,
    /// Token mint.
    pub mint: Address,
    /// Exact decimal amount.
    pub amount: String,
    /// Wallet that must receive the tokens.
    pub recipient: Address,
    /// Single-use reference account binding the payment to this request.
    pub reference: Address,
    /// Seconds until the requirement lapses.
    pub expires_in: u64,
}

impl PaymentRequirement {
    /// Render the 402 body for the given protocol generation.
    #[must_use]
    pub fn to_response_body(&self, version: ProtocolVersion) -> Value {
        match version {
            ProtocolVersion::V1 => json!({
                "x402Version": 1,
                "scheme": "x402",
                "network": self.network,
                "mint": self.mint,
                "amount": self.amount,
                "recipient": self.recipient,
                "reference": self.reference,
                "expires_in": self.expires_in,
            }),
            ProtocolVersion::V2 => json!({
                "x402Version": 2,
                "paymentRequirements": [self],
            }),
        }
    }
}

/// Signed-transaction proof carried in the payment header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPayload {
    /// Network identifier.
    pub network: String,
    /// Base64 signed transaction.
    pub transaction: String,
    /// Reference the transaction pays for.
    pub reference: Address,
}

impl PaymentPayload {
    /// Decode from the header value.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::MalformedPayload`] if the value is not base64
    /// JSON of the expected shape, or any field is empty.
    pub fn decode(header: &str) -> Result<Self, PaymentError> {
        let payload: Self = decode_header(header)?;
        if payload.network.is_empty()
            || payload.transaction.is_empty()
            || payload.reference.is_empty()
        {
            return Err(PaymentError::MalformedPayload(
                "payload has empty fields".to_string(),
            ));
        }
        Ok(payload)
    }

    /// Encode as a header value.
    #[must_use]
    pub fn encode(&self) -> String {
        encode_header(self)
    }
}

/// Body of the success header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    /// Always `true` when emitted.
    pub success: bool,
    /// Settlement signature.
    pub transaction: Signature,
}

impl SettlementReceipt {
    /// Receipt for a settled signature.
    #[must_use]
    pub fn settled(signature: impl Into<Signature>) -> Self {
        Self {
            success: true,
            transaction: signature.into(),
        }
    }

    /// Encode as a header value.
    #[must_use]
    pub fn encode(&self) -> String {
        encode_header(self)
    }

    /// Decode from a header value.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::MalformedPayload`] on invalid input.
    pub fn decode(header: &str) -> Result<Self, PaymentError> {
        decode_header(header)
    }
}

/// Proof of payment extracted from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentProof {
    /// Bare reference; the client broadcast the transaction itself.
    Reference(Address),
    /// Signed transaction for the gate to settle.
    Signed(PaymentPayload),
}

impl PaymentProof {
    /// Reference named by the proof.
    #[must_use]
    pub fn reference(&self) -> &str {
        match self {
            Self::Reference(reference) => reference,
            Self::Signed(payload) => &payload.reference,
        }
    }
}

/// JSON, then base64.
fn encode_header<T: Serialize>(value: &T) -> String {
    // Serializing these plain structs cannot fail.
    let json = serde_json::to_vec(value).unwrap_or_default();
    BASE64.encode(json)
}

fn decode_header<T: DeserializeOwned>(header: &str) -> Result<T, PaymentError> {
    let bytes = BASE64
        .decode(header.trim())
        .map_err(|e| PaymentError::MalformedPayload(format!("invalid base64: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| PaymentError::MalformedPayload(format!("invalid JSON: {e}")))
}
