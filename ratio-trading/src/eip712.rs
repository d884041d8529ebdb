//! EIP-712 typed data for the platform login challenge
//!
//! The challenge arrives as plain JSON (`domain`, `types`, `primaryType`,
//! `message`). The caller-facing type set never contains the `EIP712Domain`
//! declaration; signers derive it from the domain object themselves.

use alloy::dyn_abi::TypedData;
use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::SigningError;
use crate::types::Eip712Challenge;

/// Name of the implicit domain type
pub const EIP712_DOMAIN_TYPE: &str = "EIP712Domain";

/// Domain fields in canonical EIP-712 order with their types
const DOMAIN_FIELDS: [(&str, &str); 5] = [
    ("name", "string"),
    ("version", "string"),
    ("chainId", "uint256"),
    ("verifyingContract", "address"),
    ("salt", "bytes32"),
];

/// Structured data to be signed, with the domain type stripped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataRequest {
    pub domain: Value,
    pub types: Map<String, Value>,
    pub primary_type: String,
    pub message: Value,
}

impl TypedDataRequest {
    pub fn new(domain: Value, types: Map<String, Value>, primary_type: impl Into<String>, message: Value) -> Self {
        Self {
            domain,
            types: strip_domain_type(types),
            primary_type: primary_type.into(),
            message,
        }
    }

    /// Build the signing request for a login challenge
    pub fn from_challenge(challenge: &Eip712Challenge) -> Self {
        Self::new(
            challenge.domain.clone(),
            challenge.types.clone(),
            challenge.primary_type.clone(),
            challenge.message.clone(),
        )
    }

    /// Chain id declared by the domain, if any
    pub fn domain_chain_id(&self) -> Option<u64> {
        match self.domain.get("chainId")? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => match s.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            },
            _ => None,
        }
    }

    /// Full `eth_signTypedData_v4` payload, with `EIP712Domain` derived from the domain fields
    pub fn to_v4_payload(&self) -> Value {
        let domain_fields: Vec<Value> = DOMAIN_FIELDS
            .iter()
            .filter(|(name, _)| self.domain.get(*name).is_some_and(|v| !v.is_null()))
            .map(|(name, ty)| json!({ "name": name, "type": ty }))
            .collect();

        let mut types = Map::with_capacity(self.types.len() + 1);
        types.insert(EIP712_DOMAIN_TYPE.to_string(), Value::Array(domain_fields));
        for (name, fields) in &self.types {
            types.insert(name.clone(), fields.clone());
        }

        json!({
            "types": types,
            "primaryType": self.primary_type,
            "domain": self.domain,
            "message": self.message,
        })
    }

    /// EIP-712 signing hash (`keccak256(0x1901 ‖ domainSeparator ‖ hashStruct(message))`)
    pub fn signing_hash(&self) -> Result<B256, SigningError> {
        let mut payload = self.to_v4_payload();

        // Decimal chain ids parse unambiguously as hex strings
        if let Some(chain_id) = self.domain_chain_id() {
            payload["domain"]["chainId"] = Value::String(format!("0x{:x}", chain_id));
        }

        let typed: TypedData = serde_json::from_value(payload)
            .map_err(|e| SigningError::ProviderError(format!("Invalid typed data: {}", e)))?;

        typed
            .eip712_signing_hash()
            .map_err(|e| SigningError::ProviderError(format!("Failed to hash typed data: {}", e)))
    }
}

/// Remove the `EIP712Domain` declaration from a type set
pub fn strip_domain_type(mut types: Map<String, Value>) -> Map<String, Value> {
    types.remove(EIP712_DOMAIN_TYPE);
    types
}

/// `0x`-prefixed hex encoding of a 65-byte signature
pub fn signature_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
