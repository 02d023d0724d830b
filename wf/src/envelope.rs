//! Message envelope and payload registry
//!
//! Every stream message is JSON with a `{domain, category, version}`
//! discriminator, a `source` identifier, and a typed payload. Workers
//! unwrap the envelope, switch on the discriminator, and build the typed
//! payload through a registered factory.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// A typed payload carried by an envelope
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const DOMAIN: &'static str;
    const CATEGORY: &'static str;
    const VERSION: &'static str;

    /// Schema-level validation beyond what serde enforces.
    /// Failing validation poisons the message (acked, never retried).
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Envelope decoding errors
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("no factory registered for {domain}/{category}/v{version}")]
    Unknown {
        domain: String,
        category: String,
        version: String,
    },

    #[error("payload failed validation: {0}")]
    Invalid(String),
}

/// The wire form of every stream message
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Envelope {
    pub domain: String,
    pub category: String,
    pub version: String,

    /// Identifier of the publishing component
    pub source: String,

    pub payload: Value,
}

impl Envelope {
    /// Wrap a typed payload
    pub fn new<P: Payload>(source: impl Into<String>, payload: &P) -> Result<Self, serde_json::Error> {
        Ok(Self {
            domain: P::DOMAIN.to_string(),
            category: P::CATEGORY.to_string(),
            version: P::VERSION.to_string(),
            source: source.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Parse an envelope from raw message bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Whether this envelope carries payload type `P`
    pub fn is<P: Payload>(&self) -> bool {
        self.domain == P::DOMAIN && self.category == P::CATEGORY && self.version == P::VERSION
    }

    /// Decode and validate the payload as `P`
    pub fn decode<P: Payload>(&self) -> Result<P, EnvelopeError> {
        if !self.is::<P>() {
            return Err(EnvelopeError::Unknown {
                domain: self.domain.clone(),
                category: self.category.clone(),
                version: self.version.clone(),
            });
        }
        let payload: P = serde_json::from_value(self.payload.clone())
            .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        payload.validate().map_err(EnvelopeError::Invalid)?;
        Ok(payload)
    }
}

type Factory = Arc<dyn Fn(&Value) -> Result<Box<dyn Any + Send>, EnvelopeError> + Send + Sync>;

/// Maps `(domain, category, version)` onto payload factories
#[derive(Default, Clone)]
pub struct PayloadRegistry {
    factories: HashMap<(String, String, String), Factory>,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payload type's factory
    pub fn register<P: Payload>(&mut self) {
        let key = (
            P::DOMAIN.to_string(),
            P::CATEGORY.to_string(),
            P::VERSION.to_string(),
        );
        self.factories.insert(
            key,
            Arc::new(|value: &Value| {
                let payload: P = serde_json::from_value(value.clone())
                    .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
                payload.validate().map_err(EnvelopeError::Invalid)?;
                Ok(Box::new(payload) as Box<dyn Any + Send>)
            }),
        );
    }

    /// Build the typed payload for an envelope
    pub fn decode(&self, envelope: &Envelope) -> Result<Box<dyn Any + Send>, EnvelopeError> {
        let key = (
            envelope.domain.clone(),
            envelope.category.clone(),
            envelope.version.clone(),
        );
        let factory = self.factories.get(&key).ok_or_else(|| EnvelopeError::Unknown {
            domain: envelope.domain.clone(),
            category: envelope.category.clone(),
            version: envelope.version.clone(),
        })?;
        factory(&envelope.payload)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
