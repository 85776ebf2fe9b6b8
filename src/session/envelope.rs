//! Encrypted message envelopes.

use serde::{Deserialize, Serialize};

use crate::crypto::{CipherEngine, EncryptedPayload, SessionKey, NONCE_SIZE, TAG_SIZE};
use crate::encoding::b64;
use crate::error::Result;

/// A message encrypted under one session-key epoch
///
/// `session_id` names the epoch, so the receiver can find the right key
/// even after the conversation moved on to a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMessage {
    /// Epoch whose key encrypted this message
    pub session_id: String,
    /// Conversation the message belongs to
    pub conversation_id: String,
    /// AEAD nonce
    #[serde(with = "b64")]
    pub nonce: [u8; NONCE_SIZE],
    /// AEAD tag
    #[serde(with = "b64")]
    pub tag: [u8; TAG_SIZE],
    /// Encrypted message body
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

impl EncryptedMessage {
    /// Encrypt `plaintext` for a session epoch
    ///
    /// The conversation and session ids are bound into the AEAD, so an
    /// envelope cannot be relabeled to another epoch.
    pub fn seal(
        engine: &CipherEngine,
        key: &SessionKey,
        conversation_id: &str,
        session_id: &str,
        plaintext: &[u8],
    ) -> Result<Self> {
        let context = message_context(conversation_id, session_id);
        let EncryptedPayload { ciphertext, nonce, tag } =
            engine.encrypt_with_context(plaintext, key.as_bytes(), &context)?;

        Ok(Self {
            session_id: session_id.to_string(),
            conversation_id: conversation_id.to_string(),
            nonce,
            tag,
            ciphertext,
        })
    }

    /// Decrypt with the epoch's session key
    pub fn open(&self, engine: &CipherEngine, key: &SessionKey) -> Result<Vec<u8>> {
        let context = message_context(&self.conversation_id, &self.session_id);
        engine.decrypt_with_context(&self.ciphertext, key.as_bytes(), &self.nonce, &self.tag, &context)
    }
}

fn message_context(conversation_id: &str, session_id: &str) -> Vec<u8> {
    format!("msg|{}|{}", conversation_id, session_id).into_bytes()
}
