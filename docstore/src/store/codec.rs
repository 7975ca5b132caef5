use crate::collection::Document;
use crate::common::{EncryptionKey, Value, CIPHERTEXT_FIELD, DOC_ID, IV_FIELD};
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

const NONCE_SIZE: usize = 12;

/// Converts documents to and from the text stored in the `data` column.
///
/// `Plain` stores the document as JSON. `Encrypted` keeps `_id` in clear text
/// and stores the remaining fields as AES-256-GCM ciphertext:
///
/// ```text
/// {"_id": "...", "ciphertext": "<base64>", "iv": "<base64>"}
/// ```
///
/// Decoding never fails loudly. A row that cannot be parsed or decrypted with
/// the configured key decodes to `None` and callers treat it as absent.
///
/// `Locked` stands for an encrypted collection whose key was not supplied:
/// nothing decodes and nothing can be written.
#[derive(Clone, Debug)]
pub enum DocumentCodec {
    Plain,
    Encrypted(EncryptionKey),
    Locked,
}

impl DocumentCodec {
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, DocumentCodec::Plain)
    }

    pub fn encode(&self, document: &Document) -> DocStoreResult<String> {
        match self {
            DocumentCodec::Plain => document.to_json_string(),
            DocumentCodec::Encrypted(key) => encrypt(key, document),
            DocumentCodec::Locked => {
                log::error!("Cannot write to an encrypted collection without its key");
                Err(DocStoreError::new(
                    "Cannot write to an encrypted collection without its key",
                    ErrorKind::SecurityError,
                ))
            }
        }
    }

    pub fn decode(&self, raw: &str) -> Option<Document> {
        match self {
            DocumentCodec::Plain => match Document::from_json_str(raw) {
                Ok(document) => Some(document),
                Err(err) => {
                    log::warn!("Skipping undecodable document: {}", err);
                    None
                }
            },
            DocumentCodec::Encrypted(key) => decrypt(key, raw),
            DocumentCodec::Locked => None,
        }
    }
}

fn cipher_for(key: &EncryptionKey) -> DocStoreResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(&key.derive()).map_err(|err| {
        log::error!("Failed to initialize cipher: {}", err);
        DocStoreError::new(
            &format!("Failed to initialize cipher: {}", err),
            ErrorKind::SecurityError,
        )
    })
}

fn encrypt(key: &EncryptionKey, document: &Document) -> DocStoreResult<String> {
    let id = match document.id() {
        Some(id) => id.to_string(),
        None => {
            log::error!("Encrypted documents require a string _id");
            return Err(DocStoreError::new(
                "Encrypted documents require a string _id",
                ErrorKind::InvalidId,
            ));
        }
    };

    let mut body = document.clone();
    body.remove(DOC_ID);
    let plaintext = body.to_json_string()?;

    let nonce_bytes: [u8; NONCE_SIZE] = rand::random();
    let cipher = cipher_for(key)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|_| {
            log::error!("Failed to encrypt document {}", id);
            DocStoreError::new(
                &format!("Failed to encrypt document {}", id),
                ErrorKind::SecurityError,
            )
        })?;

    let mut record = Document::new();
    record.insert_raw(DOC_ID, id);
    record.insert_raw(CIPHERTEXT_FIELD, BASE64.encode(ciphertext));
    record.insert_raw(IV_FIELD, BASE64.encode(nonce_bytes));
    record.to_json_string()
}

fn decrypt(key: &EncryptionKey, raw: &str) -> Option<Document> {
    let record = Document::from_json_str(raw).ok()?;
    let id = record.get(DOC_ID);
    let ciphertext = BASE64.decode(record.get_ref(CIPHERTEXT_FIELD)?.as_str()?).ok()?;
    let iv = BASE64.decode(record.get_ref(IV_FIELD)?.as_str()?).ok()?;
    if iv.len() != NONCE_SIZE {
        return None;
    }

    let cipher = cipher_for(key).ok()?;
    let plaintext = match cipher.decrypt(Nonce::from_slice(&iv), ciphertext.as_ref()) {
        Ok(plaintext) => plaintext,
        Err(_) => {
            log::debug!("Document {} cannot be decrypted with the configured key", id);
            return None;
        }
    };
    let body = Document::from_json_str(std::str::from_utf8(&plaintext).ok()?).ok()?;

    let mut document = Document::new();
    if !matches!(id, Value::Null) {
        document.insert_raw(DOC_ID, id);
    }
    for (field, value) in body {
        document.insert_raw(field, value);
    }
    Some(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    const KEY_A: &str = "v8#Lq2!rTz9@Wm4$Kp7&Xn1*Bc6^Hd3%";
    const KEY_B: &str = "Q7$mZ1!pX4@kR9#tW2^nL6&cV3*hJ8%b";

    fn encrypted(secret: &str) -> DocumentCodec {
        DocumentCodec::Encrypted(EncryptionKey::new(secret).unwrap())
    }

    #[test]
    fn plain_round_trip() {
        let codec = DocumentCodec::Plain;
        let document = doc! { "_id": "a1", "name": "Ann", "tags": ["x", "y"], "nested": { "n": 1.5 } };
        let raw = codec.encode(&document).unwrap();
        assert_eq!(codec.decode(&raw), Some(document));
    }

    #[test]
    fn plain_garbage_is_undecodable() {
        assert_eq!(DocumentCodec::Plain.decode("not json"), None);
        assert_eq!(DocumentCodec::Plain.decode("[1,2]"), None);
    }

    #[test]
    fn encrypted_round_trip() {
        let codec = encrypted(KEY_A);
        let document = doc! { "_id": "u1", "email": "ann@example.com", "age": 30 };
        let raw = codec.encode(&document).unwrap();
        assert!(!raw.contains("ann@example.com"));
        assert_eq!(codec.decode(&raw), Some(document));
    }

    #[test]
    fn encrypted_record_shape() {
        let codec = encrypted(KEY_A);
        let raw = codec.encode(&doc! { "_id": "u1", "secret": "x" }).unwrap();
        let record = Document::from_json_str(&raw).unwrap();
        assert_eq!(record.id(), Some("u1"));
        assert!(record.get(CIPHERTEXT_FIELD).is_string());
        assert!(record.get(IV_FIELD).is_string());
        assert_eq!(record.size(), 3);
    }

    #[test]
    fn wrong_key_is_undecodable() {
        let raw = encrypted(KEY_A).encode(&doc! { "_id": "u1", "a": 1 }).unwrap();
        assert_eq!(encrypted(KEY_B).decode(&raw), None);
    }

    #[test]
    fn fresh_iv_per_write() {
        let codec = encrypted(KEY_A);
        let document = doc! { "_id": "u1", "a": 1 };
        assert_ne!(codec.encode(&document).unwrap(), codec.encode(&document).unwrap());
    }

    #[test]
    fn encrypted_requires_id() {
        let err = encrypted(KEY_A).encode(&doc! { "a": 1 }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidId);
    }

    #[test]
    fn locked_codec_reads_and_writes_nothing() {
        let raw = encrypted(KEY_A).encode(&doc! { "_id": "u1", "a": 1 }).unwrap();
        assert!(DocumentCodec::Locked.is_encrypted());
        assert_eq!(DocumentCodec::Locked.decode(&raw), None);
        let err = DocumentCodec::Locked.encode(&doc! { "_id": "u2" }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::SecurityError);
    }

    #[test]
    fn plain_row_is_undecodable_under_encryption() {
        let raw = DocumentCodec::Plain.encode(&doc! { "_id": "u1", "a": 1 }).unwrap();
        assert_eq!(encrypted(KEY_A).decode(&raw), None);
    }
}
