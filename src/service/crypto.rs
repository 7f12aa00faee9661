use std::collections::HashMap;

use aes::Aes256;
use base64::engine::general_purpose;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::Hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha512;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::{DecryptedPasteData, StoredContent};

/// Format tag written next to every sealed payload.
pub const ENCRYPTION_VERSION: u32 = 3;
pub const KDF_ITERATIONS: u32 = 100_000;
pub const SALT_LEN: usize = 32;
pub const IV_LEN: usize = 16;
const KEY_LEN: usize = 32;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("missing encryption key")]
    MissingKey,
    #[error("invalid encryption key")]
    InvalidKey,
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

/// Ciphertext plus the public parameters needed to reverse it, all base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
}

pub fn seal<T: Serialize>(payload: &T, passphrase: &str) -> Result<SealedPayload, CryptoError> {
    let plaintext = Zeroizing::new(
        serde_json::to_vec(payload).map_err(|e| CryptoError::Encode(e.to_string()))?,
    );

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let key = derive_key(passphrase, &salt)?;
    let cipher = Aes256CbcEnc::new_from_slices(key.as_ref(), &iv)
        .map_err(|_| CryptoError::Encode("failed to initialise cipher".into()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

    log::debug!(
        "sealed {} byte payload into {} bytes",
        plaintext.len(),
        ciphertext.len()
    );

    Ok(SealedPayload {
        ciphertext: general_purpose::STANDARD.encode(ciphertext),
        iv: general_purpose::STANDARD.encode(iv),
        salt: general_purpose::STANDARD.encode(salt),
    })
}

/// Any failure past this point (bad base64, padding, JSON) means the passphrase did not match.
pub fn unseal<T: DeserializeOwned>(
    sealed: &SealedPayload,
    passphrase: &str,
) -> Result<T, CryptoError> {
    let salt = general_purpose::STANDARD
        .decode(&sealed.salt)
        .map_err(|_| CryptoError::InvalidKey)?;
    let iv = general_purpose::STANDARD
        .decode(&sealed.iv)
        .map_err(|_| CryptoError::InvalidKey)?;
    let ciphertext = general_purpose::STANDARD
        .decode(&sealed.ciphertext)
        .map_err(|_| CryptoError::InvalidKey)?;

    let key = derive_key(passphrase, &salt)?;
    let cipher =
        Aes256CbcDec::new_from_slices(key.as_ref(), &iv).map_err(|_| CryptoError::InvalidKey)?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CryptoError::InvalidKey)?,
    );

    serde_json::from_slice(&plaintext).map_err(|_| CryptoError::InvalidKey)
}

/// Seals pasties and history into the encrypted storage variant.
pub fn seal_content(
    data: &DecryptedPasteData,
    passphrase: &str,
) -> Result<StoredContent, CryptoError> {
    let sealed = seal(data, passphrase)?;
    Ok(StoredContent::Encrypted {
        encrypted_data: sealed.ciphertext,
        iv: sealed.iv,
        salt: sealed.salt,
        encryption_version: ENCRYPTION_VERSION,
    })
}

/// Plain content passes through; encrypted content needs the passphrase.
pub fn unseal_content(
    content: &StoredContent,
    passphrase: Option<&str>,
) -> Result<DecryptedPasteData, CryptoError> {
    match content {
        StoredContent::Plain { pasties, history } => Ok(DecryptedPasteData {
            pasties: pasties.clone(),
            history: history.clone(),
        }),
        StoredContent::Encrypted {
            encrypted_data,
            iv,
            salt,
            encryption_version,
        } => {
            let passphrase = passphrase
                .filter(|p| !p.is_empty())
                .ok_or(CryptoError::MissingKey)?;
            if *encryption_version != ENCRYPTION_VERSION {
                log::warn!("unsealing payload with encryption version {encryption_version}");
            }
            let sealed = SealedPayload {
                ciphertext: encrypted_data.clone(),
                iv: iv.clone(),
                salt: salt.clone(),
            };
            unseal(&sealed, passphrase)
        }
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2::<Hmac<Sha512>>(passphrase.as_bytes(), salt, KDF_ITERATIONS, key.as_mut())
        .map_err(|_| CryptoError::InvalidKey)?;
    Ok(key)
}

/// Passphrases available to one request: an explicit one, plus any remembered per paste.
#[derive(Debug, Clone, Default)]
pub struct EncryptionKeys {
    request_key: Option<String>,
    paste_keys: HashMap<String, String>,
}

impl EncryptionKeys {
    pub fn new(request_key: Option<String>) -> Self {
        Self {
            request_key: request_key.filter(|k| !k.is_empty()),
            paste_keys: HashMap::new(),
        }
    }

    pub fn remember(&mut self, paste_id: impl Into<String>, passphrase: impl Into<String>) {
        self.paste_keys.insert(paste_id.into(), passphrase.into());
    }

    /// The request key wins over a remembered one.
    pub fn for_paste(&self, paste_id: &str) -> Option<&str> {
        self.request_key
            .as_deref()
            .or_else(|| self.paste_keys.get(paste_id).map(String::as_str))
    }
}
