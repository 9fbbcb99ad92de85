//! Tamper detection for batch payloads.
//!
//! A sealed payload is `hex(HMAC-SHA256(install key, plaintext))` followed
//! by the standard base64 encoding of the plaintext. Opening recomputes the
//! tag and refuses anything that does not verify.
//!
//! This detects tampering by the storage provider but does not hide the
//! contents: base64 is an encoding, not encryption.

use std::fs;
use std::io;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use thiserror::Error;

use crate::fs_atomic::write_private;

type HmacSha256 = Hmac<Sha256>;

/// Length of the hex-encoded tag prefix.
const TAG_HEX_LEN: usize = 64;
const KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum CodecError {
    /// The sealed payload failed verification.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Invalid install key: {0}")]
    InvalidKey(String),

    #[error("I/O error for install key: {0}")]
    Io(#[from] io::Error),
}

/// Per-install symmetric key used to tag batch payloads.
#[derive(Clone)]
pub struct InstallKey([u8; KEY_LEN]);

impl InstallKey {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rng().fill(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parses a hex-encoded key, as shown by [`InstallKey::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(s.trim()).map_err(|e| CodecError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            CodecError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, b.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Hex form used in the key file and for copying the key to another device.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Loads the key stored at `path`, creating it on first use.
    ///
    /// The file holds the hex-encoded key and is readable by the owner only.
    pub fn load_or_generate(path: &Path) -> Result<Self, CodecError> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_hex(&contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let key = Self::generate();
                key.save(path)?;
                Ok(key)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the key to `path`, replacing any previous key.
    pub fn save(&self, path: &Path) -> Result<(), CodecError> {
        write_private(path, self.to_hex().as_bytes())?;
        Ok(())
    }

    fn mac(&self) -> Result<HmacSha256, CodecError> {
        HmacSha256::new_from_slice(&self.0).map_err(|e| CodecError::InvalidKey(e.to_string()))
    }
}

impl std::fmt::Debug for InstallKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InstallKey(..)")
    }
}

/// Seals and opens batch payloads. Passthrough when built without a key.
#[derive(Debug, Clone)]
pub struct EncryptionCodec {
    key: Option<InstallKey>,
}

impl EncryptionCodec {
    pub fn new(key: Option<InstallKey>) -> Self {
        Self { key }
    }

    /// A codec that leaves payloads untouched.
    pub fn disabled() -> Self {
        Self { key: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_vec());
        };

        let mut mac = key.mac()?;
        mac.update(plaintext);
        let tag = hex::encode(mac.finalize().into_bytes());

        let mut sealed = tag.into_bytes();
        sealed.extend_from_slice(STANDARD.encode(plaintext).as_bytes());
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
        let Some(key) = &self.key else {
            return Ok(sealed.to_vec());
        };

        if sealed.len() < TAG_HEX_LEN {
            return Err(CodecError::Integrity("sealed payload too short".to_string()));
        }
        let (tag_hex, body) = sealed.split_at(TAG_HEX_LEN);

        // Sealing writes lowercase hex only
        if !tag_hex.iter().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(CodecError::Integrity("malformed tag".to_string()));
        }
        let tag = hex::decode(tag_hex)
            .map_err(|_| CodecError::Integrity("malformed tag".to_string()))?;
        let plaintext = STANDARD
            .decode(body)
            .map_err(|_| CodecError::Integrity("malformed body".to_string()))?;

        let mut mac = key.mac()?;
        mac.update(&plaintext);
        mac.verify_slice(&tag)
            .map_err(|_| CodecError::Integrity("tag mismatch".to_string()))?;

        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn codec() -> EncryptionCodec {
        EncryptionCodec::new(Some(InstallKey::generate()))
    }

    #[test]
    fn test_open_returns_sealed_plaintext() {
        let codec = codec();
        let plaintext = br#"{"changes":[{"id":1}]}"#;

        let sealed = codec.seal(plaintext).unwrap();
        assert_ne!(sealed, plaintext.to_vec());
        assert_eq!(codec.open(&sealed).unwrap(), plaintext.to_vec());
    }

    #[test]
    fn test_empty_plaintext() {
        let codec = codec();
        let sealed = codec.seal(b"").unwrap();
        assert_eq!(sealed.len(), TAG_HEX_LEN);
        assert!(codec.open(&sealed).unwrap().is_empty());
    }

    #[test]
    fn test_any_flipped_byte_is_rejected() {
        let codec = codec();
        let sealed = codec.seal(b"transfer 100.00 to savings").unwrap();

        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x01;
            assert!(
                matches!(codec.open(&tampered), Err(CodecError::Integrity(_))),
                "flipping byte {} was not detected",
                i
            );
        }
    }

    #[test]
    fn test_case_changed_letter_is_rejected() {
        let codec = codec();
        let sealed = codec.seal(b"groceries 42.17").unwrap();
        assert!(sealed[..TAG_HEX_LEN].iter().any(u8::is_ascii_lowercase));

        for (i, byte) in sealed.iter().enumerate() {
            if !byte.is_ascii_alphabetic() {
                continue;
            }
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x20;
            assert!(
                matches!(codec.open(&tampered), Err(CodecError::Integrity(_))),
                "changing the case of byte {} was not detected",
                i
            );
        }
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let codec = codec();
        let sealed = codec.seal(b"abc").unwrap();
        assert!(codec.open(&sealed[..10]).is_err());
        assert!(codec.open(&sealed[..sealed.len() - 1]).is_err());
    }

    #[test]
    fn test_other_install_key_is_rejected() {
        let sealed = codec().seal(b"secret ledger").unwrap();
        assert!(matches!(codec().open(&sealed), Err(CodecError::Integrity(_))));
    }

    #[test]
    fn test_disabled_codec_is_passthrough() {
        let codec = EncryptionCodec::disabled();
        assert!(!codec.is_enabled());
        assert_eq!(codec.seal(b"plain").unwrap(), b"plain".to_vec());
        assert_eq!(codec.open(b"plain").unwrap(), b"plain".to_vec());
    }

    #[test]
    fn test_install_key_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("keys").join("install.key");

        let first = InstallKey::load_or_generate(&path).unwrap();
        let second = InstallKey::load_or_generate(&path).unwrap();

        let sealed = EncryptionCodec::new(Some(first)).seal(b"x").unwrap();
        assert!(EncryptionCodec::new(Some(second)).open(&sealed).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_install_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("install.key");
        InstallKey::load_or_generate(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_imported_key_opens_exported_payloads() {
        let temp = TempDir::new().unwrap();
        let original = InstallKey::generate();
        let sealed = EncryptionCodec::new(Some(original.clone())).seal(b"x").unwrap();

        let path = temp.path().join("install.key");
        InstallKey::from_hex(&original.to_hex()).unwrap().save(&path).unwrap();
        let imported = InstallKey::load_or_generate(&path).unwrap();

        assert!(EncryptionCodec::new(Some(imported)).open(&sealed).is_ok());
        assert!(InstallKey::from_hex("zz").is_err());
    }

    #[test]
    fn test_corrupt_key_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("install.key");
        fs::write(&path, "abcd").unwrap();
        assert!(matches!(
            InstallKey::load_or_generate(&path),
            Err(CodecError::InvalidKey(_))
        ));
    }
}
