// Symmetric and asymmetric crypto contracts external to FileZap's CORE (§6):
// AES-256-GCM for file/chunk content, RSA-OAEP/SHA-256 for wrapping key shares
// to their holder. Chunk hashing (SHA-256) lives here too since it underlies
// both the chunk content address and the chunk format envelope.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{FileZapError, FileZapResult};

/// Length in bytes of a FileZap symmetric file key (AES-256).
pub const FILE_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Chunk format-version tag. The wire format (§3) is `[version_byte, ...payload]`.
pub const CHUNK_FORMAT_VERSION: u8 = 1;

/// Generate a fresh random AES-256 file key.
pub fn generate_file_key() -> [u8; FILE_KEY_LEN] {
    let mut key = [0u8; FILE_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Encrypt `plaintext` under `key` with AES-256-GCM. The output is
/// `nonce(12) || ciphertext`, matching the external symmetric-crypto contract.
pub fn aes_encrypt(key: &[u8; FILE_KEY_LEN], plaintext: &[u8]) -> FileZapResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| FileZapError::DecryptFailed("AES-GCM encryption failed".to_string()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt bytes produced by [`aes_encrypt`].
pub fn aes_decrypt(key: &[u8; FILE_KEY_LEN], framed: &[u8]) -> FileZapResult<Vec<u8>> {
    if framed.len() < NONCE_LEN {
        return Err(FileZapError::DecryptFailed("ciphertext shorter than nonce".to_string()));
    }
    let (nonce_bytes, ciphertext) = framed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| FileZapError::DecryptFailed("AES-GCM decryption failed".to_string()))
}

/// SHA-256, hex-encoded: the chunk content address.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

/// Wrap a chunk's encrypted payload with the format-version envelope (§3).
pub fn format_chunk(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(CHUNK_FORMAT_VERSION);
    out.extend_from_slice(payload);
    out
}

/// Strip the format envelope, returning the payload. Callers that need the
/// malformed/short cases classified rather than erroring should go through
/// `chunk_validator::validate` instead of this helper.
pub fn chunk_payload(bytes: &[u8]) -> FileZapResult<&[u8]> {
    if bytes.len() < 5 || bytes[0] != CHUNK_FORMAT_VERSION {
        return Err(FileZapError::ContentMalformed(format!(
            "expected version byte {CHUNK_FORMAT_VERSION}, got {} bytes",
            bytes.len()
        )));
    }
    Ok(&bytes[1..])
}

/// Encrypt a key share under a holder's RSA-2048 public key (OAEP/SHA-256).
pub fn rsa_encrypt_share(public_key: &RsaPublicKey, share_bytes: &[u8]) -> FileZapResult<Vec<u8>> {
    let padding = Oaep::new::<Sha256>();
    public_key
        .encrypt(&mut rand::thread_rng(), padding, share_bytes)
        .map_err(FileZapError::from)
}

/// Decrypt a share previously wrapped with [`rsa_encrypt_share`].
pub fn rsa_decrypt_share(private_key: &RsaPrivateKey, ciphertext: &[u8]) -> FileZapResult<Vec<u8>> {
    let padding = Oaep::new::<Sha256>();
    private_key
        .decrypt(padding, ciphertext)
        .map_err(FileZapError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15;
    use rsa::rand_core::OsRng;

    #[test]
    fn aes_round_trips_arbitrary_messages() {
        let key = generate_file_key();
        for msg in [&b""[..], b"x", &vec![7u8; 5 * 1024 * 1024]] {
            let ct = aes_encrypt(&key, msg).unwrap();
            let pt = aes_decrypt(&key, &ct).unwrap();
            assert_eq!(pt, msg);
        }
    }

    #[test]
    fn aes_decrypt_fails_on_tampered_ciphertext() {
        let key = generate_file_key();
        let mut ct = aes_encrypt(&key, b"hello").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        assert!(aes_decrypt(&key, &ct).is_err());
    }

    #[test]
    fn chunk_envelope_round_trips() {
        let payload = b"encrypted-bytes-here";
        let framed = format_chunk(payload);
        assert_eq!(chunk_payload(&framed).unwrap(), payload);
    }

    #[test]
    fn chunk_payload_rejects_short_or_wrong_version() {
        assert!(chunk_payload(&[1, 2, 3]).is_err());
        assert!(chunk_payload(&[2, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn rsa_share_round_trips() {
        let _ = pkcs1v15::Pkcs1v15Encrypt; // ensure rsa padding modules link in test build
        let priv_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let pub_key = RsaPublicKey::from(&priv_key);
        let share = generate_file_key();
        let ct = rsa_encrypt_share(&pub_key, &share).unwrap();
        let pt = rsa_decrypt_share(&priv_key, &ct).unwrap();
        assert_eq!(pt, share);
    }
}
