// Key-Share Manager (C7): splits a file's symmetric key into N Shamir
// shares over GF(2^8) (see `gf256.rs`), assigns each share to a holder
// peer under that holder's RSA-2048 public key, and recombines a
// threshold-sized subset of shares back into the original key.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use libp2p::PeerId;
use rand::RngCore;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::crypto::{rsa_decrypt_share, rsa_encrypt_share, FILE_KEY_LEN};
use crate::error::{FileZapError, FileZapResult};
use crate::gf256;

/// One holder's assigned share: its 1-indexed polynomial evaluation point,
/// the RSA-encrypted share bytes, and the public key it was wrapped under.
struct Assignment {
    x: u8,
    encrypted_share: Vec<u8>,
}

struct FileShares {
    threshold: usize,
    assignments: HashMap<PeerId, Assignment>,
}

struct PendingRequest {
    client_pubkey: RsaPublicKey,
    registered_at: Instant,
}

struct Inner {
    files: HashMap<String, FileShares>,
    pending_requests: HashMap<(String, String), PendingRequest>,
}

pub struct KeyShareManager {
    inner: Mutex<Inner>,
    request_ttl: Duration,
}

impl KeyShareManager {
    pub fn new(request_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                files: HashMap::new(),
                pending_requests: HashMap::new(),
            }),
            request_ttl,
        }
    }

    /// Split `key` into `n` Shamir shares requiring `threshold` of them to
    /// recombine. Each returned share is a raw byte vector the same length
    /// as `key`; the caller must pair it with an `x` coordinate (1..=n, in
    /// the order returned) before calling `assign`.
    pub fn generate_shares(key: &[u8; FILE_KEY_LEN], n: usize, threshold: usize) -> Vec<Vec<u8>> {
        assert!(threshold >= 1 && threshold <= n, "1 <= threshold <= n");

        // One degree-(threshold-1) polynomial per key byte, constant term = that byte.
        let mut coeffs_per_byte: Vec<Vec<u8>> = Vec::with_capacity(key.len());
        let mut rng = rand::thread_rng();
        for &byte in key.iter() {
            let mut coeffs = vec![0u8; threshold];
            coeffs[0] = byte;
            if threshold > 1 {
                let mut random_tail = vec![0u8; threshold - 1];
                rng.fill_bytes(&mut random_tail);
                coeffs[1..].copy_from_slice(&random_tail);
            }
            coeffs_per_byte.push(coeffs);
        }

        (1..=n as u8)
            .map(|x| {
                coeffs_per_byte
                    .iter()
                    .map(|coeffs| gf256::eval_poly(coeffs, x))
                    .collect()
            })
            .collect()
    }

    /// Bind each generated share (in order) to a holder and its RSA public
    /// key, encrypting the share for that holder. `shares` must have come
    /// from `generate_shares` with the same `n` as `holders.len()`.
    pub fn assign(
        &self,
        file_name: String,
        threshold: usize,
        shares: Vec<Vec<u8>>,
        holders: Vec<(PeerId, RsaPublicKey)>,
    ) -> FileZapResult<()> {
        if shares.len() != holders.len() {
            return Err(FileZapError::InvalidKey(format!(
                "{} shares but {} holders",
                shares.len(),
                holders.len()
            )));
        }

        let mut assignments = HashMap::with_capacity(holders.len());
        for (i, ((peer, pubkey), share)) in holders.into_iter().zip(shares.into_iter()).enumerate() {
            if share.is_empty() {
                return Err(FileZapError::InvalidKey("empty share bytes".to_string()));
            }
            let x = (i + 1) as u8;
            let encrypted_share = rsa_encrypt_share(&pubkey, &share)?;
            assignments.insert(peer, Assignment { x, encrypted_share });
        }

        self.inner
            .lock()
            .unwrap()
            .files
            .insert(file_name, FileShares { threshold, assignments });
        Ok(())
    }

    /// Fetch the RSA-encrypted share bound to `holder` for `file_name`,
    /// along with the polynomial evaluation point it must be submitted
    /// with to `recombine`.
    pub fn get_share(&self, file_name: &str, holder: &PeerId) -> FileZapResult<(u8, Vec<u8>)> {
        let inner = self.inner.lock().unwrap();
        let file = inner
            .files
            .get(file_name)
            .ok_or_else(|| FileZapError::UnknownKey(file_name.to_string()))?;
        file.assignments
            .get(holder)
            .map(|a| (a.x, a.encrypted_share.clone()))
            .ok_or_else(|| FileZapError::UnknownKey(format!("{file_name} has no share for {holder}")))
    }

    /// Recombine the key from decrypted `(x, share_bytes)` pairs. Each
    /// holder decrypts its own RSA-wrapped share out of band and submits
    /// the plaintext share here; at least `threshold` distinct `x` values
    /// are required.
    pub fn recombine(&self, file_name: &str, shares: &[(u8, Vec<u8>)]) -> FileZapResult<[u8; FILE_KEY_LEN]> {
        let threshold = {
            let inner = self.inner.lock().unwrap();
            inner
                .files
                .get(file_name)
                .ok_or_else(|| FileZapError::UnknownKey(file_name.to_string()))?
                .threshold
        };

        let mut distinct: HashMap<u8, &Vec<u8>> = HashMap::new();
        for (x, bytes) in shares {
            if bytes.is_empty() {
                return Err(FileZapError::InvalidKey("empty share bytes".to_string()));
            }
            distinct.insert(*x, bytes);
        }
        if distinct.len() < threshold {
            return Err(FileZapError::InsufficientShares {
                have: distinct.len(),
                need: threshold,
            });
        }

        let used: Vec<(u8, &Vec<u8>)> = distinct.into_iter().take(threshold).collect();
        let share_len = used[0].1.len();
        if used.iter().any(|(_, bytes)| bytes.len() != share_len) {
            return Err(FileZapError::InvalidKey("share length mismatch".to_string()));
        }
        if share_len != FILE_KEY_LEN {
            return Err(FileZapError::InvalidKey(format!(
                "expected {FILE_KEY_LEN}-byte shares, got {share_len}"
            )));
        }

        let mut key = [0u8; FILE_KEY_LEN];
        for (byte_idx, slot) in key.iter_mut().enumerate() {
            let points: Vec<(u8, u8)> = used.iter().map(|(x, bytes)| (*x, bytes[byte_idx])).collect();
            *slot = gf256::interpolate_at_zero(&points);
        }
        Ok(key)
    }

    /// Register a client's request to recombine a file's key, so its
    /// reconstructed key can later be re-encrypted for that client. Expires
    /// after `request_ttl`.
    pub fn register_request(&self, file_name: String, client_id: String, client_pubkey: RsaPublicKey) {
        self.inner.lock().unwrap().pending_requests.insert(
            (file_name, client_id),
            PendingRequest { client_pubkey, registered_at: Instant::now() },
        );
    }

    /// Encrypt a recombined key for the client that registered the matching
    /// request, provided the request hasn't expired.
    pub fn encrypt_for_client(&self, file_name: &str, client_id: &str, key: &[u8; FILE_KEY_LEN]) -> FileZapResult<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        let request_key = (file_name.to_string(), client_id.to_string());
        let request = inner
            .pending_requests
            .get(&request_key)
            .ok_or_else(|| FileZapError::UnknownKey(format!("no pending request for {file_name}/{client_id}")))?;

        if request.registered_at.elapsed() > self.request_ttl {
            inner.pending_requests.remove(&request_key);
            return Err(FileZapError::VoteExpired(format!(
                "key-share request for {file_name}/{client_id} expired"
            )));
        }

        let ciphertext = rsa_encrypt_share(&request.client_pubkey, key)?;
        inner.pending_requests.remove(&request_key);
        Ok(ciphertext)
    }
}

/// Decrypt a holder's own RSA-wrapped share. Exposed as a free function
/// since it runs on the holder's side, not inside the manager that only
/// ever stores ciphertext.
pub fn decrypt_own_share(private_key: &RsaPrivateKey, encrypted_share: &[u8]) -> FileZapResult<Vec<u8>> {
    rsa_decrypt_share(private_key, encrypted_share)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::rand_core::OsRng;

    fn holder() -> (PeerId, RsaPrivateKey, RsaPublicKey) {
        let priv_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let pub_key = RsaPublicKey::from(&priv_key);
        (PeerId::random(), priv_key, pub_key)
    }

    #[test]
    fn split_assign_and_recombine_round_trips() {
        let key = {
            let mut k = [0u8; FILE_KEY_LEN];
            rand::thread_rng().fill_bytes(&mut k);
            k
        };
        let holders: Vec<_> = (0..5).map(|_| holder()).collect();
        let shares = KeyShareManager::generate_shares(&key, 5, 3);

        let manager = KeyShareManager::new(Duration::from_secs(60 * 60 * 24));
        let holder_pubs: Vec<(PeerId, RsaPublicKey)> =
            holders.iter().map(|(pid, _, pubk)| (*pid, pubk.clone())).collect();
        manager
            .assign("f.txt".to_string(), 3, shares, holder_pubs)
            .unwrap();

        let mut decrypted: Vec<(u8, Vec<u8>)> = Vec::new();
        for (pid, priv_key, _) in holders.iter().take(3) {
            let (x, encrypted) = manager.get_share("f.txt", pid).unwrap();
            let plain = decrypt_own_share(priv_key, &encrypted).unwrap();
            decrypted.push((x, plain));
        }

        let recovered = manager.recombine("f.txt", &decrypted).unwrap();
        assert_eq!(recovered, key);
    }

    #[test]
    fn recombine_fails_below_threshold() {
        let key = [7u8; FILE_KEY_LEN];
        let holders: Vec<_> = (0..5).map(|_| holder()).collect();
        let shares = KeyShareManager::generate_shares(&key, 5, 3);
        let manager = KeyShareManager::new(Duration::from_secs(60));
        let holder_pubs: Vec<(PeerId, RsaPublicKey)> =
            holders.iter().map(|(pid, _, pubk)| (*pid, pubk.clone())).collect();
        manager.assign("f.txt".to_string(), 3, shares, holder_pubs).unwrap();

        let (pid, priv_key, _) = &holders[0];
        let (x, encrypted) = manager.get_share("f.txt", pid).unwrap();
        let plain = decrypt_own_share(priv_key, &encrypted).unwrap();

        let err = manager.recombine("f.txt", &[(x, plain)]).unwrap_err();
        assert!(matches!(err, FileZapError::InsufficientShares { .. }));
    }

    #[test]
    fn get_share_of_unknown_file_errors() {
        let manager = KeyShareManager::new(Duration::from_secs(60));
        assert!(manager.get_share("nope.txt", &PeerId::random()).is_err());
    }

    #[test]
    fn client_request_expires_after_ttl() {
        let manager = KeyShareManager::new(Duration::from_millis(0));
        let (_, _, pubk) = holder();
        manager.register_request("f.txt".to_string(), "client-1".to_string(), pubk);
        std::thread::sleep(Duration::from_millis(5));
        let key = [1u8; FILE_KEY_LEN];
        let err = manager.encrypt_for_client("f.txt", "client-1", &key).unwrap_err();
        assert!(matches!(err, FileZapError::VoteExpired(_)));
    }
}
