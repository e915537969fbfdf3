// Chunk Validator (C3): checks an inbound chunk against its claimed hash,
// memoizes recent verdicts, and tracks per-provider error counts that
// escalate into a `RemovePeer` proposal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use libp2p::PeerId;
use tracing::warn;

use crate::crypto::sha256_hex;
use crate::error::FileZapResult;
use crate::traits::{RemovalProposer, ReputationSink};

const MEMO_CAPACITY: usize = 1000;
const ERROR_LIMIT: u32 = 3;
const HASH_MISMATCH_PENALTY: i32 = -10;
const OTHER_ERROR_PENALTY: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Success,
    HashMismatch,
    SizeMismatch,
    ContentMalformed,
}

struct Inner {
    memo: HashMap<String, ValidationOutcome>,
    error_counts: HashMap<PeerId, u32>,
}

pub struct ChunkValidator {
    inner: Mutex<Inner>,
    max_chunk_size: usize,
    reputation: Arc<dyn ReputationSink>,
    remover: Arc<dyn RemovalProposer>,
}

impl ChunkValidator {
    pub fn new(
        max_chunk_size: usize,
        reputation: Arc<dyn ReputationSink>,
        remover: Arc<dyn RemovalProposer>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                memo: HashMap::new(),
                error_counts: HashMap::new(),
            }),
            max_chunk_size,
            reputation,
            remover,
        }
    }

    /// Validate `bytes` against `expected_hash`, attributing any failure to
    /// `provider`. Memoizes by `expected_hash` alone (a hash either matches
    /// its bytes everywhere or it doesn't), halving the cache when it grows
    /// past capacity rather than evicting one entry at a time.
    pub fn validate(&self, expected_hash: &str, bytes: &[u8], provider: PeerId) -> ValidationOutcome {
        {
            let inner = self.inner.lock().unwrap();
            if let Some(outcome) = inner.memo.get(expected_hash) {
                return *outcome;
            }
        }

        let outcome = self.check(expected_hash, bytes);

        let mut inner = self.inner.lock().unwrap();
        if inner.memo.len() >= MEMO_CAPACITY {
            let keep: Vec<String> = inner.memo.keys().take(MEMO_CAPACITY / 2).cloned().collect();
            inner.memo.retain(|k, _| keep.contains(k));
        }
        inner.memo.insert(expected_hash.to_string(), outcome);

        if outcome != ValidationOutcome::Success {
            let penalty = match outcome {
                ValidationOutcome::HashMismatch => HASH_MISMATCH_PENALTY,
                _ => OTHER_ERROR_PENALTY,
            };
            self.reputation.record(&provider, penalty);

            let count = inner.error_counts.entry(provider).or_insert(0);
            *count += 1;
            let errors = *count;
            if errors >= ERROR_LIMIT {
                inner.error_counts.remove(&provider);
            }
            drop(inner);

            if errors >= ERROR_LIMIT {
                if let Err(e) = self.remover.propose_remove_peer(
                    provider,
                    format!("{errors} validation failures from this provider"),
                ) {
                    warn!("failed to propose removal of {provider}: {e}");
                }
            }
        }

        outcome
    }

    fn check(&self, expected_hash: &str, bytes: &[u8]) -> ValidationOutcome {
        if bytes.is_empty() || bytes.len() > self.max_chunk_size {
            return ValidationOutcome::SizeMismatch;
        }
        let payload = match crate::crypto::chunk_payload(bytes) {
            Ok(p) => p,
            Err(_) => return ValidationOutcome::ContentMalformed,
        };
        let actual = sha256_hex(payload);
        if actual != expected_hash {
            return ValidationOutcome::HashMismatch;
        }
        ValidationOutcome::Success
    }

    pub fn error_count(&self, provider: &PeerId) -> u32 {
        *self.inner.lock().unwrap().error_counts.get(provider).unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::format_chunk;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSink;
    impl ReputationSink for NullSink {
        fn record(&self, _peer: &PeerId, _delta: i32) {}
    }

    struct CountingProposer {
        count: AtomicUsize,
    }
    impl RemovalProposer for CountingProposer {
        fn propose_remove_peer(&self, _peer: PeerId, _reason: String) -> FileZapResult<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn validator(remover: Arc<CountingProposer>) -> ChunkValidator {
        ChunkValidator::new(1024 * 1024, Arc::new(NullSink), remover)
    }

    #[test]
    fn validates_correct_chunk() {
        let remover = Arc::new(CountingProposer { count: AtomicUsize::new(0) });
        let v = validator(remover);
        let payload = b"hello world";
        let hash = sha256_hex(payload);
        let framed = format_chunk(payload);
        assert_eq!(v.validate(&hash, &framed, PeerId::random()), ValidationOutcome::Success);
    }

    #[test]
    fn detects_hash_mismatch() {
        let remover = Arc::new(CountingProposer { count: AtomicUsize::new(0) });
        let v = validator(remover);
        let framed = format_chunk(b"hello world");
        assert_eq!(
            v.validate("deadbeef", &framed, PeerId::random()),
            ValidationOutcome::HashMismatch
        );
    }

    #[test]
    fn detects_malformed_envelope() {
        let remover = Arc::new(CountingProposer { count: AtomicUsize::new(0) });
        let v = validator(remover);
        assert_eq!(
            v.validate("anything", &[9, 1, 2, 3], PeerId::random()),
            ValidationOutcome::ContentMalformed
        );
    }

    #[test]
    fn rejects_empty_and_oversized() {
        let remover = Arc::new(CountingProposer { count: AtomicUsize::new(0) });
        let v = validator(remover.clone());
        assert_eq!(v.validate("x", &[], PeerId::random()), ValidationOutcome::SizeMismatch);
        let v2 = ChunkValidator::new(4, Arc::new(NullSink), remover);
        assert_eq!(
            v2.validate("x", &format_chunk(b"way too big"), PeerId::random()),
            ValidationOutcome::SizeMismatch
        );
    }

    #[test]
    fn three_errors_from_one_provider_triggers_removal_proposal() {
        let remover = Arc::new(CountingProposer { count: AtomicUsize::new(0) });
        let v = validator(remover.clone());
        let provider = PeerId::random();
        for i in 0..3 {
            v.validate(&format!("bad-hash-{i}"), &format_chunk(b"x"), provider);
        }
        assert_eq!(remover.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memoizes_by_expected_hash() {
        let remover = Arc::new(CountingProposer { count: AtomicUsize::new(0) });
        let v = validator(remover);
        let payload = b"memoized";
        let hash = sha256_hex(payload);
        let framed = format_chunk(payload);
        let provider = PeerId::random();
        assert_eq!(v.validate(&hash, &framed, provider), ValidationOutcome::Success);
        // Second call with garbage bytes still returns the memoized verdict.
        assert_eq!(v.validate(&hash, &[], provider), ValidationOutcome::Success);
    }
}
