// Manifest Registry (C6): the in-memory index of locally known file
// manifests, backed by a namespace-validated DHT for discovery and a
// periodic replicator that keeps each manifest at its replication goal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FileZapError, FileZapResult};
use crate::traits::Dht;

const DHT_NAMESPACE: &str = "/filezap/";

/// A file's manifest (§3/§6): `name` is unique system-wide, `chunk_hashes`
/// is non-empty and ordered for reassembly, `replication_goal >= 1`, and
/// `updated_at` only moves forward on overwrite by the same owner. Field
/// names match the wire schema in §6 exactly (no serde renames).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub owner: String,
    pub chunk_hashes: Vec<String>,
    pub size: u64,
    pub replication_goal: usize,
    pub updated_at: DateTime<Utc>,
}

impl Manifest {
    fn dht_key(name: &str) -> String {
        format!("{DHT_NAMESPACE}{name}")
    }
}

struct Inner {
    manifests: HashMap<String, Manifest>,
}

pub struct ManifestRegistry {
    inner: Mutex<Inner>,
    dht: Arc<dyn Dht>,
}

impl ManifestRegistry {
    pub fn new(dht: Arc<dyn Dht>) -> Self {
        Self {
            inner: Mutex::new(Inner { manifests: HashMap::new() }),
            dht,
        }
    }

    /// Add (or replace, if newer) a manifest locally, publish it to the DHT,
    /// and announce this node as a provider of it.
    pub async fn add(&self, manifest: Manifest) -> FileZapResult<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            let replace = match inner.manifests.get(&manifest.name) {
                Some(existing) => manifest.updated_at >= existing.updated_at,
                None => true,
            };
            if replace {
                inner.manifests.insert(manifest.name.clone(), manifest.clone());
            }
        }
        let key = Manifest::dht_key(&manifest.name);
        let bytes = serde_json::to_vec(&manifest)?;
        self.dht.put(key, bytes).await?;
        self.dht.provide(Manifest::dht_key(&manifest.name)).await
    }

    /// Look up a manifest, checking the local cache first and falling back
    /// to the DHT, applying the max-`updated_at`-then-byte-lexicographic
    /// selection rule across any records the DHT returns.
    pub async fn get(&self, name: &str) -> FileZapResult<Manifest> {
        if let Some(m) = self.inner.lock().unwrap().manifests.get(name).cloned() {
            return Ok(m);
        }

        let key = Manifest::dht_key(name);
        let records = self.dht.get(&key).await?;
        let chosen = select_freshest(&records).ok_or_else(|| FileZapError::UnknownKey(name.to_string()))?;

        self.inner.lock().unwrap().manifests.insert(chosen.name.clone(), chosen.clone());
        Ok(chosen)
    }

    pub fn remove(&self, name: &str) -> Option<Manifest> {
        self.inner.lock().unwrap().manifests.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().unwrap().manifests.contains_key(name)
    }

    pub fn all(&self) -> Vec<Manifest> {
        self.inner.lock().unwrap().manifests.values().cloned().collect()
    }

    /// Validate a manifest freshly received off the `filezap-manifests`
    /// pubsub topic or a raw DHT record: well-formed JSON under the
    /// `/filezap/` namespace.
    pub fn validate_record(key: &str, bytes: &[u8]) -> FileZapResult<Manifest> {
        if !key.starts_with(DHT_NAMESPACE) {
            return Err(FileZapError::InvalidManifest(format!(
                "key {key} outside namespace {DHT_NAMESPACE}"
            )));
        }
        let manifest: Manifest = serde_json::from_slice(bytes)
            .map_err(|e| FileZapError::InvalidManifest(e.to_string()))?;
        Ok(manifest)
    }

    /// One pass of the replication maintenance loop: for each locally held
    /// manifest, check how many providers the DHT reports and re-publish if
    /// under the replication goal.
    pub async fn replicate_once(&self) {
        let manifests = self.all();
        for manifest in manifests {
            let key = Manifest::dht_key(&manifest.name);
            match self.dht.find_providers(&key).await {
                Ok(providers) if providers.len() >= manifest.replication_goal => {
                    debug!(
                        "{} already has {} providers (goal {})",
                        manifest.name,
                        providers.len(),
                        manifest.replication_goal
                    );
                }
                Ok(providers) => {
                    debug!(
                        "{} under-replicated ({} of {}), republishing",
                        manifest.name,
                        providers.len(),
                        manifest.replication_goal
                    );
                    if let Ok(bytes) = serde_json::to_vec(&manifest) {
                        if let Err(e) = self.dht.put(key, bytes).await {
                            warn!("replication republish failed for {}: {e}", manifest.name);
                        }
                    }
                    if let Err(e) = self.dht.provide(Manifest::dht_key(&manifest.name)).await {
                        warn!("provide announcement failed for {}: {e}", manifest.name);
                    }
                }
                Err(e) => warn!("find_providers failed for {}: {e}", manifest.name),
            }
        }
    }
}

/// Selects the manifest with the greatest `updated_at`; ties are broken by
/// comparing the raw serialized bytes lexicographically, so the choice is
/// deterministic across nodes even when timestamps collide.
fn select_freshest(records: &[Vec<u8>]) -> Option<Manifest> {
    let mut best: Option<(&Vec<u8>, Manifest)> = None;
    for bytes in records {
        let Ok(manifest) = serde_json::from_slice::<Manifest>(bytes) else {
            continue;
        };
        best = match best {
            None => Some((bytes, manifest)),
            Some((best_bytes, ref best_manifest)) => {
                if manifest.updated_at > best_manifest.updated_at
                    || (manifest.updated_at == best_manifest.updated_at && bytes > best_bytes)
                {
                    Some((bytes, manifest))
                } else {
                    best
                }
            }
        };
    }
    best.map(|(_, m)| m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use libp2p::PeerId;
    use std::sync::Mutex as StdMutex;

    struct FakeDht {
        records: StdMutex<HashMap<String, Vec<Vec<u8>>>>,
    }

    impl FakeDht {
        fn new() -> Self {
            Self { records: StdMutex::new(HashMap::new()) }
        }
    }

    impl Dht for FakeDht {
        fn put(&self, key: String, value: Vec<u8>) -> BoxFuture<'_, FileZapResult<()>> {
            Box::pin(async move {
                self.records.lock().unwrap().entry(key).or_default().push(value);
                Ok(())
            })
        }

        fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, FileZapResult<Vec<Vec<u8>>>> {
            Box::pin(async move {
                Ok(self.records.lock().unwrap().get(key).cloned().unwrap_or_default())
            })
        }

        fn find_providers<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, FileZapResult<Vec<PeerId>>> {
            Box::pin(async move { Ok(vec![]) })
        }

        fn closest_peers<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, FileZapResult<Vec<PeerId>>> {
            Box::pin(async move { Ok(vec![]) })
        }

        fn provide(&self, _key: String) -> BoxFuture<'_, FileZapResult<()>> {
            Box::pin(async move { Ok(()) })
        }
    }

    fn manifest(name: &str, secs: i64) -> Manifest {
        Manifest {
            name: name.to_string(),
            owner: "owner-peer".to_string(),
            chunk_hashes: vec!["abc".to_string()],
            size: 100,
            replication_goal: 3,
            updated_at: DateTime::<Utc>::from_timestamp(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn add_then_get_round_trips_locally() {
        let registry = ManifestRegistry::new(Arc::new(FakeDht::new()));
        registry.add(manifest("f.txt", 100)).await.unwrap();
        let got = registry.get("f.txt").await.unwrap();
        assert_eq!(got.name, "f.txt");
    }

    #[tokio::test]
    async fn get_falls_back_to_dht_and_picks_freshest() {
        let dht = Arc::new(FakeDht::new());
        let older = manifest("shared.txt", 10);
        let newer = manifest("shared.txt", 20);
        dht.put(Manifest::dht_key("shared.txt"), serde_json::to_vec(&older).unwrap())
            .await
            .unwrap();
        dht.put(Manifest::dht_key("shared.txt"), serde_json::to_vec(&newer).unwrap())
            .await
            .unwrap();

        let registry = ManifestRegistry::new(dht);
        let got = registry.get("shared.txt").await.unwrap();
        assert_eq!(got.updated_at, newer.updated_at);
    }

    #[test]
    fn validate_record_rejects_wrong_namespace() {
        let bytes = serde_json::to_vec(&manifest("x", 0)).unwrap();
        assert!(ManifestRegistry::validate_record("not-namespaced", &bytes).is_err());
        assert!(ManifestRegistry::validate_record("/filezap/x", &bytes).is_ok());
    }

    #[tokio::test]
    async fn get_of_unknown_file_errors() {
        let registry = ManifestRegistry::new(Arc::new(FakeDht::new()));
        assert!(registry.get("nope.txt").await.is_err());
    }
}
