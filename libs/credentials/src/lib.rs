//! Credential persistence for tenant sessions.
//!
//! A tenant's authentication state is an opaque set of named blobs produced by the
//! protocol binding. Stores never interpret the blobs; they load, save and delete the
//! whole set as a unit, keyed by tenant id alone.

mod fs_store;
mod memory;
#[cfg(feature = "redis-store")]
mod redis_store;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use fs_store::FsCredentialStore;
pub use memory::MemoryCredentialStore;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisCredentialStore;

/// Shared credential store handle used across sessions.
pub type SharedCredentialStore = Arc<dyn CredentialStore>;

const MAX_TENANT_KEY_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("invalid tenant key `{0}`")]
    InvalidKey(String),
    #[error("invalid credential entry name `{0}`")]
    InvalidEntry(String),
    #[error("invalid credential store configuration: {0}")]
    Config(String),
    #[error("credential io failed for tenant {tenant}")]
    Io {
        tenant: String,
        #[source]
        source: std::io::Error,
    },
    #[error("credential encoding failed for tenant {tenant}")]
    Encoding {
        tenant: String,
        #[source]
        source: serde_json::Error,
    },
    #[cfg(feature = "redis-store")]
    #[error("redis credential backend error")]
    Redis(#[from] redis::RedisError),
}

/// Opaque authentication state for a single tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    #[serde(with = "b64_entries")]
    entries: BTreeMap<String, Vec<u8>>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn insert(&mut self, name: impl Into<String>, blob: impl Into<Vec<u8>>) {
        self.entries.insert(name.into(), blob.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.entries.remove(name)
    }

    pub fn with_entry(mut self, name: impl Into<String>, blob: impl Into<Vec<u8>>) -> Self {
        self.insert(name, blob);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|(name, blob)| (name.as_str(), blob.as_slice()))
    }

    /// Applies a partial update: entries in `update` overwrite existing ones.
    pub fn merge(&mut self, update: CredentialSet) {
        self.entries.extend(update.entries);
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns `None` when nothing is persisted for the tenant.
    async fn load(&self, tenant: &str) -> Result<Option<CredentialSet>, CredentialStoreError>;
    /// Replaces the persisted set for the tenant.
    async fn save(&self, tenant: &str, creds: &CredentialSet) -> Result<(), CredentialStoreError>;
    /// Removes everything persisted for the tenant. Deleting an absent tenant succeeds.
    async fn delete(&self, tenant: &str) -> Result<(), CredentialStoreError>;
    /// Tenant ids that currently have a persisted set.
    async fn tenants(&self) -> Result<Vec<String>, CredentialStoreError>;
}

/// Checks that a tenant id is usable as a store key (and as a directory name).
///
/// ```
/// use gsm_credentials::validate_tenant_key;
///
/// assert!(validate_tenant_key("acme-01").is_ok());
/// assert!(validate_tenant_key("../etc").is_err());
/// ```
pub fn validate_tenant_key(tenant: &str) -> Result<(), CredentialStoreError> {
    let valid = !tenant.is_empty()
        && tenant.len() <= MAX_TENANT_KEY_LEN
        && tenant != "."
        && tenant != ".."
        && !tenant.starts_with('.')
        && tenant
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+'));
    if valid {
        Ok(())
    } else {
        Err(CredentialStoreError::InvalidKey(tenant.to_string()))
    }
}

/// Which backend to build at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Fs { root: PathBuf },
    Memory,
    Redis { url: String, namespace: String },
}

impl StoreBackend {
    pub const DEFAULT_SESSION_DIR: &'static str = "./auth_info";

    pub fn from_env() -> Result<Self, CredentialStoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads `CREDENTIAL_STORE` and its backend settings. A backend that cannot be
    /// built as configured is an error, never a silent fallback.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CredentialStoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let root = non_empty("SESSION_DIR")
            .or_else(|| non_empty("WHATSAPP_SESSION_DIR"))
            .unwrap_or_else(|| Self::DEFAULT_SESSION_DIR.to_string());
        let kind = non_empty("CREDENTIAL_STORE").map(|value| value.trim().to_ascii_lowercase());
        match kind.as_deref() {
            None | Some("fs") | Some("filesystem") => Ok(StoreBackend::Fs { root: root.into() }),
            Some("memory") => Ok(StoreBackend::Memory),
            Some("redis") => {
                if !cfg!(feature = "redis-store") {
                    return Err(CredentialStoreError::Config(
                        "CREDENTIAL_STORE=redis needs the `redis-store` feature".into(),
                    ));
                }
                let url = non_empty("CREDENTIAL_REDIS_URL").ok_or_else(|| {
                    CredentialStoreError::Config(
                        "CREDENTIAL_STORE=redis needs CREDENTIAL_REDIS_URL".into(),
                    )
                })?;
                Ok(StoreBackend::Redis {
                    url,
                    namespace: non_empty("CREDENTIAL_NAMESPACE").unwrap_or_else(|| "gsm".into()),
                })
            }
            Some(other) => Err(CredentialStoreError::Config(format!(
                "unknown CREDENTIAL_STORE `{other}`"
            ))),
        }
    }
}

/// Builds the configured store.
pub async fn build_store(
    backend: &StoreBackend,
) -> Result<SharedCredentialStore, CredentialStoreError> {
    match backend {
        StoreBackend::Fs { root } => Ok(Arc::new(FsCredentialStore::new(root.clone()))),
        StoreBackend::Memory => Ok(Arc::new(MemoryCredentialStore::new())),
        StoreBackend::Redis { url, namespace } => build_redis_store(url, namespace).await,
    }
}

#[cfg(feature = "redis-store")]
async fn build_redis_store(
    url: &str,
    namespace: &str,
) -> Result<SharedCredentialStore, CredentialStoreError> {
    let store = RedisCredentialStore::connect(url, namespace).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis-store"))]
async fn build_redis_store(
    _url: &str,
    _namespace: &str,
) -> Result<SharedCredentialStore, CredentialStoreError> {
    Err(CredentialStoreError::Config(
        "redis backend requested but the `redis-store` feature is disabled".into(),
    ))
}

mod b64_entries {
    use std::collections::BTreeMap;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(
        entries: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (name, blob) in entries {
            map.serialize_entry(name, &STANDARD.encode(blob))?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        BTreeMap::<String, String>::deserialize(deserializer)?
            .into_iter()
            .map(|(name, encoded)| {
                STANDARD
                    .decode(encoded)
                    .map(|blob| (name, blob))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn tenant_keys_reject_path_tricks() {
        assert!(validate_tenant_key("t1").is_ok());
        assert!(validate_tenant_key("5511999999999@s.whatsapp.net").is_ok());
        assert!(validate_tenant_key("").is_err());
        assert!(validate_tenant_key("..").is_err());
        assert!(validate_tenant_key(".hidden").is_err());
        assert!(validate_tenant_key("a/b").is_err());
        assert!(validate_tenant_key(&"x".repeat(129)).is_err());
    }

    #[test]
    fn credential_set_serializes_blobs_as_base64() {
        let creds = CredentialSet::new().with_entry("creds.json", b"{\"me\":1}".to_vec());
        let json = serde_json::to_value(&creds).unwrap();
        assert_eq!(json["entries"]["creds.json"], "eyJtZSI6MX0=");
        let back: CredentialSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, creds);
    }

    #[test]
    fn merge_overwrites_matching_entries() {
        let mut creds = CredentialSet::new()
            .with_entry("creds.json", b"old".to_vec())
            .with_entry("pre-key-1", b"k1".to_vec());
        creds.merge(CredentialSet::new().with_entry("creds.json", b"new".to_vec()));
        assert_eq!(creds.get("creds.json"), Some(&b"new"[..]));
        assert_eq!(creds.get("pre-key-1"), Some(&b"k1"[..]));
        assert_eq!(creds.len(), 2);
    }

    #[test]
    fn backend_defaults_to_filesystem_session_dir() {
        let backend = StoreBackend::from_lookup(lookup(&[])).unwrap();
        assert_eq!(
            backend,
            StoreBackend::Fs {
                root: PathBuf::from("./auth_info")
            }
        );
    }

    #[test]
    fn backend_honours_legacy_session_dir_name() {
        let backend =
            StoreBackend::from_lookup(lookup(&[("WHATSAPP_SESSION_DIR", "/data/wa")])).unwrap();
        assert_eq!(
            backend,
            StoreBackend::Fs {
                root: PathBuf::from("/data/wa")
            }
        );
    }

    #[test]
    fn misconfigured_backends_fail_instead_of_falling_back() {
        let without_url = StoreBackend::from_lookup(lookup(&[
            ("CREDENTIAL_STORE", "redis"),
            ("SESSION_DIR", "/data/creds"),
        ]));
        assert!(matches!(without_url, Err(CredentialStoreError::Config(_))));

        let unknown = StoreBackend::from_lookup(lookup(&[("CREDENTIAL_STORE", "s3")]));
        assert!(matches!(unknown, Err(CredentialStoreError::Config(_))));

        let memory = StoreBackend::from_lookup(lookup(&[("CREDENTIAL_STORE", "Memory")]));
        assert_eq!(memory.unwrap(), StoreBackend::Memory);
    }

    #[cfg(feature = "redis-store")]
    #[test]
    fn redis_backend_needs_a_url() {
        let with_url = StoreBackend::from_lookup(lookup(&[
            ("CREDENTIAL_STORE", "Redis"),
            ("CREDENTIAL_REDIS_URL", "redis://127.0.0.1/"),
        ]))
        .unwrap();
        assert_eq!(
            with_url,
            StoreBackend::Redis {
                url: "redis://127.0.0.1/".into(),
                namespace: "gsm".into()
            }
        );
    }

    #[cfg(not(feature = "redis-store"))]
    #[test]
    fn redis_backend_is_rejected_without_the_feature() {
        let selected = StoreBackend::from_lookup(lookup(&[
            ("CREDENTIAL_STORE", "redis"),
            ("CREDENTIAL_REDIS_URL", "redis://127.0.0.1/"),
        ]));
        assert!(matches!(selected, Err(CredentialStoreError::Config(_))));
    }

    #[cfg(not(feature = "redis-store"))]
    #[tokio::test]
    async fn building_a_redis_store_without_the_feature_fails() {
        let backend = StoreBackend::Redis {
            url: "redis://127.0.0.1/".into(),
            namespace: "gsm".into(),
        };
        assert!(matches!(
            build_store(&backend).await,
            Err(CredentialStoreError::Config(_))
        ));
    }
}
