use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::{CredentialSet, CredentialStore, CredentialStoreError, validate_tenant_key};

const SCAN_BATCH: usize = 200;

/// One JSON value per tenant under `<namespace>:credentials:<tenant>`.
///
/// The connection manager is multiplexed; each call works on its own clone so tenants
/// never wait on each other.
pub struct RedisCredentialStore {
    namespace: String,
    connection: ConnectionManager,
}

impl RedisCredentialStore {
    pub async fn connect(
        url: &str,
        namespace: impl Into<String>,
    ) -> Result<Self, CredentialStoreError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            namespace: namespace.into(),
            connection,
        })
    }

    fn prefix(&self) -> String {
        key_prefix(&self.namespace)
    }

    fn tenant_key(&self, tenant: &str) -> Result<String, CredentialStoreError> {
        validate_tenant_key(tenant)?;
        Ok(format!("{}{tenant}", self.prefix()))
    }
}

fn key_prefix(namespace: &str) -> String {
    format!("{namespace}:credentials:")
}

fn tenant_of<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(prefix)
        .filter(|tenant| validate_tenant_key(tenant).is_ok())
}

#[async_trait]
impl CredentialStore for RedisCredentialStore {
    async fn load(&self, tenant: &str) -> Result<Option<CredentialSet>, CredentialStoreError> {
        let key = self.tenant_key(tenant)?;
        let mut conn = self.connection.clone();
        let payload: Option<String> = conn.get(key).await?;
        payload
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|source| CredentialStoreError::Encoding {
                    tenant: tenant.to_string(),
                    source,
                })
            })
            .transpose()
    }

    async fn save(&self, tenant: &str, creds: &CredentialSet) -> Result<(), CredentialStoreError> {
        let key = self.tenant_key(tenant)?;
        let payload =
            serde_json::to_string(creds).map_err(|source| CredentialStoreError::Encoding {
                tenant: tenant.to_string(),
                source,
            })?;
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(key, payload).await?;
        Ok(())
    }

    async fn delete(&self, tenant: &str) -> Result<(), CredentialStoreError> {
        let key = self.tenant_key(tenant)?;
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    /// Walks the keyspace with `SCAN` so listing never blocks the server.
    async fn tenants(&self) -> Result<Vec<String>, CredentialStoreError> {
        let prefix = self.prefix();
        let pattern = format!("{prefix}*");
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut tenants = Vec::new();
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            tenants.extend(
                keys.iter()
                    .filter_map(|key| tenant_of(&prefix, key))
                    .map(str::to_string),
            );
            if next == 0 {
                break;
            }
            cursor = next;
        }
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }
}
