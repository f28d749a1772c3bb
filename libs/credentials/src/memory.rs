use async_trait::async_trait;
use dashmap::DashMap;

use crate::{CredentialSet, CredentialStore, CredentialStoreError, validate_tenant_key};

#[derive(Default)]
pub struct MemoryCredentialStore {
    by_tenant: DashMap<String, CredentialSet>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            by_tenant: DashMap::new(),
        }
    }

    pub fn contains(&self, tenant: &str) -> bool {
        self.by_tenant.contains_key(tenant)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, tenant: &str) -> Result<Option<CredentialSet>, CredentialStoreError> {
        validate_tenant_key(tenant)?;
        Ok(self
            .by_tenant
            .get(tenant)
            .map(|entry| entry.value().clone()))
    }

    async fn save(&self, tenant: &str, creds: &CredentialSet) -> Result<(), CredentialStoreError> {
        validate_tenant_key(tenant)?;
        self.by_tenant.insert(tenant.to_string(), creds.clone());
        Ok(())
    }

    async fn delete(&self, tenant: &str) -> Result<(), CredentialStoreError> {
        validate_tenant_key(tenant)?;
        self.by_tenant.remove(tenant);
        Ok(())
    }

    async fn tenants(&self) -> Result<Vec<String>, CredentialStoreError> {
        let mut tenants: Vec<String> = self
            .by_tenant
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        tenants.sort();
        Ok(tenants)
    }
}
