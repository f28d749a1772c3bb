use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::{CredentialSet, CredentialStore, CredentialStoreError, validate_tenant_key};

/// Stores each tenant's set as a directory under `root`, one file per entry.
///
/// Entry names are percent-encoded into file names. Files are written to a dot-prefixed
/// temporary name and renamed into place, and entries missing from a saved set are pruned.
#[derive(Debug, Clone)]
pub struct FsCredentialStore {
    root: PathBuf,
}

impl FsCredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_dir(&self, tenant: &str) -> Result<PathBuf, CredentialStoreError> {
        validate_tenant_key(tenant)?;
        Ok(self.root.join(tenant))
    }
}

fn io_err(tenant: &str) -> impl FnOnce(std::io::Error) -> CredentialStoreError + '_ {
    move |source| CredentialStoreError::Io {
        tenant: tenant.to_string(),
        source,
    }
}

fn encode_entry_name(name: &str) -> Result<String, CredentialStoreError> {
    if name.is_empty() {
        return Err(CredentialStoreError::InvalidEntry(name.to_string()));
    }
    let encoded = urlencoding::encode(name).into_owned();
    Ok(match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{rest}"),
        None => encoded,
    })
}

fn decode_entry_name(file_name: &str) -> Option<String> {
    urlencoding::decode(file_name)
        .ok()
        .map(|name| name.into_owned())
}

#[async_trait]
impl CredentialStore for FsCredentialStore {
    async fn load(&self, tenant: &str) -> Result<Option<CredentialSet>, CredentialStoreError> {
        let dir = self.tenant_dir(tenant)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(tenant)(err)),
        };

        let mut creds = CredentialSet::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(tenant))? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            let Some(name) = decode_entry_name(&file_name) else {
                warn!(tenant, file = %file_name, "skipping undecodable credential file");
                continue;
            };
            let blob = fs::read(entry.path()).await.map_err(io_err(tenant))?;
            creds.insert(name, blob);
        }

        Ok((!creds.is_empty()).then_some(creds))
    }

    async fn save(&self, tenant: &str, creds: &CredentialSet) -> Result<(), CredentialStoreError> {
        let dir = self.tenant_dir(tenant)?;
        fs::create_dir_all(&dir).await.map_err(io_err(tenant))?;

        let mut kept = HashSet::with_capacity(creds.len());
        for (name, blob) in creds.iter() {
            let file_name = encode_entry_name(name)?;
            let tmp = dir.join(format!(".{file_name}.tmp"));
            fs::write(&tmp, blob).await.map_err(io_err(tenant))?;
            fs::rename(&tmp, dir.join(&file_name))
                .await
                .map_err(io_err(tenant))?;
            kept.insert(file_name);
        }

        let mut entries = fs::read_dir(&dir).await.map_err(io_err(tenant))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err(tenant))? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.starts_with('.') && !kept.contains(&file_name) {
                debug!(tenant, file = %file_name, "pruning stale credential entry");
                fs::remove_file(entry.path())
                    .await
                    .map_err(io_err(tenant))?;
            }
        }
        Ok(())
    }

    async fn delete(&self, tenant: &str) -> Result<(), CredentialStoreError> {
        let dir = self.tenant_dir(tenant)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(tenant)(err)),
        }
    }

    async fn tenants(&self) -> Result<Vec<String>, CredentialStoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err("*")(err)),
        };

        let mut tenants = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err("*"))? {
            let is_dir = entry
                .file_type()
                .await
                .map(|kind| kind.is_dir())
                .unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_dir && validate_tenant_key(&name).is_ok() {
                tenants.push(name);
            }
        }
        tenants.sort();
        Ok(tenants)
    }
}
