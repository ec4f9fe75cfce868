//! Hop credential CRUD backed by the OpenSSH-config-style file at
//! `<workspace>/.icotes/hop/config`. Secrets (private key material) are
//! never stored here; only the key id/path reference travels with the
//! credential, per spec.md's "SSH credential disk persistence format
//! treated as external" non-goal for the key bytes themselves.

use super::ssh_config::{self, SshConfigEntry};
use icpy_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMethod {
    Password,
    PrivateKey,
    Agent,
}

impl AuthMethod {
    fn as_str(self) -> &'static str {
        match self {
            AuthMethod::Password => "password",
            AuthMethod::PrivateKey => "privateKey",
            AuthMethod::Agent => "agent",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "privateKey" => AuthMethod::PrivateKey,
            "agent" => AuthMethod::Agent,
            _ => AuthMethod::Password,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopCredential {
    pub id: String,
    pub name: String,
    pub host: String,
    pub username: String,
    pub port: u16,
    pub auth: AuthMethod,
    pub private_key_id: Option<String>,
    pub default_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl HopCredential {
    fn from_entry(entry: &SshConfigEntry) -> Option<Self> {
        let id = entry.icotes_id.clone()?;
        Some(Self {
            id,
            name: entry.host.clone(),
            host: entry.hostname.clone().unwrap_or_else(|| entry.host.clone()),
            username: entry.user.clone().unwrap_or_default(),
            port: entry.port,
            auth: AuthMethod::parse(entry.icotes_auth.as_deref().unwrap_or("password")),
            private_key_id: entry.key_id(),
            default_path: entry.icotes_default_path.clone(),
            created_at: entry.icotes_created_at.clone().unwrap_or_default(),
            updated_at: entry.icotes_updated_at.clone().unwrap_or_default(),
        })
    }

    fn to_entry(&self) -> SshConfigEntry {
        let cred_json = serde_json::json!({
            "id": self.id,
            "name": self.name,
            "host": self.host,
            "username": self.username,
            "port": self.port,
            "auth": self.auth.as_str(),
            "privateKeyId": self.private_key_id,
            "defaultPath": self.default_path,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        });
        ssh_config::credential_to_config_entry(&cred_json)
    }
}

/// CRUD over the hop config file. All methods re-read/re-write the whole
/// file; the credential set is small (human-managed hop targets, not a
/// high-churn table) so this trades a little I/O for always-consistent
/// state on disk.
pub struct HopCredentialStore {
    config_path: PathBuf,
    keys_dir: PathBuf,
}

impl HopCredentialStore {
    pub fn new(config_path: impl Into<PathBuf>, keys_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            keys_dir: keys_dir.into(),
        }
    }

    /// Write `bytes` under the key directory with `0600` permissions and
    /// return the generated key id (the private key's filename).
    pub fn store_private_key(&self, bytes: &[u8]) -> Result<String> {
        std::fs::create_dir_all(&self.keys_dir).map_err(|e| Error::Io(e.to_string()))?;
        let key_id = format!("key_{:08x}", rand::random::<u32>());
        let key_path = self.keys_dir.join(&key_id);
        std::fs::write(&key_path, bytes).map_err(|e| Error::Io(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::Io(e.to_string()))?;
        }

        Ok(key_id)
    }

    fn rename_key_file(&self, old_id: &str, new_id: &str) -> Result<()> {
        let old_path = self.keys_dir.join(old_id);
        if !old_path.exists() {
            return Ok(());
        }
        let new_path = self.keys_dir.join(new_id);
        if let Some(parent) = new_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Io(e.to_string()))?;
        }
        std::fs::rename(&old_path, &new_path).map_err(|e| Error::Io(e.to_string()))
    }

    fn read_entries(&self) -> Result<Vec<SshConfigEntry>> {
        if !self.config_path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.config_path).map_err(|e| Error::Io(e.to_string()))?;
        Ok(ssh_config::parse_ssh_config(&text))
    }

    fn write_entries(&self, entries: &[SshConfigEntry]) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Io(e.to_string()))?;
        }
        let text = ssh_config::generate_ssh_config(entries);
        std::fs::write(&self.config_path, text).map_err(|e| Error::Io(e.to_string()))
    }

    pub fn list(&self) -> Result<Vec<HopCredential>> {
        Ok(self
            .read_entries()?
            .iter()
            .filter_map(HopCredential::from_entry)
            .collect())
    }

    pub fn get(&self, id: &str) -> Result<HopCredential> {
        self.list()?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::NotFound(format!("hop credential {id}")))
    }

    pub fn upsert(&self, credential: HopCredential) -> Result<()> {
        let mut entries = self.read_entries()?;
        let new_entry = credential.to_entry();
        match entries.iter().position(|e| e.icotes_id.as_deref() == Some(credential.id.as_str())) {
            Some(idx) => entries[idx] = new_entry,
            None => entries.push(new_entry),
        }
        self.write_entries(&entries)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.read_entries()?;
        let before = entries.len();
        entries.retain(|e| e.icotes_id.as_deref() != Some(id));
        if entries.len() == before {
            return Err(Error::NotFound(format!("hop credential {id}")));
        }
        self.write_entries(&entries)
    }

    /// Migrate a legacy JSON credential list (pre-SSH-config format) into the
    /// config file. Each migrated private key file is renamed from its
    /// legacy UUID filename to `<name>_key`; if that filename is already
    /// taken by another credential's key, it's suffixed with the migrating
    /// credential's id instead, per the Open Question resolution recorded
    /// in DESIGN.md / SPEC_FULL.md §9. The credential's own `name` is left
    /// untouched — this is a key-file naming collision, not a host alias
    /// collision.
    pub fn migrate_legacy_json(&self, legacy: &[HopCredential]) -> Result<()> {
        let mut entries = self.read_entries()?;
        for credential in legacy {
            let mut credential = credential.clone();
            if let Some(old_key_id) = credential.private_key_id.clone() {
                let mut new_key_id = format!("{}_key", credential.name);
                let taken = entries
                    .iter()
                    .filter_map(HopCredential::from_entry)
                    .any(|c| c.private_key_id.as_deref() == Some(new_key_id.as_str()));
                if taken {
                    new_key_id = format!("{}_{}_key", credential.name, credential.id);
                }
                self.rename_key_file(&old_key_id, &new_key_id)?;
                credential.private_key_id = Some(new_key_id);
            }
            entries.push(credential.to_entry());
        }
        self.write_entries(&entries)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(id: &str, name: &str) -> HopCredential {
        HopCredential {
            id: id.into(),
            name: name.into(),
            host: "10.0.0.1".into(),
            username: "bob".into(),
            port: 22,
            auth: AuthMethod::Password,
            private_key_id: None,
            default_path: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = HopCredentialStore::new(dir.path().join("config"), dir.path().join("keys"));
        store.upsert(sample("c1", "box1")).unwrap();
        let fetched = store.get("c1").unwrap();
        assert_eq!(fetched.host, "10.0.0.1");
    }

    #[test]
    fn delete_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = HopCredentialStore::new(dir.path().join("config"), dir.path().join("keys"));
        assert!(matches!(store.delete("nope"), Err(Error::NotFound(_))));
    }

    fn with_key(mut credential: HopCredential, key_id: &str) -> HopCredential {
        credential.auth = AuthMethod::PrivateKey;
        credential.private_key_id = Some(key_id.to_string());
        credential
    }

    #[test]
    fn store_private_key_writes_with_owner_only_permissions() {
        let dir = tempdir().unwrap();
        let store = HopCredentialStore::new(dir.path().join("config"), dir.path().join("keys"));
        let key_id = store.store_private_key(b"-----BEGIN KEY-----").unwrap();
        let key_path = dir.path().join("keys").join(&key_id);
        assert_eq!(std::fs::read(&key_path).unwrap(), b"-----BEGIN KEY-----");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn migration_renames_key_file_to_name_based_id() {
        let dir = tempdir().unwrap();
        let keys_dir = dir.path().join("keys");
        std::fs::create_dir_all(&keys_dir).unwrap();
        std::fs::write(keys_dir.join("uuid-legacy"), b"legacy-key").unwrap();

        let store = HopCredentialStore::new(dir.path().join("config"), keys_dir.clone());
        let legacy = with_key(sample("legacy", "box1"), "uuid-legacy");
        store.migrate_legacy_json(&[legacy]).unwrap();

        let migrated = store.get("legacy").unwrap();
        assert_eq!(migrated.private_key_id.as_deref(), Some("box1_key"));
        assert!(keys_dir.join("box1_key").exists());
        assert!(!keys_dir.join("uuid-legacy").exists());
    }

    #[test]
    fn migration_suffixes_colliding_key_files_with_credential_id() {
        let dir = tempdir().unwrap();
        let keys_dir = dir.path().join("keys");
        std::fs::create_dir_all(&keys_dir).unwrap();
        std::fs::write(keys_dir.join("box1_key"), b"existing-key").unwrap();
        std::fs::write(keys_dir.join("uuid-legacy"), b"legacy-key").unwrap();

        let store = HopCredentialStore::new(dir.path().join("config"), keys_dir.clone());
        store.upsert(with_key(sample("existing", "box1"), "box1_key")).unwrap();
        let legacy = with_key(sample("legacy", "box1"), "uuid-legacy");
        store.migrate_legacy_json(&[legacy]).unwrap();

        let migrated = store.get("legacy").unwrap();
        assert_eq!(migrated.private_key_id.as_deref(), Some("box1_legacy_key"));
        assert!(keys_dir.join("box1_legacy_key").exists());
        assert!(!keys_dir.join("uuid-legacy").exists());
        assert_eq!(store.get("existing").unwrap().name, "box1");
    }
}
