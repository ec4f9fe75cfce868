//! OpenSSH config-format parser/writer for hop credentials, compatible with
//! VS Code's Remote-SSH config. icotes-specific fields travel in a
//! `# icotes-meta: {...}` comment on each `Host` block.
//!
//! Line-for-line grounded on
//! `original_source/backend/icpy/utils/ssh_config_parser.py` and
//! `ssh_config_writer.py`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single `Host` block, standard SSH directives plus icotes metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SshConfigEntry {
    pub host: String,
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<String>,

    pub icotes_id: Option<String>,
    pub icotes_auth: Option<String>,
    pub icotes_default_path: Option<String>,
    pub icotes_created_at: Option<String>,
    pub icotes_updated_at: Option<String>,

    pub comments: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct IcotesMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<String>,
    #[serde(rename = "defaultPath", skip_serializing_if = "Option::is_none")]
    default_path: Option<String>,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

impl SshConfigEntry {
    fn new(host: String) -> Self {
        Self {
            host,
            port: 22,
            ..Default::default()
        }
    }

    /// Extracts just the filename from `identity_file`, used as the stored
    /// private key's id (e.g. `~/.icotes/ssh/keys/hop1_key` -> `hop1_key`).
    pub fn key_id(&self) -> Option<String> {
        self.identity_file.as_ref().map(|p| {
            p.rsplit(['/', '\\'])
                .next()
                .unwrap_or(p)
                .to_string()
        })
    }

    fn parse_metadata(&mut self) {
        for comment in &self.comments {
            let Some(idx) = comment.find("icotes-meta:") else { continue };
            let json_part = comment[idx + "icotes-meta:".len()..].trim();
            let Ok(meta) = serde_json::from_str::<IcotesMeta>(json_part) else { continue };
            self.icotes_id = meta.id;
            self.icotes_auth = meta.auth;
            self.icotes_default_path = meta.default_path;
            self.icotes_created_at = meta.created_at;
            self.icotes_updated_at = meta.updated_at;
            break;
        }
    }
}

/// Parse SSH config text into a list of entries. Malformed directives are
/// tolerated the way OpenSSH itself is lenient (unknown/invalid values fall
/// back to defaults rather than raising).
pub fn parse_ssh_config(text: &str) -> Vec<SshConfigEntry> {
    let mut entries = Vec::new();
    let mut current: Option<SshConfigEntry> = None;
    let mut pending_comments: Vec<String> = Vec::new();

    for line in text.split('\n') {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }

        if let Some(rest) = stripped.strip_prefix('#') {
            pending_comments.push(format!("#{rest}"));
            continue;
        }

        let mut parts = stripped.splitn(2, char::is_whitespace);
        let directive = parts.next().unwrap_or("").to_lowercase();
        let value = parts
            .next()
            .unwrap_or("")
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .to_string();

        if directive == "host" {
            if let Some(mut entry) = current.take() {
                if !pending_comments.is_empty() {
                    entry.comments.append(&mut pending_comments);
                    entry.parse_metadata();
                }
                entries.push(entry);
            }
            current = Some(SshConfigEntry::new(value));
            continue;
        }

        let Some(entry) = current.as_mut() else { continue };
        match directive.as_str() {
            "hostname" => entry.hostname = (!value.is_empty()).then_some(value),
            "user" => entry.user = (!value.is_empty()).then_some(value),
            "port" => {
                if let Ok(port) = value.parse() {
                    entry.port = port;
                }
            }
            "identityfile" => entry.identity_file = (!value.is_empty()).then_some(value),
            _ => {}
        }
    }

    if let Some(mut entry) = current.take() {
        if !pending_comments.is_empty() {
            entry.comments.append(&mut pending_comments);
            entry.parse_metadata();
        }
        entries.push(entry);
    }

    entries
}

/// Render entries back to SSH config text with a VS Code Remote-SSH
/// compatible header.
pub fn generate_ssh_config(entries: &[SshConfigEntry]) -> String {
    let mut lines = vec![
        "# icotes hop configuration".to_string(),
        "# This file is compatible with VS Code Remote SSH config".to_string(),
        String::new(),
    ];

    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            lines.push(String::new());
        }
        lines.extend(entry_lines(entry));
    }

    lines.join("\n")
}

fn entry_lines(entry: &SshConfigEntry) -> Vec<String> {
    let mut lines = vec![format!("Host {}", entry.host)];

    if let Some(hostname) = &entry.hostname {
        lines.push(format!("    HostName {hostname}"));
    }
    if let Some(user) = &entry.user {
        lines.push(format!("    User {user}"));
    }
    lines.push(format!("    Port {}", entry.port));
    if let Some(identity_file) = &entry.identity_file {
        lines.push(format!("    IdentityFile {identity_file}"));
    }

    let meta = IcotesMeta {
        id: entry.icotes_id.clone(),
        auth: entry.icotes_auth.clone(),
        default_path: entry.icotes_default_path.clone(),
        created_at: entry.icotes_created_at.clone(),
        updated_at: entry.icotes_updated_at.clone(),
    };
    if meta.id.is_some() || meta.auth.is_some() || meta.default_path.is_some() {
        if let Ok(json) = serde_json::to_string(&meta) {
            lines.push(format!("    # icotes-meta: {json}"));
        }
    }

    lines
}

/// Build an `SshConfigEntry` from a credential-shaped JSON value (matching
/// `HopCredential`'s field names), computing the private key path the same
/// way the writer does for `auth == "privateKey"`.
pub fn credential_to_config_entry(cred: &Value) -> SshConfigEntry {
    let auth = cred
        .get("auth")
        .and_then(Value::as_str)
        .unwrap_or("password")
        .to_string();
    let private_key_id = cred.get("privateKeyId").and_then(Value::as_str);

    let identity_file = if auth == "privateKey" {
        private_key_id.map(|id| format!("~/.icotes/ssh/keys/{id}"))
    } else {
        None
    };

    SshConfigEntry {
        host: cred.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
        hostname: cred.get("host").and_then(Value::as_str).map(String::from),
        user: cred
            .get("username")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from),
        port: cred.get("port").and_then(Value::as_u64).unwrap_or(22) as u16,
        identity_file,
        icotes_id: cred.get("id").and_then(Value::as_str).map(String::from),
        icotes_auth: Some(auth),
        icotes_default_path: cred.get("defaultPath").and_then(Value::as_str).map(String::from),
        icotes_created_at: cred.get("createdAt").and_then(Value::as_str).map(String::from),
        icotes_updated_at: cred.get("updatedAt").and_then(Value::as_str).map(String::from),
        comments: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
Host myhop
    HostName 10.0.0.5
    User alice
    Port 2222
    IdentityFile ~/.icotes/ssh/keys/myhop_key
    # icotes-meta: {"id": "cred-1", "auth": "privateKey", "createdAt": "2026-01-01T00:00:00Z"}
"#;

    #[test]
    fn round_trip_parse_and_generate() {
        let entries = parse_ssh_config(SAMPLE);
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.host, "myhop");
        assert_eq!(e.hostname.as_deref(), Some("10.0.0.5"));
        assert_eq!(e.user.as_deref(), Some("alice"));
        assert_eq!(e.port, 2222);
        assert_eq!(e.icotes_id.as_deref(), Some("cred-1"));
        assert_eq!(e.icotes_auth.as_deref(), Some("privateKey"));
        assert_eq!(e.key_id().as_deref(), Some("myhop_key"));

        let regenerated = generate_ssh_config(&entries);
        let reparsed = parse_ssh_config(&regenerated);
        assert_eq!(reparsed, entries);
    }

    #[test]
    fn invalid_port_keeps_default() {
        let entries = parse_ssh_config("Host x\n    Port notanumber\n");
        assert_eq!(entries[0].port, 22);
    }

    #[test]
    fn credential_to_entry_computes_private_key_path() {
        let cred = serde_json::json!({
            "id": "c1", "name": "box", "host": "1.2.3.4", "username": "bob",
            "port": 22, "auth": "privateKey", "privateKeyId": "box_key"
        });
        let entry = credential_to_config_entry(&cred);
        assert_eq!(entry.identity_file.as_deref(), Some("~/.icotes/ssh/keys/box_key"));
    }

    #[test]
    fn multiple_hosts_parse_independently() {
        let text = "Host a\n    HostName 1.1.1.1\n\nHost b\n    HostName 2.2.2.2\n";
        let entries = parse_ssh_config(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].hostname.as_deref(), Some("2.2.2.2"));
    }
}
