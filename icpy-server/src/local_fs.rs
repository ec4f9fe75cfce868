//! Local filesystem backend selected by [`crate::context_router::ContextRouter`]
//! when no remote hop is active. Mirrors [`crate::remote_fs::RemoteFsAdapter`]'s
//! operation set and `FileInfo` shape so `file.*` JSON-RPC handlers can treat
//! both backends identically; `FileInfo::remote` is the only observable
//! difference (S6).
//!
//! Every path is resolved under `workspace_root` — a resolved path can never
//! escape it, whatever `cwd`/`path` combination a caller supplies.

use crate::broker::{MessageBroker, MessageType};
use crate::remote_fs::FileInfo;
use icpy_core::{Error, Result};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Chunk size `stream_file` reads per call, matching the remote adapter's
/// SFTP chunking so callers can treat both backends identically.
pub const STREAM_CHUNK_SIZE: usize = 1024 * 1024;

fn resolve_path(workspace_root: &Path, cwd: &str, path: &str) -> Result<PathBuf> {
    let combined = if let Some(stripped) = path.strip_prefix('/') {
        PathBuf::from(stripped)
    } else {
        Path::new(cwd.trim_start_matches('/')).join(path)
    };

    let mut normalized = PathBuf::new();
    for component in combined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(Error::PathTraversal(path.to_string()));
                }
            }
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Ok(workspace_root.join(normalized))
}

pub struct LocalFsAdapter {
    workspace_root: PathBuf,
    broker: MessageBroker,
}

impl LocalFsAdapter {
    pub fn new(workspace_root: PathBuf, broker: MessageBroker) -> Self {
        Self { workspace_root, broker }
    }

    async fn emit(&self, event: &str, payload: serde_json::Value) {
        let _ = self
            .broker
            .publish(format!("fs.{event}"), payload, MessageType::Notification, None, None, None, None)
            .await;
    }

    async fn file_info(path: &Path, display_path: &str) -> Result<FileInfo> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| Error::Fs(e.to_string()))?;
        let modified_at = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        Ok(FileInfo {
            path: display_path.to_string(),
            name: path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
            size: metadata.len(),
            is_directory: metadata.is_dir(),
            modified_at,
            remote: false,
        })
    }

    pub async fn list_directory(&self, cwd: &str, dir_path: &str) -> Result<Vec<FileInfo>> {
        let resolved = resolve_path(&self.workspace_root, cwd, dir_path)?;
        let mut read_dir = tokio::fs::read_dir(&resolved).await.map_err(|e| Error::Fs(e.to_string()))?;
        let mut out = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| Error::Fs(e.to_string()))? {
            let display_path = format!("{}/{}", dir_path.trim_end_matches('/'), entry.file_name().to_string_lossy());
            out.push(Self::file_info(&entry.path(), &display_path).await?);
        }
        self.emit("listed", serde_json::json!({"path": dir_path})).await;
        Ok(out)
    }

    pub async fn read_file(&self, cwd: &str, file_path: &str) -> Result<Vec<u8>> {
        let resolved = resolve_path(&self.workspace_root, cwd, file_path)?;
        tokio::fs::read(&resolved).await.map_err(|e| Error::Fs(e.to_string()))
    }

    pub async fn write_file(&self, cwd: &str, file_path: &str, content: &[u8]) -> Result<()> {
        let resolved = resolve_path(&self.workspace_root, cwd, file_path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| Error::Fs(e.to_string()))?;
        }
        tokio::fs::write(&resolved, content).await.map_err(|e| Error::Fs(e.to_string()))?;
        self.emit("file_written", serde_json::json!({"path": file_path})).await;
        Ok(())
    }

    pub async fn create_directory(&self, cwd: &str, dir_path: &str) -> Result<()> {
        let resolved = resolve_path(&self.workspace_root, cwd, dir_path)?;
        tokio::fs::create_dir_all(&resolved).await.map_err(|e| Error::Fs(e.to_string()))?;
        self.emit("directory_created", serde_json::json!({"path": dir_path})).await;
        Ok(())
    }

    pub async fn delete(&self, cwd: &str, path: &str) -> Result<()> {
        let resolved = resolve_path(&self.workspace_root, cwd, path)?;
        let metadata = tokio::fs::metadata(&resolved).await.map_err(|e| Error::Fs(e.to_string()))?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&resolved).await.map_err(|e| Error::Fs(e.to_string()))?;
        } else {
            tokio::fs::remove_file(&resolved).await.map_err(|e| Error::Fs(e.to_string()))?;
        }
        self.emit("deleted", serde_json::json!({"path": path})).await;
        Ok(())
    }

    pub async fn move_path(&self, cwd: &str, src: &str, dest: &str) -> Result<()> {
        let src_resolved = resolve_path(&self.workspace_root, cwd, src)?;
        let dest_resolved = resolve_path(&self.workspace_root, cwd, dest)?;
        if tokio::fs::metadata(&dest_resolved).await.is_ok() {
            let dest_metadata = tokio::fs::metadata(&dest_resolved).await.map_err(|e| Error::Fs(e.to_string()))?;
            if dest_metadata.is_dir() {
                tokio::fs::remove_dir_all(&dest_resolved).await.map_err(|e| Error::Fs(e.to_string()))?;
            } else {
                tokio::fs::remove_file(&dest_resolved).await.map_err(|e| Error::Fs(e.to_string()))?;
            }
        }
        tokio::fs::rename(&src_resolved, &dest_resolved).await.map_err(|e| Error::Fs(e.to_string()))?;
        self.emit("moved", serde_json::json!({"from": src, "to": dest})).await;
        Ok(())
    }

    pub async fn get_file_info(&self, cwd: &str, path: &str) -> Result<FileInfo> {
        let resolved = resolve_path(&self.workspace_root, cwd, path)?;
        Self::file_info(&resolved, path).await
    }

    pub async fn copy(&self, cwd: &str, src: &str, dest: &str) -> Result<()> {
        let src_resolved = resolve_path(&self.workspace_root, cwd, src)?;
        let dest_resolved = resolve_path(&self.workspace_root, cwd, dest)?;
        let metadata = tokio::fs::metadata(&src_resolved).await.map_err(|e| Error::Fs(e.to_string()))?;
        if metadata.is_dir() {
            Self::copy_dir_recursive(&src_resolved, &dest_resolved).await?;
        } else {
            if let Some(parent) = dest_resolved.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| Error::Fs(e.to_string()))?;
            }
            tokio::fs::copy(&src_resolved, &dest_resolved).await.map_err(|e| Error::Fs(e.to_string()))?;
        }
        self.emit("copied", serde_json::json!({"from": src, "to": dest})).await;
        Ok(())
    }

    fn copy_dir_recursive<'a>(src: &'a Path, dest: &'a Path) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(dest).await.map_err(|e| Error::Fs(e.to_string()))?;
            let mut entries = tokio::fs::read_dir(src).await.map_err(|e| Error::Fs(e.to_string()))?;
            while let Some(entry) = entries.next_entry().await.map_err(|e| Error::Fs(e.to_string()))? {
                let file_type = entry.file_type().await.map_err(|e| Error::Fs(e.to_string()))?;
                let dest_path = dest.join(entry.file_name());
                if file_type.is_dir() {
                    Self::copy_dir_recursive(&entry.path(), &dest_path).await?;
                } else {
                    tokio::fs::copy(entry.path(), &dest_path).await.map_err(|e| Error::Fs(e.to_string()))?;
                }
            }
            Ok(())
        })
    }

    /// Recursively searches under `dir_path` for entries whose name matches
    /// the glob `pattern` (e.g. `"**/*.rs"`). Runs on a blocking thread since
    /// the `glob` crate walks the filesystem synchronously.
    pub async fn search(&self, cwd: &str, dir_path: &str, pattern: &str) -> Result<Vec<FileInfo>> {
        let resolved = resolve_path(&self.workspace_root, cwd, dir_path)?;
        let workspace_root = self.workspace_root.clone();
        let pattern_owned = pattern.to_string();
        let matched_paths = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
            let full_pattern = resolved.join(&pattern_owned).to_string_lossy().to_string();
            let paths = glob::glob(&full_pattern)
                .map_err(|e| Error::Fs(e.to_string()))?
                .filter_map(|entry| entry.ok())
                .collect();
            Ok(paths)
        })
        .await
        .map_err(|e| Error::Fs(e.to_string()))??;

        let mut out = Vec::new();
        for path in matched_paths {
            let display_path = format!("/{}", path.strip_prefix(&workspace_root).unwrap_or(&path).to_string_lossy());
            out.push(Self::file_info(&path, &display_path).await?);
        }
        self.emit("searched", serde_json::json!({"path": dir_path, "pattern": pattern})).await;
        Ok(out)
    }

    /// Reads one chunk of `file_path` starting at `offset`, up to
    /// `chunk_size` bytes (defaults to [`STREAM_CHUNK_SIZE`]). Returns the
    /// chunk and whether more data follows it.
    pub async fn stream_file(&self, cwd: &str, file_path: &str, offset: u64, chunk_size: Option<usize>) -> Result<(Vec<u8>, bool)> {
        let resolved = resolve_path(&self.workspace_root, cwd, file_path)?;
        let chunk_size = chunk_size.unwrap_or(STREAM_CHUNK_SIZE);
        let mut file = tokio::fs::File::open(&resolved).await.map_err(|e| Error::Fs(e.to_string()))?;
        let total_len = file.metadata().await.map_err(|e| Error::Fs(e.to_string()))?.len();
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|e| Error::Fs(e.to_string()))?;
        let mut buf = vec![0u8; chunk_size];
        let n = file.read(&mut buf).await.map_err(|e| Error::Fs(e.to_string()))?;
        buf.truncate(n);
        let has_more = offset + n as u64 < total_len;
        Ok((buf, has_more))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_rejects_escape_above_root() {
        let root = Path::new("/ws");
        assert!(matches!(
            resolve_path(root, "/home/u", "../../etc/passwd"),
            Err(Error::PathTraversal(_))
        ));
    }

    #[test]
    fn resolve_path_stays_under_workspace_root() {
        let root = Path::new("/ws");
        assert_eq!(resolve_path(root, "/home/u", "./docs/../notes").unwrap(), PathBuf::from("/ws/home/u/notes"));
    }

    #[test]
    fn resolve_path_absolute_input_still_anchors_to_root() {
        let root = Path::new("/ws");
        assert_eq!(resolve_path(root, "/home/u", "/etc/hosts").unwrap(), PathBuf::from("/ws/etc/hosts"));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LocalFsAdapter::new(dir.path().to_path_buf(), MessageBroker::new(crate::broker::BrokerConfig::default()));
        adapter.write_file("/", "greeting.txt", b"hello").await.unwrap();
        let content = adapter.read_file("/", "greeting.txt").await.unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn copy_duplicates_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LocalFsAdapter::new(dir.path().to_path_buf(), MessageBroker::new(crate::broker::BrokerConfig::default()));
        adapter.write_file("/", "a.txt", b"hello").await.unwrap();
        adapter.copy("/", "a.txt", "b.txt").await.unwrap();
        assert_eq!(adapter.read_file("/", "b.txt").await.unwrap(), b"hello");
        assert_eq!(adapter.read_file("/", "a.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn copy_recurses_into_directories() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LocalFsAdapter::new(dir.path().to_path_buf(), MessageBroker::new(crate::broker::BrokerConfig::default()));
        adapter.write_file("/", "src/nested/file.txt", b"data").await.unwrap();
        adapter.copy("/", "src", "dest").await.unwrap();
        assert_eq!(adapter.read_file("/", "dest/nested/file.txt").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn search_matches_glob_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LocalFsAdapter::new(dir.path().to_path_buf(), MessageBroker::new(crate::broker::BrokerConfig::default()));
        adapter.write_file("/", "a.rs", b"1").await.unwrap();
        adapter.write_file("/", "b.txt", b"2").await.unwrap();
        adapter.write_file("/", "sub/c.rs", b"3").await.unwrap();

        let found = adapter.search("/", "/", "**/*.rs").await.unwrap();
        let names: Vec<_> = found.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"a.rs"));
        assert!(names.contains(&"c.rs"));
        assert!(!names.contains(&"b.txt"));
    }

    #[tokio::test]
    async fn stream_file_reads_bounded_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LocalFsAdapter::new(dir.path().to_path_buf(), MessageBroker::new(crate::broker::BrokerConfig::default()));
        adapter.write_file("/", "big.txt", b"0123456789").await.unwrap();

        let (chunk, has_more) = adapter.stream_file("/", "big.txt", 0, Some(4)).await.unwrap();
        assert_eq!(chunk, b"0123");
        assert!(has_more);

        let (chunk, has_more) = adapter.stream_file("/", "big.txt", 8, Some(4)).await.unwrap();
        assert_eq!(chunk, b"89");
        assert!(!has_more);
    }
}
