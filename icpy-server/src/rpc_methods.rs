//! Registers the JSON-RPC surface §6 names onto a [`crate::router::Router`]
//! — `connection.*`, `auth.*`, `message.*`, `file.*`, `hop.*`, `terminal.*` —
//! against the services [`crate::fabric::Fabric`] builds. Called from
//! `Fabric::build` before the router is handed to [`crate::ws_api::WsApi`],
//! so the same methods are reachable from a bare `/rpc` HTTP handler and
//! from WS `jsonrpc` frames alike.
//!
//! `execute.*`/`preview` are not registered here: `WsApi` already forwards
//! those WS frame types straight to the pluggable [`crate::ws_api::ExecutionSink`]
//! (§4.E), and that path needs the caller's connection id and, for
//! streaming, its outbound sink — neither of which a router `Handler` has.

use crate::conn_manager::ConnectionManager;
use crate::context_router::{ContextRouter, FsHandle};
use crate::handler::{from_fn, from_typed_fn};
use crate::hop::{AuthMethod, HopCredential, HopService};
use crate::local_terminal::{LocalTerminalService, TerminalConfig};
use crate::remote_terminal::RemoteTerminalManager;
use crate::router::Router;
use crate::ws_api::ExecutionSink;
use crate::MessageBroker;
use icpy_core::Error;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}

#[allow(clippy::too_many_arguments)]
pub fn register(
    router: &mut Router,
    connections: Arc<ConnectionManager>,
    broker: MessageBroker,
    hop: Arc<HopService>,
    context_router: Arc<ContextRouter>,
    local_terminal: Arc<LocalTerminalService>,
    remote_terminal: Arc<RemoteTerminalManager>,
    _execution: Option<Arc<dyn ExecutionSink>>,
) {
    router.register(
        "connection.ping",
        from_fn(|_| async { Ok(json!({"pong": true, "timestamp": now_ts()})) }),
    );

    {
        let connections = connections.clone();
        router.register(
            "connection.info",
            from_typed_fn(move |params: ConnectionInfoParams| {
                let connections = connections.clone();
                async move {
                    let snapshot = connections
                        .get_connection(params.id)
                        .await
                        .ok_or_else(|| Error::NotFound(format!("connection {}", params.id)))?;
                    Ok(json!({
                        "id": snapshot.id,
                        "kind": format!("{:?}", snapshot.kind),
                        "state": format!("{:?}", snapshot.state),
                        "session_id": snapshot.session_id,
                        "user_id": snapshot.user_id,
                    }))
                }
            }),
        );
    }

    {
        let connections = connections.clone();
        router.register(
            "connection.stats",
            from_fn(move |_| {
                let connections = connections.clone();
                async move { Ok(json!(connections.get_stats().await)) }
            }),
        );
    }

    {
        let connections = connections.clone();
        router.register(
            "auth.login",
            from_typed_fn(move |params: AuthLoginParams| {
                let connections = connections.clone();
                async move {
                    connections.authenticate(params.connection_id, params.user_id.clone()).await?;
                    Ok(json!({"authenticated": true, "user_id": params.user_id}))
                }
            }),
        );
    }

    {
        let connections = connections.clone();
        router.register(
            "auth.logout",
            from_typed_fn(move |params: ConnectionInfoParams| {
                let connections = connections.clone();
                async move {
                    connections.disconnect(params.id, "Logout requested").await;
                    Ok(json!({"logged_out": true}))
                }
            }),
        );
    }

    {
        let broker = broker.clone();
        router.register(
            "message.send",
            from_typed_fn(move |params: MessageSendParams| {
                let broker = broker.clone();
                async move {
                    let id = broker
                        .publish(
                            params.topic,
                            params.payload,
                            crate::MessageType::Notification,
                            params.sender,
                            params.ttl,
                            None,
                            None,
                        )
                        .await?;
                    Ok(json!({"message_id": id}))
                }
            }),
        );
    }

    {
        let connections = connections.clone();
        router.register(
            "message.broadcast",
            from_typed_fn(move |params: MessageBroadcastParams| {
                let connections = connections.clone();
                async move {
                    connections.broadcast(params.payload, |_| true).await;
                    Ok(json!({"broadcast": true}))
                }
            }),
        );
    }

    register_file_methods(router, context_router.clone());
    register_hop_methods(router, hop);
    register_terminal_methods(router, context_router, local_terminal, remote_terminal);
}

#[derive(Deserialize)]
struct ConnectionInfoParams {
    id: u64,
}

#[derive(Deserialize)]
struct AuthLoginParams {
    connection_id: u64,
    user_id: String,
}

#[derive(Deserialize)]
struct MessageSendParams {
    topic: String,
    payload: Value,
    sender: Option<String>,
    ttl: Option<f64>,
}

#[derive(Deserialize)]
struct MessageBroadcastParams {
    payload: Value,
}

#[derive(Deserialize)]
struct FileCwdPathParams {
    #[serde(default = "default_cwd")]
    cwd: String,
    path: String,
}

#[derive(Deserialize)]
struct FileWriteParams {
    #[serde(default = "default_cwd")]
    cwd: String,
    path: String,
    content_base64: String,
}

#[derive(Deserialize)]
struct FileMoveParams {
    #[serde(default = "default_cwd")]
    cwd: String,
    src: String,
    dest: String,
}

#[derive(Deserialize)]
struct FileSearchParams {
    #[serde(default = "default_cwd")]
    cwd: String,
    path: String,
    pattern: String,
}

#[derive(Deserialize)]
struct FileStreamParams {
    #[serde(default = "default_cwd")]
    cwd: String,
    path: String,
    #[serde(default)]
    offset: u64,
    chunk_size: Option<usize>,
}

fn default_cwd() -> String {
    "/".to_string()
}

fn register_file_methods(router: &mut Router, context_router: Arc<ContextRouter>) {
    {
        let context_router = context_router.clone();
        router.register(
            "file.list_directory",
            from_typed_fn(move |params: FileCwdPathParams| {
                let context_router = context_router.clone();
                async move {
                    let entries = match context_router.get_filesystem().await {
                        FsHandle::Local(fs) => fs.list_directory(&params.cwd, &params.path).await?,
                        FsHandle::Remote(fs) => fs.list_directory(&params.cwd, &params.path).await?,
                    };
                    Ok(json!(entries))
                }
            }),
        );
    }

    {
        let context_router = context_router.clone();
        router.register(
            "file.read",
            from_typed_fn(move |params: FileCwdPathParams| {
                let context_router = context_router.clone();
                async move {
                    let bytes = match context_router.get_filesystem().await {
                        FsHandle::Local(fs) => fs.read_file(&params.cwd, &params.path).await?,
                        FsHandle::Remote(fs) => fs.read_file(&params.cwd, &params.path).await?,
                    };
                    use base64::Engine;
                    Ok(json!({"content_base64": base64::engine::general_purpose::STANDARD.encode(bytes)}))
                }
            }),
        );
    }

    {
        let context_router = context_router.clone();
        router.register(
            "file.write",
            from_typed_fn(move |params: FileWriteParams| {
                let context_router = context_router.clone();
                async move {
                    use base64::Engine;
                    let content = base64::engine::general_purpose::STANDARD
                        .decode(&params.content_base64)
                        .map_err(|e| Error::InvalidParams(e.to_string()))?;
                    match context_router.get_filesystem().await {
                        FsHandle::Local(fs) => fs.write_file(&params.cwd, &params.path, &content).await?,
                        FsHandle::Remote(fs) => fs.write_file(&params.cwd, &params.path, &content).await?,
                    };
                    Ok(json!({"written": true}))
                }
            }),
        );
    }

    {
        let context_router = context_router.clone();
        router.register(
            "file.delete",
            from_typed_fn(move |params: FileCwdPathParams| {
                let context_router = context_router.clone();
                async move {
                    match context_router.get_filesystem().await {
                        FsHandle::Local(fs) => fs.delete(&params.cwd, &params.path).await?,
                        FsHandle::Remote(fs) => fs.delete(&params.cwd, &params.path).await?,
                    };
                    Ok(json!({"deleted": true}))
                }
            }),
        );
    }

    {
        let context_router = context_router.clone();
        router.register(
            "file.create_directory",
            from_typed_fn(move |params: FileCwdPathParams| {
                let context_router = context_router.clone();
                async move {
                    match context_router.get_filesystem().await {
                        FsHandle::Local(fs) => fs.create_directory(&params.cwd, &params.path).await?,
                        FsHandle::Remote(fs) => fs.create_directory(&params.cwd, &params.path).await?,
                    };
                    Ok(json!({"created": true}))
                }
            }),
        );
    }

    {
        let context_router = context_router.clone();
        router.register(
            "file.move",
            from_typed_fn(move |params: FileMoveParams| {
                let context_router = context_router.clone();
                async move {
                    match context_router.get_filesystem().await {
                        FsHandle::Local(fs) => fs.move_path(&params.cwd, &params.src, &params.dest).await?,
                        FsHandle::Remote(fs) => fs.move_path(&params.cwd, &params.src, &params.dest).await?,
                    };
                    Ok(json!({"moved": true}))
                }
            }),
        );
    }

    {
        let context_router = context_router.clone();
        router.register(
            "file.copy",
            from_typed_fn(move |params: FileMoveParams| {
                let context_router = context_router.clone();
                async move {
                    match context_router.get_filesystem().await {
                        FsHandle::Local(fs) => fs.copy(&params.cwd, &params.src, &params.dest).await?,
                        FsHandle::Remote(fs) => fs.copy(&params.cwd, &params.src, &params.dest).await?,
                    };
                    Ok(json!({"copied": true}))
                }
            }),
        );
    }

    {
        let context_router = context_router.clone();
        router.register(
            "file.search",
            from_typed_fn(move |params: FileSearchParams| {
                let context_router = context_router.clone();
                async move {
                    let entries = match context_router.get_filesystem().await {
                        FsHandle::Local(fs) => fs.search(&params.cwd, &params.path, &params.pattern).await?,
                        FsHandle::Remote(fs) => fs.search(&params.cwd, &params.path, &params.pattern).await?,
                    };
                    Ok(json!(entries))
                }
            }),
        );
    }

    router.register(
        "file.stream_file",
        from_typed_fn(move |params: FileStreamParams| {
            let context_router = context_router.clone();
            async move {
                let (chunk, has_more) = match context_router.get_filesystem().await {
                    FsHandle::Local(fs) => fs.stream_file(&params.cwd, &params.path, params.offset, params.chunk_size).await?,
                    FsHandle::Remote(fs) => fs.stream_file(&params.cwd, &params.path, params.offset, params.chunk_size).await?,
                };
                use base64::Engine;
                Ok(json!({
                    "content_base64": base64::engine::general_purpose::STANDARD.encode(&chunk),
                    "bytes_read": chunk.len(),
                    "has_more": has_more,
                }))
            }
        }),
    );
}

#[derive(Deserialize)]
struct CredentialIdParams {
    id: String,
}

#[derive(Deserialize)]
struct CreateCredentialParams {
    name: String,
    host: String,
    username: String,
    port: u16,
    auth: AuthMethod,
    private_key_id: Option<String>,
    default_path: Option<String>,
}

#[derive(Deserialize)]
struct UpdateCredentialParams {
    id: String,
    name: Option<String>,
    host: Option<String>,
    username: Option<String>,
    port: Option<u16>,
    auth: Option<AuthMethod>,
    private_key_id: Option<String>,
    default_path: Option<String>,
}

#[derive(Deserialize)]
struct ConnectParams {
    #[serde(rename = "credentialId")]
    credential_id: String,
    password: Option<String>,
    passphrase: Option<String>,
}

/// `hop.disconnect`/`hop.check_health` both accept an optional context id,
/// and are routinely called with no params at all to mean "the active
/// context" — `from_typed_fn`'s null-to-unit fallback can't cover that for
/// an all-optional struct, so these two parse the raw `Value` by hand.
fn context_id_param(params: Option<Value>) -> Option<String> {
    params
        .as_ref()
        .and_then(|v| v.get("context_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn register_hop_methods(router: &mut Router, hop: Arc<HopService>) {
    {
        let hop = hop.clone();
        router.register(
            "hop.list_credentials",
            from_fn(move |_| {
                let hop = hop.clone();
                async move { Ok(json!(hop.credentials().list()?)) }
            }),
        );
    }

    {
        let hop = hop.clone();
        router.register(
            "hop.create_credential",
            from_typed_fn(move |params: CreateCredentialParams| {
                let hop = hop.clone();
                async move {
                    let ts = now_ts();
                    let credential = HopCredential {
                        id: format!("cred-{}", rand::random::<u32>()),
                        name: params.name,
                        host: params.host,
                        username: params.username,
                        port: params.port,
                        auth: params.auth,
                        private_key_id: params.private_key_id,
                        default_path: params.default_path,
                        created_at: ts.clone(),
                        updated_at: ts,
                    };
                    hop.credentials().upsert(credential.clone())?;
                    Ok(json!(credential))
                }
            }),
        );
    }

    {
        let hop = hop.clone();
        router.register(
            "hop.update_credential",
            from_typed_fn(move |params: UpdateCredentialParams| {
                let hop = hop.clone();
                async move {
                    let mut credential = hop.credentials().get(&params.id)?;
                    if let Some(name) = params.name {
                        credential.name = name;
                    }
                    if let Some(host) = params.host {
                        credential.host = host;
                    }
                    if let Some(username) = params.username {
                        credential.username = username;
                    }
                    if let Some(port) = params.port {
                        credential.port = port;
                    }
                    if let Some(auth) = params.auth {
                        credential.auth = auth;
                    }
                    if params.private_key_id.is_some() {
                        credential.private_key_id = params.private_key_id;
                    }
                    if params.default_path.is_some() {
                        credential.default_path = params.default_path;
                    }
                    credential.updated_at = now_ts();
                    hop.credentials().upsert(credential.clone())?;
                    Ok(json!(credential))
                }
            }),
        );
    }

    {
        let hop = hop.clone();
        router.register(
            "hop.delete_credential",
            from_typed_fn(move |params: CredentialIdParams| {
                let hop = hop.clone();
                async move {
                    hop.credentials().delete(&params.id)?;
                    Ok(json!({"deleted": true}))
                }
            }),
        );
    }

    {
        let hop = hop.clone();
        router.register(
            "hop.connect",
            from_typed_fn(move |params: ConnectParams| {
                let hop = hop.clone();
                async move {
                    let session = hop
                        .connect(&params.credential_id, params.password.as_deref(), params.passphrase.as_deref())
                        .await?;
                    Ok(json!(session))
                }
            }),
        );
    }

    {
        let hop = hop.clone();
        router.register(
            "hop.disconnect",
            from_fn(move |params| {
                let hop = hop.clone();
                async move {
                    let context_id = context_id_param(params);
                    let session = hop.disconnect(context_id.as_deref()).await?;
                    Ok(json!(session))
                }
            }),
        );
    }

    {
        let hop = hop.clone();
        router.register(
            "hop.status",
            from_fn(move |_| {
                let hop = hop.clone();
                async move { Ok(json!(hop.status().await)) }
            }),
        );
    }

    {
        let hop = hop.clone();
        router.register(
            "hop.list_sessions",
            from_fn(move |_| {
                let hop = hop.clone();
                async move { Ok(json!(hop.list_sessions().await)) }
            }),
        );
    }

    router.register(
        "hop.check_health",
        from_fn(move |params| {
            let hop = hop.clone();
            async move {
                let context_id = match context_id_param(params) {
                    Some(id) => id,
                    None => hop.status().await.context_id,
                };
                let quality = hop.check_connection_health(&context_id).await?;
                Ok(json!({"quality": quality}))
            }
        }),
    );
}

#[derive(Deserialize)]
struct TerminalCreateParams {
    name: Option<String>,
    #[serde(default)]
    config: TerminalConfig,
}

#[derive(Deserialize)]
struct TerminalIdParams {
    id: String,
}

#[derive(Deserialize)]
struct TerminalResizeParams {
    id: String,
    cols: u16,
    rows: u16,
}

fn register_terminal_methods(
    router: &mut Router,
    context_router: Arc<ContextRouter>,
    local_terminal: Arc<LocalTerminalService>,
    remote_terminal: Arc<RemoteTerminalManager>,
) {
    {
        let context_router = context_router.clone();
        let local_terminal = local_terminal.clone();
        router.register(
            "terminal.create",
            from_fn(move |params| {
                let context_router = context_router.clone();
                let local_terminal = local_terminal.clone();
                async move {
                    let params: TerminalCreateParams = match params {
                        Some(v) => serde_json::from_value(v).map_err(|e| Error::InvalidParams(e.to_string()))?,
                        None => TerminalCreateParams { name: None, config: TerminalConfig::default() },
                    };
                    match context_router.get_terminal_service().await {
                        crate::context_router::TerminalHandle::Local(_) => {
                            let id = local_terminal.create_session(params.name, params.config).await?;
                            Ok(json!({"id": id, "remote": false}))
                        }
                        crate::context_router::TerminalHandle::Remote(_) => {
                            Err(Error::Terminal("remote terminal creation is driven by the WebSocket attach flow, not terminal.create".into()))
                        }
                    }
                }
            }),
        );
    }

    {
        let local_terminal = local_terminal.clone();
        router.register(
            "terminal.resize",
            from_typed_fn(move |params: TerminalResizeParams| {
                let local_terminal = local_terminal.clone();
                async move {
                    local_terminal.resize(&params.id, params.cols, params.rows).await?;
                    Ok(json!({"resized": true}))
                }
            }),
        );
    }

    router.register(
        "terminal.destroy",
        from_typed_fn(move |params: TerminalIdParams| {
            let local_terminal = local_terminal.clone();
            let remote_terminal = remote_terminal.clone();
            async move {
                if local_terminal.list_sessions().await.iter().any(|s| s == &params.id) {
                    local_terminal.destroy_session(&params.id).await?;
                } else {
                    remote_terminal.disconnect_terminal(&params.id).await;
                }
                Ok(json!({"destroyed": true}))
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn_manager::ConnectionManagerConfig;
    use crate::config::FabricConfig;
    use crate::hop::HopService;
    use crate::local_fs::LocalFsAdapter;
    use crate::remote_fs::RemoteFsAdapter;
    use std::time::Duration;

    fn test_config(workspace_root: std::path::PathBuf) -> FabricConfig {
        FabricConfig {
            workspace_root,
            hop_connection_timeout: Duration::from_secs(15),
            hop_operation_timeout: Duration::from_secs(30),
            hop_reconnect_max_retries: 1,
            hop_reconnect_backoff_base: 0.01,
            hop_debug_mode: false,
            remote_shell: "/bin/bash".into(),
        }
    }

    async fn build_test_router(workspace_root: std::path::PathBuf) -> Router {
        let broker = MessageBroker::new(crate::broker::BrokerConfig::default());
        let connections = Arc::new(ConnectionManager::new(broker.clone(), ConnectionManagerConfig::default()));
        let config = test_config(workspace_root.clone());
        let hop = Arc::new(HopService::new(config.clone(), broker.clone()));
        let local_fs = Arc::new(LocalFsAdapter::new(workspace_root, broker.clone()));
        let remote_fs = Arc::new(RemoteFsAdapter::new(hop.clone(), broker.clone(), config.hop_operation_timeout));
        let local_terminal = Arc::new(LocalTerminalService::new(broker.clone()));
        let remote_terminal = Arc::new(RemoteTerminalManager::new(hop.clone(), config.remote_shell.clone()));
        let context_router = Arc::new(ContextRouter::new(
            hop.clone(),
            local_fs,
            remote_fs,
            local_terminal.clone(),
            remote_terminal.clone(),
        ));

        let mut router = Router::new();
        register(&mut router, connections, broker, hop, context_router, local_terminal, remote_terminal, None);
        router
    }

    #[tokio::test]
    async fn connection_ping_has_no_required_params() {
        let router = build_test_router(std::env::temp_dir()).await;
        let result = router.route("connection.ping", None).await.unwrap();
        assert_eq!(result["pong"], json!(true));
    }

    #[tokio::test]
    async fn hop_status_defaults_to_local_context() {
        let router = build_test_router(std::env::temp_dir()).await;
        let result = router.route("hop.status", None).await.unwrap();
        assert_eq!(result["context_id"], json!("local"));
    }

    #[tokio::test]
    async fn hop_disconnect_with_no_params_is_a_local_noop() {
        let router = build_test_router(std::env::temp_dir()).await;
        let result = router.route("hop.disconnect", None).await.unwrap();
        assert_eq!(result["context_id"], json!("local"));
    }

    #[tokio::test]
    async fn hop_check_health_with_no_params_checks_active_context() {
        let router = build_test_router(std::env::temp_dir()).await;
        let result = router.route("hop.check_health", None).await.unwrap();
        assert_eq!(result["quality"], json!("good"));
    }

    #[tokio::test]
    async fn terminal_create_with_no_params_uses_default_config() {
        let router = build_test_router(std::env::temp_dir()).await;
        let result = router.route("terminal.create", None).await.unwrap();
        assert_eq!(result["remote"], json!(false));
        assert!(result["id"].as_str().unwrap().starts_with("term-"));
    }

    #[tokio::test]
    async fn file_write_then_read_round_trips_through_base64() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_test_router(dir.path().to_path_buf()).await;

        use base64::Engine;
        let content_base64 = base64::engine::general_purpose::STANDARD.encode(b"hello fabric");
        router
            .route(
                "file.write",
                Some(json!({"path": "notes.txt", "content_base64": content_base64})),
            )
            .await
            .unwrap();

        let result = router
            .route("file.read", Some(json!({"path": "notes.txt"})))
            .await
            .unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(result["content_base64"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, b"hello fabric");
    }

    #[tokio::test]
    async fn file_copy_and_move_and_search_through_rpc() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_test_router(dir.path().to_path_buf()).await;

        use base64::Engine;
        let content_base64 = base64::engine::general_purpose::STANDARD.encode(b"payload");
        router
            .route("file.write", Some(json!({"path": "a.rs", "content_base64": content_base64})))
            .await
            .unwrap();

        router.route("file.copy", Some(json!({"src": "a.rs", "dest": "b.rs"}))).await.unwrap();
        let read_back = router.route("file.read", Some(json!({"path": "b.rs"}))).await.unwrap();
        assert!(read_back["content_base64"].as_str().is_some());

        let found = router.route("file.search", Some(json!({"path": "/", "pattern": "*.rs"}))).await.unwrap();
        let names: Vec<String> = found
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"a.rs".to_string()));
        assert!(names.contains(&"b.rs".to_string()));

        router.route("file.move", Some(json!({"src": "b.rs", "dest": "c.rs"}))).await.unwrap();
        assert!(router.route("file.read", Some(json!({"path": "c.rs"}))).await.is_ok());
        assert!(router.route("file.read", Some(json!({"path": "b.rs"}))).await.is_err());
    }

    #[tokio::test]
    async fn file_stream_file_reports_has_more_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_test_router(dir.path().to_path_buf()).await;

        use base64::Engine;
        let content_base64 = base64::engine::general_purpose::STANDARD.encode(b"0123456789");
        router
            .route("file.write", Some(json!({"path": "big.txt", "content_base64": content_base64})))
            .await
            .unwrap();

        let first = router
            .route("file.stream_file", Some(json!({"path": "big.txt", "offset": 0, "chunk_size": 4})))
            .await
            .unwrap();
        assert_eq!(first["bytes_read"], json!(4));
        assert_eq!(first["has_more"], json!(true));

        let last = router
            .route("file.stream_file", Some(json!({"path": "big.txt", "offset": 8, "chunk_size": 4})))
            .await
            .unwrap();
        assert_eq!(last["bytes_read"], json!(2));
        assert_eq!(last["has_more"], json!(false));
    }

    #[tokio::test]
    async fn hop_create_and_list_credentials_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_test_router(dir.path().to_path_buf()).await;

        let created = router
            .route(
                "hop.create_credential",
                Some(json!({
                    "name": "box1",
                    "host": "example.com",
                    "username": "dev",
                    "port": 22,
                    "auth": "password",
                })),
            )
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let list = router.route("hop.list_credentials", None).await.unwrap();
        assert!(list.as_array().unwrap().iter().any(|c| c["id"] == json!(id)));
    }
}
