//! icpy - real-time session and event fabric
//!
//! This is the main convenience crate that re-exports all icpy sub-crates.
//! Use this crate if you want a single dependency that provides both client
//! and server functionality.
//!
//! # Architecture
//!
//! icpy is organized into modular crates:
//!
//! - **icpy-core**: Core types, codec, error handling, observability
//! - **icpy-server**: WebSocket JSON-RPC server with pub/sub
//! - **icpy-client**: WebSocket JSON-RPC client with reconnection
//! - **icpy-macros**: Procedural macros for handler generation
//!
//! # Quick Start - Server
//!
//! ```rust,no_run
//! use icpy::IcpyServer;
//! use icpy::server::from_typed_fn;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct AddParams { a: i32, b: i32 }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let addr: std::net::SocketAddr = "127.0.0.1:8080".parse()?;
//!     let server = IcpyServer::builder()
//!         .bind(addr)
//!         .handler("add", from_typed_fn(|p: AddParams| async move {
//!             Ok(p.a + p.b)
//!         }))
//!         .build()
//!         .await?;
//!     
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Quick Start - Client
//!
//! ```rust,no_run
//! use icpy::IcpyClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = IcpyClient::connect("ws://localhost:8080").await?;
//!     
//!     let result: serde_json::Value = client.request("add", serde_json::json!({"a": 5, "b": 3})).await?;
//!     println!("Result: {}", result);
//!     
//!     Ok(())
//! }
//! ```

// Re-export all public APIs from sub-crates
// This allows users to access everything through `icpy::` prefix
pub use icpy_client as client;
pub use icpy_core as core;
pub use icpy_macros as macros;
pub use icpy_server as server;

// Convenience re-exports of the most commonly used types
// This avoids needing to write `icpy::server::IcpyServer`
pub use icpy_client::IcpyClient;
pub use icpy_server::IcpyServer;


