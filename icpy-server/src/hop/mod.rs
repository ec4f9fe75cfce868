//! Hop Service (4.F): SSH connection management, credential storage, and
//! the ephemeral SFTP/SSH locking discipline used by the Remote FS Adapter
//! and Remote Terminal Manager.
//!
//! Grounded on `original_source/backend/icpy/services/hop_service.py` and
//! `icpy/utils/ssh_config_{parser,writer}.py`.

pub mod credential;
pub mod service;
pub mod session;
pub mod ssh_config;

pub use credential::{AuthMethod, HopCredential, HopCredentialStore};
pub use service::HopService;
pub use session::{HopSession, HopSessionState};
