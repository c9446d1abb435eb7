//! Repository descriptors.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage backend kind of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepositoryKind {
    Local,
    S3,
    B2,
    Sftp,
    Rest,
    Dropbox,
}

impl RepositoryKind {
    pub fn label(&self) -> &'static str {
        match self {
            RepositoryKind::Local => "local",
            RepositoryKind::S3 => "s3",
            RepositoryKind::B2 => "b2",
            RepositoryKind::Sftp => "sftp",
            RepositoryKind::Rest => "rest",
            RepositoryKind::Dropbox => "dropbox",
        }
    }
}

/// A backup repository. The backend configuration is stored encrypted;
/// decryption is injected into the schedulers at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub kind: RepositoryKind,
    /// Encrypted backend configuration blob.
    pub encrypted_config: Vec<u8>,
}

impl Repository {
    pub fn new(org_id: Uuid, name: impl Into<String>, kind: RepositoryKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            name: name.into(),
            kind,
            encrypted_config: Vec::new(),
        }
    }
}
