//! Injected repository secret resolution.
//!
//! Configuration decryption and password retrieval are external
//! collaborators; schedulers receive them as functions at construction and
//! fail fast (`ConfigMissing`) when a required function was never injected.

use std::sync::Arc;

use strata_core::error::{CoreError, Result};
use strata_core::model::Repository;
use strata_engine::{EngineConfig, RepositoryBackend};

/// Decrypts a repository's configuration blob into backend JSON.
pub type DecryptFn = Arc<dyn Fn(&Repository) -> Result<serde_json::Value> + Send + Sync>;
/// Resolves a repository's engine password.
pub type PasswordFn = Arc<dyn Fn(&Repository) -> Result<String> + Send + Sync>;

/// Bundle of injected secret functions, shared by all schedulers.
#[derive(Clone, Default)]
pub struct RepositoryCredentials {
    decrypt: Option<DecryptFn>,
    password: Option<PasswordFn>,
}

impl RepositoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decrypt_fn(mut self, decrypt: DecryptFn) -> Self {
        self.decrypt = Some(decrypt);
        self
    }

    pub fn with_password_fn(mut self, password: PasswordFn) -> Self {
        self.password = Some(password);
        self
    }

    /// Decrypt, parse, and bundle a repository into an engine config.
    pub fn resolve(&self, repository: &Repository) -> Result<EngineConfig> {
        let decrypt = self.decrypt.as_ref().ok_or_else(|| {
            CoreError::ConfigMissing(
                "no repository config decryption function injected".to_string(),
            )
        })?;
        let password_fn = self.password.as_ref().ok_or_else(|| {
            CoreError::ConfigMissing("no repository password function injected".to_string())
        })?;
        let config = decrypt(repository)?;
        let backend = RepositoryBackend::from_repository(repository.kind, &config)?;
        let password = password_fn(repository)?;
        Ok(EngineConfig::new(&backend, password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::model::RepositoryKind;

    #[test]
    fn missing_functions_are_config_missing() {
        let repository = Repository::new(uuid::Uuid::new_v4(), "r", RepositoryKind::Local);
        let err = RepositoryCredentials::new()
            .resolve(&repository)
            .unwrap_err();
        assert!(matches!(err, CoreError::ConfigMissing(_)));
    }

    #[test]
    fn resolves_engine_config() {
        let mut repository = Repository::new(uuid::Uuid::new_v4(), "r", RepositoryKind::Local);
        repository.encrypted_config =
            serde_json::to_vec(&serde_json::json!({ "path": "/srv/repo" })).unwrap();

        let credentials = RepositoryCredentials::new()
            .with_decrypt_fn(Arc::new(|r: &Repository| {
                serde_json::from_slice(&r.encrypted_config).map_err(CoreError::from)
            }))
            .with_password_fn(Arc::new(|_| Ok("pw".to_string())));

        let config = credentials.resolve(&repository).unwrap();
        assert_eq!(config.repository_uri, "/srv/repo");
        assert_eq!(config.password, "pw");
    }
}
