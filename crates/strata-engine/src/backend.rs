//! Repository backend variants and engine invocation configuration.
//!
//! The backend set is closed: each variant validates its decrypted
//! configuration, builds the engine repository URI, and contributes
//! backend-specific environment variables.

use serde_json::{json, Value};
use std::path::PathBuf;

use strata_core::error::{CoreError, Result};
use strata_core::model::RepositoryKind;

/// Default S3 endpoint when the configuration names none.
pub const DEFAULT_S3_ENDPOINT: &str = "s3.amazonaws.com";
/// Default SFTP port.
pub const DEFAULT_SFTP_PORT: u16 = 22;

/// A fully validated repository backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryBackend {
    Local {
        path: PathBuf,
    },
    S3 {
        endpoint: String,
        bucket: String,
        prefix: Option<String>,
        region: Option<String>,
        access_key: String,
        secret_key: String,
        use_https: bool,
    },
    B2 {
        bucket: String,
        prefix: Option<String>,
        account_id: String,
        account_key: String,
    },
    Sftp {
        user: String,
        host: String,
        port: u16,
        path: PathBuf,
        key_file: Option<PathBuf>,
    },
    Rest {
        url: String,
        username: Option<String>,
        password: Option<String>,
    },
    Dropbox {
        token: String,
        path: Option<String>,
    },
}

impl RepositoryBackend {
    /// Parse and validate a decrypted backend configuration.
    pub fn from_repository(kind: RepositoryKind, config: &Value) -> Result<Self> {
        match kind {
            RepositoryKind::Local => {
                let path = PathBuf::from(required(config, "path")?);
                if !path.is_absolute() {
                    return Err(CoreError::ConfigInvalid(format!(
                        "local repository path must be absolute: {}",
                        path.display()
                    )));
                }
                Ok(RepositoryBackend::Local { path })
            }
            RepositoryKind::S3 => Ok(RepositoryBackend::S3 {
                endpoint: optional(config, "endpoint")
                    .unwrap_or_else(|| DEFAULT_S3_ENDPOINT.to_string()),
                bucket: required(config, "bucket")?,
                prefix: optional(config, "prefix"),
                region: optional(config, "region"),
                access_key: required(config, "access_key")?,
                secret_key: required(config, "secret_key")?,
                use_https: config
                    .get("use_https")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            }),
            RepositoryKind::B2 => Ok(RepositoryBackend::B2 {
                bucket: required(config, "bucket")?,
                prefix: optional(config, "prefix"),
                account_id: required(config, "account_id")?,
                account_key: required(config, "account_key")?,
            }),
            RepositoryKind::Sftp => {
                let path = PathBuf::from(required(config, "path")?);
                if !path.is_absolute() {
                    return Err(CoreError::ConfigInvalid(format!(
                        "sftp repository path must be absolute: {}",
                        path.display()
                    )));
                }
                Ok(RepositoryBackend::Sftp {
                    user: required(config, "user")?,
                    host: required(config, "host")?,
                    port: config
                        .get("port")
                        .and_then(Value::as_u64)
                        .map(|p| p as u16)
                        .unwrap_or(DEFAULT_SFTP_PORT),
                    path,
                    key_file: optional(config, "key_file").map(PathBuf::from),
                })
            }
            RepositoryKind::Rest => Ok(RepositoryBackend::Rest {
                url: required(config, "url")?,
                username: optional(config, "username"),
                password: optional(config, "password"),
            }),
            RepositoryKind::Dropbox => Ok(RepositoryBackend::Dropbox {
                token: required(config, "token")?,
                path: optional(config, "path"),
            }),
        }
    }

    /// The backend kind this variant belongs to.
    pub fn kind(&self) -> RepositoryKind {
        match self {
            RepositoryBackend::Local { .. } => RepositoryKind::Local,
            RepositoryBackend::S3 { .. } => RepositoryKind::S3,
            RepositoryBackend::B2 { .. } => RepositoryKind::B2,
            RepositoryBackend::Sftp { .. } => RepositoryKind::Sftp,
            RepositoryBackend::Rest { .. } => RepositoryKind::Rest,
            RepositoryBackend::Dropbox { .. } => RepositoryKind::Dropbox,
        }
    }

    /// Canonical configuration JSON; `from_repository` of this value
    /// reproduces the backend exactly.
    pub fn to_config_json(&self) -> Value {
        match self {
            RepositoryBackend::Local { path } => json!({ "path": path }),
            RepositoryBackend::S3 {
                endpoint,
                bucket,
                prefix,
                region,
                access_key,
                secret_key,
                use_https,
            } => json!({
                "endpoint": endpoint,
                "bucket": bucket,
                "prefix": prefix,
                "region": region,
                "access_key": access_key,
                "secret_key": secret_key,
                "use_https": use_https,
            }),
            RepositoryBackend::B2 {
                bucket,
                prefix,
                account_id,
                account_key,
            } => json!({
                "bucket": bucket,
                "prefix": prefix,
                "account_id": account_id,
                "account_key": account_key,
            }),
            RepositoryBackend::Sftp {
                user,
                host,
                port,
                path,
                key_file,
            } => json!({
                "user": user,
                "host": host,
                "port": port,
                "path": path,
                "key_file": key_file,
            }),
            RepositoryBackend::Rest {
                url,
                username,
                password,
            } => json!({
                "url": url,
                "username": username,
                "password": password,
            }),
            RepositoryBackend::Dropbox { token, path } => json!({
                "token": token,
                "path": path,
            }),
        }
    }

    /// The engine repository URI for this backend.
    pub fn repository_uri(&self) -> String {
        match self {
            RepositoryBackend::Local { path } => path.display().to_string(),
            RepositoryBackend::S3 {
                endpoint,
                bucket,
                prefix,
                use_https,
                ..
            } => {
                let scheme = if *use_https { "https" } else { "http" };
                let mut uri = format!("s3:{scheme}://{endpoint}/{bucket}");
                if let Some(prefix) = prefix {
                    uri.push('/');
                    uri.push_str(prefix);
                }
                uri
            }
            RepositoryBackend::B2 { bucket, prefix, .. } => match prefix {
                Some(prefix) => format!("b2:{bucket}:{prefix}"),
                None => format!("b2:{bucket}"),
            },
            RepositoryBackend::Sftp {
                user,
                host,
                port,
                path,
                ..
            } => format!("sftp:{user}@{host}:{port}{}", path.display()),
            RepositoryBackend::Rest {
                url,
                username,
                password,
            } => format!("rest:{}", url_with_userinfo(url, username, password)),
            RepositoryBackend::Dropbox { path, .. } => {
                format!("rclone:dropbox:{}", path.as_deref().unwrap_or(""))
            }
        }
    }

    /// Backend-specific environment variables for the engine process.
    pub fn environment(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        match self {
            RepositoryBackend::Local { .. } | RepositoryBackend::Rest { .. } => {}
            RepositoryBackend::S3 {
                region,
                access_key,
                secret_key,
                ..
            } => {
                env.push(("AWS_ACCESS_KEY_ID".to_string(), access_key.clone()));
                env.push(("AWS_SECRET_ACCESS_KEY".to_string(), secret_key.clone()));
                if let Some(region) = region {
                    env.push(("AWS_DEFAULT_REGION".to_string(), region.clone()));
                }
            }
            RepositoryBackend::B2 {
                account_id,
                account_key,
                ..
            } => {
                env.push(("B2_ACCOUNT_ID".to_string(), account_id.clone()));
                env.push(("B2_ACCOUNT_KEY".to_string(), account_key.clone()));
            }
            RepositoryBackend::Sftp { key_file, .. } => {
                if let Some(key_file) = key_file {
                    env.push((
                        "RESTIC_SFTP_ARGS".to_string(),
                        format!("-i {}", key_file.display()),
                    ));
                }
            }
            RepositoryBackend::Dropbox { token, .. } => {
                env.push(("RCLONE_CONFIG_DROPBOX_TYPE".to_string(), "dropbox".to_string()));
                env.push(("RCLONE_CONFIG_DROPBOX_TOKEN".to_string(), token.clone()));
            }
        }
        env
    }
}

/// Everything one engine invocation needs to reach a repository.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub repository_uri: String,
    pub password: String,
    pub environment: Vec<(String, String)>,
}

impl EngineConfig {
    /// Build an invocation config from a validated backend and its password.
    pub fn new(backend: &RepositoryBackend, password: impl Into<String>) -> Self {
        Self {
            repository_uri: backend.repository_uri(),
            password: password.into(),
            environment: backend.environment(),
        }
    }
}

fn required(config: &Value, key: &str) -> Result<String> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CoreError::ConfigInvalid(format!("missing required field '{key}'")))
}

fn optional(config: &Value, key: &str) -> Option<String> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn url_with_userinfo(url: &str, username: &Option<String>, password: &Option<String>) -> String {
    let Some(username) = username else {
        return url.to_string();
    };
    let userinfo = match password {
        Some(password) => format!("{username}:{password}"),
        None => username.clone(),
    };
    match url.split_once("://") {
        Some((scheme, rest)) => format!("{scheme}://{userinfo}@{rest}"),
        None => format!("{userinfo}@{url}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends() -> Vec<RepositoryBackend> {
        vec![
            RepositoryBackend::Local {
                path: PathBuf::from("/srv/backups/repo"),
            },
            RepositoryBackend::S3 {
                endpoint: "minio.internal:9000".to_string(),
                bucket: "backups".to_string(),
                prefix: Some("agents/a1".to_string()),
                region: Some("us-east-1".to_string()),
                access_key: "AK".to_string(),
                secret_key: "SK".to_string(),
                use_https: false,
            },
            RepositoryBackend::B2 {
                bucket: "strata-backups".to_string(),
                prefix: Some("prod".to_string()),
                account_id: "id".to_string(),
                account_key: "key".to_string(),
            },
            RepositoryBackend::Sftp {
                user: "backup".to_string(),
                host: "vault.example.com".to_string(),
                port: 2222,
                path: PathBuf::from("/data/repo"),
                key_file: Some(PathBuf::from("/etc/strata/id_ed25519")),
            },
            RepositoryBackend::Rest {
                url: "https://rest.example.com:8000/repo".to_string(),
                username: Some("u".to_string()),
                password: Some("p".to_string()),
            },
            RepositoryBackend::Dropbox {
                token: "tok".to_string(),
                path: Some("backups".to_string()),
            },
        ]
    }

    #[test]
    fn config_round_trip() {
        for backend in backends() {
            let parsed =
                RepositoryBackend::from_repository(backend.kind(), &backend.to_config_json())
                    .unwrap();
            assert_eq!(parsed, backend);
        }
    }

    #[test]
    fn uri_forms() {
        let uris: Vec<String> = backends().iter().map(|b| b.repository_uri()).collect();
        assert_eq!(uris[0], "/srv/backups/repo");
        assert_eq!(uris[1], "s3:http://minio.internal:9000/backups/agents/a1");
        assert_eq!(uris[2], "b2:strata-backups:prod");
        assert_eq!(uris[3], "sftp:backup@vault.example.com:2222/data/repo");
        assert_eq!(uris[4], "rest:https://u:p@rest.example.com:8000/repo");
    }

    #[test]
    fn s3_defaults() {
        let config = json!({
            "bucket": "b",
            "access_key": "ak",
            "secret_key": "sk",
        });
        let backend = RepositoryBackend::from_repository(RepositoryKind::S3, &config).unwrap();
        assert_eq!(
            backend.repository_uri(),
            format!("s3:https://{DEFAULT_S3_ENDPOINT}/b")
        );
    }

    #[test]
    fn sftp_default_port() {
        let config = json!({ "user": "u", "host": "h", "path": "/repo" });
        let backend = RepositoryBackend::from_repository(RepositoryKind::Sftp, &config).unwrap();
        assert_eq!(backend.repository_uri(), "sftp:u@h:22/repo");
    }

    #[test]
    fn missing_field_is_config_invalid() {
        let err =
            RepositoryBackend::from_repository(RepositoryKind::B2, &json!({ "bucket": "b" }))
                .unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid(_)));
    }

    #[test]
    fn relative_local_path_rejected() {
        let err = RepositoryBackend::from_repository(
            RepositoryKind::Local,
            &json!({ "path": "relative/repo" }),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid(_)));
    }

    #[test]
    fn s3_environment() {
        let backend = &backends()[1];
        let env = backend.environment();
        assert!(env.contains(&("AWS_ACCESS_KEY_ID".to_string(), "AK".to_string())));
        assert!(env.contains(&("AWS_DEFAULT_REGION".to_string(), "us-east-1".to_string())));
    }
}
