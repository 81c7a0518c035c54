//! Credential resolution
//!
//! Stages hold only a credential reference (e.g. `aws_credentials`); the key
//! pair is resolved at execution time through a [`CredentialProvider`].

use starload_core::CredentialConfig;
use std::collections::HashMap;

/// Access/secret key pair for object storage
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .finish()
    }
}

impl From<&CredentialConfig> for AwsCredentials {
    fn from(config: &CredentialConfig) -> Self {
        Self::new(&config.access_key_id, &config.secret_access_key)
    }
}

/// Credential resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("No credentials found for reference '{0}'")]
    NotFound(String),

    #[error("Credentials for '{credential_ref}' are invalid: {reason}")]
    Invalid {
        credential_ref: String,
        reason: String,
    },

    #[error("Credential backend error: {0}")]
    Backend(String),
}

/// Resolves a credential reference to a key pair
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, credential_ref: &str) -> Result<AwsCredentials, CredentialError>;
}

fn validate(credential_ref: &str, creds: AwsCredentials) -> Result<AwsCredentials, CredentialError> {
    if creds.access_key_id.trim().is_empty() || creds.secret_access_key.trim().is_empty() {
        return Err(CredentialError::Invalid {
            credential_ref: credential_ref.to_string(),
            reason: "access key id and secret access key must be non-empty".to_string(),
        });
    }
    Ok(creds)
}

/// Credentials held in memory, usually from the `[credentials.*]` config tables
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    entries: HashMap<String, AwsCredentials>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(credentials: &HashMap<String, CredentialConfig>) -> Self {
        let entries = credentials
            .iter()
            .map(|(name, config)| (name.clone(), AwsCredentials::from(config)))
            .collect();
        Self { entries }
    }

    pub fn with(mut self, credential_ref: impl Into<String>, creds: AwsCredentials) -> Self {
        self.entries.insert(credential_ref.into(), creds);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn resolve(&self, credential_ref: &str) -> Result<AwsCredentials, CredentialError> {
        let creds = self
            .entries
            .get(credential_ref)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(credential_ref.to_string()))?;
        validate(credential_ref, creds)
    }
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Credentials from environment variables
///
/// Reference `aws_credentials` reads `AWS_CREDENTIALS_ACCESS_KEY_ID` and
/// `AWS_CREDENTIALS_SECRET_ACCESS_KEY`.
pub struct EnvCredentialProvider {
    lookup: Lookup,
}

impl EnvCredentialProvider {
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// Use a custom variable lookup instead of the process environment
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    /// Variable names for a reference: `(access_key_var, secret_key_var)`
    pub fn variable_names(credential_ref: &str) -> (String, String) {
        let prefix: String = credential_ref
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        (
            format!("{}_ACCESS_KEY_ID", prefix),
            format!("{}_SECRET_ACCESS_KEY", prefix),
        )
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn resolve(&self, credential_ref: &str) -> Result<AwsCredentials, CredentialError> {
        let (access_var, secret_var) = Self::variable_names(credential_ref);
        match ((self.lookup)(&access_var), (self.lookup)(&secret_var)) {
            (Some(access), Some(secret)) => validate(credential_ref, AwsCredentials::new(access, secret)),
            (None, None) => Err(CredentialError::NotFound(credential_ref.to_string())),
            _ => Err(CredentialError::Invalid {
                credential_ref: credential_ref.to_string(),
                reason: format!("both {} and {} must be set", access_var, secret_var),
            }),
        }
    }
}

/// Tries providers in order; the first one that knows the reference wins
#[derive(Default)]
pub struct ChainCredentialProvider {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl ChainCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }
}

#[async_trait::async_trait]
impl CredentialProvider for ChainCredentialProvider {
    async fn resolve(&self, credential_ref: &str) -> Result<AwsCredentials, CredentialError> {
        for provider in &self.providers {
            match provider.resolve(credential_ref).await {
                Err(CredentialError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(CredentialError::NotFound(credential_ref.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn env_variable_names() {
        let (access, secret) = EnvCredentialProvider::variable_names("aws_credentials");
        assert_eq!(access, "AWS_CREDENTIALS_ACCESS_KEY_ID");
        assert_eq!(secret, "AWS_CREDENTIALS_SECRET_ACCESS_KEY");

        let (access, _) = EnvCredentialProvider::variable_names("prod-s3.reader");
        assert_eq!(access, "PROD_S3_READER_ACCESS_KEY_ID");
    }

    #[test]
    fn debug_hides_secret() {
        let creds = AwsCredentials::new("AKIAEXAMPLE", "topsecret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("AKIAEXAMPLE"));
        assert!(!debug.contains("topsecret"));
    }

    #[tokio::test]
    async fn env_provider_resolves() {
        let provider = EnvCredentialProvider::with_lookup(|name| match name {
            "AWS_CREDENTIALS_ACCESS_KEY_ID" => Some("AKIA1".to_string()),
            "AWS_CREDENTIALS_SECRET_ACCESS_KEY" => Some("s3cr3t".to_string()),
            _ => None,
        });

        let creds = provider.resolve("aws_credentials").await.unwrap();
        assert_eq!(creds, AwsCredentials::new("AKIA1", "s3cr3t"));

        assert_eq!(
            provider.resolve("other").await,
            Err(CredentialError::NotFound("other".to_string()))
        );
    }

    #[tokio::test]
    async fn env_provider_half_configured() {
        let provider = EnvCredentialProvider::with_lookup(|name| {
            (name == "AWS_CREDENTIALS_ACCESS_KEY_ID").then(|| "AKIA1".to_string())
        });

        let err = provider.resolve("aws_credentials").await.unwrap_err();
        assert!(matches!(err, CredentialError::Invalid { .. }));
    }

    #[tokio::test]
    async fn static_provider_rejects_empty_keys() {
        let provider = StaticCredentialProvider::new()
            .with("aws_credentials", AwsCredentials::new("AKIA1", " "));

        let err = provider.resolve("aws_credentials").await.unwrap_err();
        assert!(matches!(err, CredentialError::Invalid { .. }));
    }

    #[tokio::test]
    async fn chain_falls_through_not_found() {
        let env = EnvCredentialProvider::with_lookup(|_| None);
        let fallback = StaticCredentialProvider::new()
            .with("aws_credentials", AwsCredentials::new("AKIA2", "fallback"));

        let chain = ChainCredentialProvider::new().with(env).with(fallback);
        let creds = chain.resolve("aws_credentials").await.unwrap();
        assert_eq!(creds.access_key_id, "AKIA2");

        assert_eq!(
            chain.resolve("missing").await,
            Err(CredentialError::NotFound("missing".to_string()))
        );
    }
}
