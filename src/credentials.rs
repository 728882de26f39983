//! Credential lookup seam.
//!
//! The engine never persists secrets. It asks a [`CredentialStore`] for the
//! key (and optional custom endpoint) of a provider right before dispatch.

use crate::backend::redact;
use crate::types::Provider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Secret for `provider`, if one is configured.
    async fn secret(&self, provider: Provider) -> Option<String>;

    /// Custom endpoint for `provider`. `None` means the official API.
    async fn endpoint(&self, _provider: Provider) -> Option<String> {
        None
    }
}

/// In-memory credentials, fixed at construction.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    secrets: HashMap<Provider, String>,
    endpoints: HashMap<Provider, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, provider: Provider, secret: impl Into<String>) -> Self {
        self.secrets.insert(provider, secret.into());
        self
    }

    pub fn with_endpoint(mut self, provider: Provider, endpoint: impl Into<String>) -> Self {
        self.endpoints.insert(provider, endpoint.into());
        self
    }

    /// Read `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` and `GEMINI_API_KEY`, plus
    /// the matching `*_BASE_URL` variables for custom endpoints.
    pub fn from_env() -> Self {
        let mut creds = Self::new();
        for provider in Provider::ALL {
            let (key_var, url_var) = env_vars(provider);
            if let Some(key) = non_blank_env(key_var) {
                creds.secrets.insert(provider, key);
            }
            if let Some(url) = non_blank_env(url_var) {
                creds.endpoints.insert(provider, url);
            }
        }
        creds
    }
}

fn env_vars(provider: Provider) -> (&'static str, &'static str) {
    match provider {
        Provider::OpenAi => ("OPENAI_API_KEY", "OPENAI_BASE_URL"),
        Provider::Claude => ("ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL"),
        Provider::Gemini => ("GEMINI_API_KEY", "GEMINI_BASE_URL"),
    }
}

fn non_blank_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secrets: HashMap<&str, String> = self
            .secrets
            .iter()
            .map(|(p, s)| (p.as_str(), redact(s)))
            .collect();
        f.debug_struct("StaticCredentials")
            .field("secrets", &secrets)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn secret(&self, provider: Provider) -> Option<String> {
        self.secrets.get(&provider).cloned()
    }

    async fn endpoint(&self, provider: Provider) -> Option<String> {
        self.endpoints.get(&provider).cloned()
    }
}
