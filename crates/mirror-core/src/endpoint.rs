use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Address prefix selecting the bundled on-disk object store.
pub const STORE_SCHEME: &str = "store:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Git,
    Store,
}

/// How to authenticate against an endpoint. The secret itself is never held
/// here, only the name of the environment variable that provides it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub token_env: Option<String>,
    pub user: String,
}

impl Default for AuthContext {
    fn default() -> Self {
        Self {
            token_env: None,
            user: "git".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEndpoint {
    pub address: String,
    #[serde(default)]
    pub auth: AuthContext,
}

impl RepositoryEndpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            auth: AuthContext::default(),
        }
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = auth;
        self
    }

    pub fn backend(&self) -> Backend {
        if self.address.starts_with(STORE_SCHEME) {
            Backend::Store
        } else {
            Backend::Git
        }
    }

    pub fn store_path(&self) -> Option<PathBuf> {
        self.address
            .strip_prefix(STORE_SCHEME)
            .map(|p| PathBuf::from(p.trim_start_matches("//")))
    }

    /// Address with any `user:password@` userinfo removed.
    pub fn redacted(&self) -> String {
        let Some((scheme, rest)) = self.address.split_once("://") else {
            return self.address.clone();
        };
        let authority_end = rest.find('/').unwrap_or(rest.len());
        match rest[..authority_end].rfind('@') {
            Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
            None => self.address.clone(),
        }
    }
}

impl fmt::Display for RepositoryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}
