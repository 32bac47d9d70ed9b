//! Node authentication.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use stathub_core::{Account, Scope};

/// Authorization granted to a node by a successful authentication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grant {
    /// Account the node acts as.
    pub account: Account,
    /// Scopes the node may use.
    pub scopes: Vec<Scope>,
}

/// Resolves a presented token to a grant.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Grant for `token`, or `None` when the token is unknown.
    async fn authenticate(&self, token: &str) -> Option<Grant>;
}

/// Fixed token table, typically parsed from the environment.
///
/// Suits closed fleets where every node's credential is provisioned up
/// front; anything fancier implements [`IdentityProvider`] itself.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    grants: HashMap<String, Grant>,
}

#[derive(Deserialize)]
struct TokenEntry {
    account: String,
    #[serde(default)]
    scopes: Vec<String>,
}

impl StaticIdentityProvider {
    /// Empty table; every authentication fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table parsed from a JSON object of `token -> { account, scopes }`.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let entries: HashMap<String, TokenEntry> = serde_json::from_str(raw)?;
        let grants = entries
            .into_iter()
            .map(|(token, entry)| {
                let grant = Grant {
                    account: Account::new(entry.account),
                    scopes: entry.scopes.into_iter().map(Scope::new).collect(),
                };
                (token, grant)
            })
            .collect();
        Ok(Self { grants })
    }

    /// Add one token grant, replacing any previous grant for the token.
    pub fn insert(&mut self, token: impl Into<String>, grant: Grant) {
        let _ = self.grants.insert(token.into(), grant);
    }

    /// Number of configured tokens.
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Whether no tokens are configured.
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, token: &str) -> Option<Grant> {
        self.grants.get(token).cloned()
    }
}
