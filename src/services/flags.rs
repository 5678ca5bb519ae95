//! Feature flags resolved from configuration.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use super::FeatureFlagService;
use crate::error::Result;
use crate::model::AccountId;

/// Accounts a flag is switched on for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountSet {
    All,
    Only(HashSet<String>),
}

impl AccountSet {
    /// Parse a comma-separated account list; `*` means every account.
    pub fn parse(spec: &str) -> Self {
        let ids: HashSet<String> = spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if ids.contains("*") {
            AccountSet::All
        } else {
            AccountSet::Only(ids)
        }
    }

    pub fn contains(&self, account_id: &AccountId) -> bool {
        match self {
            AccountSet::All => true,
            AccountSet::Only(ids) => ids.contains(account_id.as_str()),
        }
    }
}

/// Fixed flag table, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureFlags {
    flags: HashMap<String, AccountSet>,
}

impl StaticFeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(mut self, flag: impl Into<String>, accounts: AccountSet) -> Self {
        self.flags.insert(flag.into(), accounts);
        self
    }
}

#[async_trait]
impl FeatureFlagService for StaticFeatureFlags {
    async fn is_enabled(&self, flag: &str, account_id: &AccountId) -> Result<bool> {
        Ok(self
            .flags
            .get(flag)
            .is_some_and(|accounts| accounts.contains(account_id)))
    }
}
