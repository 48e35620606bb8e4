use crate::error::CreditError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Repository for per-account credit balances. Injected into the app state.
#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn balance(&self, account: &str) -> Result<u32, CreditError>;
    async fn set_balance(&self, account: &str, credits: u32) -> Result<(), CreditError>;
}

/// Unknown accounts read as `default_balance`.
pub struct InMemoryCreditStore {
    balances: RwLock<HashMap<String, u32>>,
    default_balance: u32,
}

impl InMemoryCreditStore {
    pub fn new(default_balance: u32) -> Self {
        InMemoryCreditStore {
            balances: RwLock::new(HashMap::new()),
            default_balance,
        }
    }
}

#[async_trait]
impl CreditStore for InMemoryCreditStore {
    async fn balance(&self, account: &str) -> Result<u32, CreditError> {
        Ok(self
            .balances
            .read()
            .await
            .get(account)
            .copied()
            .unwrap_or(self.default_balance))
    }

    async fn set_balance(&self, account: &str, credits: u32) -> Result<(), CreditError> {
        self.balances
            .write()
            .await
            .insert(account.to_string(), credits);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn balances_are_per_account() {
        let store = InMemoryCreditStore::new(5);
        store.set_balance("alice", 120).await.unwrap();
        assert_eq!(store.balance("alice").await.unwrap(), 120);
        assert_eq!(store.balance("bob").await.unwrap(), 5);
    }
}
