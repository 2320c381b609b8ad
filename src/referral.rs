//! Referral Graph port
//!
//! Answers "who invited this user" one and two levels up. The commission
//! engine queries both generations before it posts anything.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{FinError, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReferralGraph: Send + Sync {
    /// Direct inviters of `user_id`
    async fn first_generation(&self, user_id: &str) -> Result<Vec<String>>;

    /// Inviters of the direct inviters
    async fn second_generation(&self, user_id: &str) -> Result<Vec<String>>;
}

/// Invitee -> inviter map held in memory
#[derive(Default)]
pub struct InMemoryReferralGraph {
    inviters: RwLock<HashMap<String, String>>,
}

impl InMemoryReferralGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `inviter` invited `invitee`.
    pub async fn register(&self, invitee: &str, inviter: &str) -> Result<()> {
        if invitee == inviter {
            return Err(FinError::Referral(format!(
                "user {invitee} cannot invite themselves"
            )));
        }

        let mut inviters = self.inviters.write().await;
        if let Some(existing) = inviters.get(invitee) {
            return Err(FinError::Referral(format!(
                "user {invitee} already invited by {existing}"
            )));
        }
        inviters.insert(invitee.to_string(), inviter.to_string());
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.inviters.read().await.len()
    }
}

#[async_trait]
impl ReferralGraph for InMemoryReferralGraph {
    async fn first_generation(&self, user_id: &str) -> Result<Vec<String>> {
        let inviters = self.inviters.read().await;
        Ok(inviters.get(user_id).cloned().into_iter().collect())
    }

    async fn second_generation(&self, user_id: &str) -> Result<Vec<String>> {
        let inviters = self.inviters.read().await;
        Ok(inviters
            .get(user_id)
            .and_then(|first| inviters.get(first))
            .filter(|second| second.as_str() != user_id)
            .cloned()
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_two_generations() {
        let graph = InMemoryReferralGraph::new();
        graph.register("alice", "bob").await.unwrap();
        graph.register("bob", "carol").await.unwrap();

        assert_eq!(graph.first_generation("alice").await.unwrap(), vec!["bob"]);
        assert_eq!(graph.second_generation("alice").await.unwrap(), vec!["carol"]);
        assert_eq!(graph.first_generation("bob").await.unwrap(), vec!["carol"]);
        assert!(graph.second_generation("bob").await.unwrap().is_empty());
        assert!(graph.first_generation("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_self_and_reassignment() {
        let graph = InMemoryReferralGraph::new();
        assert!(graph.register("alice", "alice").await.is_err());

        graph.register("alice", "bob").await.unwrap();
        assert!(graph.register("alice", "carol").await.is_err());
        assert_eq!(graph.len().await, 1);
    }

    #[tokio::test]
    async fn test_mutual_invite_does_not_pay_self() {
        let graph = InMemoryReferralGraph::new();
        graph.register("alice", "bob").await.unwrap();
        graph.register("bob", "alice").await.unwrap();

        assert!(graph.second_generation("alice").await.unwrap().is_empty());
    }
}
