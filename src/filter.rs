//! Contract Filtering
//!
//! Selects which actions are persisted, by exact match of the action's
//! contract account against the configured allow-list.

use std::collections::HashSet;

use crate::chain::{Action, Name};

/// Allow-list of contract accounts whose actions are persisted
#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    contracts: HashSet<Name>,
    /// Insertion order, for logging
    ordered: Vec<Name>,
}

impl ContractFilter {
    pub fn new<I>(contracts: I) -> Self
    where
        I: IntoIterator<Item = Name>,
    {
        let mut filter = Self::default();
        for contract in contracts {
            if filter.contracts.insert(contract) {
                filter.ordered.push(contract);
            }
        }
        filter
    }

    /// Check if actions of `account` should be persisted
    ///
    /// # Arguments
    /// * `account` - The contract account an action is dispatched to
    ///
    /// # Returns
    /// `true` if the account is on the allow-list, `false` otherwise
    pub fn matches(&self, account: Name) -> bool {
        self.contracts.contains(&account)
    }

    /// Check if an action should be persisted
    pub fn matches_action(&self, action: &Action) -> bool {
        self.matches(action.account)
    }

    /// Configured contracts in the order they were given
    pub fn contracts(&self) -> &[Name] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    // ==================== matches tests ====================

    #[test]
    fn test_matches_configured_contract() {
        let filter = ContractFilter::new([name("alice"), name("eosio.token")]);
        assert!(filter.matches(name("alice")));
        assert!(filter.matches(name("eosio.token")));
    }

    #[test]
    fn test_rejects_unconfigured_contract() {
        let filter = ContractFilter::new([name("alice")]);
        assert!(!filter.matches(name("bob")));
    }

    #[test]
    fn test_match_is_exact() {
        let filter = ContractFilter::new([name("eosio.token")]);
        assert!(!filter.matches(name("eosio")));
        assert!(!filter.matches(name("eosio.tokens")));
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let filter = ContractFilter::default();
        assert!(filter.is_empty());
        assert!(!filter.matches(name("alice")));
        assert!(!filter.matches(Name::default()));
    }

    #[test]
    fn test_matches_action_uses_account() {
        let filter = ContractFilter::new([name("alice")]);
        let action = Action::new(name("alice"), name("transfer"), vec![]);
        assert!(filter.matches_action(&action));
        let action = Action::new(name("bob"), name("alice"), vec![]);
        assert!(!filter.matches_action(&action));
    }

    // ==================== construction tests ====================

    #[test]
    fn test_duplicates_collapse_and_order_is_kept() {
        let filter = ContractFilter::new([name("bob"), name("alice"), name("bob")]);
        assert_eq!(filter.len(), 2);
        assert_eq!(filter.contracts(), &[name("bob"), name("alice")]);
    }
}
