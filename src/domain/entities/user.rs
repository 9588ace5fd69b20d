use std::fmt;
use std::sync::Arc;

use crate::application::errors::StorageError;
use crate::domain::traits::EconomyStore;

/// Represents a chatter together with their points economy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Option<i64>,
    /// Lower-cased login name, used as the key everywhere
    pub username: String,
    /// Name as the chatter typed it
    pub username_raw: String,
    pub level: i32,
    pub points: i64,
    pub subscriber: bool,
    pub moderator: bool,
    /// Outstanding point reservations awaiting settlement
    pub debts: Vec<i64>,
}

impl User {
    pub const DEFAULT_LEVEL: i32 = 100;

    pub fn new(username: impl Into<String>) -> Self {
        let raw = username.into();
        Self {
            id: None,
            username: raw.to_lowercase(),
            username_raw: raw,
            level: Self::DEFAULT_LEVEL,
            points: 0,
            subscriber: false,
            moderator: false,
            debts: Vec::new(),
        }
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn with_points(mut self, points: i64) -> Self {
        self.points = points;
        self
    }

    pub fn with_subscriber(mut self, subscriber: bool) -> Self {
        self.subscriber = subscriber;
        self
    }

    pub fn with_moderator(mut self, moderator: bool) -> Self {
        self.moderator = moderator;
        self
    }

    // Points

    pub fn create_debt(&mut self, points: i64) {
        self.debts.push(points);
    }

    /// Drop one reservation equal to `debt` without touching the balance
    pub fn remove_debt(&mut self, debt: i64) -> bool {
        match self.debts.iter().position(|d| *d == debt) {
            Some(index) => {
                self.debts.remove(index);
                true
            }
            None => {
                tracing::error!(
                    "Debt {} was not in the list of debts {:?} for {}",
                    debt,
                    self.debts,
                    self.username
                );
                false
            }
        }
    }

    /// Settle a reservation: the balance is charged even if the entry is missing
    pub fn pay_debt(&mut self, debt: i64) {
        self.points -= debt;
        self.remove_debt(debt);
    }

    pub fn points_in_debt(&self) -> i64 {
        self.debts.iter().sum()
    }

    pub fn points_available(&self) -> i64 {
        self.points - self.points_in_debt()
    }

    /// Eligibility check against the debt-adjusted balance.
    ///
    /// Note the asymmetry with [`User::spend`], which checks the raw balance:
    /// a caller may pass this check and then spend points that are reserved
    /// by a debt. Both checks are kept as they are.
    pub fn can_afford(&self, points: i64) -> bool {
        self.points_available() >= points
    }

    /// Charge the raw balance; leaves it untouched on failure
    pub fn spend(&mut self, points: i64) -> bool {
        if points <= self.points {
            self.points -= points;
            true
        } else {
            false
        }
    }

    // Tokens

    pub fn get_tokens(&self, ledger: &TokenLedger) -> i64 {
        match ledger.entries(&self.username) {
            Ok(entries) => entries.iter().map(|(_, tokens)| *tokens).sum(),
            Err(e) => {
                tracing::warn!("Failed to read tokens for {}: {}", self.username, e);
                0
            }
        }
    }

    pub fn can_afford_with_tokens(&self, ledger: &TokenLedger, cost: i64) -> bool {
        self.get_tokens(ledger) >= cost
    }

    /// Grant tokens for the live session. At most one grant per session.
    pub fn award_tokens(&self, ledger: &TokenLedger, tokens: i64) -> bool {
        let Some(session) = ledger.session() else {
            return false;
        };

        match ledger.award(&self.username, session, tokens) {
            Ok(true) => {
                tracing::info!("{} gained {} tokens in session {}", self.username, tokens, session);
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!("Failed to award tokens to {}: {}", self.username, e);
                false
            }
        }
    }

    /// Spend tokens across sessions, all or nothing.
    ///
    /// The ledger total is checked before anything is written. If a write
    /// fails midway, the entries already decremented are restored.
    pub fn spend_tokens(&self, ledger: &TokenLedger, tokens: i64) -> bool {
        if tokens <= 0 {
            return true;
        }

        let entries = match ledger.entries(&self.username) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to read tokens for {}: {}", self.username, e);
                return false;
            }
        };

        let total: i64 = entries.iter().map(|(_, n)| (*n).max(0)).sum();
        if total < tokens {
            return false;
        }

        let mut remaining = tokens;
        let mut written: Vec<(&str, i64)> = Vec::new();
        for (session, num_tokens) in &entries {
            if remaining == 0 {
                break;
            }
            if *num_tokens <= 0 {
                continue;
            }

            let decrease_by = remaining.min(*num_tokens);
            if let Err(e) = ledger.set(&self.username, session, num_tokens - decrease_by) {
                tracing::error!("Failed to write tokens for {}: {}", self.username, e);
                for (session, previous) in written {
                    if let Err(e) = ledger.set(&self.username, session, previous) {
                        tracing::error!("Failed to restore tokens for {} in {}: {}", self.username, session, e);
                    }
                }
                return false;
            }
            written.push((session.as_str(), *num_tokens));
            remaining -= decrease_by;
        }

        remaining == 0
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.username_raw)
    }
}

/// Session-scoped token balances of one channel
///
/// Each user has one hash under `"{scope}:{username}:tokens"` with one field
/// per session (stream) id.
#[derive(Clone)]
pub struct TokenLedger {
    store: Arc<dyn EconomyStore>,
    scope: String,
    session: Option<String>,
}

impl TokenLedger {
    pub fn new(store: Arc<dyn EconomyStore>, scope: impl Into<String>) -> Self {
        Self {
            store,
            scope: scope.into(),
            session: None,
        }
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Switch to another live session, or to none when the stream ends
    pub fn set_session(&mut self, session: Option<String>) {
        self.session = session;
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    fn key(&self, username: &str) -> String {
        format!("{}:{}:tokens", self.scope, username)
    }

    /// Parsed ledger fields sorted by session id; unparseable values are skipped
    pub fn entries(&self, username: &str) -> Result<Vec<(String, i64)>, StorageError> {
        let raw = self.store.hgetall(&self.key(username))?;
        let mut entries: Vec<(String, i64)> = raw
            .into_iter()
            .filter_map(|(session, value)| match value.trim().parse::<i64>() {
                Ok(tokens) => Some((session, tokens)),
                Err(_) => {
                    tracing::warn!("Invalid value for tokens, user {}", username);
                    None
                }
            })
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn set(&self, username: &str, session: &str, tokens: i64) -> Result<(), StorageError> {
        self.store.hset(&self.key(username), session, &tokens.to_string())
    }

    fn award(&self, username: &str, session: &str, tokens: i64) -> Result<bool, StorageError> {
        self.store.hsetnx(&self.key(username), session, &tokens.to_string())
    }
}

impl fmt::Debug for TokenLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenLedger")
            .field("scope", &self.scope)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::MemoryEconomyStore;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory store whose `hset` fails on one chosen call
    struct FailingWrites {
        inner: MemoryEconomyStore,
        calls: AtomicUsize,
        fail_on: usize,
    }

    impl EconomyStore for FailingWrites {
        fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
            self.inner.hgetall(key)
        }

        fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                return Err(StorageError::NotFound(key.to_string()));
            }
            self.inner.hset(key, field, value)
        }

        fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, StorageError> {
            self.inner.hsetnx(key, field, value)
        }
    }

    fn ledger(session: &str) -> TokenLedger {
        TokenLedger::new(Arc::new(MemoryEconomyStore::new()), "streamer").with_session(session)
    }

    #[test]
    fn test_spend_checks_raw_balance() {
        let mut user = User::new("Alice").with_points(10);
        assert!(!user.spend(11));
        assert_eq!(user.points, 10);
        assert!(user.spend(10));
        assert_eq!(user.points, 0);
    }

    #[test]
    fn test_debts_reduce_available_points() {
        let mut user = User::new("alice").with_points(100);
        user.create_debt(30);
        user.create_debt(20);

        assert_eq!(user.points_in_debt(), 50);
        assert_eq!(user.points_available(), 50);
        assert!(user.can_afford(50));
        assert!(!user.can_afford(51));

        // Raw balance is what spend looks at
        assert!(user.spend(80));
        assert_eq!(user.points, 20);
    }

    #[test]
    fn test_pay_debt_settles_one_entry() {
        let mut user = User::new("alice").with_points(100);
        user.create_debt(10);
        user.create_debt(10);

        user.pay_debt(10);
        assert_eq!(user.points, 90);
        assert_eq!(user.debts, vec![10]);

        // Missing entry is reported but the balance is still charged
        user.pay_debt(25);
        assert_eq!(user.points, 65);
        assert_eq!(user.debts, vec![10]);
    }

    #[test]
    fn test_award_tokens_once_per_session() {
        let ledger = ledger("S1");
        let user = User::new("alice");

        assert!(user.award_tokens(&ledger, 5));
        assert!(!user.award_tokens(&ledger, 5));
        assert_eq!(user.get_tokens(&ledger), 5);
    }

    #[test]
    fn test_award_tokens_needs_live_session() {
        let ledger = TokenLedger::new(Arc::new(MemoryEconomyStore::new()), "streamer");
        let user = User::new("alice");
        assert!(!user.award_tokens(&ledger, 5));
        assert_eq!(user.get_tokens(&ledger), 0);
    }

    #[test]
    fn test_tokens_sum_across_sessions() {
        let mut ledger = ledger("S1");
        let user = User::new("alice");
        user.award_tokens(&ledger, 5);
        ledger.set_session(Some("S2".to_string()));
        user.award_tokens(&ledger, 3);

        assert_eq!(user.get_tokens(&ledger), 8);
        assert!(user.can_afford_with_tokens(&ledger, 8));
        assert!(!user.can_afford_with_tokens(&ledger, 9));
    }

    #[test]
    fn test_spend_tokens_is_all_or_nothing() {
        let mut ledger = ledger("S1");
        let user = User::new("alice");
        user.award_tokens(&ledger, 5);
        ledger.set_session(Some("S2".to_string()));
        user.award_tokens(&ledger, 3);

        assert!(!user.spend_tokens(&ledger, 9));
        assert_eq!(user.get_tokens(&ledger), 8);

        assert!(user.spend_tokens(&ledger, 6));
        assert_eq!(user.get_tokens(&ledger), 2);
        let entries = ledger.entries("alice").unwrap();
        assert_eq!(entries, vec![("S1".to_string(), 0), ("S2".to_string(), 2)]);
    }

    #[test]
    fn test_username_is_lowercased() {
        let user = User::new("NightOwl");
        assert_eq!(user.username, "nightowl");
        assert_eq!(user.to_string(), "NightOwl");
    }

    #[test]
    fn test_spend_tokens_restores_entries_when_a_write_fails() {
        let store = Arc::new(FailingWrites {
            inner: MemoryEconomyStore::new(),
            calls: AtomicUsize::new(0),
            fail_on: 1,
        });
        let mut ledger = TokenLedger::new(store, "streamer").with_session("S1");
        let user = User::new("alice");
        user.award_tokens(&ledger, 2);
        ledger.set_session(Some("S2".to_string()));
        user.award_tokens(&ledger, 5);

        assert!(!user.spend_tokens(&ledger, 4));
        let entries = ledger.entries("alice").unwrap();
        assert_eq!(entries, vec![("S1".to_string(), 2), ("S2".to_string(), 5)]);

        assert!(user.spend_tokens(&ledger, 4));
        assert_eq!(user.get_tokens(&ledger), 3);
    }
}
