//! Shared fixtures for domain unit tests

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::domain::entities::{FunctionTable, Invocation, Message, TokenLedger, User};
use crate::domain::traits::Outbound;
use crate::infrastructure::adapters::RecordingSink;
use crate::infrastructure::storage::MemoryEconomyStore;

pub(crate) struct Fixture {
    pub sink: RecordingSink,
    pub ledger: TokenLedger,
    pub functions: FunctionTable,
    pub event: Message,
    pub now: DateTime<Utc>,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryEconomyStore::new());
        Self {
            sink: RecordingSink::new(),
            ledger: TokenLedger::new(store, "channel").with_session("stream-1"),
            functions: FunctionTable::new(),
            event: Message::from_command("channel", "test", vec![]).with_sender("viewer"),
            now: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        }
    }

    pub fn invocation<'a>(&'a self, user: &'a mut User) -> Invocation<'a> {
        Invocation::new(user, &self.event, &self.sink, &self.ledger, &self.functions).at(self.now)
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sink.sent()
    }
}
