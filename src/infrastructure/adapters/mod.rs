//! Chat transport adapters

pub mod console;

use std::sync::Mutex;

use crate::application::errors::BotError;
use crate::domain::traits::{ChatSink, Outbound};

pub use console::{ChannelSink, ConsoleAdapter};

/// Sink that keeps every outbound line in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Outbound>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

impl ChatSink for RecordingSink {
    fn send(&self, outbound: Outbound) -> Result<(), BotError> {
        self.sent.lock()
            .map_err(|_| BotError::Internal("Lock poisoned".to_string()))?
            .push(outbound);
        Ok(())
    }
}
