use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::application::errors::{AdmissionDenied, BotError, CommandError};
use crate::domain::entities::{
    lock_command, AliasTable, Command, CommandData, CommandExample, CommandPatch, CommandRef, CommandRegistry,
    Content, FunctionTable, Invocation, Message, TokenLedger, User,
};
use crate::domain::traits::{ChatSink, CommandStore, StoredCommand};
use super::docs::{self, CommandDoc};

/// Outcome of `register_persisted`
#[derive(Debug, Clone)]
pub struct Registration {
    pub command: CommandRef,
    /// False when an alias was already taken and the existing command is returned
    pub created: bool,
    pub conflicting_alias: Option<String>,
}

/// Outcome of dispatching one chat event
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    NotACommand,
    Unknown(String),
    Denied { alias: String, reason: AdmissionDenied },
    Ran { alias: String },
}

/// Service for managing and executing commands
///
/// Owns the command registry. Storage I/O always happens before the registry
/// lock is taken; the lock is only held to mutate the alias tables and rebuild.
pub struct CommandService {
    store: Arc<dyn CommandStore>,
    registry: Mutex<CommandRegistry>,
    functions: FunctionTable,
    prefix: String,
}

impl CommandService {
    pub fn new(store: Arc<dyn CommandStore>, functions: FunctionTable, prefix: impl Into<String>) -> Self {
        Self {
            store,
            registry: Mutex::new(CommandRegistry::new()),
            functions,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Load built-in commands and every enabled persisted command, then rebuild
    pub async fn load(&self, internal: AliasTable) -> Result<usize, BotError> {
        let stored = self.store.load_all(true).await?;
        let mut commands = Vec::with_capacity(stored.len());
        for entry in stored {
            commands.push(self.hydrate(entry).await?.into_ref());
        }

        let mut registry = self.registry.lock().await;
        registry.set_internal(internal);
        registry.clear_persisted();
        for command in &commands {
            registry.add_persisted_aliases(command);
        }
        registry.rebuild();

        tracing::info!("Loaded {} persisted commands, {} aliases in total", commands.len(), registry.len());
        Ok(commands.len())
    }

    /// Build a command from its stored row, repairing missing usage statistics
    async fn hydrate(&self, stored: StoredCommand) -> Result<Command, BotError> {
        let mut command = Command::from_record(&stored.record);

        let data = match stored.data {
            Some(data) => data,
            None => {
                tracing::warn!(
                    "Command {} ({:?}) has no usage statistics, creating them",
                    stored.record.command,
                    stored.record.id
                );
                let data = CommandData::new(stored.record.id);
                self.store.insert_data(&data).await?;
                data
            }
        };
        command.data = Some(data);

        if let Some(id) = command.id {
            command.examples = self.store.load_examples(id).await?;
        }

        Ok(command)
    }

    /// Create and persist a command, unless one of its aliases is taken
    pub async fn register_persisted(&self, alias_str: &str, patch: &CommandPatch) -> Result<Registration, BotError> {
        let aliases = Command::parse_aliases(alias_str);
        if aliases.is_empty() {
            return Err(CommandError::InvalidArgs(format!("no aliases in {:?}", alias_str)).into());
        }

        {
            let registry = self.registry.lock().await;
            for alias in &aliases {
                if let Some(existing) = registry.get(alias) {
                    return Ok(Registration {
                        command: existing,
                        created: false,
                        conflicting_alias: Some(alias.clone()),
                    });
                }
            }
        }

        let mut command = Command::with_patch(patch);
        command.command = aliases.join("|");

        let id = self.store.insert_command(&command.to_record()?).await?;
        let mut data = CommandData::new(Some(id));
        data.set(patch);
        self.store.insert_data(&data).await?;

        command.id = Some(id);
        command.data = Some(data);
        let command = command.into_ref();

        let mut registry = self.registry.lock().await;
        registry.add_persisted_aliases(&command);
        registry.rebuild();

        tracing::info!("Added command {} (id {})", aliases.join("|"), id);
        Ok(Registration {
            command,
            created: true,
            conflicting_alias: None,
        })
    }

    /// Apply a patch to a command and its usage statistics, and persist both
    pub async fn edit(&self, command: &CommandRef, patch: &CommandPatch) -> Result<(), BotError> {
        let mut patch = patch.clone();
        if let Some(alias_str) = &patch.command {
            let aliases = Command::parse_aliases(alias_str);
            if aliases.is_empty() {
                return Err(CommandError::InvalidArgs(format!("no aliases in {:?}", alias_str)).into());
            }
            patch.command = Some(aliases.join("|"));
        }

        let (old_aliases, new_aliases, was_enabled, record, data) = {
            let mut guard = lock_command(command);
            let old_aliases = guard.aliases();
            let was_enabled = guard.enabled;
            guard.set(&patch);
            if let Some(data) = guard.data.as_mut() {
                data.set(&patch);
            }
            (old_aliases, guard.aliases(), was_enabled, guard.to_record()?, guard.data.clone())
        };

        if record.id.is_none() {
            tracing::debug!("Edited non-persisted command {}", record.command);
            return Ok(());
        }

        self.store.update_command(&record).await?;
        if let Some(data) = &data {
            self.store.update_data(data).await?;
        }

        let aliases_changed = old_aliases != new_aliases;
        if aliases_changed || was_enabled != record.enabled {
            let mut registry = self.registry.lock().await;
            if aliases_changed {
                registry.remove_aliases(&old_aliases);
                registry.add_persisted_aliases(command);
            }
            registry.rebuild();
        }

        Ok(())
    }

    /// Delete a persisted command and drop its aliases
    pub async fn remove(&self, command: &CommandRef) -> Result<(), BotError> {
        let id = lock_command(command).id;
        if let Some(id) = id {
            self.store.delete_data(id).await?;
            self.store.delete_command(id).await?;
        }

        let mut registry = self.registry.lock().await;
        registry.remove_persisted_aliases(command);
        registry.rebuild();

        tracing::info!("Removed command {:?}", id);
        Ok(())
    }

    /// Reload one command after it changed in storage.
    ///
    /// Returns whether the command is live afterwards; a disabled or deleted
    /// command is only dropped.
    pub async fn apply_external_update(&self, id: i64) -> Result<bool, BotError> {
        let fresh = match self.store.load_by_id(id, true).await? {
            Some(stored) => Some(self.hydrate(stored).await?.into_ref()),
            None => None,
        };

        let mut registry = self.registry.lock().await;
        if let Some(current) = registry.find_persisted_by_id(id) {
            registry.remove_persisted_aliases(&current);
        }
        let live = match &fresh {
            Some(command) => {
                registry.add_persisted_aliases(command);
                true
            }
            None => false,
        };
        registry.rebuild();

        tracing::info!("Reloaded command {} (live: {})", id, live);
        Ok(live)
    }

    /// Drop a command that was removed from storage elsewhere
    pub async fn apply_external_removal(&self, id: i64) -> Result<bool, BotError> {
        let mut registry = self.registry.lock().await;
        let Some(command) = registry.find_persisted_by_id(id) else {
            tracing::warn!("Invalid command id {} in removal notification", id);
            return Ok(false);
        };

        registry.remove_persisted_aliases(&command);
        registry.rebuild();
        tracing::info!("Dropped command {}", id);
        Ok(true)
    }

    /// Rebuild after the module tier changed out of band
    pub async fn reload_modules(&self) {
        tracing::debug!("Rebuilding commands...");
        self.registry.lock().await.rebuild();
        tracing::debug!("Done rebuilding commands");
    }

    pub async fn set_module_commands(&self, module_id: &str, commands: AliasTable) {
        let mut registry = self.registry.lock().await;
        registry.set_module_commands(module_id, commands);
        registry.rebuild();
    }

    pub async fn remove_module(&self, module_id: &str) -> bool {
        let mut registry = self.registry.lock().await;
        let removed = registry.remove_module(module_id);
        if removed {
            registry.rebuild();
        }
        removed
    }

    pub async fn get(&self, alias: &str) -> Option<CommandRef> {
        self.registry.lock().await.get(alias)
    }

    pub async fn find_by_id(&self, id: i64) -> Option<CommandRef> {
        self.registry.lock().await.find_persisted_by_id(id)
    }

    /// Number of aliases in the merged table
    pub async fn alias_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    pub async fn dispatch(
        &self,
        source: &mut User,
        event: &Message,
        sink: &dyn ChatSink,
        ledger: &TokenLedger,
    ) -> Dispatch {
        self.dispatch_at(source, event, sink, ledger, Utc::now()).await
    }

    /// Resolve the event's alias and run the command's admission pipeline
    pub async fn dispatch_at(
        &self,
        source: &mut User,
        event: &Message,
        sink: &dyn ChatSink,
        ledger: &TokenLedger,
        now: DateTime<Utc>,
    ) -> Dispatch {
        let Content::Command { name, .. } = &event.content else {
            return Dispatch::NotACommand;
        };
        let alias = name.to_lowercase();

        let Some(command) = self.registry.lock().await.get(&alias) else {
            return Dispatch::Unknown(alias);
        };

        let mut inv = Invocation::new(source, event, sink, ledger, &self.functions).at(now);
        let result = lock_command(&command).run(&mut inv);

        match result {
            Ok(()) => Dispatch::Ran { alias },
            Err(reason) => {
                tracing::debug!("Command {} did not run: {}", alias, reason);
                Dispatch::Denied { alias, reason }
            }
        }
    }

    /// Persist the usage statistics of every persisted command
    pub async fn commit(&self) -> Result<usize, BotError> {
        let commands = self.registry.lock().await.persisted_commands();
        let snapshots: Vec<CommandData> = commands
            .iter()
            .filter_map(|command| lock_command(command).data.clone())
            .collect();

        for data in &snapshots {
            self.store.update_data(data).await?;
        }

        tracing::debug!("Committed usage statistics of {} commands", snapshots.len());
        Ok(snapshots.len())
    }

    pub async fn sweep_cooldowns(&self, now: DateTime<Utc>) -> usize {
        let evicted = self.registry.lock().await.sweep_cooldowns(now);
        if evicted > 0 {
            tracing::debug!("Evicted {} stale cooldown entries", evicted);
        }
        evicted
    }

    /// Store a documentation example and attach it to its live command
    pub async fn add_example(&self, mut example: CommandExample) -> Result<i64, BotError> {
        let id = self.store.insert_example(&example).await?;
        example.id = Some(id);

        if let Some(command) = self.registry.lock().await.find_persisted_by_id(example.command_id) {
            lock_command(&command).examples.push(example);
        }
        Ok(id)
    }

    /// Flattened command list for the documentation pages
    pub async fn parse_for_web(&self) -> Vec<CommandDoc> {
        let registry = self.registry.lock().await;
        docs::parse_for_web(registry.merged(), &self.prefix)
    }
}
