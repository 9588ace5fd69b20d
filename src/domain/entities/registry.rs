use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::action::{Action, MultiAction};
use super::command::{lock_command, CommandRef};

/// alias -> command
pub type AliasTable = BTreeMap<String, CommandRef>;

/// Compiles commands from all sources into one alias table.
///
/// Sources, in increasing precedence:
///  - internal: commands added in code
///  - persisted: commands loaded from the database
///  - modules: commands provided by enabled modules, in module order
///
/// On an alias collision the later source wins, except when both commands
/// carry multi actions: then the earlier one absorbs the later one's
/// sub-commands.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    internal: AliasTable,
    persisted: AliasTable,
    modules: Vec<(String, AliasTable)>,
    merged: AliasTable,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_internal(&mut self, commands: AliasTable) {
        self.internal = commands;
    }

    pub fn internal(&self) -> &AliasTable {
        &self.internal
    }

    /// Install or replace the commands of one module
    pub fn set_module_commands(&mut self, module_id: impl Into<String>, commands: AliasTable) {
        let module_id = module_id.into();
        match self.modules.iter_mut().find(|(id, _)| *id == module_id) {
            Some((_, existing)) => *existing = commands,
            None => self.modules.push((module_id, commands)),
        }
    }

    pub fn remove_module(&mut self, module_id: &str) -> bool {
        let before = self.modules.len();
        self.modules.retain(|(id, _)| id != module_id);
        before != self.modules.len()
    }

    pub fn clear_persisted(&mut self) {
        self.persisted.clear();
    }

    /// Index every alias of `command` into the persisted tier
    pub fn add_persisted_aliases(&mut self, command: &CommandRef) -> usize {
        let aliases = lock_command(command).aliases();
        for alias in &aliases {
            self.persisted.insert(alias.clone(), command.clone());
        }
        aliases.len()
    }

    pub fn remove_persisted_aliases(&mut self, command: &CommandRef) {
        let aliases = lock_command(command).aliases();
        self.remove_aliases(&aliases);
    }

    pub fn remove_aliases(&mut self, aliases: &[String]) {
        for alias in aliases {
            if self.persisted.remove(alias).is_none() {
                tracing::warn!("{} was not in the list of commands when we removed it", alias);
            }
        }
    }

    pub fn find_persisted_by_id(&self, id: i64) -> Option<CommandRef> {
        self.persisted
            .values()
            .find(|command| lock_command(command).id == Some(id))
            .cloned()
    }

    /// Distinct persisted commands
    pub fn persisted_commands(&self) -> Vec<CommandRef> {
        let mut commands: Vec<CommandRef> = Vec::new();
        for command in self.persisted.values() {
            if !commands.iter().any(|c| Arc::ptr_eq(c, command)) {
                commands.push(command.clone());
            }
        }
        commands
    }

    pub fn get(&self, alias: &str) -> Option<CommandRef> {
        self.merged.get(&alias.to_lowercase()).cloned()
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.merged.contains_key(&alias.to_lowercase())
    }

    pub fn merged(&self) -> &AliasTable {
        &self.merged
    }

    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    /// Recompute the merged table from all tiers
    pub fn rebuild(&mut self) {
        let mut merged = AliasTable::new();

        merge_commands(&self.internal, &mut merged);

        let persisted: AliasTable = self
            .persisted
            .iter()
            .filter(|(_, command)| lock_command(command).enabled)
            .map(|(alias, command)| (alias.clone(), command.clone()))
            .collect();
        merge_commands(&persisted, &mut merged);

        for (_, commands) in &self.modules {
            merge_commands(commands, &mut merged);
        }

        tracing::debug!("Rebuilt command table: {} aliases", merged.len());
        self.merged = merged;
    }

    /// Evict stale per-user cooldown entries of every reachable command
    pub fn sweep_cooldowns(&self, now: DateTime<Utc>) -> usize {
        let mut seen: Vec<&CommandRef> = Vec::new();
        let mut evicted = 0;
        let tiers = [&self.internal, &self.persisted, &self.merged];
        for command in tiers.into_iter().flat_map(|tier| tier.values()) {
            if seen.iter().any(|c| Arc::ptr_eq(*c, command)) {
                continue;
            }
            seen.push(command);
            evicted += lock_command(command).sweep_cooldowns(now);
        }
        evicted
    }
}

fn merge_commands(source: &AliasTable, out: &mut AliasTable) {
    for (alias, command) in source {
        // Reset whatever an earlier pass absorbed into this command's action
        let incoming: Option<MultiAction> = {
            let mut guard = lock_command(command);
            if let Some(action) = guard.action.as_mut() {
                action.reset();
            }
            guard.action.as_ref().and_then(Action::as_multi).cloned()
        };

        if let (Some(existing), Some(incoming)) = (out.get(alias).cloned(), incoming) {
            if !Arc::ptr_eq(&existing, command) {
                let mut current = lock_command(&existing);
                if let Some(Action::Multi(multi)) = current.action.as_mut() {
                    multi.absorb(&incoming);
                    continue;
                }
            }
        }

        out.insert(alias.clone(), command.clone());
    }
}
