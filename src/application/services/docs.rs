//! Documentation projection of the merged command table

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::domain::entities::{lock_command, Action, AliasTable, CommandExample, CommandRef};

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("non-word pattern is valid"));

/// One entry on the commands page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandDoc {
    /// Main alias with the prefix, `!main sub` for sub-commands
    pub alias: String,
    /// Anchor-safe identifier derived from the alias
    pub resolve_string: String,
    pub description: String,
    pub examples: Vec<CommandExample>,
    pub level: i32,
    pub delay_all: i64,
    pub delay_user: i64,
    pub cost: i64,
    pub tokens_cost: i64,
}

/// Flatten `commands` into documentation entries.
///
/// Multi commands expand into one entry per sub-command; every command is
/// listed once no matter how many aliases point at it. Commands whose
/// description is JSON with `"hidden": true` are left out.
pub fn parse_for_web(commands: &AliasTable, prefix: &str) -> Vec<CommandDoc> {
    let mut seen: Vec<CommandRef> = Vec::new();
    let mut docs = Vec::new();
    for (alias, command) in commands {
        parse_command(alias, None, command, prefix, &mut seen, &mut docs);
    }
    docs
}

fn parse_command(
    alias: &str,
    path: Option<String>,
    command: &CommandRef,
    prefix: &str,
    seen: &mut Vec<CommandRef>,
    docs: &mut Vec<CommandDoc>,
) {
    if seen.iter().any(|c| Arc::ptr_eq(c, command)) {
        return;
    }
    seen.push(command.clone());

    let guard = lock_command(command);

    let mut description = String::new();
    let mut plain_description = guard.description.clone();
    if let Some(raw) = &guard.description {
        if let Ok(Value::Object(json)) = serde_json::from_str::<Value>(raw) {
            if json.get("hidden").and_then(Value::as_bool) == Some(true) {
                return;
            }
            if let Some(text) = json.get("description").and_then(Value::as_str) {
                description = text.to_string();
            }
            plain_description = None;
        }
    }

    let main_alias = guard.main_alias().unwrap_or(alias).to_string();

    if let Some(Action::Multi(multi)) = &guard.action {
        let base = path.unwrap_or(main_alias);
        let subs: Vec<(String, CommandRef)> = multi
            .commands()
            .iter()
            .map(|(sub_alias, sub)| (sub_alias.clone(), sub.clone()))
            .collect();
        drop(guard);

        for (sub_alias, sub) in subs {
            let sub_path = format!("{} {}", base, sub_alias);
            parse_command(&sub_alias, Some(sub_path), &sub, prefix, seen, docs);
        }
        return;
    }

    if description.is_empty() {
        if let Some(text) = plain_description {
            description = text;
        } else if let Some(Action::Message { response, .. }) = &guard.action {
            if response.is_empty() {
                return;
            }
            description = response.clone();
        }
    }

    let name = path.unwrap_or(main_alias);
    docs.push(CommandDoc {
        alias: format!("{}{}", prefix, name),
        resolve_string: NON_WORD.replace_all(&name.replace(' ', "_"), "").into_owned(),
        description,
        examples: guard.autogenerate_examples(),
        level: guard.level,
        delay_all: guard.delay_all,
        delay_user: guard.delay_user,
        cost: guard.cost,
        tokens_cost: guard.tokens_cost,
    });
}
