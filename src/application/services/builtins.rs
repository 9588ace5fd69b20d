//! Built-in commands and the native callbacks they bind to

use std::collections::BTreeMap;

use crate::application::errors::CommandError;
use crate::domain::entities::{lock_command, AliasTable, Command, CommandPatch, CommandRef, FunctionTable, Invocation};

/// Tokens granted by `!claim`, once per stream session
pub const CLAIM_REWARD: i64 = 5;

fn reply(inv: &Invocation<'_>, text: String) -> Result<(), CommandError> {
    if inv.whisper {
        inv.whisper_back(text)
    } else {
        inv.say(text)
    }
}

fn points(inv: &mut Invocation<'_>) -> Result<bool, CommandError> {
    let source = &*inv.source;
    let text = match source.points_in_debt() {
        0 => format!("{}, you have {} points", source, source.points),
        debt => format!(
            "{}, you have {} points ({} reserved)",
            source,
            source.points_available(),
            debt
        ),
    };
    reply(inv, text)?;
    Ok(true)
}

fn tokens(inv: &mut Invocation<'_>) -> Result<bool, CommandError> {
    let tokens = inv.source.get_tokens(inv.ledger);
    reply(inv, format!("{}, you have {} tokens", inv.source, tokens))?;
    Ok(true)
}

fn claim(inv: &mut Invocation<'_>) -> Result<bool, CommandError> {
    if inv.ledger.session().is_none() {
        reply(inv, format!("{}, there is no live stream to claim tokens from", inv.source))?;
        return Ok(false);
    }
    if !inv.source.award_tokens(inv.ledger, CLAIM_REWARD) {
        reply(inv, format!("{}, you already claimed your tokens for this stream", inv.source))?;
        return Ok(false);
    }
    reply(inv, format!("{}, you claimed {} tokens", inv.source, CLAIM_REWARD))?;
    Ok(true)
}

/// Callbacks that persisted `func` actions can bind to by name
pub fn function_table() -> FunctionTable {
    let mut functions = FunctionTable::new();
    functions.register("points", points);
    functions.register("tokens", tokens);
    functions.register("claim", claim);
    functions
}

fn builtin(alias: &str, cb: &str, description: &str) -> CommandRef {
    Command::dispatch_command(
        cb,
        &CommandPatch {
            command: Some(alias.to_string()),
            description: Some(description.to_string()),
            can_execute_with_whisper: Some(true),
            delay_all: Some(0),
            ..Default::default()
        },
    )
    .into_ref()
}

/// Internal command tier
pub fn internal_commands() -> AliasTable {
    let mut table = AliasTable::new();

    let points = builtin("points|p", "points", "Show how many points you have");
    let tokens = builtin("tokens", "tokens", "Show how many tokens you have");
    let claim = builtin("claim", "claim", "Claim your tokens for the current stream");
    for command in [points, tokens, claim] {
        let aliases = lock_command(&command).aliases();
        for alias in aliases {
            table.insert(alias, command.clone());
        }
    }

    let mut subs = BTreeMap::new();
    subs.insert("points".to_string(), builtin("points", "points", "Show how many points you have"));
    subs.insert("tokens".to_string(), builtin("tokens", "tokens", "Show how many tokens you have"));
    let economy = Command::multiaction_command(
        subs,
        Some("points".to_string()),
        None,
        &CommandPatch {
            command: Some("economy|eco".to_string()),
            level: Some(100),
            delay_all: Some(0),
            delay_user: Some(0),
            can_execute_with_whisper: Some(true),
            ..Default::default()
        },
    )
    .into_ref();
    table.insert("economy".to_string(), economy.clone());
    table.insert("eco".to_string(), economy);

    table
}
