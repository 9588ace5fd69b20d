//! Executable payloads attached to commands

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, TryLockError};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::command::{Command, CommandRef};
use super::message::Message;
use super::user::{TokenLedger, User};
use crate::application::errors::{BotError, CommandError};
use crate::domain::traits::{ChatSink, Outbound};

/// Argument map handed to actions
pub type Args = serde_json::Map<String, Value>;

/// Native command callback. Must not block the dispatch task.
pub type Callback = Arc<dyn Fn(&mut Invocation<'_>) -> Result<bool, CommandError> + Send + Sync>;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\(([A-Za-z0-9_]+)(?::([A-Za-z0-9_]+))?\)").expect("placeholder pattern is valid")
});

/// Everything an action can see and touch while it runs
pub struct Invocation<'a> {
    pub source: &'a mut User,
    /// Text after the command alias
    pub message: Option<String>,
    pub event: &'a Message,
    pub whisper: bool,
    pub args: Args,
    pub sink: &'a dyn ChatSink,
    pub ledger: &'a TokenLedger,
    pub functions: &'a FunctionTable,
    pub now: DateTime<Utc>,
}

impl<'a> Invocation<'a> {
    pub fn new(
        source: &'a mut User,
        event: &'a Message,
        sink: &'a dyn ChatSink,
        ledger: &'a TokenLedger,
        functions: &'a FunctionTable,
    ) -> Self {
        Self {
            source,
            message: event.remaining_text(),
            event,
            whisper: event.whisper,
            args: Args::new(),
            sink,
            ledger,
            functions,
            now: Utc::now(),
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    pub fn say(&self, text: impl Into<String>) -> Result<(), CommandError> {
        self.emit(Outbound::Say(text.into()))
    }

    pub fn whisper_back(&self, text: impl Into<String>) -> Result<(), CommandError> {
        self.emit(Outbound::Whisper {
            to: self.source.username.clone(),
            text: text.into(),
        })
    }

    fn emit(&self, outbound: Outbound) -> Result<(), CommandError> {
        self.sink
            .send(outbound)
            .map_err(|e| CommandError::ExecutionFailed(e.to_string()))
    }

    /// Word `n` (1-based) of the remaining message
    fn word(&self, n: usize) -> Option<&str> {
        self.message.as_deref()?.split_whitespace().nth(n.checked_sub(1)?)
    }
}

/// Named native callbacks that serialized `func` actions bind to
#[derive(Clone, Default)]
pub struct FunctionTable {
    callbacks: HashMap<String, Callback>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn(&mut Invocation<'_>) -> Result<bool, CommandError> + Send + Sync + 'static,
    {
        self.callbacks.insert(name.into(), Arc::new(callback));
    }

    pub fn get(&self, name: &str) -> Option<Callback> {
        self.callbacks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.callbacks.keys().collect();
        names.sort();
        f.debug_struct("FunctionTable").field("callbacks", &names).finish()
    }
}

/// How a message action is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSubtype {
    Say,
    Whisper,
    Me,
    /// Whisper back when invoked through a whisper, otherwise say
    Reply,
}

impl MessageSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageSubtype::Say => "say",
            MessageSubtype::Whisper => "whisper",
            MessageSubtype::Me => "me",
            MessageSubtype::Reply => "reply",
        }
    }
}

/// A native function attached to a command
#[derive(Clone)]
pub enum FunctionAction {
    /// Looked up by name in the invocation's [`FunctionTable`]
    Dispatch(String),
    /// Bound directly at construction
    Raw { name: String, callback: Callback },
}

impl FunctionAction {
    pub fn name(&self) -> &str {
        match self {
            FunctionAction::Dispatch(name) => name,
            FunctionAction::Raw { name, .. } => name,
        }
    }

    fn run(&self, inv: &mut Invocation<'_>) -> bool {
        let callback = match self {
            FunctionAction::Raw { callback, .. } => callback.clone(),
            FunctionAction::Dispatch(name) => match inv.functions.get(name) {
                Some(callback) => callback,
                None => {
                    tracing::error!("{}", CommandError::UnknownCallback(name.clone()));
                    return false;
                }
            },
        };

        match callback(inv) {
            Ok(ran) => ran,
            Err(e) => {
                tracing::error!("Function action {} failed: {}", self.name(), e);
                false
            }
        }
    }
}

impl fmt::Debug for FunctionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionAction::Dispatch(name) => f.debug_tuple("Dispatch").field(name).finish(),
            FunctionAction::Raw { name, .. } => f.debug_struct("Raw").field("name", name).finish_non_exhaustive(),
        }
    }
}

/// A keyed collection of sub-commands (`!main sub ...`)
#[derive(Debug, Clone, Default)]
pub struct MultiAction {
    commands: BTreeMap<String, CommandRef>,
    /// Snapshot restored by `reset`, without anything absorbed from other tiers
    original: BTreeMap<String, CommandRef>,
    pub default: Option<String>,
    pub fallback: Option<String>,
}

impl MultiAction {
    pub fn ready_built(commands: BTreeMap<String, CommandRef>, default: Option<String>, fallback: Option<String>) -> Self {
        Self {
            original: commands.clone(),
            commands,
            default,
            fallback,
        }
    }

    fn from_specs(specs: &[SubcommandSpec], default: Option<String>, fallback: Option<String>) -> Self {
        let mut commands = BTreeMap::new();
        for spec in specs {
            let command = Command::from_subcommand(spec);
            let aliases = command.aliases();
            let command = command.into_ref();
            for alias in aliases {
                commands.insert(alias, command.clone());
            }
        }
        Self::ready_built(commands, default, fallback)
    }

    pub fn commands(&self) -> &BTreeMap<String, CommandRef> {
        &self.commands
    }

    pub fn reset(&mut self) {
        self.commands = self.original.clone();
    }

    /// Take over `other`'s sub-commands; ours are replaced on alias collision
    pub fn absorb(&mut self, other: &MultiAction) {
        for (alias, command) in &other.commands {
            self.commands.insert(alias.clone(), command.clone());
        }
    }

    fn resolve(&self, message: Option<&str>) -> Option<(String, CommandRef, Option<String>)> {
        match message.map(str::trim).filter(|m| !m.is_empty()) {
            Some(text) => {
                let mut parts = text.splitn(2, ' ');
                let first = parts.next().unwrap_or_default().to_lowercase();
                let rest = parts.next().map(|s| s.trim().to_string());

                if let Some(command) = self.commands.get(&first) {
                    return Some((first, command.clone(), rest));
                }

                let fallback = self.fallback.as_ref()?;
                let command = self.commands.get(fallback)?;
                Some((fallback.clone(), command.clone(), Some(text.to_string())))
            }
            None => {
                let default = self.default.as_ref()?;
                let command = self.commands.get(default)?;
                Some((default.clone(), command.clone(), None))
            }
        }
    }

    fn run(&self, inv: &mut Invocation<'_>) -> bool {
        let Some((alias, command, extra)) = self.resolve(inv.message.as_deref()) else {
            return false;
        };

        let mut sub = match command.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                tracing::warn!("Sub-command {} is already running", alias);
                return false;
            }
        };

        if inv.source.level < sub.level {
            tracing::info!(
                "User {} tried running a sub-command they had no access to ({})",
                inv.source.username,
                alias
            );
            return false;
        }

        let outer = std::mem::replace(&mut inv.message, extra);
        let result = sub.run(inv);
        inv.message = outer;

        match result {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!("Sub-command {} did not run: {}", alias, reason);
                false
            }
        }
    }
}

/// Executable payload of a command
#[derive(Debug, Clone)]
pub enum Action {
    Message { response: String, subtype: MessageSubtype },
    Function(FunctionAction),
    Multi(MultiAction),
}

impl Action {
    pub fn say(response: impl Into<String>) -> Self {
        Action::Message {
            response: response.into(),
            subtype: MessageSubtype::Say,
        }
    }

    pub fn from_spec(spec: &ActionSpec) -> Self {
        match spec {
            ActionSpec::Say { message } => Action::Message { response: message.clone(), subtype: MessageSubtype::Say },
            ActionSpec::Whisper { message } => Action::Message { response: message.clone(), subtype: MessageSubtype::Whisper },
            ActionSpec::Me { message } => Action::Message { response: message.clone(), subtype: MessageSubtype::Me },
            ActionSpec::Reply { message } => Action::Message { response: message.clone(), subtype: MessageSubtype::Reply },
            ActionSpec::Func { cb } => Action::Function(FunctionAction::Dispatch(cb.clone())),
            ActionSpec::Multi { default, fallback, commands } => {
                Action::Multi(MultiAction::from_specs(commands, default.clone(), fallback.clone()))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Message { .. } => "message",
            Action::Function(_) => "func",
            Action::Multi(_) => "multi",
        }
    }

    pub fn as_multi(&self) -> Option<&MultiAction> {
        match self {
            Action::Multi(multi) => Some(multi),
            _ => None,
        }
    }

    /// Discard sub-commands absorbed by earlier merge passes
    pub fn reset(&mut self) {
        if let Action::Multi(multi) = self {
            multi.reset();
        }
    }

    /// Execute the payload; returns whether anything observable happened
    pub fn run(&self, inv: &mut Invocation<'_>) -> bool {
        match self {
            Action::Message { response, subtype } => run_message(response, *subtype, inv),
            Action::Function(function) => function.run(inv),
            Action::Multi(multi) => multi.run(inv),
        }
    }
}

fn run_message(response: &str, subtype: MessageSubtype, inv: &mut Invocation<'_>) -> bool {
    let text = render(response, inv);
    if text.trim().is_empty() {
        return false;
    }

    let outbound = match subtype {
        MessageSubtype::Say => Outbound::Say(text),
        MessageSubtype::Me => Outbound::Me(text),
        MessageSubtype::Whisper => Outbound::Whisper {
            to: inv.source.username.clone(),
            text,
        },
        MessageSubtype::Reply if inv.whisper => Outbound::Whisper {
            to: inv.source.username.clone(),
            text,
        },
        MessageSubtype::Reply => Outbound::Say(text),
    };

    match inv.sink.send(outbound) {
        Ok(()) => true,
        Err(BotError::Egress(e)) => {
            tracing::warn!("Failed to deliver response: {}", e);
            false
        }
        Err(e) => {
            tracing::error!("Failed to deliver response: {}", e);
            false
        }
    }
}

/// Substitute `$(...)` placeholders; unknown placeholders render empty
pub fn render(template: &str, inv: &Invocation<'_>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let key = caps.get(2).map(|m| m.as_str());
            resolve_placeholder(name, key, inv)
        })
        .into_owned()
}

fn resolve_placeholder(name: &str, key: Option<&str>, inv: &Invocation<'_>) -> String {
    if let Ok(n) = name.parse::<usize>() {
        return inv.word(n).unwrap_or_default().to_string();
    }

    match (name, key) {
        ("source", None | Some("username")) => inv.source.username_raw.clone(),
        ("source", Some("level")) => inv.source.level.to_string(),
        ("source", Some("points")) => inv.source.points.to_string(),
        ("message", None) => inv.message.clone().unwrap_or_default(),
        ("arg", Some(key)) => match inv.args.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        },
        _ => String::new(),
    }
}

/// Serialized form of an action, as stored in the `action` column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionSpec {
    #[serde(alias = "message")]
    Say { message: String },
    Whisper { message: String },
    Me { message: String },
    Reply { message: String },
    Func { cb: String },
    Multi {
        #[serde(default)]
        default: Option<String>,
        #[serde(default)]
        fallback: Option<String>,
        #[serde(default)]
        commands: Vec<SubcommandSpec>,
    },
}

impl ActionSpec {
    pub fn message(subtype: MessageSubtype, message: impl Into<String>) -> Self {
        let message = message.into();
        match subtype {
            MessageSubtype::Say => ActionSpec::Say { message },
            MessageSubtype::Whisper => ActionSpec::Whisper { message },
            MessageSubtype::Me => ActionSpec::Me { message },
            MessageSubtype::Reply => ActionSpec::Reply { message },
        }
    }
}

/// One sub-command of a serialized multi action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubcommandSpec {
    /// `|`-joined aliases
    pub command: String,
    #[serde(default)]
    pub level: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub delay_all: Option<i64>,
    #[serde(default)]
    pub delay_user: Option<i64>,
    pub action: ActionSpec,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::testing::Fixture;

    #[test]
    fn test_render_placeholders() {
        let fixture = Fixture::new();
        let mut user = User::new("Viewer").with_points(42);
        let mut inv = fixture.invocation(&mut user).with_message(Some("hello big world".to_string()));
        inv.args.insert("target".to_string(), Value::String("chat".to_string()));

        let text = render("$(source) [$(source:points)] says $(2) to $(arg:target): $(message)$(nope)", &inv);
        assert_eq!(text, "Viewer [42] says big to chat: hello big world");
    }

    #[test]
    fn test_message_action_subtypes() {
        let fixture = Fixture::new();
        let mut user = User::new("viewer");

        let mut inv = fixture.invocation(&mut user);
        assert!(Action::say("hi").run(&mut inv));

        inv.whisper = true;
        let reply = Action::Message { response: "psst".into(), subtype: MessageSubtype::Reply };
        assert!(reply.run(&mut inv));

        let me = Action::Message { response: "waves".into(), subtype: MessageSubtype::Me };
        assert!(me.run(&mut inv));

        assert_eq!(
            fixture.sent(),
            vec![
                Outbound::Say("hi".into()),
                Outbound::Whisper { to: "viewer".into(), text: "psst".into() },
                Outbound::Me("waves".into()),
            ]
        );
    }

    #[test]
    fn test_empty_render_does_not_run() {
        let fixture = Fixture::new();
        let mut user = User::new("viewer");
        let mut inv = fixture.invocation(&mut user);

        assert!(!Action::say("$(1)").run(&mut inv));
        assert!(fixture.sent().is_empty());
    }

    #[test]
    fn test_function_error_counts_as_not_run() {
        let mut fixture = Fixture::new();
        fixture.functions.register("boom", |_inv| Err(CommandError::ExecutionFailed("boom".into())));
        fixture.functions.register("ok", |_inv| Ok(true));
        let mut user = User::new("viewer");
        let mut inv = fixture.invocation(&mut user);

        assert!(!Action::Function(FunctionAction::Dispatch("boom".into())).run(&mut inv));
        assert!(Action::Function(FunctionAction::Dispatch("ok".into())).run(&mut inv));
        assert!(!Action::Function(FunctionAction::Dispatch("missing".into())).run(&mut inv));
    }

    fn sub(response: &str) -> CommandRef {
        let mut command = Command::new();
        command.level = 0;
        command.delay_all = 0;
        command.delay_user = 0;
        command.action = Some(Action::say(response));
        command.into_ref()
    }

    #[test]
    fn test_multi_resolution() {
        let fixture = Fixture::new();
        let mut commands = BTreeMap::new();
        commands.insert("add".to_string(), sub("added $(message)"));
        commands.insert("help".to_string(), sub("usage"));
        let multi = Action::Multi(MultiAction::ready_built(commands, Some("help".into()), Some("help".into())));

        let mut user = User::new("viewer");

        let mut inv = fixture.invocation(&mut user).with_message(Some("ADD foo bar".into()));
        assert!(multi.run(&mut inv));
        // Outer message is restored after the sub-command ran
        assert_eq!(inv.message.as_deref(), Some("ADD foo bar"));

        let mut inv = fixture.invocation(&mut user).with_message(None);
        assert!(multi.run(&mut inv));

        let mut inv = fixture.invocation(&mut user).with_message(Some("unknown words".into()));
        assert!(multi.run(&mut inv));

        assert_eq!(
            fixture.sent(),
            vec![
                Outbound::Say("added foo bar".into()),
                Outbound::Say("usage".into()),
                Outbound::Say("usage".into()),
            ]
        );
    }

    #[test]
    fn test_multi_without_resolution() {
        let fixture = Fixture::new();
        let mut commands = BTreeMap::new();
        commands.insert("add".to_string(), sub("added"));
        let multi = Action::Multi(MultiAction::ready_built(commands, None, None));
        let mut user = User::new("viewer");

        let mut inv = fixture.invocation(&mut user).with_message(Some("remove".into()));
        assert!(!multi.run(&mut inv));
        let mut inv = fixture.invocation(&mut user).with_message(None);
        assert!(!multi.run(&mut inv));
    }

    #[test]
    fn test_multi_absorb_and_reset() {
        let mut a = BTreeMap::new();
        a.insert("sub1".to_string(), sub("x"));
        let mut b = BTreeMap::new();
        b.insert("sub2".to_string(), sub("y"));

        let mut left = MultiAction::ready_built(a, Some("sub1".into()), None);
        let right = MultiAction::ready_built(b, Some("sub2".into()), Some("sub2".into()));
        left.absorb(&right);

        let keys: Vec<&String> = left.commands().keys().collect();
        assert_eq!(keys, vec!["sub1", "sub2"]);
        assert_eq!(left.default.as_deref(), Some("sub1"));
        assert_eq!(left.fallback, None);

        left.reset();
        let keys: Vec<&String> = left.commands().keys().collect();
        assert_eq!(keys, vec!["sub1"]);
    }

    #[test]
    fn test_action_spec_json() {
        let spec: ActionSpec = serde_json::from_str(
            r#"{"type":"multi","default":"on","commands":[{"command":"on|enable","level":500,"action":{"type":"say","message":"enabled"}}]}"#,
        )
        .unwrap();

        let action = Action::from_spec(&spec);
        let multi = action.as_multi().unwrap();
        assert_eq!(multi.commands().len(), 2);
        let on = multi.commands().get("on").unwrap();
        let enable = multi.commands().get("enable").unwrap();
        assert!(Arc::ptr_eq(on, enable));
        assert_eq!(on.lock().unwrap().level, 500);

        // Older records store plain messages as "message"
        let spec: ActionSpec = serde_json::from_str(r#"{"type":"message","message":"hi"}"#).unwrap();
        assert_eq!(spec, ActionSpec::Say { message: "hi".into() });
        assert!(matches!(
            Action::from_spec(&spec),
            Action::Message { subtype: MessageSubtype::Say, .. }
        ));
    }
}
