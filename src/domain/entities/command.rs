use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::{Action, ActionSpec, Args, Callback, FunctionAction, Invocation, MultiAction, SubcommandSpec};
use super::example::CommandExample;
use crate::application::errors::{AdmissionDenied, StorageError};

/// Shared handle to a command; tiers and multi actions point at the same instance
pub type CommandRef = Arc<Mutex<Command>>;

/// Lock a command, recovering the data if a previous holder panicked
pub fn lock_command(command: &CommandRef) -> MutexGuard<'_, Command> {
    command.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Partial update: only `Some` fields are applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandPatch {
    pub level: Option<i32>,
    pub action: Option<ActionSpec>,
    pub extra_args: Option<Args>,
    pub command: Option<String>,
    pub description: Option<String>,
    pub delay_all: Option<i64>,
    pub delay_user: Option<i64>,
    pub enabled: Option<bool>,
    pub cost: Option<i64>,
    pub tokens_cost: Option<i64>,
    pub can_execute_with_whisper: Option<bool>,
    pub sub_only: Option<bool>,
    pub mod_only: Option<bool>,

    // Usage statistics
    pub num_uses: Option<i64>,
    pub added_by: Option<i64>,
    pub edited_by: Option<i64>,
    pub last_date_used: Option<DateTime<Utc>>,
}

/// Usage statistics of a persisted command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandData {
    pub command_id: Option<i64>,
    pub num_uses: i64,
    pub added_by: Option<i64>,
    pub edited_by: Option<i64>,
    pub last_date_used: Option<DateTime<Utc>>,
}

impl CommandData {
    pub fn new(command_id: Option<i64>) -> Self {
        Self {
            command_id,
            ..Default::default()
        }
    }

    pub fn set(&mut self, patch: &CommandPatch) {
        self.num_uses = patch.num_uses.unwrap_or(self.num_uses);
        self.added_by = patch.added_by.or(self.added_by);
        self.edited_by = patch.edited_by.or(self.edited_by);
        self.last_date_used = patch.last_date_used.or(self.last_date_used);
    }
}

/// Row shape of a persisted command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: Option<i64>,
    pub level: i32,
    /// JSON encoded [`ActionSpec`]
    pub action: Option<String>,
    /// JSON encoded argument map
    pub extra_args: Option<String>,
    pub command: String,
    pub description: Option<String>,
    pub delay_all: i64,
    pub delay_user: i64,
    pub enabled: bool,
    pub cost: i64,
    pub tokens_cost: i64,
    pub can_execute_with_whisper: bool,
    pub sub_only: bool,
    pub mod_only: bool,
}

/// A chat command: an action plus its admission-control metadata
#[derive(Debug, Clone)]
pub struct Command {
    pub id: Option<i64>,
    /// Canonical `|`-joined aliases, the first one is the main alias
    pub command: String,
    pub level: i32,
    pub action: Option<Action>,
    /// Serialized form of `action`, absent for native bindings
    pub action_spec: Option<ActionSpec>,
    pub extra_args: Args,
    pub description: Option<String>,
    pub delay_all: i64,
    pub delay_user: i64,
    pub enabled: bool,
    pub cost: i64,
    pub tokens_cost: i64,
    pub can_execute_with_whisper: bool,
    pub sub_only: bool,
    pub mod_only: bool,

    pub last_run: Option<DateTime<Utc>>,
    pub last_run_by_user: HashMap<String, DateTime<Utc>>,

    pub data: Option<CommandData>,
    pub examples: Vec<CommandExample>,
}

impl Default for Command {
    fn default() -> Self {
        Self::new()
    }
}

impl Command {
    pub const MIN_WHISPER_LEVEL: i32 = 420;
    pub const BYPASS_DELAY_LEVEL: i32 = 2000;
    pub const BYPASS_SUB_ONLY_LEVEL: i32 = 500;
    pub const BYPASS_MOD_ONLY_LEVEL: i32 = 500;
    /// Users at this level (and moderators) wait a fifth of the cooldowns
    pub const PRIVILEGED_LEVEL: i32 = 500;
    pub const PRIVILEGED_CD_MODIFIER: f64 = 0.2;

    pub const DEFAULT_CD_ALL: i64 = 5;
    pub const DEFAULT_CD_USER: i64 = 15;
    pub const DEFAULT_LEVEL: i32 = 100;

    pub fn new() -> Self {
        Self {
            id: None,
            command: String::new(),
            level: Self::DEFAULT_LEVEL,
            action: None,
            action_spec: None,
            extra_args: Args::new(),
            description: None,
            delay_all: Self::DEFAULT_CD_ALL,
            delay_user: Self::DEFAULT_CD_USER,
            enabled: true,
            cost: 0,
            tokens_cost: 0,
            can_execute_with_whisper: false,
            sub_only: false,
            mod_only: false,
            last_run: None,
            last_run_by_user: HashMap::new(),
            data: None,
            examples: Vec::new(),
        }
    }

    pub fn with_patch(patch: &CommandPatch) -> Self {
        let mut command = Self::new();
        command.set(patch);
        command
    }

    /// Command bound by name to a callback of the dispatch [`FunctionTable`](super::FunctionTable)
    pub fn dispatch_command(cb: impl Into<String>, patch: &CommandPatch) -> Self {
        let cb = cb.into();
        let mut command = Self::with_patch(patch);
        command.action = Some(Action::Function(FunctionAction::Dispatch(cb.clone())));
        command.action_spec = Some(ActionSpec::Func { cb });
        command
    }

    /// Command bound directly to a native callback
    pub fn raw_command(name: impl Into<String>, callback: Callback, patch: &CommandPatch) -> Self {
        let mut command = Self::with_patch(patch);
        command.action = Some(Action::Function(FunctionAction::Raw {
            name: name.into(),
            callback,
        }));
        command.action_spec = None;
        command
    }

    pub fn multiaction_command(
        commands: BTreeMap<String, CommandRef>,
        default: Option<String>,
        fallback: Option<String>,
        patch: &CommandPatch,
    ) -> Self {
        let mut command = Self::with_patch(patch);
        command.action = Some(Action::Multi(MultiAction::ready_built(commands, default, fallback)));
        command.action_spec = None;
        command
    }

    pub fn from_record(record: &CommandRecord) -> Self {
        let mut command = Self::new();
        command.id = record.id;
        command.command = record.command.clone();
        command.level = record.level;
        command.description = record.description.clone();
        command.delay_all = record.delay_all.max(0);
        command.delay_user = record.delay_user.max(0);
        command.enabled = record.enabled;
        command.cost = record.cost.max(0);
        command.tokens_cost = record.tokens_cost.max(0);
        command.can_execute_with_whisper = record.can_execute_with_whisper;
        command.sub_only = record.sub_only;
        command.mod_only = record.mod_only;

        if let Some(json) = &record.action {
            match serde_json::from_str::<ActionSpec>(json) {
                Ok(spec) => {
                    command.action = Some(Action::from_spec(&spec));
                    command.action_spec = Some(spec);
                }
                Err(e) => tracing::warn!("Invalid action for command {}: {}", record.command, e),
            }
        }

        if let Some(json) = &record.extra_args {
            match serde_json::from_str::<Args>(json) {
                Ok(args) => command.extra_args = args,
                Err(e) => tracing::warn!("Invalid extra arguments for command {}: {}", record.command, e),
            }
        }

        command
    }

    pub fn from_subcommand(spec: &SubcommandSpec) -> Self {
        let mut command = Self::new();
        command.command = Self::parse_aliases(&spec.command).join("|");
        command.level = spec.level.unwrap_or(Self::DEFAULT_LEVEL).max(0);
        command.description = spec.description.clone();
        command.delay_all = spec.delay_all.unwrap_or(Self::DEFAULT_CD_ALL).max(0);
        command.delay_user = spec.delay_user.unwrap_or(Self::DEFAULT_CD_USER).max(0);
        command.action = Some(Action::from_spec(&spec.action));
        command.action_spec = Some(spec.action.clone());
        command
    }

    pub fn to_record(&self) -> Result<CommandRecord, StorageError> {
        let action = self.action_spec.as_ref().map(serde_json::to_string).transpose()?;
        let extra_args = if self.extra_args.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&self.extra_args)?)
        };

        Ok(CommandRecord {
            id: self.id,
            level: self.level,
            action,
            extra_args,
            command: self.command.clone(),
            description: self.description.clone(),
            delay_all: self.delay_all,
            delay_user: self.delay_user,
            enabled: self.enabled,
            cost: self.cost,
            tokens_cost: self.tokens_cost,
            can_execute_with_whisper: self.can_execute_with_whisper,
            sub_only: self.sub_only,
            mod_only: self.mod_only,
        })
    }

    pub fn into_ref(self) -> CommandRef {
        Arc::new(Mutex::new(self))
    }

    /// Partial-update merge; numeric limits are clamped to zero
    pub fn set(&mut self, patch: &CommandPatch) {
        self.level = patch.level.unwrap_or(self.level).max(0);
        if let Some(spec) = &patch.action {
            self.action = Some(Action::from_spec(spec));
            self.action_spec = Some(spec.clone());
        }
        if let Some(extra_args) = &patch.extra_args {
            self.extra_args = extra_args.clone();
        }
        if let Some(command) = &patch.command {
            self.command = command.clone();
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        self.delay_all = patch.delay_all.unwrap_or(self.delay_all).max(0);
        self.delay_user = patch.delay_user.unwrap_or(self.delay_user).max(0);
        self.enabled = patch.enabled.unwrap_or(self.enabled);
        self.cost = patch.cost.unwrap_or(self.cost).max(0);
        self.tokens_cost = patch.tokens_cost.unwrap_or(self.tokens_cost).max(0);
        self.can_execute_with_whisper = patch.can_execute_with_whisper.unwrap_or(self.can_execute_with_whisper);
        self.sub_only = patch.sub_only.unwrap_or(self.sub_only);
        self.mod_only = patch.mod_only.unwrap_or(self.mod_only);
    }

    /// Normalize a `!a|B|c` alias string into `["a", "b", "c"]`
    pub fn parse_aliases(alias_str: &str) -> Vec<String> {
        alias_str
            .to_lowercase()
            .replace('!', "")
            .split('|')
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn aliases(&self) -> Vec<String> {
        self.command
            .split('|')
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn main_alias(&self) -> Option<&str> {
        self.command.split('|').map(str::trim).find(|alias| !alias.is_empty())
    }

    /// Gates 1-8 of admission control, without side effects
    pub fn check(&self, inv: &Invocation<'_>) -> Result<(), AdmissionDenied> {
        if self.action.is_none() {
            tracing::warn!("Command {} is not available", self.command);
            return Err(AdmissionDenied::NoAction);
        }
        if !self.enabled {
            return Err(AdmissionDenied::Disabled);
        }

        let source = &*inv.source;

        if source.level < self.level {
            return Err(AdmissionDenied::InsufficientLevel {
                have: source.level,
                need: self.level,
            });
        }

        if inv.whisper && !self.can_execute_with_whisper && source.level < Self::MIN_WHISPER_LEVEL && !source.moderator {
            return Err(AdmissionDenied::WhisperNotAllowed);
        }

        if self.sub_only && !source.subscriber && source.level < Self::BYPASS_SUB_ONLY_LEVEL && !source.moderator {
            return Err(AdmissionDenied::SubscribersOnly);
        }

        if self.mod_only && !source.moderator && source.level < Self::BYPASS_MOD_ONLY_LEVEL {
            return Err(AdmissionDenied::ModeratorsOnly);
        }

        if source.level < Self::BYPASS_DELAY_LEVEL {
            let cd_modifier = if source.level >= Self::PRIVILEGED_LEVEL || source.moderator {
                Self::PRIVILEGED_CD_MODIFIER
            } else {
                1.0
            };

            if let Some(last_run) = self.last_run {
                let since = seconds_between(last_run, inv.now) / cd_modifier;
                if since < self.delay_all as f64 {
                    tracing::debug!("Command was run {:.2} seconds ago, waiting...", since);
                    return Err(AdmissionDenied::GlobalCooldown {
                        remaining: self.delay_all as f64 - since,
                    });
                }
            }

            if let Some(last_run) = self.last_run_by_user.get(&source.username) {
                let since = seconds_between(*last_run, inv.now) / cd_modifier;
                if since < self.delay_user as f64 {
                    tracing::debug!("{} ran command {:.2} seconds ago, waiting...", source.username, since);
                    return Err(AdmissionDenied::UserCooldown {
                        remaining: self.delay_user as f64 - since,
                    });
                }
            }
        }

        if self.cost > 0 && !source.can_afford(self.cost) {
            return Err(AdmissionDenied::InsufficientPoints {
                cost: self.cost,
                available: source.points_available(),
            });
        }

        if self.tokens_cost > 0 && !source.can_afford_with_tokens(inv.ledger, self.tokens_cost) {
            return Err(AdmissionDenied::InsufficientTokens {
                cost: self.tokens_cost,
                available: source.get_tokens(inv.ledger),
            });
        }

        Ok(())
    }

    /// Run the admission pipeline and, if admitted, the action.
    ///
    /// Usage, cost and cooldowns are only committed when the action reports
    /// that it ran. Costs are charged last and re-validated at that point.
    pub fn run(&mut self, inv: &mut Invocation<'_>) -> Result<(), AdmissionDenied> {
        self.check(inv)?;

        inv.args.insert("whisper".to_string(), Value::Bool(inv.whisper));
        for (key, value) in &self.extra_args {
            inv.args.insert(key.clone(), value.clone());
        }

        let ran = match &self.action {
            Some(action) => action.run(inv),
            None => false,
        };
        if !ran {
            return Err(AdmissionDenied::ActionDidNotRun);
        }

        if let Some(data) = self.data.as_mut() {
            data.num_uses += 1;
            data.last_date_used = Some(inv.now);
        }

        if self.cost > 0 && !inv.source.spend(self.cost) {
            tracing::warn!("{} used points they do not have", inv.source.username);
            return Err(AdmissionDenied::SpendRace { currency: "points" });
        }

        if self.tokens_cost > 0 && !inv.source.spend_tokens(inv.ledger, self.tokens_cost) {
            tracing::warn!("{} used tokens they do not have", inv.source.username);
            inv.source.points += self.cost;
            return Err(AdmissionDenied::SpendRace { currency: "tokens" });
        }

        self.last_run = Some(inv.now);
        self.last_run_by_user.insert(inv.source.username.clone(), inv.now);
        Ok(())
    }

    /// Forget per-user run times that can no longer block anyone.
    ///
    /// Returns how many entries were evicted.
    pub fn sweep_cooldowns(&mut self, now: DateTime<Utc>) -> usize {
        let horizon = self.delay_all.max(self.delay_user) as f64;
        let before = self.last_run_by_user.len();
        self.last_run_by_user
            .retain(|_, last_run| seconds_between(*last_run, now) < horizon);
        before - self.last_run_by_user.len()
    }

    /// Examples for the documentation pages, generated for plain message commands
    pub fn autogenerate_examples(&self) -> Vec<CommandExample> {
        let (Some(id), Some(Action::Message { response, subtype })) = (self.id, &self.action) else {
            return self.examples.clone();
        };
        if !self.examples.is_empty() {
            return self.examples.clone();
        }

        let main_alias = format!("!{}", self.main_alias().unwrap_or_default());
        let mut examples = Vec::new();

        if self.can_execute_with_whisper {
            let mut example = CommandExample::new(id, "Default usage through whisper");
            example.add_chat_message("whisper", &main_alias, "user", Some("bot"));
            example.add_response(*subtype, response);
            examples.push(example);
        }

        let mut example = CommandExample::new(id, "Default usage");
        example.add_chat_message("say", &main_alias, "user", None);
        example.add_response(*subtype, response);
        examples.push(example);

        examples
    }
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{MessageSubtype, User};
    use crate::domain::testing::Fixture;
    use crate::domain::traits::Outbound;
    use chrono::Duration;

    fn message_command(response: &str) -> Command {
        Command::with_patch(&CommandPatch {
            command: Some("test".into()),
            action: Some(ActionSpec::Say { message: response.into() }),
            ..Default::default()
        })
    }

    #[test]
    fn test_set_clamps_negative_values() {
        let mut command = Command::new();
        command.set(&CommandPatch {
            delay_all: Some(-5),
            delay_user: Some(-1),
            cost: Some(-100),
            tokens_cost: Some(-3),
            ..Default::default()
        });

        assert_eq!(command.delay_all, 0);
        assert_eq!(command.delay_user, 0);
        assert_eq!(command.cost, 0);
        assert_eq!(command.tokens_cost, 0);
    }

    #[test]
    fn test_set_is_partial() {
        let mut command = message_command("hello");
        command.set(&CommandPatch {
            level: Some(250),
            ..Default::default()
        });

        assert_eq!(command.level, 250);
        assert_eq!(command.delay_all, Command::DEFAULT_CD_ALL);
        assert_eq!(command.delay_user, Command::DEFAULT_CD_USER);
        assert_eq!(command.command, "test");
        assert!(matches!(&command.action, Some(Action::Message { response, .. }) if response == "hello"));
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Command::parse_aliases("!Foo|bar| baz |"), vec!["foo", "bar", "baz"]);
        assert!(Command::parse_aliases("|!|").is_empty());
    }

    #[test]
    fn test_cooldown_scenario() {
        let fixture = Fixture::new();
        let mut command = message_command("hi");
        command.level = 0;
        command.delay_all = 5;
        command.delay_user = 15;

        let mut user = User::new("viewer").with_level(100);
        let t0 = fixture.now;

        assert!(command.run(&mut fixture.invocation(&mut user).at(t0)).is_ok());
        assert_eq!(command.last_run_by_user.get("viewer"), Some(&t0));

        let denied = command.run(&mut fixture.invocation(&mut user).at(t0 + Duration::seconds(10)));
        assert!(matches!(denied, Err(AdmissionDenied::UserCooldown { .. })));

        assert!(command.run(&mut fixture.invocation(&mut user).at(t0 + Duration::seconds(16))).is_ok());
    }

    #[test]
    fn test_global_cooldown_applies_to_everyone() {
        let fixture = Fixture::new();
        let mut command = message_command("hi");
        command.level = 0;

        let mut first = User::new("first");
        let mut second = User::new("second");
        assert!(command.run(&mut fixture.invocation(&mut first)).is_ok());
        let denied = command.run(&mut fixture.invocation(&mut second).at(fixture.now + Duration::seconds(2)));
        assert!(matches!(denied, Err(AdmissionDenied::GlobalCooldown { .. })));
    }

    #[test]
    fn test_privileged_users_wait_less() {
        let fixture = Fixture::new();
        let mut command = message_command("hi");
        command.level = 0;
        command.delay_all = 0;
        command.delay_user = 15;

        let mut moderator = User::new("mod").with_moderator(true);
        assert!(command.run(&mut fixture.invocation(&mut moderator)).is_ok());
        // 4s / 0.2 = 20s >= 15s
        assert!(command.run(&mut fixture.invocation(&mut moderator).at(fixture.now + Duration::seconds(4))).is_ok());
    }

    #[test]
    fn test_delay_bypass_level() {
        let fixture = Fixture::new();
        let mut command = message_command("hi");
        let mut admin = User::new("admin").with_level(Command::BYPASS_DELAY_LEVEL);

        assert!(command.run(&mut fixture.invocation(&mut admin)).is_ok());
        assert!(command.run(&mut fixture.invocation(&mut admin)).is_ok());
        assert_eq!(fixture.sent().len(), 2);
    }

    #[test]
    fn test_level_and_capability_gates() {
        let fixture = Fixture::new();
        let mut command = message_command("hi");
        command.level = 200;

        let mut user = User::new("viewer");
        let denied = command.check(&fixture.invocation(&mut user));
        assert_eq!(denied, Err(AdmissionDenied::InsufficientLevel { have: 100, need: 200 }));

        command.level = 0;
        let mut inv = fixture.invocation(&mut user);
        inv.whisper = true;
        assert_eq!(command.check(&inv), Err(AdmissionDenied::WhisperNotAllowed));
        command.can_execute_with_whisper = true;
        assert_eq!(command.check(&inv), Ok(()));

        command.sub_only = true;
        assert_eq!(command.check(&fixture.invocation(&mut user)), Err(AdmissionDenied::SubscribersOnly));
        let mut sub = User::new("sub").with_subscriber(true);
        assert_eq!(command.check(&fixture.invocation(&mut sub)), Ok(()));

        command.sub_only = false;
        command.mod_only = true;
        assert_eq!(command.check(&fixture.invocation(&mut sub)), Err(AdmissionDenied::ModeratorsOnly));
        let mut staff = User::new("staff").with_level(Command::BYPASS_MOD_ONLY_LEVEL);
        assert_eq!(command.check(&fixture.invocation(&mut staff)), Ok(()));
    }

    #[test]
    fn test_disabled_and_empty_commands() {
        let fixture = Fixture::new();
        let mut user = User::new("viewer");

        let mut command = Command::new();
        assert_eq!(command.run(&mut fixture.invocation(&mut user)), Err(AdmissionDenied::NoAction));

        let mut command = message_command("hi");
        command.enabled = false;
        assert_eq!(command.run(&mut fixture.invocation(&mut user)), Err(AdmissionDenied::Disabled));
    }

    #[test]
    fn test_cost_is_only_charged_when_action_ran() {
        let fixture = Fixture::new();
        let mut command = message_command("$(1)");
        command.level = 0;
        command.cost = 10;
        command.data = Some(CommandData::new(Some(1)));

        let mut user = User::new("viewer").with_points(50);
        let denied = command.run(&mut fixture.invocation(&mut user).with_message(None));
        assert_eq!(denied, Err(AdmissionDenied::ActionDidNotRun));
        assert_eq!(user.points, 50);
        assert_eq!(command.data.as_ref().map(|d| d.num_uses), Some(0));
        assert!(command.last_run.is_none());

        let ran = command.run(&mut fixture.invocation(&mut user).with_message(Some("hey".into())));
        assert!(ran.is_ok());
        assert_eq!(user.points, 40);
        assert_eq!(command.data.as_ref().map(|d| d.num_uses), Some(1));
        assert_eq!(fixture.sent(), vec![Outbound::Say("hey".into())]);
    }

    #[test]
    fn test_insufficient_points_and_tokens() {
        let fixture = Fixture::new();
        let mut command = message_command("hi");
        command.level = 0;
        command.cost = 10;

        let mut user = User::new("viewer").with_points(20);
        user.create_debt(15);
        assert_eq!(
            command.check(&fixture.invocation(&mut user)),
            Err(AdmissionDenied::InsufficientPoints { cost: 10, available: 5 })
        );

        command.cost = 0;
        command.tokens_cost = 3;
        assert_eq!(
            command.check(&fixture.invocation(&mut user)),
            Err(AdmissionDenied::InsufficientTokens { cost: 3, available: 0 })
        );

        assert!(user.award_tokens(&fixture.ledger, 5));
        assert!(command.run(&mut fixture.invocation(&mut user)).is_ok());
        assert_eq!(user.get_tokens(&fixture.ledger), 2);
    }

    #[test]
    fn test_spend_race_refunds_and_skips_cooldown() {
        let mut fixture = Fixture::new();
        let ledger = fixture.ledger.clone();
        // The callback drains the token ledger before the cost is charged
        fixture.functions.register("drain", move |inv| {
            let tokens = inv.source.get_tokens(&ledger);
            Ok(inv.source.spend_tokens(&ledger, tokens))
        });

        let mut command = Command::dispatch_command("drain", &CommandPatch::default());
        command.level = 0;
        command.cost = 5;
        command.tokens_cost = 2;

        let mut user = User::new("viewer").with_points(10);
        assert!(user.award_tokens(&fixture.ledger, 4));

        let result = command.run(&mut fixture.invocation(&mut user));
        assert_eq!(result, Err(AdmissionDenied::SpendRace { currency: "tokens" }));
        assert_eq!(user.points, 10);
        assert!(command.last_run.is_none());
        assert!(command.last_run_by_user.is_empty());
    }

    #[test]
    fn test_extra_args_override_invocation_args() {
        let mut fixture = Fixture::new();
        fixture.functions.register("echo_arg", |inv| {
            let value = inv.args.get("mode").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            inv.say(value)?;
            Ok(true)
        });

        let mut command = Command::dispatch_command("echo_arg", &CommandPatch::default());
        command.level = 0;
        command.extra_args.insert("mode".into(), Value::String("bound".into()));

        let mut user = User::new("viewer");
        let mut inv = fixture.invocation(&mut user);
        inv.args.insert("mode".into(), Value::String("caller".into()));
        assert!(command.run(&mut inv).is_ok());
        assert_eq!(inv.args.get("whisper"), Some(&Value::Bool(false)));
        assert_eq!(fixture.sent(), vec![Outbound::Say("bound".into())]);
    }

    #[test]
    fn test_sweep_cooldowns() {
        let fixture = Fixture::new();
        let mut command = message_command("hi");
        command.delay_all = 5;
        command.delay_user = 15;
        command.last_run_by_user.insert("old".into(), fixture.now - Duration::seconds(60));
        command.last_run_by_user.insert("recent".into(), fixture.now - Duration::seconds(3));

        assert_eq!(command.sweep_cooldowns(fixture.now), 1);
        assert!(command.last_run_by_user.contains_key("recent"));
    }

    #[test]
    fn test_record_round_trip_keeps_action() {
        let mut command = message_command("hi $(source)");
        command.id = Some(7);
        command.extra_args.insert("k".into(), Value::from(1));

        let restored = Command::from_record(&command.to_record().unwrap());
        assert_eq!(restored.id, Some(7));
        assert_eq!(restored.action_spec, command.action_spec);
        assert_eq!(restored.extra_args, command.extra_args);
    }

    #[test]
    fn test_autogenerate_examples() {
        let mut command = Command::with_patch(&CommandPatch {
            command: Some("hello|hi".into()),
            action: Some(ActionSpec::message(MessageSubtype::Reply, "hey there")),
            can_execute_with_whisper: Some(true),
            ..Default::default()
        });
        assert!(command.autogenerate_examples().is_empty());

        command.id = Some(3);
        let examples = command.autogenerate_examples();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].title, "Default usage through whisper");
        assert_eq!(examples[1].chat, "user:!hello\nbot:hey there");
    }
}
