//! Flag parser for adding and editing commands from chat or the CLI
//!
//! `--whisper --cd 10 Hello $(source)!` sets the options and leaves
//! `Hello $(source)!` as the response text.

use crate::domain::entities::{ActionSpec, CommandPatch, MessageSubtype};

/// Options recognised by the authoring parser; absent flags stay `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthoringOptions {
    pub whisper: Option<bool>,
    pub reply: Option<bool>,
    pub delay_all: Option<i64>,
    pub delay_user: Option<i64>,
    pub level: Option<i32>,
    pub cost: Option<i64>,
    pub mod_only: Option<bool>,
}

impl AuthoringOptions {
    /// How a response written with these options is delivered
    pub fn subtype(&self) -> MessageSubtype {
        if self.whisper == Some(true) {
            MessageSubtype::Whisper
        } else if self.reply == Some(true) {
            MessageSubtype::Reply
        } else {
            MessageSubtype::Say
        }
    }

    /// Patch carrying the options, plus a message action if `response` is not empty
    pub fn into_patch(&self, response: &str) -> CommandPatch {
        let action = if response.trim().is_empty() {
            None
        } else {
            Some(ActionSpec::message(self.subtype(), response))
        };

        CommandPatch {
            action,
            delay_all: self.delay_all,
            delay_user: self.delay_user,
            level: self.level,
            cost: self.cost,
            mod_only: self.mod_only,
            ..Default::default()
        }
    }
}

/// Split `message` into options and response text.
///
/// Returns `None` when a value flag is missing its value or the value is not
/// an integer.
pub fn parse_command_arguments(message: &str) -> Option<(AuthoringOptions, String)> {
    let mut options = AuthoringOptions::default();
    let mut response = Vec::new();
    let mut tokens = message.split_whitespace();

    while let Some(token) = tokens.next() {
        let (flag, inline) = match token.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value)),
            _ => (token, None),
        };

        match flag {
            "--whisper" => options.whisper = Some(true),
            "--no-whisper" => options.whisper = Some(false),
            "--reply" => options.reply = Some(true),
            "--no-reply" => options.reply = Some(false),
            "--modonly" => options.mod_only = Some(true),
            "--no-modonly" => options.mod_only = Some(false),
            "--cd" => options.delay_all = Some(int_value(inline, &mut tokens)?),
            "--usercd" => options.delay_user = Some(int_value(inline, &mut tokens)?),
            "--level" => options.level = Some(i32::try_from(int_value(inline, &mut tokens)?).ok()?),
            "--cost" => options.cost = Some(int_value(inline, &mut tokens)?.checked_abs()?),
            _ => response.push(token),
        }
    }

    Some((options, response.join(" ")))
}

fn int_value<'a>(inline: Option<&'a str>, tokens: &mut impl Iterator<Item = &'a str>) -> Option<i64> {
    let value = match inline {
        Some(value) => value,
        None => tokens.next()?,
    };
    match value.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::debug!("Invalid integer for command option: {:?}", value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_and_response() {
        let (options, response) = parse_command_arguments("--whisper --cd 10 --usercd=30 Hello $(source)! --cost -50").unwrap();

        assert_eq!(options.whisper, Some(true));
        assert_eq!(options.delay_all, Some(10));
        assert_eq!(options.delay_user, Some(30));
        assert_eq!(options.cost, Some(50));
        assert_eq!(options.level, None);
        assert_eq!(options.mod_only, None);
        assert_eq!(response, "Hello $(source)!");
    }

    #[test]
    fn test_invalid_values() {
        assert!(parse_command_arguments("--cd soon hi").is_none());
        assert!(parse_command_arguments("hi --level").is_none());
        assert!(parse_command_arguments("--level 99999999999 hi").is_none());
        assert!(parse_command_arguments("--cost -9223372036854775808 hi").is_none());
        assert_eq!(parse_command_arguments("--cost=-9223372036854775807 hi").unwrap().0.cost, Some(i64::MAX));
    }

    #[test]
    fn test_patch_from_options() {
        let (options, response) = parse_command_arguments("--reply --modonly --level 500 psst").unwrap();
        let patch = options.into_patch(&response);

        assert_eq!(patch.action, Some(ActionSpec::Reply { message: "psst".into() }));
        assert_eq!(patch.mod_only, Some(true));
        assert_eq!(patch.level, Some(500));
        assert_eq!(patch.delay_all, None);

        let (options, response) = parse_command_arguments("--no-modonly").unwrap();
        let patch = options.into_patch(&response);
        assert!(patch.action.is_none());
        assert_eq!(patch.mod_only, Some(false));
    }
}
