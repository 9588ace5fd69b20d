//! Domain entities - Core business objects

pub mod action;
pub mod command;
pub mod example;
pub mod message;
pub mod registry;
pub mod user;

pub use action::{Action, ActionSpec, Args, Callback, FunctionAction, FunctionTable, Invocation, MessageSubtype, MultiAction, SubcommandSpec};
pub use command::{lock_command, Command, CommandData, CommandPatch, CommandRecord, CommandRef};
pub use example::{ChatLine, CommandExample};
pub use message::{Content, Message};
pub use registry::{AliasTable, CommandRegistry};
pub use user::{TokenLedger, User};
