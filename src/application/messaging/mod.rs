//! Message handling - Event-driven message processing

pub mod authoring;
pub mod dispatcher;
pub mod notifications;
pub mod parser;

pub use authoring::{parse_command_arguments, AuthoringOptions};
pub use dispatcher::MessageDispatcher;
pub use notifications::{Notification, NotificationHandler};
pub use parser::MessageParser;
