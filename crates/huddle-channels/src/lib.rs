//! Transports for huddle
//!
//! This crate provides the channel adapter trait, the console transport used by
//! the CLI, a collecting transport for tests, and the channel manager that
//! wires adapters to the message bus and handles slash commands.

pub mod channel;
pub mod collecting;
pub mod console;
pub mod manager;

// Re-export main types
pub use channel::{InboundSink, MessageChannel};
pub use collecting::CollectingSink;
pub use console::ConsoleChannel;
pub use manager::{ChannelManager, CommandHandler, StandupReport};
