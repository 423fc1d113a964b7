//! External process execution

pub mod command;

pub use command::{CommandOutput, CommandRunner, CommandSpec, TokioCommandRunner};
