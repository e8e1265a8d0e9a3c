#[cfg(feature = "engine-command")]
pub mod command;
