//! C14 boundary — CLI surface (spec.md §6) and the config/instrument-loading
//! collaborators the core deliberately excludes from its own scope (§1).
//! Nothing under `application`/`domain` depends on this module; it only
//! depends on them.

pub mod cli;
pub mod config_loader;

pub use cli::{Cli, Command, ModeArg};
