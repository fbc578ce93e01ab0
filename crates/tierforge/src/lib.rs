//! tierforge host
//!
//! Wires the coordination core to real model backends and exposes it on the
//! command line:
//!
//! - [`config`]: `tierforge.toml` plus `TIERFORGE_*` overrides
//! - [`backends`]: OpenAI-compatible HTTP invoker and the offline stub
//! - [`naming`]: LLM-backed workflow namer
//! - [`sentinel`]: input pre-filter run before submission
//! - [`app`]: the assembled [`app::Runtime`]
//! - [`session`], [`commands`]: interactive and batch front-ends

pub mod app;
pub mod backends;
pub mod cli;
pub mod commands;
pub mod config;
pub mod naming;
pub mod render;
pub mod sentinel;
pub mod session;

pub use app::{Runtime, Submission};
pub use config::AppConfig;
pub use sentinel::{Sentinel, Verdict};
