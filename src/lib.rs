#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod assets;
mod config;
mod core;
mod error;
mod index;
#[cfg(feature = "logging")]
mod logging;
mod manifest;
mod pipeline;
pub mod plugin;
mod resolve;
mod serve;
mod tags;
#[cfg(feature = "live")]
mod watch;

pub use crate::assets::{Assets, PendingAsset, Refresh};
pub use crate::config::{Config, Options};
pub use crate::core::{Asset, Event, HashAlgorithm};
pub use crate::error::*;
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::plugin::Attributes;
pub use crate::resolve::ResolveOptions;
#[cfg(feature = "live")]
pub use crate::watch::Watcher;
