//! UEBuilder Core Library
//!
//! Rebuilds Unreal Engine plugins (`.uplugin`) against another installed engine
//! version by driving Epic's `RunUAT BuildPlugin` tool.
//!
//! # Architecture
//!
//! This library holds everything below the user interface, which consumes it
//! through plain Rust calls and callbacks:
//! - **CLI**: the bundled `uebuilder` binary
//! - **Desktop front ends**: register `on_output` / `on_complete` callbacks and
//!   marshal them onto their UI thread
//!
//! # Core Features
//!
//! ## Engine Discovery (`registry` and `engine` modules)
//! - `scan()` - Find engine installs under candidate directories
//! - `EngineRegistry` - Version-to-root mapping with manual add/remove and JSON persistence
//! - `get_search_roots()` - Standard install folders, environment variables, Windows registry
//!
//! ## Plugin Descriptors (`plugin` module)
//! - `PluginDescriptor::load()` - Read friendly name, modules and declared engine version
//!
//! ## Build Orchestration (`operations` and `runner` modules)
//! - `BuildRequest` - Plugin, target engine, platforms, output directory, extra flags
//! - `build_command()` - Pure assembly of the `RunUAT BuildPlugin` command line
//! - `execute()` - Run the tool, streaming classified output lines to a callback
//! - `BuildRun::cancel()` - Terminate the build's process tree
//!
//! ## Settings (`settings` module)
//! - `AppPaths` - Config directory layout
//! - `Settings` - Interface language selection

pub mod engine;
pub mod error;
pub mod logging;
pub mod operations;
pub mod output;
pub mod plugin;
pub mod registry;
pub mod runner;
pub mod settings;

pub use engine::{EngineInstallation, EngineSource, EngineVersion, Platform};
pub use error::{Error, Result};
pub use operations::{build_command, BuildCommand, BuildRequest, ExtraOptions, OptionValue};
pub use output::{OutputLine, Severity, StreamKind};
pub use plugin::{ModuleDescriptor, PluginDescriptor};
pub use registry::{get_search_roots, scan, EngineRegistry};
pub use runner::{execute, BuildRun, RunState, RunSummary};
pub use settings::{AppPaths, Settings};
