//! Application-level orchestration utilities.
//!
//! This module owns the session lifecycle (generate/cancel/quit) and post-generation
//! processing such as artifact files and exports. UI/CLI layers call into this module
//! to keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::{apply_api_key, run_controller, ControllerOptions, UiCommand};
pub(crate) use post_process::{export_creation, save_artifact};
