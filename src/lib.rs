//! blueos-install library
//!
//! Provisions a bare Linux board into a running BlueOS container stack in a
//! single unattended pass.
//!
//! # Design Principles
//!
//! - **Safety First**: No unsafe code (`#![forbid(unsafe_code)]`)
//! - **Explicit ordering**: the install is a fixed sequence of [`Stage`]s, each
//!   with a [`StepPolicy`] and a typed [`StepOutcome`]
//! - **Immutable input**: one [`config::InstallationRequest`] is resolved up front
//!   and only ever borrowed afterwards
//! - **Bounded waits**: every fetch retries a bounded number of times and every
//!   poll has a deadline and a cancellation token

pub mod config;
pub mod engine;
pub mod fetch;
pub mod mock;
pub mod orchestrator;
pub mod process;
pub mod retry;
pub mod stages;
pub mod state;

mod error;

pub use error::{ErrorCategory, InstallError};
pub use orchestrator::{InstallContext, Installer};

use serde::Serialize;

/// Installation stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Host validation; runs before anything is mutated
    Preflight,
    /// Board-specific hardware configuration script
    BoardConfig,
    /// Container engine installed and reachable
    RuntimeReady,
    /// Removal of existing containers and dangling images
    Cleanup,
    /// Pull of the pinned images and factory retag
    ImagePull,
    /// Creation of the control container
    ContainerCreate,
    /// udev rules, link-local policy and autostart entry
    SystemFiles,
    /// Network configuration script
    NetworkConfig,
    /// Reboot scheduling
    Done,
}

impl Stage {
    /// Every stage in the order the orchestrator runs them
    pub const ORDER: [Stage; 9] = [
        Stage::Preflight,
        Stage::BoardConfig,
        Stage::RuntimeReady,
        Stage::Cleanup,
        Stage::ImagePull,
        Stage::ContainerCreate,
        Stage::SystemFiles,
        Stage::NetworkConfig,
        Stage::Done,
    ];

    /// Failure policy for this stage
    pub fn policy(&self) -> StepPolicy {
        match self {
            Stage::BoardConfig | Stage::Cleanup => StepPolicy::Skippable,
            Stage::RuntimeReady => StepPolicy::Degraded,
            _ => StepPolicy::Fatal,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Preflight => write!(f, "preflight"),
            Stage::BoardConfig => write!(f, "board-config"),
            Stage::RuntimeReady => write!(f, "runtime-ready"),
            Stage::Cleanup => write!(f, "cleanup"),
            Stage::ImagePull => write!(f, "image-pull"),
            Stage::ContainerCreate => write!(f, "container-create"),
            Stage::SystemFiles => write!(f, "system-files"),
            Stage::NetworkConfig => write!(f, "network-config"),
            Stage::Done => write!(f, "done"),
        }
    }
}

/// How a stage failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Failure halts the run
    Fatal,
    /// Bypassed when disabled by configuration, fatal on failure otherwise
    Skippable,
    /// Failure of the primary path switches to an alternate path (CI only)
    Degraded,
}

/// Result of a stage that did not halt the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The stage did its work
    Success,
    /// The stage was bypassed; the reason is logged and recorded
    Skipped(String),
    /// The stage completed through its alternate path
    Degraded(String),
}

impl StepOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Success => "success",
            StepOutcome::Skipped(_) => "skipped",
            StepOutcome::Degraded(_) => "degraded",
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            StepOutcome::Success => None,
            StepOutcome::Skipped(reason) | StepOutcome::Degraded(reason) => Some(reason),
        }
    }
}
