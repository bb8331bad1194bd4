//! Installation stages
//!
//! Stages run in a fixed order (see [`crate::Stage::ORDER`]):
//! 1. Preflight - host validation, nothing mutated
//! 2. Board config - board-specific hardware script (skippable)
//! 3. Runtime - container engine present, installed, or nested (CI only)
//! 4. Cleanup - existing containers and dangling images (skippable)
//! 5. Image pull - pinned images plus the factory alias
//! 6. Container create - the control container
//! 7. System files - udev rules, link-local policy, autostart
//! 8. Network config - network configuration script
//! 9. Done - reboot scheduled

pub mod board;
pub mod finish;
pub mod images;
pub mod network;
pub mod preflight;
pub mod runtime;
pub mod system_files;
