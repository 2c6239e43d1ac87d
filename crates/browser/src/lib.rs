//! Browser capability backed by a real Chrome/Chromium process.
//!
//! Every session gets its own browser process, which gives it an isolated
//! cookie jar and history without sharing a profile directory.

pub mod chrome;
pub mod lane;

pub use chrome::{ChromeContext, ChromeLauncher, locate_chrome};
pub use lane::CallLane;
