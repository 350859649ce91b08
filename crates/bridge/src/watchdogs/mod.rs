//! Concrete Watchdog Implementations
//!
//! Each watchdog is a separate module for clarity.

pub mod interception;
pub mod navigation;

pub use interception::{interception_script, InterceptionConfig, InterceptionWatchdog};
pub use navigation::{NavigationWatchdog, PageScope};
