pub mod builtins;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod fetch;
pub mod registry;
pub mod replacer;
pub mod update;

/// Returns the crate version baked in at compile time.
pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
