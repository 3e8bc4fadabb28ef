pub mod memory;
pub mod notifier;
