pub mod keys;
pub mod registry;
pub mod transport;
