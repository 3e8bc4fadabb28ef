pub mod message;
pub mod role;

pub use message::{Envelope, ErrorCode, ReplaceSellersRequest};
pub use role::Role;
