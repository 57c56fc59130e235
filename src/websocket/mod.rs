pub mod connection;
pub mod handler;
pub mod router;

pub use connection::{ConnId, ConnectionMap};
