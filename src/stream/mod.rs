// Token streaming: the proxy side and the client side

pub mod controller;
pub mod event;
pub mod framer;
pub mod server;
pub mod session;

pub use controller::{Effect, StreamController, StreamId};
