//! Lead form and chat widget with a time-windowed local conversation store,
//! plus the backend service the widget talks to.

pub mod bus;
pub mod chat;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod interface;
pub mod jobs;
pub mod kv;
pub mod lead;
pub mod render;
pub mod responder;
pub mod server;
pub mod session;
pub mod store;
pub mod view;
pub mod widget;

pub use error::{Error, Result};
