//! Connection management for the pub/sub command session
//!
//! This module handles:
//! - Opening the session with the provisioned credential
//! - Mapping transport callbacks onto observable connection statuses
//! - Subscribing to the command topic each time the session becomes usable

mod manager;

pub use manager::{ConnectionConfig, ConnectionManager};
