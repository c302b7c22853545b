//! Interactive terminal sessions

mod manager;

pub use manager::{SessionManager, INACTIVITY_TIMEOUT, MAX_SESSIONS};
