//! OS-keychain backed credential store
//!
//! The agent persists its long-lived token as a single JSON blob in the
//! platform keychain, keyed by service name and hostname. The blob is
//! opaque to everything except enrollment and startup.

use keyring::Entry;
use serde::{Deserialize, Serialize};

use crate::config::hostname;
use crate::error::CredentialError;

const KEYCHAIN_SERVICE: &str = "remora-agent";

/// Persisted agent credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredentials {
    pub server_addr: String,
    pub agent_token: String,
    pub agent_id: String,
    pub device_id: String,
    pub tls: bool,
}

fn entry() -> Result<Entry, CredentialError> {
    Ok(Entry::new(KEYCHAIN_SERVICE, &hostname())?)
}

/// Store agent credentials in the OS keychain
pub fn save(creds: &StoredCredentials) -> Result<(), CredentialError> {
    let blob = serde_json::to_string(creds)?;
    entry()?.set_password(&blob)?;
    Ok(())
}

/// Retrieve agent credentials from the OS keychain
pub fn load() -> Result<StoredCredentials, CredentialError> {
    let blob = match entry()?.get_password() {
        Ok(blob) => blob,
        Err(keyring::Error::NoEntry) => return Err(CredentialError::NotEnrolled),
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&blob)?)
}

/// Remove stored credentials
pub fn delete() -> Result<(), CredentialError> {
    match entry()?.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Err(CredentialError::NotEnrolled),
        Err(e) => Err(e.into()),
    }
}

/// Whether credentials exist
pub fn is_enrolled() -> bool {
    load().is_ok()
}
