//! Identifier and secret generation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use driftsync_core::SyncId;

pub const SYNC_ID_PREFIX: &str = "cl_syn_";
pub const WEBHOOK_SECRET_PREFIX: &str = "cl_tkn_";

const SECRET_LEN: usize = 24;

/// Time-ordered id: later ids sort after earlier ones.
pub fn new_sync_id() -> SyncId {
    SyncId(format!("{SYNC_ID_PREFIX}{}", Uuid::now_v7().simple()))
}

pub fn new_webhook_secret() -> String {
    let password: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect();
    format!("{WEBHOOK_SECRET_PREFIX}{}", STANDARD.encode(password))
}
