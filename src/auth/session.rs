use tracing::warn;
use uuid::Uuid;

use super::jwt::Claims;
use crate::kv::{KeyValueStore, KvError};

fn epoch_key(user_id: Uuid) -> String {
    format!("session_epoch:{user_id}")
}

pub async fn current_epoch(kv: &dyn KeyValueStore, user_id: Uuid) -> Result<i64, KvError> {
    let key = epoch_key(user_id);
    match kv.get(&key).await? {
        Some(value) => value.parse().map_err(|_| KvError::NotAnInteger(key)),
        None => Ok(0),
    }
}

/// Invalidates every token issued to the user so far.
pub async fn revoke_sessions(kv: &dyn KeyValueStore, user_id: Uuid) -> Result<i64, KvError> {
    kv.incr(&epoch_key(user_id)).await
}

/// Whether the token was issued under the user's current epoch. Fails open when the
/// store cannot be read.
pub async fn is_current(kv: &dyn KeyValueStore, claims: &Claims) -> bool {
    match current_epoch(kv, claims.sub).await {
        Ok(epoch) => claims.epoch == epoch,
        Err(err) => {
            warn!(user_id = %claims.sub, error = %err, "session epoch lookup failed; accepting token");
            true
        }
    }
}
