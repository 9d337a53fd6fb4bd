//! C2 — Idempotency Store. "Seen event-id" cache with a 72h TTL (spec
//! §4.2): `claim` is atomic test-and-set, `mark_processed` updates a
//! separate status record the webhook_events table already tracks
//! durably (`db::webhook_events`), so this module only owns the fast-path
//! claim.

use std::time::Duration;

use crate::error::AppError;
use crate::kv::Kv;

const CLAIM_TTL: Duration = Duration::from_secs(72 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    New,
    Duplicate,
}

/// Atomic test-and-set on `event_id`. Callers MUST return 200 without
/// processing on `Duplicate` (spec §4.2, §8 idempotence law).
pub async fn claim(kv: &Kv, event_id: &str) -> Result<ClaimOutcome, AppError> {
    let key = format!("idempotency:webhook:{event_id}");
    let established = kv.set_nx_ex(&key, CLAIM_TTL).await?;
    Ok(if established {
        ClaimOutcome::New
    } else {
        ClaimOutcome::Duplicate
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_is_idempotent_after_first_success() {
        let kv = Kv::connect(None);
        assert_eq!(claim(&kv, "evt-1").await.unwrap(), ClaimOutcome::New);
        assert_eq!(claim(&kv, "evt-1").await.unwrap(), ClaimOutcome::Duplicate);
        assert_eq!(claim(&kv, "evt-1").await.unwrap(), ClaimOutcome::Duplicate);
    }

    #[tokio::test]
    async fn distinct_events_do_not_collide() {
        let kv = Kv::connect(None);
        assert_eq!(claim(&kv, "evt-a").await.unwrap(), ClaimOutcome::New);
        assert_eq!(claim(&kv, "evt-b").await.unwrap(), ClaimOutcome::New);
    }
}
