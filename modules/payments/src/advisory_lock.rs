use sha2::{Digest, Sha256};
use sqlx::{Postgres, Transaction};

/// Derives a 64-bit signed advisory-lock id from `scope` and `key`. Callers
/// with the same `(scope, key)` derive the same id; different pairs collide
/// only with the negligible probability of a SHA-256 prefix collision.
fn lock_id(scope: &str, key: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update(b"|");
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    i64::from_be_bytes(digest[0..8].try_into().expect("8 bytes"))
}

/// Acquires a transaction-scoped Postgres advisory lock for `(scope, key)`.
/// Blocks until acquired; released automatically when `tx` commits or rolls
/// back. Safe to call more than once for the same key within one transaction.
pub async fn acquire(
    tx: &mut Transaction<'_, Postgres>,
    scope: &str,
    key: &str,
) -> Result<(), sqlx::Error> {
    let id = lock_id(scope, key);
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_id_is_deterministic() {
        assert_eq!(
            lock_id("payments:charge", "key-1"),
            lock_id("payments:charge", "key-1")
        );
    }

    #[test]
    fn lock_id_differs_across_scopes() {
        assert_ne!(
            lock_id("payments:charge", "key-1"),
            lock_id("payments:refund", "key-1")
        );
    }

    #[test]
    fn lock_id_differs_across_keys() {
        assert_ne!(
            lock_id("payments:charge", "key-1"),
            lock_id("payments:charge", "key-2")
        );
    }
}
