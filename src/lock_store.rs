//! Component A: the per-local-file advisory Lock Store (spec.md §4.A).
//!
//! Persisted with `rusqlite`, the same way the teacher crate persists all
//! of its durable local state (`db.rs`'s `init_db`): a small schema created
//! with `CREATE TABLE IF NOT EXISTS`, guarded behind a `std::sync::Mutex`
//! since `rusqlite::Connection` is `Send` but not `Sync`.

use crate::error::LockError;
use crate::model::{now_micros, ProcessType};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteLockStore {
    conn: Mutex<Connection>,
}

impl SqliteLockStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, primarily for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> anyhow::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS upload_locks (
                local_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                acquired_at_micros INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS heartbeat (
                key TEXT PRIMARY KEY,
                value_micros INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// `acquire(localID, owner, nowMicros)` (spec.md §4.A).
    pub fn acquire(
        &self,
        local_id: &str,
        owner: ProcessType,
        now: i64,
    ) -> Result<(), LockError> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT acquired_at_micros FROM upload_locks WHERE local_id = ?1",
                params![local_id],
                |row| row.get(0),
            )
            .ok();

        if exists.is_some() {
            return Err(LockError::AlreadyAcquired(local_id.to_string()));
        }

        conn.execute(
            "INSERT INTO upload_locks (local_id, owner, acquired_at_micros) VALUES (?1, ?2, ?3)",
            params![local_id, owner.as_str(), now],
        )
        .map_err(|_| LockError::AlreadyAcquired(local_id.to_string()))?;
        Ok(())
    }

    /// `release(localID, owner)`: no-op if absent or owned by the other
    /// process (spec.md §4.A).
    pub fn release(&self, local_id: &str, owner: ProcessType) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM upload_locks WHERE local_id = ?1 AND owner = ?2",
            params![local_id, owner.as_str()],
        )
        .ok();
    }

    /// Bulk cleanup at process start: release any lock this process holds
    /// that predates `cutoff` (spec.md §4.A).
    pub fn release_locks_acquired_by_owner_before(&self, owner: ProcessType, cutoff: i64) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM upload_locks WHERE owner = ?1 AND acquired_at_micros < ?2",
            params![owner.as_str(), cutoff],
        )
        .ok();
    }

    /// Global staleness sweep, irrespective of owner (spec.md §4.A).
    pub fn release_all_locks_acquired_before(&self, cutoff: i64) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM upload_locks WHERE acquired_at_micros < ?1",
            params![cutoff],
        )
        .ok();
    }

    /// `isLocked(localID, owner)`: existence probe restricted to owner
    /// (spec.md §4.A).
    pub fn is_locked(&self, local_id: &str, owner: ProcessType) -> bool {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT 1 FROM upload_locks WHERE local_id = ?1 AND owner = ?2",
            params![local_id, owner.as_str()],
            |_| Ok(()),
        )
        .is_ok()
    }

    /// Records `LastBGTaskHeartBeatTime` (spec.md §6.5).
    pub fn record_heartbeat(&self, now: i64) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO heartbeat (key, value_micros) VALUES ('LastBGTaskHeartBeatTime', ?1)
             ON CONFLICT(key) DO UPDATE SET value_micros = excluded.value_micros",
            params![now],
        )
        .ok();
    }

    pub fn last_heartbeat(&self) -> Option<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value_micros FROM heartbeat WHERE key = 'LastBGTaskHeartBeatTime'",
            [],
            |row| row.get(0),
        )
        .ok()
    }

    /// Startup policy (spec.md §4.A): release any foreground-owned locks
    /// acquired before "now" (crash recovery), sweep globally expired
    /// locks, and — if the background heartbeat has gone stale for longer
    /// than `heartbeat_death_timeout_secs` — also release background-owned
    /// locks.
    pub fn run_startup_sweep(&self, lock_expiry_days: f64, heartbeat_death_timeout_secs: u64) {
        let now = now_micros();
        self.release_locks_acquired_by_owner_before(ProcessType::Foreground, now);

        let expiry_micros = (lock_expiry_days * 86_400.0 * 1_000_000.0) as i64;
        self.release_all_locks_acquired_before(now - expiry_micros);

        let death_micros = heartbeat_death_timeout_secs as i64 * 1_000_000;
        let bg_dead = match self.last_heartbeat() {
            Some(last) => now - last > death_micros,
            None => true,
        };
        if bg_dead {
            self.release_locks_acquired_by_owner_before(ProcessType::Background, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_acquire_fails() {
        let store = SqliteLockStore::open_in_memory().unwrap();
        store.acquire("LA", ProcessType::Foreground, 100).unwrap();
        let err = store.acquire("LA", ProcessType::Foreground, 200).unwrap_err();
        assert_eq!(err, LockError::AlreadyAcquired("LA".to_string()));
    }

    #[test]
    fn release_by_wrong_owner_is_noop() {
        let store = SqliteLockStore::open_in_memory().unwrap();
        store.acquire("LA", ProcessType::Foreground, 100).unwrap();
        store.release("LA", ProcessType::Background);
        assert!(store.is_locked("LA", ProcessType::Foreground));
    }

    #[test]
    fn release_by_owner_frees_the_lock() {
        let store = SqliteLockStore::open_in_memory().unwrap();
        store.acquire("LA", ProcessType::Foreground, 100).unwrap();
        store.release("LA", ProcessType::Foreground);
        assert!(store.acquire("LA", ProcessType::Foreground, 200).is_ok());
    }

    #[test]
    fn is_locked_is_owner_scoped() {
        let store = SqliteLockStore::open_in_memory().unwrap();
        store.acquire("LB", ProcessType::Background, 100).unwrap();
        assert!(store.is_locked("LB", ProcessType::Background));
        assert!(!store.is_locked("LB", ProcessType::Foreground));
    }

    // B3: a lock acquired 1.0000001x expiry days ago is swept; one acquired
    // 0.9999999x is not.
    #[test]
    fn startup_sweep_boundary() {
        let store = SqliteLockStore::open_in_memory().unwrap();
        let expiry_days = 1.0;
        let expiry_micros = (expiry_days * 86_400.0 * 1_000_000.0) as i64;
        let now = now_micros();

        let just_over = now - (expiry_micros as f64 * 1.0000001) as i64;
        let just_under = now - (expiry_micros as f64 * 0.9999999) as i64;

        store.acquire("old", ProcessType::Foreground, just_over).unwrap();
        store.acquire("fresh", ProcessType::Foreground, just_under).unwrap();

        store.release_all_locks_acquired_before(now - expiry_micros);

        assert!(!store.is_locked("old", ProcessType::Foreground));
        assert!(store.is_locked("fresh", ProcessType::Foreground));
    }

    #[test]
    fn startup_sweep_reclaims_background_locks_after_heartbeat_death() {
        let store = SqliteLockStore::open_in_memory().unwrap();
        let now = now_micros();
        store.acquire("LB", ProcessType::Background, now - 10).unwrap();
        // No heartbeat recorded at all -> treated as dead.
        store.run_startup_sweep(1.0, 5);
        assert!(!store.is_locked("LB", ProcessType::Background));
    }

    #[test]
    fn startup_sweep_keeps_background_locks_with_fresh_heartbeat() {
        let store = SqliteLockStore::open_in_memory().unwrap();
        let now = now_micros();
        store.acquire("LB", ProcessType::Background, now).unwrap();
        store.record_heartbeat(now);
        store.run_startup_sweep(1.0, 5);
        assert!(store.is_locked("LB", ProcessType::Background));
    }
}
