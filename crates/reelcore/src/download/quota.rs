//! Per-user in-flight download accounting.
//!
//! Admission is a check-and-increment under one lock; release happens when
//! the [`QuotaPermit`] handed out by admission is dropped, so it runs exactly
//! once on every exit path, including panics inside the download task.

use crate::download::error::AdmissionDenied;
use crate::download::request::UserId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Counts active downloads per user, capped at `limit`.
///
/// Invariant: every stored count is in `1..=limit`; users with nothing in
/// flight have no entry.
#[derive(Debug)]
pub struct UserQuota {
    limit: usize,
    active: Mutex<HashMap<UserId, usize>>,
}

impl UserQuota {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit,
            active: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, usize>> {
        // The map stays consistent even if a holder panicked: every mutation
        // is a single insert/remove.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Reserves one slot for `user_id`.
    ///
    /// # Returns
    ///
    /// A permit that gives the slot back on drop, or
    /// `AdmissionDenied::QuotaExceeded` when the user is at the cap.
    pub fn try_acquire(self: &Arc<Self>, user_id: UserId) -> Result<QuotaPermit, AdmissionDenied> {
        let mut active = self.lock();
        let current = active.get(&user_id).copied().unwrap_or(0);
        if current >= self.limit {
            return Err(AdmissionDenied::QuotaExceeded {
                active: current,
                limit: self.limit,
            });
        }
        active.insert(user_id, current + 1);
        drop(active);

        log::debug!("User {} now has {} active download(s)", user_id, current + 1);
        Ok(QuotaPermit {
            quota: Arc::clone(self),
            user_id,
        })
    }

    /// Active downloads for one user.
    pub fn active(&self, user_id: UserId) -> usize {
        self.lock().get(&user_id).copied().unwrap_or(0)
    }

    /// Number of users with at least one download in flight.
    pub fn tracked_users(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, user_id: UserId) {
        let mut active = self.lock();
        match active.get(&user_id).copied() {
            Some(count) if count > 1 => {
                active.insert(user_id, count - 1);
            }
            Some(_) => {
                active.remove(&user_id);
            }
            None => {
                log::error!("Quota release for user {} without an active entry", user_id);
            }
        }
    }
}

/// A reserved download slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct QuotaPermit {
    quota: Arc<UserQuota>,
    user_id: UserId,
}

impl Drop for QuotaPermit {
    fn drop(&mut self) {
        self.quota.release(self.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_is_enforced() {
        let quota = UserQuota::new(2);
        let _a = quota.try_acquire(42).unwrap();
        let _b = quota.try_acquire(42).unwrap();

        let denied = quota.try_acquire(42).unwrap_err();
        assert_eq!(denied, AdmissionDenied::QuotaExceeded { active: 2, limit: 2 });
        assert_eq!(denied.to_string(), "too many concurrent downloads");
        assert_eq!(quota.active(42), 2);
    }

    #[test]
    fn test_users_are_independent() {
        let quota = UserQuota::new(1);
        let _a = quota.try_acquire(1).unwrap();
        assert!(quota.try_acquire(2).is_ok());
        assert!(quota.try_acquire(1).is_err());
    }

    #[test]
    fn test_drop_releases_exactly_once_and_prunes() {
        let quota = UserQuota::new(2);
        let a = quota.try_acquire(7).unwrap();
        let b = quota.try_acquire(7).unwrap();
        assert_eq!(quota.active(7), 2);

        drop(a);
        assert_eq!(quota.active(7), 1);
        assert_eq!(quota.tracked_users(), 1);

        drop(b);
        assert_eq!(quota.active(7), 0);
        assert_eq!(quota.tracked_users(), 0);

        // Slot is reusable after release.
        assert!(quota.try_acquire(7).is_ok());
    }

    #[test]
    fn test_release_on_panic() {
        let quota = UserQuota::new(1);
        let q = Arc::clone(&quota);
        let handle = std::thread::spawn(move || {
            let _permit = q.try_acquire(5).unwrap();
            panic!("worker died");
        });
        assert!(handle.join().is_err());
        assert_eq!(quota.active(5), 0);
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_cap() {
        let quota = UserQuota::new(3);
        let granted = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let quota = Arc::clone(&quota);
                let granted = Arc::clone(&granted);
                std::thread::spawn(move || {
                    if let Ok(permit) = quota.try_acquire(99) {
                        assert!(quota.active(99) <= 3);
                        granted.lock().unwrap().push(permit);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(granted.lock().unwrap().len(), 3);
        assert_eq!(quota.active(99), 3);
        granted.lock().unwrap().clear();
        assert_eq!(quota.active(99), 0);
    }
}
