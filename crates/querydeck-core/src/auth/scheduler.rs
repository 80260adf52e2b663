use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Default)]
struct Slot {
    generation: u64,
    pending: Option<JoinHandle<()>>,
    fire_at: Option<DateTime<Utc>>,
}

/// Clears the in-flight flag when a fired callback finishes or unwinds.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns at most one pending renewal timer.
///
/// `arm` fires its callback `lead` before the given expiry, or immediately if
/// that moment has already passed. Arming again replaces the pending timer.
/// A timer firing while a previous callback is still running is dropped.
pub struct SessionScheduler {
    lead: Duration,
    slot: Arc<Mutex<Slot>>,
    in_flight: Arc<AtomicBool>,
}

impl SessionScheduler {
    pub fn new(lead: Duration) -> Self {
        Self {
            lead,
            slot: Arc::new(Mutex::new(Slot::default())),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Delay from `now` until the renewal for `expires_at` should fire.
    pub fn delay_until_fire(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        let lead = chrono::Duration::from_std(self.lead).unwrap_or(chrono::Duration::zero());
        (expires_at - lead - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn arm<F, Fut>(&self, expires_at: DateTime<Utc>, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let now = Utc::now();
        let delay = self.delay_until_fire(expires_at, now);

        let mut slot = self.slot.lock();
        if let Some(previous) = slot.pending.take() {
            previous.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;

        let slot_ref = Arc::clone(&self.slot);
        let in_flight = Arc::clone(&self.in_flight);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = slot_ref.lock();
                if slot.generation != generation {
                    return;
                }
                // Detach so a re-arm from inside the callback does not abort it.
                slot.pending = None;
                slot.fire_at = None;
            }
            if in_flight.swap(true, Ordering::SeqCst) {
                debug!("Renewal already in flight, skipping timer");
                return;
            }
            let _guard = InFlightGuard(in_flight);
            on_fire().await;
        });

        debug!(delay_secs = delay.as_secs(), "Renewal timer armed");
        slot.pending = Some(handle);
        slot.fire_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
    }

    /// Drop the pending timer, if any. A callback that already started runs on.
    pub fn cancel(&self) {
        let mut slot = self.slot.lock();
        slot.generation += 1;
        slot.fire_at = None;
        if let Some(pending) = slot.pending.take() {
            pending.abort();
            debug!("Renewal timer cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot.lock().pending.is_some()
    }

    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.slot.lock().fire_at
    }
}

impl Drop for SessionScheduler {
    fn drop(&mut self) {
        if let Some(pending) = self.slot.lock().pending.take() {
            pending.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    const LEAD: Duration = Duration::from_secs(60);

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn bump(count: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> + Send + 'static {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[test]
    fn test_delay_until_fire() {
        let scheduler = SessionScheduler::new(LEAD);
        let now = Utc::now();
        assert_eq!(
            scheduler.delay_until_fire(now + chrono::Duration::seconds(120), now),
            Duration::from_secs(60)
        );
        assert_eq!(
            scheduler.delay_until_fire(now + chrono::Duration::seconds(5), now),
            Duration::ZERO
        );
        assert_eq!(
            scheduler.delay_until_fire(now - chrono::Duration::hours(2), now),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_at_lead_before_expiry() {
        let scheduler = SessionScheduler::new(LEAD);
        let fired_at = Arc::new(Mutex::new(None));
        let count = counter();
        let start = Instant::now();

        {
            let fired_at = Arc::clone(&fired_at);
            let count = Arc::clone(&count);
            scheduler.arm(Utc::now() + chrono::Duration::seconds(120), move || async move {
                count.fetch_add(1, Ordering::SeqCst);
                *fired_at.lock() = Some(Instant::now());
            });
        }
        assert!(scheduler.is_armed());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let fired = *fired_at.lock();
        let elapsed = fired.expect("callback ran") - start;
        assert!(elapsed >= Duration::from_millis(59_900), "fired early: {:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(60_100), "fired late: {:?}", elapsed);
        assert!(!scheduler.is_armed());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_fire_time_fires_immediately() {
        let scheduler = SessionScheduler::new(LEAD);
        let count = counter();
        scheduler.arm(Utc::now() - chrono::Duration::minutes(10), bump(&count));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_timer() {
        let scheduler = SessionScheduler::new(LEAD);
        let first = counter();
        let second = counter();

        scheduler.arm(Utc::now() + chrono::Duration::seconds(90), bump(&first));
        scheduler.arm(Utc::now() + chrono::Duration::seconds(300), bump(&second));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let scheduler = SessionScheduler::new(LEAD);
        let count = counter();
        scheduler.arm(Utc::now() + chrono::Duration::seconds(61), bump(&count));
        assert!(scheduler.next_fire_at().is_some());

        scheduler.cancel();
        assert!(!scheduler.is_armed());
        assert!(scheduler.next_fire_at().is_none());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_may_rearm_itself() {
        let scheduler = Arc::new(SessionScheduler::new(LEAD));
        let count = counter();

        let rearm = {
            let scheduler = Arc::clone(&scheduler);
            let count = Arc::clone(&count);
            move || async move {
                count.fetch_add(1, Ordering::SeqCst);
                // Renewal done; next expiry far out.
                tokio::time::sleep(Duration::from_secs(1)).await;
                let next = Arc::clone(&count);
                scheduler.arm(Utc::now() + chrono::Duration::hours(1), move || {
                    next.fetch_add(100, Ordering::SeqCst);
                    std::future::ready(())
                });
                count.fetch_add(1, Ordering::SeqCst);
            }
        };
        scheduler.arm(Utc::now(), rearm);

        tokio::time::sleep(Duration::from_secs(5)).await;
        // Both halves of the callback ran, and the new timer is pending.
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_fire_is_skipped() {
        let scheduler = Arc::new(SessionScheduler::new(LEAD));
        let count = counter();

        let slow = {
            let count = Arc::clone(&count);
            move || async move {
                count.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        };
        scheduler.arm(Utc::now(), slow);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Fires while the slow callback is still running.
        scheduler.arm(Utc::now(), bump(&count));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Once it finishes, a later timer runs normally.
        tokio::time::sleep(Duration::from_secs(40)).await;
        scheduler.arm(Utc::now(), bump(&count));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
