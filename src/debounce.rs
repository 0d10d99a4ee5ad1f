//! Latest-wins scheduling for search-as-you-type.
//!
//! Only the most recent submission fires once input has been quiet for the
//! interval. Superseded submissions are dropped, never queued or merged.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(300);

/// Single-slot pending task holder driven by an external clock.
#[derive(Debug)]
pub struct PendingSlot<T> {
    interval: Duration,
    pending: Option<(T, Instant)>,
    superseded: u64,
}

impl<T> PendingSlot<T> {
    pub fn new(interval: Duration) -> Self {
        Self { interval, pending: None, superseded: 0 }
    }

    /// Replaces any pending task and restarts the quiet period. Returns true
    /// when a pending task was discarded.
    pub fn submit(&mut self, task: T, at: Instant) -> bool {
        let replaced = self.pending.replace((task, at)).is_some();
        if replaced { self.superseded += 1; }
        replaced
    }

    /// Instant at which the pending task becomes due.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, at)| *at + self.interval)
    }

    pub fn take_ready(&mut self, now: Instant) -> Option<T> {
        match self.deadline() {
            Some(due) if now >= due => self.pending.take().map(|(t, _)| t),
            _ => None,
        }
    }

    /// Takes the pending task regardless of the quiet period.
    pub fn take(&mut self) -> Option<T> { self.pending.take().map(|(t, _)| t) }

    pub fn cancel(&mut self) -> bool { self.pending.take().is_some() }

    pub fn is_pending(&self) -> bool { self.pending.is_some() }

    /// Tasks discarded because a newer one arrived.
    pub fn superseded(&self) -> u64 { self.superseded }
}

enum Msg<T> {
    Submit(T),
    Flush(Sender<()>),
}

/// Worker thread around a [`PendingSlot`] that hands due tasks to a callback.
/// Dropping it discards any pending task and joins the worker.
pub struct Debouncer<T: Send + 'static> {
    tx: Option<Sender<Msg<T>>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(interval: Duration, mut on_fire: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Msg<T>>();
        let worker = std::thread::spawn(move || {
            let mut slot = PendingSlot::new(interval);
            loop {
                let msg = match slot.deadline() {
                    Some(due) => rx.recv_timeout(due.saturating_duration_since(Instant::now())),
                    None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };
                match msg {
                    Ok(Msg::Submit(task)) => { slot.submit(task, Instant::now()); }
                    Ok(Msg::Flush(ack)) => {
                        if let Some(task) = slot.take() { on_fire(task); }
                        let _ = ack.send(());
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if let Some(task) = slot.take_ready(Instant::now()) { on_fire(task); }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            log::trace!("debounce worker stopped, {} superseded", slot.superseded());
        });
        Self { tx: Some(tx), worker: Some(worker) }
    }

    pub fn submit(&self, task: T) {
        if let Some(tx) = self.tx.as_ref() && tx.send(Msg::Submit(task)).is_err() {
            log::warn!("debounce worker is gone; dropping task");
        }
    }

    /// Fires the pending task now and waits until the callback returned.
    pub fn flush(&self) {
        let Some(tx) = self.tx.as_ref() else { return };
        let (ack_tx, ack_rx) = mpsc::channel();
        if tx.send(Msg::Flush(ack_tx)).is_ok() { let _ = ack_rx.recv(); }
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(h) = self.worker.take() { let _ = h.join(); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn only_the_latest_submission_fires() {
        let t0 = Instant::now();
        let mut slot = PendingSlot::new(Duration::from_millis(300));
        assert!(!slot.submit("a", t0));
        assert!(slot.submit("ap", t0 + Duration::from_millis(100)));
        assert!(slot.submit("apex", t0 + Duration::from_millis(200)));
        assert_eq!(slot.take_ready(t0 + Duration::from_millis(400)), None);
        assert_eq!(slot.take_ready(t0 + Duration::from_millis(500)), Some("apex"));
        assert_eq!(slot.take_ready(t0 + Duration::from_secs(10)), None);
        assert_eq!(slot.superseded(), 2);
    }

    #[test]
    fn cancel_and_take() {
        let t0 = Instant::now();
        let mut slot = PendingSlot::new(DEFAULT_INTERVAL);
        slot.submit(1, t0);
        assert!(slot.cancel());
        assert!(!slot.is_pending());
        slot.submit(2, t0);
        assert_eq!(slot.take(), Some(2));
        assert_eq!(slot.deadline(), None);
    }

    #[test]
    fn flush_fires_once_with_latest() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let d = Debouncer::new(Duration::from_secs(60), move |s: String| sink.lock().unwrap().push(s));
        for q in ["a", "ap", "ape", "apex"] { d.submit(q.to_string()); }
        d.flush();
        d.flush();
        assert_eq!(*seen.lock().unwrap(), vec!["apex".to_string()]);
    }

    #[test]
    fn fires_after_quiet_period() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let d = Debouncer::new(Duration::from_millis(20), move |n: u32| sink.lock().unwrap().push(n));
        d.submit(1);
        d.submit(2);
        std::thread::sleep(Duration::from_millis(300));
        drop(d);
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }
}
