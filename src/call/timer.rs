//! Timer für Call Sessions
//!
//! Ein [`Timer`] ist ein tokio-Task, der beim Abbrechen oder Droppen
//! abgebrochen wird. Deadline und verstrichene Zeit werden über eine
//! monotone Uhr berechnet; die Tick-Callbacks lesen diese Werte nur.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Wofür ein Timer läuft
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPurpose {
    /// Harte Deadline für eingehende Anrufe
    RingTimeout,
    /// Anzeige-Tick (Countdown, verstrichene Zeit, Gesprächsdauer)
    DurationTick,
}

/// Laufender Timer
#[derive(Debug)]
pub struct Timer {
    purpose: TimerPurpose,
    deadline: Option<Instant>,
    handle: JoinHandle<()>,
}

impl Timer {
    /// Feuert `on_expiry` genau einmal nach `after`, falls nicht vorher abgebrochen
    pub fn once<F>(purpose: TimerPurpose, after: Duration, on_expiry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now() + after;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_expiry();
        });

        Self {
            purpose,
            deadline: Some(deadline),
            handle,
        }
    }

    /// Ruft `on_tick` alle `period` auf, erstmals nach einer Periode
    ///
    /// Gibt `on_tick` `false` zurück, endet der Timer.
    pub fn every<F>(purpose: TimerPurpose, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                if !on_tick() {
                    break;
                }
            }
        });

        Self {
            purpose,
            deadline: None,
            handle,
        }
    }

    pub fn purpose(&self) -> TimerPurpose {
        self.purpose
    }

    /// Restzeit bis zur Deadline (0 wenn abgelaufen, `None` bei Ticks)
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ============================================================================
// TESTS
// ============================================================================
