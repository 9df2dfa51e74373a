//! Per-phase resources and the signals a phase waits on.

use std::future::pending;
use std::time::Duration;

use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::transport::{EventReceiver, TransportEvent};

/// What woke a loading phase.
#[derive(Debug)]
pub(crate) enum LoadingSignal {
    Abort,
    /// `None` once every sender is gone.
    Event(Option<TransportEvent>),
    Deadline,
    Tick,
}

/// What woke a retry-waiting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitSignal {
    Abort,
    Elapsed,
    Tick,
}

/// One attempt in flight.
///
/// Dropping the phase cancels the attempt's token, so a transport still
/// working on a finished attempt is told to stop.
#[derive(Debug)]
pub(crate) struct LoadingPhase {
    events: EventReceiver,
    _attempt: DropGuard,
    deadline: Option<Instant>,
    ticker: Option<Interval>,
}

impl LoadingPhase {
    pub(crate) fn new(
        events: EventReceiver,
        attempt: CancellationToken,
        timeout: Option<Duration>,
        tick: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            events,
            _attempt: attempt.drop_guard(),
            deadline: timeout.map(|timeout| now + timeout),
            ticker: timeout.map(|_| ticker(now, tick)),
        }
    }

    /// Wait for the next thing the session must react to.
    ///
    /// Cancel safe: dropping the future loses no event.
    pub(crate) async fn next_signal(&mut self, abort: &CancellationToken) -> LoadingSignal {
        tokio::select! {
            biased;
            _ = abort.cancelled() => LoadingSignal::Abort,
            event = self.events.recv() => LoadingSignal::Event(event),
            _ = wait_until(self.deadline) => LoadingSignal::Deadline,
            _ = next_tick(&mut self.ticker) => LoadingSignal::Tick,
        }
    }
}

/// Backoff pause between attempts.
#[derive(Debug)]
pub(crate) struct RetryWaitingPhase {
    deadline: Instant,
    ticker: Interval,
}

impl RetryWaitingPhase {
    pub(crate) fn new(wait: Duration, tick: Duration) -> Self {
        let now = Instant::now();
        Self {
            deadline: now + wait,
            ticker: ticker(now, tick),
        }
    }

    /// Wait for the next thing the session must react to.
    pub(crate) async fn next_signal(&mut self, abort: &CancellationToken) -> WaitSignal {
        tokio::select! {
            biased;
            _ = abort.cancelled() => WaitSignal::Abort,
            _ = sleep_until(self.deadline) => WaitSignal::Elapsed,
            _ = self.ticker.tick() => WaitSignal::Tick,
        }
    }
}

// First tick one period after `start`, not immediately.
fn ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(start + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EventSender;

    #[tokio::test(start_paused = true)]
    async fn test_loading_prefers_abort_over_pending_event() {
        let (events, rx) = EventSender::channel();
        let abort = CancellationToken::new();
        let mut phase = LoadingPhase::new(rx, abort.child_token(), None, Duration::from_secs(1));

        events.start();
        abort.cancel();
        assert!(matches!(phase.next_signal(&abort).await, LoadingSignal::Abort));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_ticks_then_hits_deadline() {
        let (_events, rx) = EventSender::channel();
        let abort = CancellationToken::new();
        let mut phase = LoadingPhase::new(
            rx,
            abort.child_token(),
            Some(Duration::from_millis(2_500)),
            Duration::from_secs(1),
        );

        assert!(matches!(phase.next_signal(&abort).await, LoadingSignal::Tick));
        assert!(matches!(phase.next_signal(&abort).await, LoadingSignal::Tick));
        assert!(matches!(phase.next_signal(&abort).await, LoadingSignal::Deadline));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_reports_none() {
        let (events, rx) = EventSender::channel();
        let abort = CancellationToken::new();
        let mut phase = LoadingPhase::new(rx, abort.child_token(), None, Duration::from_secs(1));

        drop(events);
        assert!(matches!(
            phase.next_signal(&abort).await,
            LoadingSignal::Event(None)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_phase_cancels_attempt() {
        let (_events, rx) = EventSender::channel();
        let attempt = CancellationToken::new();
        let phase = LoadingPhase::new(rx, attempt.clone(), None, Duration::from_secs(1));

        assert!(!attempt.is_cancelled());
        drop(phase);
        assert!(attempt.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_wait_elapses_on_deadline_tick() {
        let abort = CancellationToken::new();
        let mut phase = RetryWaitingPhase::new(Duration::from_secs(2), Duration::from_secs(1));

        assert_eq!(phase.next_signal(&abort).await, WaitSignal::Tick);
        // The second tick and the deadline coincide; the deadline wins.
        assert_eq!(phase.next_signal(&abort).await, WaitSignal::Elapsed);
    }
}
