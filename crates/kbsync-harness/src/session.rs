#![forbid(unsafe_code)]

//! One engine wired to one [`FakeHost`] on a [`LabClock`].
//!
//! Notifications stay in the host outbox until a test delivers them, which
//! makes delay, loss and reordering explicit steps of a scenario.

use tracing::debug;
use web_time::Duration;

use kbsync_core::{Span, SyncConfig, TextState, UpdateEvent};
use kbsync_runtime::{SyncEngine, UpdateOutcome, WatchdogOutcome};

use crate::clock::LabClock;
use crate::fake_host::FakeHost;

pub struct SessionContext {
    pub host: FakeHost,
    pub engine: SyncEngine<LabClock>,
    pub clock: LabClock,
}

impl SessionContext {
    /// Start a session that is told the host selection.
    #[must_use]
    pub fn new(config: SyncConfig, host: FakeHost) -> Self {
        let selection = host.selection();
        Self::start(config, host, Some(selection))
    }

    /// Start a session with no initial selection.
    #[must_use]
    pub fn blind(config: SyncConfig, host: FakeHost) -> Self {
        Self::start(config, host, None)
    }

    fn start(config: SyncConfig, host: FakeHost, selection: Option<Span>) -> Self {
        let clock = LabClock::new();
        let mut session = Self {
            engine: SyncEngine::with_clock(config, clock.clone()),
            host,
            clock,
        };
        session.restart(selection);
        session
    }

    /// Restart the engine. Notifications still in the outbox belong to the
    /// previous session and are dropped.
    pub fn restart(&mut self, selection: Option<Span>) {
        let dropped = self.host.take_events().len();
        if dropped > 0 {
            debug!(dropped, "outbox cleared on restart");
        }
        self.engine.restart(&mut self.host, selection);
    }

    /// Hand the oldest outbox event to the engine and reconcile it.
    pub fn deliver_next(&mut self) -> Option<UpdateOutcome> {
        let event = self.host.pop_event()?;
        self.engine.enqueue(event);
        self.engine.drain(&mut self.host).pop()
    }

    /// Deliver the whole outbox.
    pub fn deliver_all(&mut self) -> Vec<UpdateOutcome> {
        for event in self.host.take_events() {
            self.engine.enqueue(event);
        }
        self.engine.drain(&mut self.host)
    }

    /// Lose the oldest outbox event.
    pub fn drop_next(&mut self) -> Option<UpdateEvent> {
        self.host.pop_event()
    }

    /// Move time forward and tick the engine.
    pub fn advance(&mut self, by: Duration) -> WatchdogOutcome {
        self.clock.advance(by);
        self.engine.tick(&mut self.host)
    }

    /// Deliver everything, then run the watchdog past its deadline.
    pub fn settle(&mut self) -> WatchdogOutcome {
        self.deliver_all();
        let timeout = self.engine.config().lost_update_timeout;
        self.advance(timeout + Duration::from_millis(1))
    }

    /// The engine either admits it does not know the composing text or
    /// agrees with the host.
    #[must_use]
    pub fn composition_is_sound(&self) -> bool {
        self.engine
            .composing_text()
            .is_none_or(|text| text == self.host.composing_text())
    }

    /// The engine's full picture of the document, when it has one.
    #[must_use]
    pub fn engine_state(&self) -> Option<TextState> {
        self.engine.snapshot()
    }
}
