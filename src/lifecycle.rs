//! The Lifecycle Coordinator (§4.7): orders startup and shutdown so the guarantees in
//! §4.7(a-c) hold without every caller having to remember the right sequence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::db;
use crate::engine::ExecutionEngine;
use crate::registry::TriggerRegistry;
use crate::scheduler::TaskRegistry;
use crate::store::RecordEventBus;
use crate::sync::Synchroniser;

/// Tracks in-flight invocations so shutdown can wait for them to drain instead of
/// cutting them off mid-execution, mirroring the teacher's task registry drop
/// behaviour of letting running callbacks finish rather than aborting them outright.
#[derive(Clone, Default)]
pub struct InFlightGuard {
  count: Arc<AtomicUsize>,
}

impl InFlightGuard {
  pub fn new() -> Self {
    return Self::default();
  }

  pub fn enter(&self) -> InFlightTicket {
    self.count.fetch_add(1, Ordering::SeqCst);
    return InFlightTicket { count: self.count.clone() };
  }

  pub fn current(&self) -> usize {
    return self.count.load(Ordering::SeqCst);
  }

  /// Polls until no invocation is in flight or `timeout` elapses, whichever comes
  /// first. Shutdown proceeds either way; this only bounds how long it waits.
  pub async fn drain(&self, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while self.current() > 0 && tokio::time::Instant::now() < deadline {
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
  }
}

pub struct InFlightTicket {
  count: Arc<AtomicUsize>,
}

impl Drop for InFlightTicket {
  fn drop(&mut self) {
    self.count.fetch_sub(1, Ordering::SeqCst);
  }
}

/// Runs the ordered startup sequence (§4.5 steps 1-5 as grouped by §4.7):
/// 1. record-lifecycle subscription is wired by the caller before this runs (§4.7c);
/// 2. load persisted definitions and register them;
/// 3. attach the router to every registered HTTP route.
///
/// Step ordering (a): `TriggerRegistry::register` starts each cron job's background
/// loop the moment it is added, so "scheduler starts only after the registry is
/// populated from persistence" holds for free — there is no separate scheduler-start
/// step to sequence after step 2.
pub async fn startup(sync: &Synchroniser) {
  sync.load_from_persistence().await;
  sync.reconcile_router();
}

/// Spawns the DB dispatcher's event loop. Split out from [`startup`] because the
/// caller supplies the bus and engine, and because callers that don't use DB triggers
/// at all may skip it entirely.
pub fn spawn_db_dispatcher(bus: RecordEventBus, registry: TriggerRegistry, engine: Arc<ExecutionEngine>) {
  tokio::spawn(db::run(bus, registry, engine));
}

/// Shutdown (§4.5, "shutdown"): stop the cron scheduler, then wait for in-flight
/// invocations to drain. No other teardown is required — runtimes are per-invocation
/// and registry tables are process-scoped, so there is nothing else to release.
pub async fn shutdown(tasks: &TaskRegistry, in_flight: &InFlightGuard, drain_timeout: Duration) {
  tasks.stop_all();
  in_flight.drain(drain_timeout).await;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_in_flight_guard_tracks_entries_and_exits() {
    let guard = InFlightGuard::new();
    assert_eq!(guard.current(), 0);

    let ticket = guard.enter();
    assert_eq!(guard.current(), 1);

    drop(ticket);
    assert_eq!(guard.current(), 0);
  }

  #[tokio::test]
  async fn test_drain_returns_once_empty() {
    let guard = InFlightGuard::new();
    let ticket = guard.enter();

    let guard_clone = guard.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(10)).await;
      drop(ticket);
    });

    guard_clone.drain(Duration::from_secs(1)).await;
    assert_eq!(guard_clone.current(), 0);
  }

  #[tokio::test]
  async fn test_drain_respects_timeout_when_never_empty() {
    let guard = InFlightGuard::new();
    let _ticket = guard.enter();

    let started = tokio::time::Instant::now();
    guard.drain(Duration::from_millis(30)).await;

    assert!(started.elapsed() >= Duration::from_millis(30));
  }
}
