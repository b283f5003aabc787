//! Fixed-delay broadcast ticker
//!
//! The tick body runs inline in the ticker task and the next sleep starts
//! only after it returns, so tick bodies never overlap and a slow tick pushes
//! later ticks back instead of bunching them up.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::snapshot::{SnapshotBuilder, SnapshotStats};
use super::{Simulation, SimulationError};
use crate::world::{MotionMode, WorldState};
use crate::ws::protocol::CodecError;
use crate::ws::registry::{BroadcastReport, ConnectionRegistry};

/// Ticker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerState {
    Stopped,
    Running,
}

/// A failed tick; nothing is broadcast for it
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] CodecError),

    #[error("Tick body panicked: {0}")]
    Panicked(String),
}

pub struct Ticker {
    interval: Duration,
    world: Arc<WorldState>,
    registry: Arc<ConnectionRegistry>,
    builder: SnapshotBuilder,
    simulation: Option<Arc<dyn Simulation>>,
    tick: Arc<AtomicU64>,
    stats: Mutex<SnapshotStats>,
}

impl Ticker {
    pub fn new(
        interval: Duration,
        world: Arc<WorldState>,
        registry: Arc<ConnectionRegistry>,
        builder: SnapshotBuilder,
    ) -> Self {
        Self {
            interval,
            world,
            registry,
            builder,
            simulation: None,
            tick: Arc::new(AtomicU64::new(0)),
            stats: Mutex::new(SnapshotStats::default()),
        }
    }

    /// Attach an external simulation advanced at the start of every tick
    pub fn with_simulation(mut self, simulation: Arc<dyn Simulation>) -> Self {
        self.simulation = Some(simulation);
        self
    }

    /// Count ticks into an externally owned counter
    pub fn with_tick_counter(mut self, tick: Arc<AtomicU64>) -> Self {
        self.tick = tick;
        self
    }

    /// Shared counter of ticks fired so far
    pub fn tick_counter(&self) -> Arc<AtomicU64> {
        self.tick.clone()
    }

    /// One tick: advance, snapshot, encode, broadcast. A panic anywhere in
    /// the body is returned as [`TickError::Panicked`].
    pub fn run_tick(&self) -> Result<BroadcastReport, TickError> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;

        catch_unwind(AssertUnwindSafe(|| self.tick_body(tick)))
            .unwrap_or_else(|panic| Err(TickError::Panicked(panic_reason(panic.as_ref()))))
    }

    fn tick_body(&self, tick: u64) -> Result<BroadcastReport, TickError> {
        if self.world.settings().motion_mode == MotionMode::PerTick {
            let moved = self.world.advance_targets();
            trace!(tick, moved, "Advanced standing targets");
        }

        if let Some(simulation) = &self.simulation {
            simulation.advance(&self.world)?;
        }

        let frame = self.builder.encode(tick, &self.world)?;
        self.stats.lock().record(self.world.len(), frame.len());

        let report = self.registry.broadcast(frame);
        debug!(
            tick,
            delivered = report.delivered,
            dropped = report.dropped,
            closed = report.closed,
            "Tick broadcast"
        );
        Ok(report)
    }

    /// Spawn the tick loop
    pub fn start(self) -> TickerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let tick = self.tick.clone();
        let join = tokio::spawn(self.run(stop_rx));
        TickerHandle {
            stop_tx,
            join: Some(join),
            tick,
        }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "Ticker started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stop_rx.changed() => break,
            }

            if let Err(e) = self.run_tick() {
                warn!(tick = self.tick.load(Ordering::Relaxed), error = %e, "Tick failed, skipping broadcast");
            }
        }

        let stats = self.stats.lock();
        info!(
            ticks = self.tick.load(Ordering::Relaxed),
            frames = stats.frames,
            avg_frame_bytes = stats.avg_frame_bytes(),
            largest_frame = stats.largest_frame,
            avg_entities = stats.avg_entities,
            "Ticker stopped"
        );
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Handle to a running ticker; dropping it also stops the ticker
pub struct TickerHandle {
    stop_tx: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    tick: Arc<AtomicU64>,
}

impl TickerHandle {
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> TickerState {
        match &self.join {
            Some(join) if !join.is_finished() => TickerState::Running,
            _ => TickerState::Stopped,
        }
    }

    /// Cancel future ticks and wait for an in-flight tick to finish
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(error = %e, "Ticker task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Position, UnknownEntityPolicy, WorldSettings};
    use crate::ws::registry::{Frame, SessionHandle};
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc;
    use tokio::time::Instant;
    use uuid::Uuid;

    const INTERVAL: Duration = Duration::from_millis(600);

    fn setup(mode: MotionMode) -> (Arc<WorldState>, Arc<ConnectionRegistry>, mpsc::Receiver<Frame>) {
        let world = Arc::new(WorldState::new(WorldSettings {
            motion_mode: mode,
            unknown_entity: UnknownEntityPolicy::Create,
            default_origin: Position::ORIGIN,
        }));
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, rx) = mpsc::channel(64);
        let id = Uuid::new_v4();
        registry.add(SessionHandle::new(id, "0".into(), tx));
        (world, registry, rx)
    }

    fn frame_tick(frame: &Frame) -> u64 {
        let value: serde_json::Value = serde_json::from_str(frame).unwrap();
        value["tick"].as_u64().unwrap()
    }

    struct Recorder {
        fired: Mutex<Vec<Instant>>,
    }

    impl Simulation for Recorder {
        fn advance(&self, _world: &WorldState) -> Result<(), SimulationError> {
            self.fired.lock().push(Instant::now());
            Ok(())
        }
    }

    struct FailOn(u64, AtomicU64);

    impl Simulation for FailOn {
        fn advance(&self, _world: &WorldState) -> Result<(), SimulationError> {
            let n = self.1.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.0 {
                return Err(SimulationError::Advance("boom".into()));
            }
            Ok(())
        }
    }

    struct Panics;

    impl Simulation for Panics {
        fn advance(&self, _world: &WorldState) -> Result<(), SimulationError> {
            panic!("simulation exploded");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_fire_at_fixed_interval() {
        let (world, registry, mut rx) = setup(MotionMode::PerMessage);
        let recorder = Arc::new(Recorder {
            fired: Mutex::new(Vec::new()),
        });
        let start = Instant::now();
        let mut handle = Ticker::new(INTERVAL, world, registry, SnapshotBuilder::default())
            .with_simulation(recorder.clone())
            .start();
        assert_eq!(handle.state(), TickerState::Running);

        tokio::time::sleep(INTERVAL * 5 + Duration::from_millis(1)).await;
        handle.stop().await;
        assert_eq!(handle.state(), TickerState::Stopped);

        let fired = recorder.fired.lock().clone();
        assert_eq!(fired.len(), 5);
        for (i, at) in fired.iter().enumerate() {
            assert_eq!(*at - start, INTERVAL * (i as u32 + 1));
        }
        for expected in 1..=5 {
            assert_eq!(frame_tick(&rx.recv().await.unwrap()), expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_tick_bodies_never_overlap() {
        struct Slow {
            active: AtomicBool,
            overlapped: AtomicBool,
            fired: Mutex<Vec<std::time::Instant>>,
        }
        impl Simulation for Slow {
            fn advance(&self, _world: &WorldState) -> Result<(), SimulationError> {
                if self.active.swap(true, Ordering::SeqCst) {
                    self.overlapped.store(true, Ordering::SeqCst);
                }
                self.fired.lock().push(std::time::Instant::now());
                std::thread::sleep(Duration::from_millis(35));
                self.active.store(false, Ordering::SeqCst);
                Ok(())
            }
        }

        let (world, registry, _rx) = setup(MotionMode::PerMessage);
        let slow = Arc::new(Slow {
            active: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            fired: Mutex::new(Vec::new()),
        });
        let interval = Duration::from_millis(40);
        let mut handle = Ticker::new(interval, world, registry, SnapshotBuilder::default())
            .with_simulation(slow.clone())
            .start();

        tokio::time::sleep(Duration::from_millis(400)).await;
        handle.stop().await;

        assert!(!slow.overlapped.load(Ordering::SeqCst), "tick bodies overlapped");
        let fired = slow.fired.lock().clone();
        assert!(fired.len() >= 2);
        for pair in fired.windows(2) {
            assert!(pair[1] - pair[0] >= interval + Duration::from_millis(35));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_skips_broadcast_and_continues() {
        let (world, registry, mut rx) = setup(MotionMode::PerMessage);
        let mut handle = Ticker::new(INTERVAL, world, registry, SnapshotBuilder::default())
            .with_simulation(Arc::new(FailOn(2, AtomicU64::new(0))))
            .start();

        tokio::time::sleep(INTERVAL * 3 + Duration::from_millis(1)).await;
        handle.stop().await;

        assert_eq!(handle.current_tick(), 3);
        assert_eq!(frame_tick(&rx.recv().await.unwrap()), 1);
        assert_eq!(frame_tick(&rx.recv().await.unwrap()), 3);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_panicking_simulation_is_a_failed_tick() {
        let (world, registry, mut rx) = setup(MotionMode::PerMessage);
        let ticker = Ticker::new(INTERVAL, world, registry, SnapshotBuilder::default())
            .with_simulation(Arc::new(Panics));

        let err = ticker.run_tick().unwrap_err();
        assert!(matches!(err, TickError::Panicked(msg) if msg.contains("exploded")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_tick_keeps_ticker_running() {
        struct PanicOn(u64, AtomicU64);
        impl Simulation for PanicOn {
            fn advance(&self, _world: &WorldState) -> Result<(), SimulationError> {
                if self.1.fetch_add(1, Ordering::SeqCst) + 1 == self.0 {
                    panic!("bad tick");
                }
                Ok(())
            }
        }

        let (world, registry, mut rx) = setup(MotionMode::PerMessage);
        let mut handle = Ticker::new(INTERVAL, world, registry, SnapshotBuilder::default())
            .with_simulation(Arc::new(PanicOn(2, AtomicU64::new(0))))
            .start();

        tokio::time::sleep(INTERVAL * 3 + Duration::from_millis(1)).await;
        assert_eq!(handle.state(), TickerState::Running);
        handle.stop().await;

        assert_eq!(handle.current_tick(), 3);
        assert_eq!(frame_tick(&rx.recv().await.unwrap()), 1);
        assert_eq!(frame_tick(&rx.recv().await.unwrap()), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extreme_standing_target_keeps_broadcasting() {
        let (world, registry, mut rx) = setup(MotionMode::PerTick);
        world.apply_target("0", Position::new(i64::MIN, 0)).unwrap();
        let mut handle = Ticker::new(INTERVAL, world, registry, SnapshotBuilder::default()).start();

        tokio::time::sleep(INTERVAL * 3 + Duration::from_millis(1)).await;
        assert_eq!(handle.state(), TickerState::Running);
        handle.stop().await;

        let mut last = None;
        for expected in 1..=3 {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame_tick(&frame), expected);
            last = Some(frame);
        }
        let value: serde_json::Value = serde_json::from_str(&last.unwrap()).unwrap();
        assert_eq!(value["position"]["0"], serde_json::json!([-3, 0]));
    }

    #[test]
    fn test_per_tick_mode_advances_before_snapshot() {
        let (world, registry, mut rx) = setup(MotionMode::PerTick);
        world.seed("0", Position::ORIGIN);
        world.apply_target("0", Position::new(0, 3)).unwrap();
        let ticker = Ticker::new(INTERVAL, world.clone(), registry, SnapshotBuilder::default());

        ticker.run_tick().unwrap();
        let value: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(value["position"]["0"], serde_json::json!([0, 1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_future_ticks() {
        let (world, registry, mut rx) = setup(MotionMode::PerMessage);
        let mut handle =
            Ticker::new(INTERVAL, world, registry, SnapshotBuilder::default()).start();

        tokio::time::sleep(INTERVAL + Duration::from_millis(1)).await;
        handle.stop().await;
        tokio::time::sleep(INTERVAL * 4).await;

        assert_eq!(handle.current_tick(), 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
