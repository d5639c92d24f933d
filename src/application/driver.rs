//! Control Loop Driver
//!
//! Each tick: drain events, sample input, encode, send if connected, then
//! hand the running offsets to the visualization. Ticks are paced by a
//! fixed-interval timer; the close signal is honored between ticks only.

use crate::application::display::{EventPump, Offsets, PumpStatus, VisualizationSink};
use crate::domain::controller::{InputBackend, InputSampler};
use crate::domain::errors::{FrameError, TransportError};
use crate::domain::models::ControlCommand;
use crate::infrastructure::link::protocol::FrameCodec;
use crate::infrastructure::link::TransportSession;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopping,
    Stopped,
}

/// What happened to a tick's command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent(usize),
    /// Session not connected; the command is dropped, never queued
    Skipped,
    Failed(TransportError),
    Unencodable(FrameError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub command: ControlCommand,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// All state the loop mutates, owned by the driver
pub struct DriverContext {
    pub session: TransportSession,
    pub sampler: InputSampler,
    pub backend: Box<dyn InputBackend>,
    pub codec: FrameCodec,
    pub offsets: Offsets,
}

pub struct ControlLoop<P, V> {
    context: DriverContext,
    pump: P,
    sink: V,
    tick_interval: Duration,
    state: LoopState,
    stats: LoopStats,
}

impl<P: EventPump, V: VisualizationSink> ControlLoop<P, V> {
    pub fn new(context: DriverContext, pump: P, sink: V, tick_interval: Duration) -> Self {
        Self {
            context,
            pump,
            sink,
            tick_interval: tick_interval.max(Duration::from_millis(1)),
            state: LoopState::Running,
            stats: LoopStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn context(&self) -> &DriverContext {
        &self.context
    }

    /// Run one tick. Returns `None` when the event pump asked to quit.
    pub async fn tick(&mut self) -> Option<TickReport> {
        if self.pump.pump() == PumpStatus::Quit {
            info!("Close requested, stopping control loop");
            self.state = LoopState::Stopping;
            return None;
        }

        let ctx = &mut self.context;
        ctx.session.poll_reconnect().await;

        let command = ctx.sampler.sample(ctx.backend.as_mut());
        let delivery = match ctx.codec.encode(&command) {
            Err(e) => {
                warn!("Command could not be framed: {}", e);
                Delivery::Unencodable(e)
            }
            Ok(_) if !ctx.session.is_connected() => Delivery::Skipped,
            Ok(frame) => match ctx.session.send(&frame).await {
                Ok(sent) => Delivery::Sent(sent),
                Err(e) => {
                    debug!("Dropping command this tick: {}", e);
                    Delivery::Failed(e)
                }
            },
        };

        ctx.offsets.advance();
        self.sink.present(ctx.offsets);

        self.stats.ticks += 1;
        match delivery {
            Delivery::Sent(_) => self.stats.sent += 1,
            Delivery::Skipped => self.stats.skipped += 1,
            Delivery::Failed(_) | Delivery::Unencodable(_) => self.stats.failed += 1,
        }

        Some(TickReport { command, delivery })
    }

    /// Tick at the configured ceiling until the pump quits or `shutdown` resolves,
    /// then tear the session down once.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) -> LoopStats {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        self.state = LoopState::Running;
        info!("Control loop running, tick interval {:?}", self.tick_interval);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    self.state = LoopState::Stopping;
                    break;
                }
                _ = interval.tick() => {}
            }

            if self.tick().await.is_none() {
                break;
            }
        }

        self.context.session.teardown().await;
        self.state = LoopState::Stopped;
        info!(
            "Control loop stopped: {} ticks, {} sent, {} skipped, {} failed",
            self.stats.ticks, self.stats.sent, self.stats.skipped, self.stats.failed
        );
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DeviceDescriptor, MotorDirection, RawState};
    use crate::domain::settings::InputSettings;
    use crate::infrastructure::link::protocol::{decode, FRAME_OVERHEAD};
    use crate::infrastructure::link::service::tests::{Script, ScriptedConnector};
    use crate::infrastructure::link::service::{ReconnectPolicy, SessionConfig, SessionState};
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    struct QuitAfter {
        remaining: u32,
    }

    impl EventPump for QuitAfter {
        fn pump(&mut self) -> PumpStatus {
            if self.remaining == 0 {
                return PumpStatus::Quit;
            }
            self.remaining -= 1;
            PumpStatus::Continue
        }
    }

    struct NeverQuit;

    impl EventPump for NeverQuit {
        fn pump(&mut self) -> PumpStatus {
            PumpStatus::Continue
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<Offsets>>>,
    }

    impl VisualizationSink for RecordingSink {
        fn present(&mut self, offsets: Offsets) {
            self.frames.lock().unwrap().push(offsets);
        }
    }

    struct SteadyBackend(RawState);

    impl InputBackend for SteadyBackend {
        fn device_count(&self) -> usize {
            1
        }

        fn sample(&mut self, _index: usize) -> Option<RawState> {
            Some(self.0)
        }
    }

    fn context(script: Vec<Script>, config: SessionConfig) -> (DriverContext, Arc<Mutex<u32>>) {
        let (connector, calls) = ScriptedConnector::new(script);
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = TransportSession::new(config, Box::new(connector), tx);
        let backend = SteadyBackend(RawState {
            axis_x: 32767,
            axis_y: 1000,
            trigger: 77,
        });
        (
            DriverContext {
                session,
                sampler: InputSampler::new(InputSettings::default()),
                backend: Box::new(backend),
                codec: FrameCodec::default(),
                offsets: Offsets::default(),
            },
            calls,
        )
    }

    fn device() -> DeviceDescriptor {
        DeviceDescriptor::new("rc-1", "Rover", "10.0.0.1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_ticks_skip_without_io() {
        let (ctx, calls) = context(vec![], SessionConfig::default());
        let sink = RecordingSink::default();
        let mut driver = ControlLoop::new(
            ctx,
            QuitAfter { remaining: 5 },
            sink.clone(),
            Duration::from_millis(16),
        );

        let stats = driver.run(std::future::pending()).await;
        assert_eq!(
            stats,
            LoopStats {
                ticks: 5,
                sent: 0,
                skipped: 5,
                failed: 0
            }
        );
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(driver.state(), LoopState::Stopped);

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[4], Offsets { x: 5, y: 10 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_ticks_send_latest_command() {
        let (local, mut remote) = tokio::io::duplex(256);
        let (mut ctx, _) = context(vec![Script::Accept(local)], SessionConfig::default());
        ctx.session.connect(&device()).await.unwrap();

        let mut driver = ControlLoop::new(
            ctx,
            QuitAfter { remaining: 3 },
            RecordingSink::default(),
            Duration::from_millis(16),
        );
        let stats = driver.run(std::future::pending()).await;
        assert_eq!(stats.sent, 3);

        // session torn down exactly once after the loop exits
        assert_eq!(driver.context().session.state(), &SessionState::Idle);

        let mut buf = vec![0u8; 3 * (4 + FRAME_OVERHEAD)];
        remote.read_exact(&mut buf).await.unwrap();
        for chunk in buf.chunks(4 + FRAME_OVERHEAD) {
            let cmd = decode(chunk).unwrap();
            assert_eq!(cmd.direction(), MotorDirection::Forward);
            assert_eq!(cmd.servo_angle(), 90);
            assert_eq!(cmd.speed(), 77);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_rate_is_capped() {
        let (ctx, _) = context(vec![], SessionConfig::default());
        let mut driver = ControlLoop::new(
            ctx,
            QuitAfter { remaining: 10 },
            RecordingSink::default(),
            Duration::from_millis(20),
        );

        let start = Instant::now();
        driver.run(std::future::pending()).await;
        // first tick fires immediately, then one interval per tick
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failures_do_not_stop_loop() {
        let (local, _remote) = tokio::io::duplex(4);
        let config = SessionConfig {
            send_timeout: Duration::from_millis(5),
            reconnect: ReconnectPolicy::disabled(),
            ..SessionConfig::default()
        };
        let (mut ctx, _) = context(vec![Script::Accept(local)], config);
        ctx.session.connect(&device()).await.unwrap();

        let mut driver = ControlLoop::new(
            ctx,
            QuitAfter { remaining: 4 },
            RecordingSink::default(),
            Duration::from_millis(16),
        );

        let report = driver.tick().await.unwrap();
        assert!(matches!(report.delivery, Delivery::Failed(TransportError::SendFailed(_))));

        let stats = driver.run(std::future::pending()).await;
        assert_eq!(stats.ticks, 4);
        assert_eq!(stats.failed, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_signal_stops_between_ticks() {
        let (ctx, _) = context(vec![], SessionConfig::default());
        let mut driver = ControlLoop::new(
            ctx,
            NeverQuit,
            RecordingSink::default(),
            Duration::from_millis(10),
        );

        let stats = driver
            .run(tokio::time::sleep(Duration::from_millis(95)))
            .await;
        assert_eq!(driver.state(), LoopState::Stopped);
        assert!(stats.ticks >= 9 && stats.ticks <= 10, "ticks = {}", stats.ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unencodable_command_counts_as_failure() {
        let (mut ctx, _) = context(vec![], SessionConfig::default());
        ctx.codec = FrameCodec::new(2);
        let mut driver = ControlLoop::new(
            ctx,
            NeverQuit,
            RecordingSink::default(),
            Duration::from_millis(10),
        );

        let report = driver.tick().await.unwrap();
        assert_eq!(report.delivery, Delivery::Unencodable(FrameError::Oversize));
        assert_eq!(driver.stats().failed, 1);
    }
}
