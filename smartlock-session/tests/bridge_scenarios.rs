//! Bridge Scenario Tests
//!
//! Drives the session lifecycle bridge with a scripted protocol and display
//! surface and checks the run-level guarantees:
//! - stop is called at most once, and iff start was attempted
//! - every exit path (cancel, termination, display error, panic) reaches stop
//! - the artifact is shown before the session starts
//! - the loop pumps at the configured cadence

use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, Rgba};
use smartlock_session::{
    BridgeConfig, BridgeState, CancelCallback, DisplaySurface, ExitReason, PairingArtifact,
    PairingProtocol, Result, SessionBridge, SessionError, StopOutcome, SurfaceState,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Artifact,
    Show(u32, u32),
    Start,
    Pump(u64),
    Teardown,
    Stop,
}

#[derive(Clone, Default)]
struct Events(Arc<Mutex<Vec<Event>>>);

impl Events {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    fn snapshot(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, wanted: &Event) -> usize {
        self.snapshot().iter().filter(|e| *e == wanted).count()
    }

    fn pumps(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|e| matches!(e, Event::Pump(_)))
            .count()
    }

    fn position(&self, wanted: &Event) -> Option<usize> {
        self.snapshot().iter().position(|e| e == wanted)
    }
}

#[derive(Default)]
struct ScriptedProtocol {
    events: Events,
    fail_artifact: bool,
    fail_start: bool,
    panic_start: bool,
    start_delay: Option<Duration>,
    fail_stop: bool,
}

#[async_trait]
impl PairingProtocol for ScriptedProtocol {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn produce_pairing_artifact(&mut self) -> Result<PairingArtifact> {
        self.events.push(Event::Artifact);
        if self.fail_artifact {
            return Err(SessionError::Artifact("no session context".into()));
        }
        let image = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            64,
            64,
            Rgba([0, 0, 0, 255]),
        ));
        PairingArtifact::from_image(image)
    }

    async fn start_session(&mut self) -> Result<()> {
        self.events.push(Event::Start);
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_start {
            panic!("radio driver crashed mid-start");
        }
        if self.fail_start {
            return Err(SessionError::SessionStart("advertising refused".into()));
        }
        Ok(())
    }

    async fn stop_session(&mut self) -> Result<()> {
        self.events.push(Event::Stop);
        if self.fail_stop {
            return Err(SessionError::SessionStop("adapter busy".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct Script {
    cancel_on_register: bool,
    cancel_at_pump: Option<u64>,
    fail_at_pump: Option<u64>,
    panic_at_pump: Option<u64>,
    close_at_pump: Option<u64>,
}

struct ScriptedSurface {
    events: Events,
    script: Script,
    callback: Option<CancelCallback>,
    pumps: u64,
    state: SurfaceState,
    torn_down: bool,
    pump_times: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedSurface {
    fn fire_cancel(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
            self.state = SurfaceState::Closed;
        }
    }
}

impl DisplaySurface for ScriptedSurface {
    fn pump(&mut self) -> Result<()> {
        self.pumps += 1;
        self.events.push(Event::Pump(self.pumps));
        self.pump_times.lock().unwrap().push(Instant::now());

        if self.script.panic_at_pump == Some(self.pumps) {
            panic!("renderer exploded");
        }
        if self.script.fail_at_pump == Some(self.pumps) {
            return Err(SessionError::Display("lost display connection".into()));
        }
        if self.script.cancel_at_pump == Some(self.pumps) {
            self.fire_cancel();
        }
        if self.script.close_at_pump == Some(self.pumps) {
            self.state = SurfaceState::Closed;
        }
        Ok(())
    }

    fn on_cancel(&mut self, callback: CancelCallback) {
        self.callback = Some(callback);
        if self.script.cancel_on_register {
            self.fire_cancel();
        }
    }

    fn teardown(&mut self) {
        self.callback = None;
        self.state = SurfaceState::Closed;
        if !self.torn_down {
            self.torn_down = true;
            self.events.push(Event::Teardown);
        }
    }

    fn state(&self) -> SurfaceState {
        self.state
    }
}

struct Harness {
    events: Events,
    pump_times: Arc<Mutex<Vec<Instant>>>,
    bridge: SessionBridge,
}

impl Harness {
    fn new() -> Self {
        Self {
            events: Events::default(),
            pump_times: Arc::new(Mutex::new(Vec::new())),
            bridge: SessionBridge::new(BridgeConfig {
                tick_interval: Duration::from_secs(1),
                stop_timeout: Duration::from_secs(5),
            }),
        }
    }

    fn protocol(&self) -> ScriptedProtocol {
        ScriptedProtocol {
            events: self.events.clone(),
            ..Default::default()
        }
    }

    fn show(&self, script: Script) -> impl FnOnce(PairingArtifact) -> Result<ScriptedSurface> {
        let events = self.events.clone();
        let pump_times = self.pump_times.clone();
        move |artifact| {
            let (width, height) = artifact.dimensions();
            events.push(Event::Show(width, height));
            Ok(ScriptedSurface {
                events,
                script,
                callback: None,
                pumps: 0,
                state: SurfaceState::Shown,
                torn_down: false,
                pump_times,
            })
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_artifact_failure_never_shows_or_starts() {
    let harness = Harness::new();
    let mut protocol = ScriptedProtocol {
        fail_artifact: true,
        ..harness.protocol()
    };

    let report = harness
        .bridge
        .run(&mut protocol, harness.show(Script::default()), std::future::pending())
        .await;

    assert!(matches!(report.outcome, Err(SessionError::Artifact(_))));
    assert_ne!(report.exit_code(), 0);
    assert!(!report.start_attempted);
    assert_eq!(report.stop, None);
    assert_eq!(harness.events.snapshot(), vec![Event::Artifact]);
    assert_eq!(
        report.transitions,
        vec![BridgeState::Init, BridgeState::Stopped]
    );
}

#[tokio::test(start_paused = true)]
async fn test_display_failure_never_starts() {
    let harness = Harness::new();
    let mut protocol = harness.protocol();

    let report = harness
        .bridge
        .run(
            &mut protocol,
            |_artifact: PairingArtifact| -> Result<ScriptedSurface> {
                Err(SessionError::Display("no monitor attached".into()))
            },
            std::future::pending(),
        )
        .await;

    assert!(matches!(report.outcome, Err(SessionError::Display(_))));
    assert_eq!(report.exit_code(), 3);
    assert_eq!(report.stop, None);
    assert_eq!(harness.events.count(&Event::Start), 0);
    assert_eq!(harness.events.count(&Event::Stop), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_three_iterations() {
    let harness = Harness::new();
    let mut protocol = harness.protocol();
    let script = Script {
        cancel_at_pump: Some(3),
        ..Default::default()
    };

    let report = harness
        .bridge
        .run(&mut protocol, harness.show(script), std::future::pending())
        .await;

    assert!(matches!(report.outcome, Ok(ExitReason::Cancelled)));
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.stop, Some(StopOutcome::Stopped));
    assert_eq!(harness.events.count(&Event::Stop), 1);
    assert_eq!(harness.events.count(&Event::Teardown), 1);
    assert_eq!(harness.events.pumps(), 3);
    assert_eq!(
        report.transitions,
        vec![
            BridgeState::Init,
            BridgeState::ArtifactReady,
            BridgeState::Displayed,
            BridgeState::Running,
            BridgeState::Stopping,
            BridgeState::Stopped,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_artifact_shown_before_session_starts() {
    let harness = Harness::new();
    let mut protocol = harness.protocol();
    let script = Script {
        cancel_at_pump: Some(1),
        ..Default::default()
    };

    harness
        .bridge
        .run(&mut protocol, harness.show(script), std::future::pending())
        .await;

    let show = harness.events.position(&Event::Show(64, 64)).unwrap();
    let start = harness.events.position(&Event::Start).unwrap();
    let first_pump = harness.events.position(&Event::Pump(1)).unwrap();
    let stop = harness.events.position(&Event::Stop).unwrap();
    assert!(show < start);
    assert!(start < first_pump);
    assert!(first_pump < stop);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_first_pump_still_stops() {
    let harness = Harness::new();
    let mut protocol = harness.protocol();
    let script = Script {
        cancel_on_register: true,
        ..Default::default()
    };

    let report = harness
        .bridge
        .run(&mut protocol, harness.show(script), std::future::pending())
        .await;

    assert!(matches!(report.outcome, Ok(ExitReason::Cancelled)));
    assert_eq!(report.stop, Some(StopOutcome::Stopped));
    assert_eq!(harness.events.count(&Event::Stop), 1);
    // Observed in the first pass, not one interval later
    assert_eq!(report.iterations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_still_stops_once() {
    let harness = Harness::new();
    let mut protocol = ScriptedProtocol {
        fail_start: true,
        ..harness.protocol()
    };

    let report = harness
        .bridge
        .run(&mut protocol, harness.show(Script::default()), std::future::pending())
        .await;

    assert!(matches!(report.outcome, Err(SessionError::SessionStart(_))));
    assert_ne!(report.exit_code(), 0);
    assert!(report.start_attempted);
    assert_eq!(report.stop, Some(StopOutcome::Stopped));
    assert_eq!(harness.events.count(&Event::Start), 1);
    assert_eq!(harness.events.count(&Event::Stop), 1);
    assert_eq!(harness.events.pumps(), 0);
    assert_eq!(
        report.transitions,
        vec![
            BridgeState::Init,
            BridgeState::ArtifactReady,
            BridgeState::Displayed,
            BridgeState::Stopping,
            BridgeState::Stopped,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_mid_run_display_error_routes_through_stop() {
    let harness = Harness::new();
    let mut protocol = harness.protocol();
    let script = Script {
        fail_at_pump: Some(2),
        ..Default::default()
    };

    let report = harness
        .bridge
        .run(&mut protocol, harness.show(script), std::future::pending())
        .await;

    assert!(matches!(report.outcome, Err(SessionError::Display(_))));
    assert_ne!(report.exit_code(), 0);
    assert_eq!(harness.events.count(&Event::Stop), 1);
    assert_eq!(harness.events.count(&Event::Teardown), 1);
}

#[tokio::test(start_paused = true)]
async fn test_panic_in_pump_routes_through_stop() {
    let harness = Harness::new();
    let mut protocol = harness.protocol();
    let script = Script {
        panic_at_pump: Some(2),
        ..Default::default()
    };

    let report = harness
        .bridge
        .run(&mut protocol, harness.show(script), std::future::pending())
        .await;

    match &report.outcome {
        Err(SessionError::Loop(message)) => assert!(message.contains("renderer exploded")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(report.stop, Some(StopOutcome::Stopped));
    assert_eq!(harness.events.count(&Event::Stop), 1);
}

#[tokio::test(start_paused = true)]
async fn test_external_termination_stops_session() {
    let harness = Harness::new();
    let mut protocol = harness.protocol();

    let report = harness
        .bridge
        .run(
            &mut protocol,
            harness.show(Script::default()),
            tokio::time::sleep(Duration::from_millis(2500)),
        )
        .await;

    assert!(matches!(report.outcome, Ok(ExitReason::Terminated)));
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.iterations, 3);
    assert_eq!(harness.events.count(&Event::Stop), 1);
}

#[tokio::test(start_paused = true)]
async fn test_surface_closed_without_cancel_ends_run() {
    let harness = Harness::new();
    let mut protocol = harness.protocol();
    let script = Script {
        close_at_pump: Some(2),
        ..Default::default()
    };

    let report = harness
        .bridge
        .run(&mut protocol, harness.show(script), std::future::pending())
        .await;

    assert!(matches!(report.outcome, Ok(ExitReason::SurfaceClosed)));
    assert_eq!(harness.events.count(&Event::Stop), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_failure_is_not_escalated() {
    let harness = Harness::new();
    let mut protocol = ScriptedProtocol {
        fail_stop: true,
        ..harness.protocol()
    };
    let script = Script {
        cancel_at_pump: Some(1),
        ..Default::default()
    };

    let report = harness
        .bridge
        .run(&mut protocol, harness.show(script), std::future::pending())
        .await;

    assert_eq!(report.exit_code(), 0);
    assert!(matches!(report.stop, Some(StopOutcome::Failed(_))));
    assert_eq!(harness.events.count(&Event::Stop), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pump_cadence_matches_interval() {
    let harness = Harness::new();
    let mut protocol = harness.protocol();
    let script = Script {
        cancel_at_pump: Some(6),
        ..Default::default()
    };

    harness
        .bridge
        .run(&mut protocol, harness.show(script), std::future::pending())
        .await;

    let times = harness.pump_times.lock().unwrap().clone();
    assert_eq!(times.len(), 6);
    for pair in times.windows(2) {
        let gap = pair[1] - pair[0];
        let interval = Duration::from_secs(1);
        let drift = if gap > interval { gap - interval } else { interval - gap };
        assert!(drift <= Duration::from_millis(10), "gap {:?}", gap);
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_called_iff_start_attempted() {
    // (fail_artifact, fail_start, cancel_at_pump, fail_at_pump)
    let cases = [
        (true, false, None, None),
        (false, true, None, None),
        (false, false, Some(1), None),
        (false, false, Some(4), None),
        (false, false, None, Some(1)),
    ];

    for (fail_artifact, fail_start, cancel_at_pump, fail_at_pump) in cases {
        let harness = Harness::new();
        let mut protocol = ScriptedProtocol {
            fail_artifact,
            fail_start,
            ..harness.protocol()
        };
        let script = Script {
            cancel_at_pump,
            fail_at_pump,
            ..Default::default()
        };

        let report = harness
            .bridge
            .run(&mut protocol, harness.show(script), std::future::pending())
            .await;

        let starts = harness.events.count(&Event::Start);
        let stops = harness.events.count(&Event::Stop);
        assert!(starts <= 1 && stops <= 1);
        assert_eq!(starts, stops, "case {:?}", (fail_artifact, fail_start));
        assert_eq!(report.start_attempted, starts == 1);
        assert_eq!(report.stop.is_some(), stops == 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_panic_in_start_still_stops_once() {
    let harness = Harness::new();
    let mut protocol = ScriptedProtocol {
        panic_start: true,
        ..harness.protocol()
    };

    let report = harness
        .bridge
        .run(&mut protocol, harness.show(Script::default()), std::future::pending())
        .await;

    match &report.outcome {
        Err(SessionError::SessionStart(message)) => {
            assert!(message.contains("radio driver crashed mid-start"))
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_ne!(report.exit_code(), 0);
    assert!(report.start_attempted);
    assert_eq!(report.stop, Some(StopOutcome::Stopped));
    assert_eq!(harness.events.count(&Event::Stop), 1);
    assert_eq!(harness.events.count(&Event::Teardown), 1);
    assert_eq!(harness.events.pumps(), 0);
    assert_eq!(report.final_state(), BridgeState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_termination_during_start_stops_session() {
    let harness = Harness::new();
    let mut protocol = ScriptedProtocol {
        start_delay: Some(Duration::from_secs(10)),
        ..harness.protocol()
    };

    let report = harness
        .bridge
        .run(
            &mut protocol,
            harness.show(Script::default()),
            tokio::time::sleep(Duration::from_millis(100)),
        )
        .await;

    assert!(matches!(report.outcome, Ok(ExitReason::Terminated)));
    assert_eq!(report.exit_code(), 0);
    assert!(report.start_attempted);
    assert_eq!(report.stop, Some(StopOutcome::Stopped));
    assert_eq!(report.iterations, 0);
    assert_eq!(harness.events.count(&Event::Start), 1);
    assert_eq!(harness.events.count(&Event::Stop), 1);
    assert_eq!(
        report.transitions,
        vec![
            BridgeState::Init,
            BridgeState::ArtifactReady,
            BridgeState::Displayed,
            BridgeState::Stopping,
            BridgeState::Stopped,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_termination_before_show_skips_session() {
    let harness = Harness::new();
    let mut protocol = harness.protocol();

    let report = harness
        .bridge
        .run(
            &mut protocol,
            harness.show(Script::default()),
            std::future::ready(()),
        )
        .await;

    assert!(matches!(report.outcome, Ok(ExitReason::Terminated)));
    assert_eq!(report.exit_code(), 0);
    assert!(!report.start_attempted);
    assert_eq!(report.stop, None);
    assert_eq!(harness.events.snapshot(), vec![Event::Artifact]);
    assert_eq!(
        report.transitions,
        vec![
            BridgeState::Init,
            BridgeState::ArtifactReady,
            BridgeState::Stopped,
        ]
    );
}

#[test]
fn test_surface_teardown_twice_has_one_effect() {
    let harness = Harness::new();
    let image = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(8, 8, Rgba([0, 0, 0, 255])));
    let artifact = PairingArtifact::from_image(image).unwrap();
    let mut surface = harness.show(Script::default())(artifact).unwrap();

    surface.teardown();
    surface.teardown();

    assert_eq!(surface.state(), SurfaceState::Closed);
    assert_eq!(harness.events.count(&Event::Teardown), 1);
    assert!(surface.pump().is_ok());
}
