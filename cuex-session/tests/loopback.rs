use cuex_catalog::BayAssignment;
use cuex_core::marker::{CROSSHAIR_INSTRUCTIONS, LABELS_OUTLET, TACTILE_OUTLET, TACTILE_TOUCH, TEST_ENDED};
use cuex_core::{Element, ImageStimulus, Marker, Sequence, TestCondition, TrialState};
use cuex_devices::{
    BusResult, DiscoveryTarget, EyeTracker, ForceSensorConfig, ForceSensorHandle, MarkerBus, MarkerGate, MarkerSink,
    SampleSource, SimulatedGaze, SimulatedRecorder,
};
use cuex_experiment::{EngineConfig, EngineEvent, SessionHooks, TrialEngine, TrialRunner};
use cuex_render::Presenter;
use cuex_session::{ClientController, ControlLink, ControlListener, HostController, HostDevices, Session};
use cuex_timing::ManualTimer;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct Blank;

impl Presenter for Blank {
    fn show_instruction(&mut self, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn show_crosshair(&mut self, _duration: Duration) -> anyhow::Result<()> {
        Ok(())
    }

    fn show_image(&mut self, _element: &Element) -> anyhow::Result<()> {
        Ok(())
    }

    fn show_rating_prompt(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn tick_timer(&mut self, _remaining_ms: u64) -> anyhow::Result<()> {
        Ok(())
    }

    fn elapsed(&self) -> bool {
        true
    }
}

/// Remembers what the client sent so it can be compared with the bus.
struct Tee<M: MarkerSink> {
    inner: M,
    sent: Arc<Mutex<Vec<String>>>,
}

impl<M: MarkerSink> MarkerSink for Tee<M> {
    fn publish(&self, label: &str) -> BusResult<Marker> {
        let marker = self.inner.publish(label)?;
        self.sent.lock().unwrap().push(label.to_string());
        Ok(marker)
    }
}

struct HostRun {
    recorded: bool,
    still_recording: bool,
    active: Option<TestCondition>,
}

fn spawn_host(
    name: &str,
    test_number: u8,
    bus: MarkerBus,
    force: bool,
) -> (String, PathBuf, JoinHandle<HostRun>) {
    let base = std::env::temp_dir().join(format!("cuex-loopback-{name}-{}", std::process::id()));
    let listener = ControlListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let session = Session::new("12", test_number, &base).unwrap();
    let handle = std::thread::spawn(move || {
        let mut eye = EyeTracker::new(SimulatedGaze::default(), None);
        eye.discover(&DiscoveryTarget::Scan).unwrap();
        let force = force.then(|| {
            let (tx, rx) = mpsc::channel();
            let config = ForceSensorConfig {
                source: SampleSource::Simulated {
                    touch_delay: Duration::from_millis(50),
                },
                ..ForceSensorConfig::default()
            };
            let handle = ForceSensorHandle::spawn(config, MarkerGate::new(), Some(bus.outlet(TACTILE_OUTLET)), tx);
            (handle, rx)
        });
        let devices = HostDevices {
            bus,
            recorder: Box::new(SimulatedRecorder::default()),
            eye: Some(eye),
            force,
            turntable: None,
        };
        let mut host = HostController::new(session, devices, BayAssignment::default(), Duration::from_millis(10));
        let (link, events) = listener.accept().unwrap();
        let stop = AtomicBool::new(false);
        host.serve(&link, &events, &stop);
        HostRun {
            recorded: host.recorder().output_path().is_some(),
            still_recording: host.recorder().is_recording(),
            active: host.active_test(),
        }
    });
    (addr, base, handle)
}

fn connect(addr: &str) -> ClientController {
    let (link, events) = ControlLink::connect(addr, Duration::from_secs(2)).unwrap();
    ClientController::new(link, events)
}

fn wait_ready(client: &mut ClientController, test: TestCondition) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while client.check_start(test, false).is_err() {
        assert!(Instant::now() < deadline, "host never became ready: {:?}", client.readiness());
        client.poll();
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn drain(sub: &cuex_devices::Subscription, outlet: &str) -> Vec<String> {
    std::iter::from_fn(|| sub.recv_timeout(Duration::from_millis(300)))
        .filter(|s| s.outlet == outlet)
        .map(|s| s.marker.label)
        .collect()
}

#[test]
fn passive_test_markers_reach_the_host_bus_once_each() {
    let test = TestCondition::UnisensoryNeutralVisual;
    let bus = MarkerBus::new();
    let sub = bus.subscribe();
    let (addr, base, host) = spawn_host("passive", 1, bus, false);

    let mut client = connect(&addr);
    wait_ready(&mut client, test);

    let timer = ManualTimer::new();
    let images = ["lake", "tree"]
        .iter()
        .map(|n| ImageStimulus::new(format!("/stimuli/{n}.png"), test.origin()))
        .collect();
    let sequence = Sequence::for_modality(test.modality(), images);
    let config = EngineConfig {
        baseline: Duration::from_millis(500),
        ..EngineConfig::for_test(test)
    };
    let engine = TrialEngine::new(config, sequence, timer.clone(), StdRng::seed_from_u64(3)).unwrap();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let markers = Tee {
        inner: client.markers(),
        sent: sent.clone(),
    };
    let mut runner = TrialRunner::new(engine, Blank, markers, client.hooks(None));

    runner.dispatch(EngineEvent::Start);
    for _ in 0..100_000 {
        timer.advance_ms(10);
        let event = match runner.engine().state() {
            TrialState::MainInstructions => EngineEvent::Space,
            TrialState::Presenting if !runner.engine().current_element().is_some_and(Element::is_image) => {
                EngineEvent::Space
            }
            _ => EngineEvent::Tick,
        };
        runner.dispatch(event);
        if runner.engine().state().is_terminal() {
            break;
        }
    }
    assert_eq!(runner.engine().state(), &TrialState::Ended);

    client.link().shutdown();
    let run = host.join().unwrap();
    assert!(run.recorded);
    assert!(!run.still_recording);
    assert_eq!(run.active, None);

    let on_bus = drain(&sub, LABELS_OUTLET);
    let sent = sent.lock().unwrap().clone();
    assert_eq!(on_bus, sent);
    assert_eq!(on_bus.first().map(String::as_str), Some(CROSSHAIR_INSTRUCTIONS));
    assert_eq!(on_bus.last().map(String::as_str), Some(TEST_ENDED));
    assert!(base.join("subject_12").is_dir());
    let _ = std::fs::remove_dir_all(&base);
}

#[test]
fn touch_is_relayed_only_after_the_gate_opens() {
    let test = TestCondition::MultisensoryNeutralTactile;
    let bus = MarkerBus::new();
    let sub = bus.subscribe();
    let (addr, base, host) = spawn_host("touch", 1, bus, true);

    let mut client = connect(&addr);
    wait_ready(&mut client, test);
    let mut hooks = client.hooks(None);
    hooks.start_recording(test).unwrap();

    std::thread::sleep(Duration::from_millis(200));
    assert!(client.poll().is_empty());

    hooks.set_touch_gate(true).unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut events = Vec::new();
    while events.is_empty() && Instant::now() < deadline {
        events = client.poll();
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(events, vec![EngineEvent::Touched]);

    hooks.stop_recording(test).unwrap();
    client.link().shutdown();
    let run = host.join().unwrap();
    assert!(!run.still_recording);

    assert_eq!(drain(&sub, TACTILE_OUTLET), vec![TACTILE_TOUCH]);
    let _ = std::fs::remove_dir_all(&base);
}
