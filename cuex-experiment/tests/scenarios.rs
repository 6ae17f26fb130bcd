use cuex_core::marker::{is_onset_label, is_response_label, TEST_ENDED};
use cuex_core::{Answer, Element, ImageStimulus, Marker, Sequence, StroopResponse, TestCondition, TrialState};
use cuex_devices::{BusError, MarkerSink};
use cuex_experiment::{read_behavior_log, EngineConfig, EngineEvent, SessionHooks, TrialEngine, TrialRunner};
use cuex_render::Presenter;
use cuex_timing::{ManualTimer, Timer};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Journal = Arc<Mutex<Vec<String>>>;

struct ScriptedPresenter {
    journal: Journal,
    fail_images: bool,
}

impl ScriptedPresenter {
    fn note(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

impl Presenter for ScriptedPresenter {
    fn show_instruction(&mut self, _text: &str) -> anyhow::Result<()> {
        self.note("show instruction".into());
        Ok(())
    }

    fn show_crosshair(&mut self, duration: Duration) -> anyhow::Result<()> {
        self.note(format!("show crosshair {}", duration.as_millis()));
        Ok(())
    }

    fn show_image(&mut self, element: &Element) -> anyhow::Result<()> {
        if self.fail_images {
            anyhow::bail!("cannot decode image");
        }
        let name = element.as_image().map(|i| i.basename()).unwrap_or_default();
        self.note(format!("show image {name}"));
        Ok(())
    }

    fn show_rating_prompt(&mut self) -> anyhow::Result<()> {
        self.note("show prompt".into());
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

struct CaptureSink {
    timer: ManualTimer,
    journal: Journal,
    markers: Arc<Mutex<Vec<Marker>>>,
}

impl MarkerSink for CaptureSink {
    fn publish(&self, label: &str) -> Result<Marker, BusError> {
        let marker = Marker {
            label: label.to_string(),
            timestamp: self.timer.now() as f64 / 1e9,
        };
        self.journal.lock().unwrap().push(format!("marker {label}"));
        self.markers.lock().unwrap().push(marker.clone());
        Ok(marker)
    }
}

#[derive(Default)]
struct DeviceLog {
    journal: Journal,
    gate: bool,
    faults: Vec<String>,
    responses: Vec<StroopResponse>,
}

impl SessionHooks for DeviceLog {
    fn start_recording(&mut self, _test: TestCondition) -> anyhow::Result<()> {
        self.journal.lock().unwrap().push("record start".into());
        Ok(())
    }

    fn stop_recording(&mut self, _test: TestCondition) -> anyhow::Result<()> {
        self.journal.lock().unwrap().push("record stop".into());
        Ok(())
    }

    fn set_touch_gate(&mut self, enabled: bool) -> anyhow::Result<()> {
        self.gate = enabled;
        self.journal.lock().unwrap().push(format!("gate {enabled}"));
        Ok(())
    }

    fn pause_devices(&mut self, _test: TestCondition) -> anyhow::Result<()> {
        self.journal.lock().unwrap().push("devices pause".into());
        Ok(())
    }

    fn resume_devices(&mut self, _test: TestCondition) -> anyhow::Result<()> {
        self.journal.lock().unwrap().push("devices resume".into());
        Ok(())
    }

    fn record_response(&mut self, response: &StroopResponse) {
        self.responses.push(response.clone());
    }

    fn fault(&mut self, message: &str) {
        self.faults.push(message.to_string());
    }
}

type Runner = TrialRunner<ManualTimer, StdRng, ScriptedPresenter, CaptureSink, DeviceLog>;

struct Harness {
    runner: Runner,
    timer: ManualTimer,
    journal: Journal,
    markers: Arc<Mutex<Vec<Marker>>>,
}

impl Harness {
    fn new(test: TestCondition, names: &[&str]) -> Self {
        Self::with_config(EngineConfig::for_test(test), names)
    }

    fn with_config(config: EngineConfig, names: &[&str]) -> Self {
        let timer = ManualTimer::new();
        let journal: Journal = Arc::default();
        let markers = Arc::new(Mutex::new(Vec::new()));
        let sequence = sequence(config.test, names);
        let engine = TrialEngine::new(config, sequence, timer.clone(), StdRng::seed_from_u64(7)).unwrap();
        let presenter = ScriptedPresenter {
            journal: journal.clone(),
            fail_images: false,
        };
        let sink = CaptureSink {
            timer: timer.clone(),
            journal: journal.clone(),
            markers: markers.clone(),
        };
        let hooks = DeviceLog {
            journal: journal.clone(),
            ..Default::default()
        };
        Self {
            runner: TrialRunner::new(engine, presenter, sink, hooks),
            timer,
            journal,
            markers,
        }
    }

    fn state(&self) -> TrialState {
        self.runner.engine().state().clone()
    }

    fn labels(&self) -> Vec<String> {
        self.markers.lock().unwrap().iter().map(|m| m.label.clone()).collect()
    }

    fn onsets(&self) -> Vec<f64> {
        self.markers
            .lock()
            .unwrap()
            .iter()
            .filter(|m| is_onset_label(&m.label))
            .map(|m| m.timestamp)
            .collect()
    }

    /// Plays the subject's part: SPACE on instructions and prompts, the
    /// given answers on Stroop prompts, next/touch on tactile waits.
    fn run_to_end(&mut self, answers: &[Answer]) {
        let mut answers = answers.iter().copied();
        self.runner.dispatch(EngineEvent::Start);
        for _ in 0..100_000 {
            self.step(&mut answers);
            if self.state().is_terminal() {
                return;
            }
        }
        panic!("test never ended, stuck in {:?}", self.state());
    }

    fn step(&mut self, answers: &mut impl Iterator<Item = Answer>) {
        self.timer.advance_ms(10);
        match self.state() {
            TrialState::MainInstructions => {
                self.runner.dispatch(EngineEvent::Space);
            }
            TrialState::Presenting if !self.current_is_image() => {
                self.runner.dispatch(EngineEvent::Space);
            }
            TrialState::WaitingForResponse => {
                let answer = answers.next().unwrap_or(Answer::No);
                self.runner.dispatch(EngineEvent::Response(answer));
            }
            TrialState::WaitingForNextPress => {
                self.runner.dispatch(EngineEvent::NextPressed);
            }
            TrialState::WaitingForTouch if self.runner.hooks().gate => {
                self.runner.dispatch(EngineEvent::Touched);
            }
            _ => {
                self.runner.dispatch(EngineEvent::Tick);
            }
        }
    }

    fn current_is_image(&self) -> bool {
        self.runner.engine().current_element().is_some_and(Element::is_image)
    }
}

fn sequence(test: TestCondition, names: &[&str]) -> Sequence {
    let images = names
        .iter()
        .map(|n| ImageStimulus::new(format!("/stimuli/{n}.png"), test.origin()))
        .collect();
    Sequence::for_modality(test.modality(), images)
}

#[test]
fn passive_visual_publishes_full_marker_sequence() {
    let mut h = Harness::new(TestCondition::UnisensoryNeutralVisual, &["a", "b", "c"]);
    h.run_to_end(&[]);

    assert_eq!(
        h.labels(),
        vec![
            "showing crosshair instructions",
            "showing crosshair period",
            "showing main instructions",
            "Starting countdown",
            "a Image",
            "b Image",
            "c Image",
            "Passive Test Ended",
            "Test Ended",
        ]
    );
    assert_eq!(h.state(), TrialState::Ended);
    let journal = h.journal.lock().unwrap();
    assert_eq!(journal.first().map(String::as_str), Some("record start"));
    assert_eq!(journal.last().map(String::as_str), Some("record stop"));
    assert!(journal.iter().any(|e| e == "show prompt"));
}

#[test]
fn passive_onsets_are_separated_by_dwell_and_crosshair() {
    let mut h = Harness::new(TestCondition::MultisensoryAlcoholOlfactory, &["a", "b", "c", "d"]);
    h.run_to_end(&[]);

    let onsets = h.onsets();
    assert_eq!(onsets.len(), 4);
    for pair in onsets.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= 7.0 - 1e-9, "onsets only {gap} s apart");
        assert!(gap <= 10.0 + 0.05, "onsets {gap} s apart");
    }
}

#[test]
fn stroop_records_responses_and_writes_log() {
    let dir = std::env::temp_dir().join(format!("cuex-scenario-stroop-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let mut h = Harness::new(TestCondition::StroopNeutralOlfactory, &["x", "y"]);
    h.runner.set_log_dir(Some(dir.clone()));
    h.run_to_end(&[Answer::Yes, Answer::No]);

    let labels = h.labels();
    let tail: Vec<&str> = labels[4..].iter().map(String::as_str).collect();
    assert_eq!(
        tail,
        vec!["x Image", "x Image: Yes", "y Image", "y Image: No", "Stroop Test Ended", TEST_ENDED]
    );

    let rows = read_behavior_log(&dir.join("data.csv")).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].answer, Answer::Yes);
    assert_eq!(rows[1].answer, Answer::No);
    assert!(rows[1].elapsed_s > rows[0].elapsed_s);
    assert_eq!(h.runner.hooks().responses, rows);

    let timing = &h.runner.engine().timings()[0];
    assert_eq!(timing.response, Some(Answer::Yes));
    assert!(timing.latency.unwrap() >= Duration::from_millis(2000));
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn every_image_is_painted_before_its_marker() {
    let mut h = Harness::new(TestCondition::StroopAlcoholOlfactory, &["p", "q", "r"]);
    h.run_to_end(&[Answer::Yes, Answer::Yes, Answer::No]);

    let journal = h.journal.lock().unwrap();
    for name in ["p", "q", "r"] {
        let shown = journal.iter().position(|e| *e == format!("show image {name}")).unwrap();
        let marked = journal.iter().position(|e| *e == format!("marker {name} Image")).unwrap();
        assert!(shown < marked, "{name} marker preceded its frame");
    }
}

#[test]
fn responses_outside_stroop_are_ignored() {
    let mut h = Harness::new(TestCondition::UnisensoryAlcoholVisual, &["a", "b"]);
    h.runner.dispatch(EngineEvent::Start);
    for _ in 0..20_000 {
        h.timer.advance_ms(10);
        match h.state() {
            TrialState::MainInstructions => {
                h.runner.dispatch(EngineEvent::Space);
            }
            TrialState::Presenting if h.current_is_image() => {
                assert!(h.runner.dispatch(EngineEvent::Response(Answer::Yes)).is_empty());
                h.runner.dispatch(EngineEvent::Tick);
            }
            TrialState::Presenting => break,
            _ => {
                h.runner.dispatch(EngineEvent::Tick);
            }
        }
    }
    assert!(h.labels().iter().all(|l| !is_response_label(l)));
    assert_eq!(h.onsets().len(), 2);
}

#[test]
fn pause_mid_dwell_finishes_the_remaining_time() {
    let mut h = Harness::new(TestCondition::UnisensoryNeutralVisual, &["a", "b", "c", "d"]);
    h.runner.dispatch(EngineEvent::Start);
    let mut no_answers = std::iter::empty();

    while !(h.state() == TrialState::Presenting && h.runner.engine().index() == 2) {
        h.step(&mut no_answers);
    }
    let onset = h.runner.engine().timings()[2].onset_ns;
    while h.timer.now() - onset < 2_000_000_000 {
        h.timer.advance_ms(10);
        h.runner.dispatch(EngineEvent::Tick);
    }
    h.runner.dispatch(EngineEvent::Pause);
    assert_eq!(h.runner.engine().paused_index(), Some(2));
    assert_eq!(h.runner.engine().paused_time(), Some(Duration::from_millis(2000)));

    h.timer.advance(Duration::from_secs(10));
    h.runner.dispatch(EngineEvent::Tick);
    assert!(h.state().is_paused());
    h.runner.dispatch(EngineEvent::Resume);
    assert_eq!(h.state(), TrialState::Presenting);

    while h.state() == TrialState::Presenting {
        h.timer.advance_ms(10);
        h.runner.dispatch(EngineEvent::Tick);
    }
    assert_eq!(h.timer.now() - onset, 15_000_000_000);
    assert_eq!(h.labels().iter().filter(|l| *l == "c Image").count(), 1);

    h.run_rest();
    assert_eq!(h.onsets().len(), 4);
}

impl Harness {
    fn run_rest(&mut self) {
        let mut no_answers = std::iter::empty();
        while !self.state().is_terminal() {
            self.step(&mut no_answers);
        }
    }
}

#[test]
fn tactile_waits_for_next_press_and_touch() {
    let mut h = Harness::new(TestCondition::MultisensoryNeutralTactile, &["a", "b"]);
    h.run_to_end(&[]);

    let journal = h.journal.lock().unwrap();
    let relevant: Vec<&str> = journal
        .iter()
        .map(String::as_str)
        .filter(|e| e.starts_with("gate") || e.starts_with("marker") && e.ends_with(" Image"))
        .collect();
    assert_eq!(
        relevant,
        vec!["gate true", "gate false", "marker a Image", "gate true", "gate false", "marker b Image"]
    );
    assert!(!h.runner.hooks().gate);
}

#[test]
fn stop_then_start_begins_a_fresh_run() {
    let mut h = Harness::new(TestCondition::StroopNeutralTactile, &["a", "b", "c"]);
    h.runner.dispatch(EngineEvent::Start);
    h.timer.advance_ms(5000);
    h.runner.dispatch(EngineEvent::Tick);
    h.runner.dispatch(EngineEvent::Stop);
    assert_eq!(h.state(), TrialState::Stopped);
    let labels = h.labels();
    assert_eq!(&labels[labels.len() - 2..], ["Stroop Test Ended", TEST_ENDED]);

    let reordered = sequence(TestCondition::StroopNeutralTactile, &["c", "a", "b"]);
    h.runner.engine_mut().load(reordered).unwrap();
    h.markers.lock().unwrap().clear();
    h.run_to_end(&[Answer::Yes; 3]);

    let onsets: Vec<String> = h.labels().into_iter().filter(|l| is_onset_label(l)).collect();
    assert_eq!(onsets, vec!["c Image", "a Image", "b Image"]);
    assert_eq!(h.runner.engine().responses().len(), 3);
}

#[test]
fn failed_frame_pauses_without_a_marker() {
    let mut config = EngineConfig::for_test(TestCondition::UnisensoryNeutralVisual);
    config.baseline = Duration::from_millis(100);
    let mut h = Harness::with_config(config, &["a"]);
    h.runner.presenter_mut().fail_images = true;
    h.runner.dispatch(EngineEvent::Start);
    let mut no_answers = std::iter::empty();
    while !h.state().is_paused() {
        h.step(&mut no_answers);
    }

    assert_eq!(h.state(), TrialState::Paused(Box::new(TrialState::Presenting)));
    assert!(h.onsets().is_empty());
    assert_eq!(h.runner.hooks().faults.len(), 1);
}

#[test]
fn resumed_frame_is_shown_and_marked_once() {
    let mut config = EngineConfig::for_test(TestCondition::UnisensoryNeutralVisual);
    config.baseline = Duration::from_millis(100);
    let mut h = Harness::with_config(config, &["a", "b"]);
    h.runner.presenter_mut().fail_images = true;
    h.runner.dispatch(EngineEvent::Start);
    let mut no_answers = std::iter::empty();
    while !h.state().is_paused() {
        h.step(&mut no_answers);
    }
    assert!(h.journal.lock().unwrap().contains(&"devices pause".to_string()));

    h.runner.presenter_mut().fail_images = false;
    h.timer.advance(Duration::from_secs(30));
    let resumed_at = h.timer.now();
    h.runner.dispatch(EngineEvent::Resume);
    assert_eq!(h.state(), TrialState::Presenting);
    assert_eq!(h.runner.engine().timings().len(), 1);
    assert_eq!(h.runner.engine().timings()[0].onset_ns, resumed_at);
    h.run_rest();

    let labels = h.labels();
    assert_eq!(labels.iter().filter(|l| *l == "a Image").count(), 1);
    assert_eq!(labels.iter().filter(|l| *l == "b Image").count(), 1);
    let journal = h.journal.lock().unwrap();
    let shown = journal.iter().position(|e| e == "show image a").unwrap();
    let marked = journal.iter().position(|e| e == "marker a Image").unwrap();
    let resumed = journal.iter().position(|e| e == "devices resume").unwrap();
    assert!(resumed < shown && shown < marked);
    assert_eq!(h.runner.engine().timings().len(), 2);
}
