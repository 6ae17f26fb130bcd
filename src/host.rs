use anyhow::{Context, Result};
use cuex_core::marker::{EYE_OUTLET, TACTILE_OUTLET};
use cuex_core::Classify;
use cuex_devices::{
    AbsentGaze, DiscoveryTarget, EyeTracker, ForceSensorHandle, GazeBackend, MarkerBus, MarkerGate, MarkerServer,
    RecorderControl, SessionRecorder, SimulatedController, SimulatedGaze, SimulatedRecorder, StepController, TicCmd,
    Turntable,
};
use cuex_session::{Config, ControlListener, HostController, HostDevices, Session};
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

pub fn run(config: &Config, session: Session, simulate: bool) -> Result<()> {
    tracing::info!(subject = session.subject_id(), test_number = session.test_number(), simulate, "host starting");
    if simulate {
        serve(config, session, SimulatedGaze::default(), true)
    } else {
        serve(config, session, AbsentGaze, false)
    }
}

fn serve<B: GazeBackend>(config: &Config, session: Session, gaze: B, simulate: bool) -> Result<()> {
    let bus = MarkerBus::new();
    let marker_addr: SocketAddr = format!("0.0.0.0:{}", config.network.marker_port).parse()?;
    let server = MarkerServer::bind(bus.clone(), marker_addr).context("binding the marker stream")?;
    tracing::info!(addr = %server.local_addr()?, "marker stream serving");
    server.spawn();

    let devices = HostDevices {
        recorder: recorder(config, simulate),
        eye: Some(eye_tracker(gaze, &bus)),
        force: Some(force_sensor(config, &bus, simulate)),
        turntable: turntable(config, simulate),
        bus,
    };
    let mut host = HostController::new(session, devices, config.bay_assignment()?, config.turntable_dwell());

    let listener = ControlListener::bind(&format!("0.0.0.0:{}", config.network.control_port))?;
    let stop = AtomicBool::new(false);
    loop {
        let (link, events) = listener.accept()?;
        host.serve(&link, &events, &stop);
        link.shutdown();
        tracing::info!(peer = %link.peer(), "client session ended; waiting for the next client");
    }
}

fn recorder(config: &Config, simulate: bool) -> Box<dyn SessionRecorder> {
    if simulate {
        return Box::new(SimulatedRecorder::default());
    }
    let mut recorder = RecorderControl::new(config.network.recorder_address.clone());
    if let Err(e) = recorder.connect() {
        tracing::warn!(kind = %e.kind(), "recorder not reachable: {e}");
    }
    Box::new(recorder)
}

fn eye_tracker<B: GazeBackend>(gaze: B, bus: &MarkerBus) -> EyeTracker<B> {
    let mut eye = EyeTracker::new(gaze, Some(bus.outlet(EYE_OUTLET)));
    match eye.discover(&DiscoveryTarget::Scan) {
        Ok(name) => tracing::info!(device = %name, "eye-tracker ready"),
        Err(e) => tracing::warn!(kind = %e.kind(), "eye-tracker not found: {e}"),
    }
    eye
}

fn force_sensor(
    config: &Config,
    bus: &MarkerBus,
    simulate: bool,
) -> (ForceSensorHandle, mpsc::Receiver<cuex_devices::ForceEvent>) {
    let (tx, rx) = mpsc::channel();
    let handle = ForceSensorHandle::spawn(
        config.force_sensor_config(simulate),
        MarkerGate::new(),
        Some(bus.outlet(TACTILE_OUTLET)),
        tx,
    );
    (handle, rx)
}

fn turntable(config: &Config, simulate: bool) -> Option<Arc<Turntable>> {
    let hw = &config.hardware;
    let (carousel, doors): (Box<dyn StepController>, Box<dyn StepController>) = if simulate {
        (Box::new(SimulatedController::default()), Box::new(SimulatedController::default()))
    } else if hw.carousel_serial.is_some() && hw.door_serial.is_some() {
        let tic = |serial: &Option<String>| {
            TicCmd::new(config.paths.ticcmd.clone(), serial.clone(), hw.turntable_ssh_host.clone())
        };
        (Box::new(tic(&hw.carousel_serial)), Box::new(tic(&hw.door_serial)))
    } else {
        tracing::info!("no turntable serials configured; tactile tests run without the turntable");
        return None;
    };
    let turntable = Turntable::new(carousel, doors, config.turntable_config());
    match turntable.initialize() {
        Ok(()) => Some(Arc::new(turntable)),
        Err(e) => {
            tracing::error!(kind = %e.kind(), "turntable unavailable: {e}");
            None
        }
    }
}
