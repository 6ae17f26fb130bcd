use anyhow::{anyhow, Context, Result};
use cuex_catalog::StimulusCatalog;
use cuex_core::{Answer, TestCondition, TrialState};
use cuex_experiment::{EngineEvent, TrialEngine, TrialRunner};
use cuex_render::{Presenter, SkiaPresenter};
use cuex_session::{ClientController, ClientHooks, Config, ControlLink, RemoteLabels, Session, SessionError};
use cuex_timing::{HighPrecisionTimer, Timer};
use pixels::{Pixels, SurfaceTexture};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tiny_skia::Pixmap;
use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalSize},
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

type Runner = TrialRunner<HighPrecisionTimer, StdRng, SkiaPresenter<HighPrecisionTimer>, RemoteLabels, ClientHooks>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A window and the pixel buffer presented on it.
struct Surface {
    window: Arc<Window>,
    pixels: Pixels<'static>,
}

impl Surface {
    /// `buffer` defaults to the window's own size.
    fn open(
        event_loop: &ActiveEventLoop,
        attributes: WindowAttributes,
        buffer: Option<PhysicalSize<u32>>,
    ) -> Result<Self> {
        let window = Arc::new(event_loop.create_window(attributes)?);
        let size = window.inner_size();
        let buffer = buffer.unwrap_or(size);
        let texture = SurfaceTexture::new(size.width, size.height, Arc::clone(&window));
        let pixels = Pixels::new(buffer.width, buffer.height, texture)?;
        Ok(Self { window, pixels })
    }

    fn id(&self) -> WindowId {
        self.window.id()
    }

    fn show(&mut self, frame: &Pixmap) -> Result<()> {
        let buffer = self.pixels.frame_mut();
        if buffer.len() != frame.data().len() {
            return Err(anyhow!(
                "frame is {}x{} but the surface buffer holds {} bytes",
                frame.width(),
                frame.height(),
                buffer.len()
            ));
        }
        buffer.copy_from_slice(frame.data());
        self.pixels.render()?;
        Ok(())
    }

    fn resize(&mut self, surface: PhysicalSize<u32>, buffer: Option<PhysicalSize<u32>>) {
        if let Err(e) = self.pixels.resize_surface(surface.width, surface.height) {
            tracing::error!("failed to resize surface: {e}");
        }
        if let Some(buffer) = buffer {
            if let Err(e) = self.pixels.resize_buffer(buffer.width, buffer.height) {
                tracing::error!("failed to resize buffer: {e}");
            }
        }
    }
}

/// Client window: runs the tests of a session one after another on the
/// subject surface and mirrors every frame to the operator.
pub struct App {
    config: Config,
    session: Session,
    catalog: StimulusCatalog,
    client: ClientController,
    timer: HighPrecisionTimer,
    tests: &'static [TestCondition],
    next: usize,
    windowed: bool,

    subject: Option<Surface>,
    mirror: Option<Surface>,
    mirror_frames: Option<Receiver<Arc<Pixmap>>>,
    presenter: Option<SkiaPresenter<HighPrecisionTimer>>,
    runner: Option<Runner>,
    last_frame: Option<u64>,
    /// Test the operator was warned about; SPACE again starts it anyway.
    override_armed: Option<TestCondition>,
}

impl App {
    pub fn new(config: Config, session: Session, first: Option<TestCondition>, windowed: bool) -> Result<Self> {
        let tests = session.tests();
        let next = match first {
            Some(test) => {
                session.check(test)?;
                tests.iter().position(|t| *t == test).unwrap_or_default()
            }
            None => 0,
        };
        let catalog = config.build_catalog()?;
        let addr = config.control_address();
        let (link, events) =
            ControlLink::connect(&addr, CONNECT_TIMEOUT).with_context(|| format!("connecting to host {addr}"))?;

        Ok(Self {
            config,
            session,
            catalog,
            client: ClientController::new(link, events),
            timer: HighPrecisionTimer::new(),
            tests,
            next,
            windowed,
            subject: None,
            mirror: None,
            mirror_frames: None,
            presenter: None,
            runner: None,
            last_frame: None,
            override_armed: None,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        tracing::info!(
            subject = self.session.subject_id(),
            test_number = self.session.test_number(),
            "SPACE continue, Y/N answer, \u{2192} next object, P pause, S stop, ESC exit"
        );
        event_loop.run_app(&mut self)?;
        Ok(())
    }

    fn create_surfaces(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .ok_or_else(|| anyhow!("no monitor available"))?;
        let refresh_hz = monitor.refresh_rate_millihertz().map(|mhz| f64::from(mhz) / 1000.0);

        let fullscreen = self.config.platform.fullscreen && !self.windowed;
        let mut attributes = Window::default_attributes().with_title("cuex").with_resizable(!fullscreen);
        attributes = if fullscreen {
            attributes.with_fullscreen(Some(Fullscreen::Borderless(Some(monitor))))
        } else {
            attributes.with_inner_size(LogicalSize::new(1280.0, 720.0))
        };

        let subject = Surface::open(event_loop, attributes, None)?;
        let size = subject.window.inner_size();
        tracing::info!(
            width = size.width,
            height = size.height,
            scale = subject.window.scale_factor(),
            refresh_hz,
            "subject surface"
        );

        let mut presenter =
            SkiaPresenter::new(size.width, size.height, self.config.paths.font.as_deref(), self.timer.clone())?;
        if self.config.platform.mirror {
            self.mirror_frames = Some(presenter.subscribe_mirror());
            let attributes = Window::default_attributes()
                .with_title("cuex operator mirror")
                .with_inner_size(LogicalSize::new(640.0, 360.0));
            self.mirror = Some(Surface::open(event_loop, attributes, Some(size))?);
        }
        if fullscreen {
            subject.window.set_cursor_visible(false);
        }
        subject.window.request_redraw();

        self.subject = Some(subject);
        self.presenter = Some(presenter);
        self.show_idle();
        Ok(())
    }

    fn show_idle(&mut self) {
        let text = match self.tests.get(self.next) {
            Some(test) => format!("Next test: {test}\n\nPress SPACE to start."),
            None => "Session complete.\n\nPress ESC to exit.".to_string(),
        };
        self.show_message(&text);
    }

    fn show_message(&mut self, text: &str) {
        if let Some(presenter) = self.presenter.as_mut() {
            if let Err(e) = presenter.show_instruction(text) {
                tracing::error!("cannot draw operator message: {e}");
            }
        }
    }

    fn start_test(&mut self) {
        let Some(&test) = self.tests.get(self.next) else {
            tracing::info!("all tests of the session are done");
            return;
        };
        let operator_override = self.override_armed.take() == Some(test);
        match self.client.check_start(test, operator_override) {
            Ok(missing) if !missing.is_empty() => {
                tracing::warn!(%test, ?missing, "starting without every device");
            }
            Ok(_) => {}
            Err(SessionError::NotReady(missing)) => {
                tracing::warn!(%test, ?missing, "devices not ready");
                self.override_armed = Some(test);
                self.show_message(&format!(
                    "{test}\n\nNot ready: {}\n\nPress SPACE again to start anyway.",
                    missing.join(", ")
                ));
                return;
            }
            Err(e) => {
                tracing::warn!(%test, "cannot start: {e}");
                self.show_message(&format!("{test}\n\n{e}\n\nPress SPACE to retry."));
                return;
            }
        }

        let resolved = self.client.prepare(&self.catalog, test);
        let bay_order = test.uses_tactile().then(|| resolved.sequence.keys());
        let rng = StdRng::from_os_rng();
        let engine = match TrialEngine::new(self.config.engine_config(test), resolved.sequence, self.timer.clone(), rng) {
            Ok(engine) => engine,
            Err(e) => {
                tracing::error!(%test, "cannot run: {e}");
                self.show_message(&format!("{test}\n\n{e}"));
                return;
            }
        };
        let log_dir = match self.session.ensure_test_dir(test) {
            Ok(dir) => Some(dir),
            Err(e) => {
                tracing::warn!("{e}");
                None
            }
        };
        let Some(presenter) = self.presenter.take() else {
            return;
        };

        let stats = self.timer.calibration_stats();
        tracing::info!(%test, fps = stats.effective_fps, jitter_ns = stats.jitter_ns, "starting test");
        let mut runner = TrialRunner::new(engine, presenter, self.client.markers(), self.client.hooks(bay_order));
        runner.set_log_dir(log_dir);
        runner.dispatch(EngineEvent::Start);
        self.runner = Some(runner);
    }

    fn dispatch(&mut self, event: EngineEvent) {
        let Some(runner) = self.runner.as_mut() else {
            return;
        };
        runner.dispatch(event);
        let state = runner.engine().state().clone();
        if !state.is_terminal() {
            return;
        }
        if let Some(runner) = self.runner.take() {
            self.presenter = Some(runner.into_presenter());
        }
        if state == TrialState::Ended {
            self.next += 1;
        }
        self.show_idle();
    }

    fn frame(&mut self) -> Result<()> {
        let now = self.timer.now();
        if let Some(previous) = self.last_frame.replace(now) {
            let interval = Duration::from_nanos(now.saturating_sub(previous));
            self.timer.record_frame(interval);
        }

        for event in self.client.poll() {
            self.dispatch(event);
        }
        self.dispatch(EngineEvent::Tick);

        let frame = match (&self.runner, &self.presenter) {
            (Some(runner), _) => Some(runner.presenter().frame()),
            (None, Some(presenter)) => Some(presenter.frame()),
            (None, None) => None,
        };
        if let (Some(frame), Some(subject)) = (frame, self.subject.as_mut()) {
            subject.show(frame)?;
            subject.window.request_redraw();
        }

        if let (Some(frames), Some(mirror)) = (&self.mirror_frames, self.mirror.as_mut()) {
            if let Some(latest) = frames.try_iter().last() {
                if let Err(e) = mirror.show(&latest) {
                    tracing::warn!("mirror frame dropped: {e}");
                }
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: PhysicalKey, event_loop: &ActiveEventLoop) {
        let PhysicalKey::Code(code) = key else {
            return;
        };
        match code {
            KeyCode::Space if self.runner.is_none() => self.start_test(),
            KeyCode::Space => self.dispatch(EngineEvent::Space),
            KeyCode::KeyY => self.dispatch(EngineEvent::Response(Answer::Yes)),
            KeyCode::KeyN => self.dispatch(EngineEvent::Response(Answer::No)),
            KeyCode::ArrowRight => self.dispatch(EngineEvent::NextPressed),
            KeyCode::KeyP => {
                let paused = self.runner.as_ref().is_some_and(|r| r.engine().state().is_paused());
                self.dispatch(if paused { EngineEvent::Resume } else { EngineEvent::Pause });
            }
            KeyCode::KeyS => self.dispatch(EngineEvent::Stop),
            KeyCode::Escape => self.exit(event_loop),
            _ => {}
        }
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        if let Some(subject) = self.subject.as_mut() {
            subject.resize(size, Some(size));
        }
        if let Some(mirror) = self.mirror.as_mut() {
            let surface = mirror.window.inner_size();
            mirror.resize(surface, Some(size));
        }
        let presenter = match (&mut self.runner, &mut self.presenter) {
            (Some(runner), _) => Some(runner.presenter_mut()),
            (None, Some(presenter)) => Some(presenter),
            (None, None) => None,
        };
        if let Some(presenter) = presenter {
            if let Err(e) = presenter.resize(size.width, size.height) {
                tracing::error!("presenter resize failed: {e}");
            }
        }
        tracing::info!(width = size.width, height = size.height, "subject surface resized");
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        if self.runner.is_some() {
            self.dispatch(EngineEvent::Stop);
        }
        if let Some(subject) = &self.subject {
            subject.window.set_cursor_visible(true);
        }
        self.client.link().shutdown();
        tracing::info!(completed = self.next, of = self.tests.len(), "client exiting");
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.subject.is_none() {
            if let Err(e) = self.create_surfaces(event_loop) {
                tracing::error!("failed to create the subject window: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if self.mirror.as_ref().is_some_and(|m| m.id() == id) {
            match event {
                WindowEvent::CloseRequested => {
                    tracing::info!("operator mirror closed");
                    self.mirror = None;
                    self.mirror_frames = None;
                }
                WindowEvent::Resized(size) if size.width > 0 && size.height > 0 => {
                    if let Some(mirror) = self.mirror.as_mut() {
                        mirror.resize(size, None);
                    }
                }
                WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() && !event.repeat => {
                    self.handle_key(event.physical_key, event_loop);
                }
                _ => {}
            }
            return;
        }

        match event {
            WindowEvent::CloseRequested => self.exit(event_loop),
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.frame() {
                    tracing::error!("frame failed: {e:#}");
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() && !event.repeat => {
                self.handle_key(event.physical_key, event_loop);
            }
            WindowEvent::Resized(size) => self.handle_resize(size),
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(size) = self.subject.as_ref().map(|s| s.window.inner_size()) {
                    self.handle_resize(size);
                }
            }
            _ => {}
        }
    }
}
