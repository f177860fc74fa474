use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use handmade_core::{GameState, PixelSurface, Presenter, ToneGenerator};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow};
use winit::keyboard::{KeyCode, ModifiersState, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowId};

use crate::audio::SoundOutput;
use crate::audio_stats::AudioStats;
use crate::config::Config;
use crate::frame::{FramePacer, FrameState};
use crate::frame_stats::FrameStats;
use crate::gpu::GpuState;
use crate::input::InputState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GlobalAction {
    Quit,
    ToggleFullscreen,
    ToggleScaleMode,
    ToggleWaveform,
}

fn check_global_shortcut(event: &WindowEvent, modifiers: ModifiersState) -> Option<GlobalAction> {
    let WindowEvent::KeyboardInput {
        event:
            KeyEvent {
                physical_key: PhysicalKey::Code(key_code),
                state: ElementState::Pressed,
                repeat: false,
                ..
            },
        ..
    } = event
    else {
        return None;
    };
    shortcut_for(*key_code, modifiers)
}

fn shortcut_for(key_code: KeyCode, modifiers: ModifiersState) -> Option<GlobalAction> {
    let command = modifiers.control_key() || modifiers.super_key();
    match key_code {
        KeyCode::Escape => Some(GlobalAction::Quit),
        KeyCode::F4 if modifiers.alt_key() => Some(GlobalAction::Quit),
        KeyCode::F11 => Some(GlobalAction::ToggleFullscreen),
        KeyCode::KeyF if command => Some(GlobalAction::ToggleFullscreen),
        KeyCode::Tab => Some(GlobalAction::ToggleScaleMode),
        KeyCode::KeyT if command => Some(GlobalAction::ToggleWaveform),
        _ => None,
    }
}

/// Fallback frame interval when the monitor refresh rate can't be queried.
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_micros(16_667); // 60 Hz

pub struct App {
    // GPU surface must be dropped before the window it references.
    gpu: Option<GpuState>,
    window: Option<Arc<Window>>,
    frame: FrameState,
    config: Config,
    modifiers: ModifiersState,
    pacer: FramePacer,
    fatal: Option<anyhow::Error>,
}

impl App {
    /// Allocate the back buffer and open audio. A back buffer that cannot be
    /// allocated at startup is fatal; missing audio is not.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let back_buffer = PixelSurface::new(config.surface.width, config.surface.height)
            .context("allocating the back buffer")?;

        let audio_stats = AudioStats::new();
        let sound = match SoundOutput::open(&config.audio, audio_stats.clone()) {
            Ok(sound) => Some(sound),
            Err(e) => {
                tracing::warn!("audio disabled: {e}");
                None
            }
        };

        let sample_rate = sound
            .as_ref()
            .map_or(config.audio.sample_rate, |s| s.device().sample_rate());
        let tone = ToneGenerator::new(
            sample_rate,
            config.audio.tone_hz,
            config.audio.volume,
            config.audio.waveform,
        );

        let frame_interval = config
            .frame
            .target_fps
            .map_or(DEFAULT_FRAME_INTERVAL, |fps| Duration::from_secs_f64(1.0 / fps));

        let now = Instant::now();
        Ok(Self {
            gpu: None,
            window: None,
            frame: FrameState {
                back_buffer,
                game: GameState::new(tone),
                presenter: Presenter::new(config.window.scale_mode),
                input: InputState::new(),
                sound,
                audio_stats,
                stats: FrameStats::new(now),
            },
            config,
            modifiers: ModifiersState::empty(),
            pacer: FramePacer::new(frame_interval, now),
            fatal: None,
        })
    }

    /// The error that stopped the event loop, if any.
    pub fn take_fatal(&mut self) -> Option<anyhow::Error> {
        self.fatal.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        tracing::error!("{error:#}");
        self.fatal = Some(error);
        event_loop.exit();
    }

    fn create_window(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.config.window.title.clone())
            .with_inner_size(LogicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .context("creating the window")?,
        );

        // Pace to the monitor's refresh rate unless a rate was configured;
        // vsync alone doesn't block reliably on every compositor.
        if self.config.frame.target_fps.is_none()
            && let Some(monitor) = window.current_monitor()
            && let Some(millihertz) = monitor.refresh_rate_millihertz()
        {
            let micros = 1_000_000_000 / u64::from(millihertz);
            self.pacer.set_interval(Duration::from_micros(micros));
            tracing::info!(
                "Monitor refresh rate: {:.1} Hz (frame interval: {:.2} ms)",
                f64::from(millihertz) / 1000.0,
                micros as f64 / 1000.0,
            );
        }

        let gpu = GpuState::new(window.clone()).context("initializing the GPU")?;

        if self.config.surface.follow_window {
            let size = window.inner_size();
            let size = gpu.fit(size.width, size.height);
            self.frame.resize_back_buffer(size.width, size.height);
        }

        self.window = Some(window);
        self.gpu = Some(gpu);
        Ok(())
    }

    fn run_action(&mut self, action: GlobalAction, event_loop: &ActiveEventLoop) {
        match action {
            GlobalAction::Quit => event_loop.exit(),
            GlobalAction::ToggleFullscreen => {
                if let Some(window) = &self.window {
                    if window.fullscreen().is_some() {
                        window.set_fullscreen(None);
                    } else {
                        window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                    }
                }
            }
            GlobalAction::ToggleScaleMode => {
                let presenter = &mut self.frame.presenter;
                presenter.mode = presenter.mode.toggled();
                tracing::info!("scale mode: {}", presenter.mode);
            }
            GlobalAction::ToggleWaveform => {
                let tone = &mut self.frame.game.tone;
                tone.set_waveform(tone.waveform().toggled());
                tracing::info!("waveform: {}", tone.waveform());
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.create_window(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if !self.window.as_ref().is_some_and(|w| w.id() == window_id) {
            return;
        }

        if let Some(action) = check_global_shortcut(&event, self.modifiers) {
            self.run_action(action, event_loop);
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                let Some(gpu) = &mut self.gpu else { return };
                gpu.resize(size.width, size.height);
                if self.config.surface.follow_window {
                    let size = gpu.fit(size.width, size.height);
                    self.frame.resize_back_buffer(size.width, size.height);
                }
            }
            WindowEvent::Focused(false) => {
                self.frame.input.release_all();
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                self.modifiers = modifiers.state();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state,
                        ..
                    },
                ..
            } => {
                self.frame
                    .input
                    .handle_key(key_code, state == ElementState::Pressed);
            }
            WindowEvent::RedrawRequested => {
                let Some(window) = &self.window else { return };
                let Some(gpu) = &mut self.gpu else { return };

                let size = window.inner_size();
                let extent = gpu.fit(size.width, size.height);
                self.frame.present(gpu, extent);

                if gpu.out_of_memory() {
                    tracing::error!("GPU out of memory");
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    // Hidden and minimized windows stop getting redraws, so the game and
    // the audio pump run here and redraws only present.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window
            && self.pacer.poll(Instant::now())
        {
            self.frame.update();
            window.request_redraw();
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.pacer.deadline()));
    }
}
