mod app;
mod audio;
mod audio_stats;
mod config;
mod frame;
mod frame_stats;
mod gpu;
mod input;

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use winit::event_loop::EventLoop;

use app::App;
use config::Config;

fn main() -> ExitCode {
    let config = Config::load();
    let log_file = config.as_ref().ok().and_then(|c| c.log_file.clone());
    // Flushes buffered log lines when main returns.
    let _guard = init_tracing(log_file.as_deref());

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            show_fatal(&e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: anyhow::Result<Config>) -> anyhow::Result<()> {
    let config = config.context("loading configuration")?;
    let mut app = App::new(config)?;

    let event_loop = EventLoop::new().context("creating the event loop")?;
    event_loop
        .run_app(&mut app)
        .context("running the event loop")?;

    match app.take_fatal() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn init_tracing(log_file: Option<&Path>) -> WorkerGuard {
    let (file, file_error) = match log_file.map(open_log_file) {
        Some(Ok(appender)) => (Some(appender), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };
    let ansi = file.is_none();
    let (writer, guard) = match file {
        Some(appender) => tracing_appender::non_blocking(appender),
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(ansi)
        .init();

    if let (Some(path), Some(e)) = (log_file, file_error) {
        tracing::warn!("cannot log to {}: {e}; using stderr", path.display());
    }
    guard
}

fn open_log_file(
    path: &Path,
) -> Result<RollingFileAppender, tracing_appender::rolling::InitError> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .map_or_else(|| "handmade.log".into(), |n| n.to_string_lossy().into_owned());
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
}

fn show_fatal(error: &anyhow::Error) {
    rfd::MessageDialog::new()
        .set_level(rfd::MessageLevel::Error)
        .set_title("Handmade")
        .set_description(format!("{error:#}"))
        .set_buttons(rfd::MessageButtons::Ok)
        .show();
}
