//! macrotap - system-wide keyboard macro recorder and player
//!
//! Installs the keyboard event tap and runs the main event loop until
//! interrupted. Command+R begins a recording, Command+S ends it (or cancels
//! playback), Command+P replays the last recording with original timing.

#[cfg(target_os = "macos")]
fn main() -> anyhow::Result<()> {
    use anyhow::Context;
    use macrotap::capture::event_tap::{EventTap, HidEventSink};
    use macrotap::engine::Engine;
    use macrotap::time::timebase::Timebase;
    use std::sync::Arc;
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    Timebase::init();

    let engine = Engine::new(Arc::new(HidEventSink));
    let mut tap = EventTap::begin(engine)
        .context("cannot establish the event interception capability")?;

    ctrlc::set_handler(EventTap::stop_main_loop)
        .context("failed to install the interrupt handler")?;

    tracing::info!("ready: Command+R records, Command+P plays, Command+S stops");
    tap.run();
    tap.end();

    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!("macrotap requires the macOS Quartz event tap and does not run on this platform");
}
