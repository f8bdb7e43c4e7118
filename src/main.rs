mod app;
mod audio;
mod channel;
mod config;
mod console;
mod input;
mod messages;
mod playback;
mod services;
mod session;
mod status;

use app::App;
use config::Config;

use anyhow::Result;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout belongs to the console
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    tracing::info!("Starting parley voice client");

    let config = Config::load()?;
    config.validate()?;

    // Create LocalSet for !Send futures (needed for Recorder which holds cpal::Stream)
    let local = tokio::task::LocalSet::new();

    local
        .run_until(async move {
            let (ui_tx, ui_rx) = mpsc::unbounded_channel();
            let console = tokio::task::spawn_local(console::render(ui_rx));

            let result = match App::new(config, ui_tx).await {
                Ok(app) => app.run().await,
                Err(e) => Err(e),
            };

            // The app owned the last UI sender, so the console drains and exits
            if let Err(e) = console.await {
                tracing::warn!("Console task failed: {}", e);
            }

            tracing::info!("Parley shutdown complete");
            result
        })
        .await
}
