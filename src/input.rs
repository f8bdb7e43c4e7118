use anyhow::{Context, Result};
use std::io::BufRead;
use tokio::sync::mpsc;

/// Watch stdin for the mic toggle on a dedicated thread.
///
/// Every line (pressing Enter) counts as one tap of the mic button and sends
/// `()` on the channel. Typing `q` or closing stdin drops the sender.
pub fn spawn_toggle_reader(tx: mpsc::Sender<()>) {
    tracing::info!("Press Enter to start/stop recording, q to quit");

    std::thread::spawn(move || {
        if let Err(e) = read_toggles(std::io::stdin().lock(), &tx) {
            tracing::error!("Toggle input failed: {:#}", e);
        }
    });
}

fn read_toggles(input: impl BufRead, tx: &mpsc::Sender<()>) -> Result<()> {
    for line in input.lines() {
        let line = line.context("Failed to read from stdin")?;

        if line.trim().eq_ignore_ascii_case("q") {
            tracing::debug!("Quit requested");
            break;
        }

        tracing::debug!("Toggle activated");
        if tx.blocking_send(()).is_err() {
            break;
        }
    }

    Ok(())
}
