use std::path::Path;
use std::time::Duration;

use strata_core::command::CancelToken;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::archive::Archive;
use crate::cmd::tick::Engine;

pub fn run(root: &Path, interval: Option<u64>) -> anyhow::Result<()> {
    let archive = Archive::open(root)?;
    let period = Duration::from_secs(
        interval
            .unwrap_or(archive.config.scheduler.poll_interval_secs)
            .max(1),
    );
    let engine = Engine::new(&archive);
    let cancel = CancelToken::new();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal.cancel();
                let _ = stop_tx.send(());
            }
        });

        info!(worker = %engine.worker_id, period_secs = period.as_secs(), "strata worker started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    let outcome = tokio::task::block_in_place(|| engine.tick(&archive, &cancel));
                    if let Err(e) = outcome {
                        error!(error = %format!("{e:#}"), "tick failed");
                    }
                    if cancel.is_cancelled() {
                        break;
                    }
                }
            }
        }
        info!("strata worker stopped");
        Ok(())
    })
}
