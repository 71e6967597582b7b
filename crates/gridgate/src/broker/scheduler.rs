use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;

/// Owns the periodic tasks of the broker. They run until [`Scheduler::stop`] is called.
pub struct Scheduler {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns the job monitor and the list refresher onto the current `LocalSet`.
    pub fn start(broker: &Broker) -> Self {
        let token = CancellationToken::new();

        let monitor = {
            let broker = broker.clone();
            let config = broker.config.clone();
            run_periodically(
                "job monitor",
                token.clone(),
                false,
                move || config.get().config().monitor_poll_interval(),
                move || {
                    let broker = broker.clone();
                    async move { broker.poll_jobs(Utc::now()).await }
                },
            )
        };
        let lists = {
            let broker = broker.clone();
            let config = broker.config.clone();
            run_periodically(
                "list refresher",
                token.clone(),
                true,
                move || config.get().config().list_refresh_interval(),
                move || {
                    let broker = broker.clone();
                    async move { broker.refresh_lists().await }
                },
            )
        };

        Self {
            token,
            handles: vec![
                tokio::task::spawn_local(monitor),
                tokio::task::spawn_local(lists),
            ],
        }
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Stops the periodic tasks. A tick that is in progress is allowed to finish.
    pub async fn stop(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(error) = handle.await {
                log::error!("Periodic task failed: {error}");
            }
        }
        log::debug!("Scheduler stopped");
    }
}

/// Runs `tick` repeatedly, sleeping for `interval()` between ticks.
async fn run_periodically<I, T, Fut>(
    name: &'static str,
    token: CancellationToken,
    tick_first: bool,
    interval: I,
    mut tick: T,
) where
    I: Fn() -> Duration,
    T: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    log::debug!("Starting {name}");
    if tick_first {
        tick().await;
    }
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval()) => tick().await,
        }
    }
    log::debug!("Stopped {name}");
}
