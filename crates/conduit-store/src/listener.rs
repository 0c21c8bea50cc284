use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use strum::IntoEnumIterator;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    error::StoreError,
    event::{ConfigChangeEvent, ResourceKind},
};

/// Subscriber to config change events
///
/// Each event is delivered on its own task, so a slow handler never stalls
/// the listener loop. Handlers report their own failures.
#[async_trait]
pub trait ChangeHandler: Send + Sync + 'static {
    async fn handle(&self, event: ConfigChangeEvent);
}

/// Raw notification feed
#[async_trait]
pub trait NotificationSource: Send + 'static {
    /// Open or reopen the subscription
    async fn connect(&mut self) -> Result<(), StoreError>;

    /// Wait for the next payload
    ///
    /// `Ok(None)` means the connection was lost and must be reopened.
    async fn recv(&mut self) -> Result<Option<String>, StoreError>;
}

/// Exponential reconnect delay with jitter
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    /// Delay before reconnect attempt `attempt` (zero-based)
    ///
    /// Doubles from `initial` up to `max`, then picks uniformly from the
    /// upper half of that value.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(16));
        let capped = self.initial.saturating_mul(factor).min(self.max);
        let half = capped / 2;

        half + half.mul_f64(rand::random::<f64>())
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// Long-lived change notification subscription
pub struct ChangeListener {
    handlers: Vec<Arc<dyn ChangeHandler>>,
    backoff: Backoff,
}

impl ChangeListener {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            handlers: Vec::new(),
            backoff,
        }
    }

    /// Register a handler for every subsequent event
    pub fn subscribe(&mut self, handler: Arc<dyn ChangeHandler>) {
        self.handlers.push(handler);
    }

    /// Start the listener loop on a background task
    pub fn spawn<S: NotificationSource>(self, source: S) -> ListenerHandle {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.run(source, shutdown.clone()));

        ListenerHandle {
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run<S: NotificationSource>(self, mut source: S, shutdown: CancellationToken) {
        let mut attempt = 0_u32;
        let mut resync = false;

        loop {
            let connected = tokio::select! {
                () = shutdown.cancelled() => return,
                result = source.connect() => result,
            };

            match connected {
                Ok(()) => {
                    attempt = 0;

                    if resync {
                        tracing::info!("change listener reconnected, forcing full reload");
                        for kind in ResourceKind::iter() {
                            self.dispatch(ConfigChangeEvent::reload(kind));
                        }
                        resync = false;
                    }

                    self.receive(&mut source, &shutdown).await;

                    if shutdown.is_cancelled() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "change listener failed to connect");
                }
            }

            resync = true;

            let delay = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);

            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Deliver notifications until the connection drops or shutdown
    async fn receive<S: NotificationSource>(&self, source: &mut S, shutdown: &CancellationToken) {
        loop {
            let next = tokio::select! {
                () = shutdown.cancelled() => return,
                result = source.recv() => result,
            };

            match next {
                Ok(Some(payload)) => match payload.parse::<ConfigChangeEvent>() {
                    Ok(event) => self.dispatch(event),
                    Err(e) => tracing::warn!(error = %e, "ignoring change notification"),
                },
                Ok(None) => {
                    tracing::warn!("change listener connection lost");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "change listener receive failed");
                    return;
                }
            }
        }
    }

    fn dispatch(&self, event: ConfigChangeEvent) {
        for handler in &self.handlers {
            let handler = Arc::clone(handler);
            tokio::spawn(async move { handler.handle(event).await });
        }
    }
}

/// Control handle for a running [`ChangeListener`]
pub struct ListenerHandle {
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerHandle {
    /// Cancel the subscription and wait for the loop to exit
    ///
    /// Safe to call more than once.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        if let Some(task) = self.task.lock().await.take()
            && let Err(e) = task.await
        {
            tracing::error!(error = %e, "change listener task failed");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
