//! Dispatch gate: the single entry point between a BLE backend and the
//! application.
//!
//! [`Router`] is the discovery handler. It runs the advertisement filter and
//! hands decoded readings to the application callback, or passes the
//! advertisement on to an optional fallback handler so several vendor
//! handlers can be chained.
//!
//! [`DispatchGate`] owns one router plus the adapter lifecycle: it opens a
//! backend, starts a duplicate-tolerant passive scan whenever the adapter is
//! powered on, stops scanning on any other state, and releases the adapter
//! on [`DispatchGate::stop`].
//!
//! Readings may be delivered from any task. Callbacks must be `Send + Sync`
//! and must not assume single-threaded delivery; see
//! [`crate::dedup::SequenceFilter`] for suppressing repeated payloads.

use crate::filter::{Target, filter};
use crate::reading::Reading;
use crate::scanner::{
    AdapterState, Advertisement, Backend, Central, Connection, ScanError, ScanEvent, Scanner,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type ReadingCallback = Box<dyn Fn(Reading) + Send + Sync>;
type FallbackCallback = Box<dyn Fn(&Advertisement) + Send + Sync>;

/// Filters advertisements for one target and dispatches the outcome.
pub struct Router {
    target: Target,
    on_reading: ReadingCallback,
    fallback: Option<FallbackCallback>,
}

impl Router {
    pub fn new<F>(target: Target, on_reading: F) -> Self
    where
        F: Fn(Reading) + Send + Sync + 'static,
    {
        Self {
            target,
            on_reading: Box::new(on_reading),
            fallback: None,
        }
    }

    /// Pass advertisements that are not readings for this target to `fallback`.
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&Advertisement) + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(fallback));
        self
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Handle one discovery event.
    pub fn handle(&self, advertisement: &Advertisement) {
        match filter(advertisement, &self.target) {
            Ok(reading) => (self.on_reading)(reading),
            Err(reason) => {
                tracing::trace!(address = %advertisement.address, %reason, "advertisement not handled");
                if let Some(fallback) = &self.fallback {
                    fallback(advertisement);
                }
            }
        }
    }
}

/// Apply an adapter power state change to `central`.
///
/// Powered on starts a scan that keeps duplicates: repeated payloads are
/// suppressed per device by sequence number, not by the radio. Every other
/// state stops scanning.
pub async fn on_state_changed(
    central: &mut dyn Central,
    state: AdapterState,
) -> Result<(), ScanError> {
    match state {
        AdapterState::PoweredOn => central.scan(true).await,
        AdapterState::PoweredOff
        | AdapterState::Resetting
        | AdapterState::Unauthorized
        | AdapterState::Unsupported
        | AdapterState::Unknown => central.stop_scanning().await,
    }
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ScanError>>,
}

/// A WxBeacon2 listener bound to one router.
///
/// Target and callbacks are fixed at construction, so independent gates can
/// run side by side.
pub struct DispatchGate {
    router: Arc<Router>,
    running: Option<Running>,
}

impl DispatchGate {
    pub fn new<F>(target: Target, on_reading: F) -> Self
    where
        F: Fn(Reading) + Send + Sync + 'static,
    {
        Self::from_router(Router::new(target, on_reading))
    }

    /// Like [`DispatchGate::new`], passing rejected advertisements to `fallback`.
    pub fn with_fallback<F, G>(target: Target, on_reading: F, fallback: G) -> Self
    where
        F: Fn(Reading) + Send + Sync + 'static,
        G: Fn(&Advertisement) + Send + Sync + 'static,
    {
        Self::from_router(Router::new(target, on_reading).with_fallback(fallback))
    }

    pub fn from_router(router: Router) -> Self {
        Self {
            router: Arc::new(router),
            running: None,
        }
    }

    /// The discovery handler, for registering with a BLE stack directly.
    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Open `backend` through `scanner` and start dispatching its events.
    ///
    /// # Errors
    /// Returns `ScanError::AlreadyStarted` if the gate is running, or the
    /// backend's error if the adapter cannot be initialized.
    pub async fn start(&mut self, scanner: &dyn Scanner, backend: Backend) -> Result<(), ScanError> {
        if self.running.is_some() {
            return Err(ScanError::AlreadyStarted);
        }

        let Connection { central, events } = scanner.open(backend).await?;
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_events(
            Arc::clone(&self.router),
            central,
            events,
            shutdown_rx,
        ));

        tracing::info!(%backend, target = ?self.router.target(), "listening for WxBeacon2 advertisements");
        self.running = Some(Running { shutdown, task });
        Ok(())
    }

    /// Stop scanning and release the adapter.
    ///
    /// # Errors
    /// Returns `ScanError::NotInitialized` if the gate was never started or
    /// has already been stopped, otherwise the result of releasing the adapter.
    pub async fn stop(&mut self) -> Result<(), ScanError> {
        let Running { shutdown, task } = self.running.take().ok_or(ScanError::NotInitialized)?;
        // The task may already have finished on its own
        let _ = shutdown.send(());
        let result = join(task).await;
        tracing::info!("stopped listening");
        result
    }

    /// Wait until the backend closes its event stream or the adapter fails
    /// to start scanning.
    ///
    /// Cancel-safe: dropping the future leaves the gate running.
    ///
    /// # Errors
    /// Returns `ScanError::NotInitialized` if the gate is not running, the
    /// scan error of a powered adapter, otherwise the result of releasing
    /// the adapter.
    pub async fn wait(&mut self) -> Result<(), ScanError> {
        let running = self.running.as_mut().ok_or(ScanError::NotInitialized)?;
        let result = (&mut running.task).await;
        self.running = None;
        flatten(result)
    }
}

async fn join(task: JoinHandle<Result<(), ScanError>>) -> Result<(), ScanError> {
    flatten(task.await)
}

fn flatten(
    result: Result<Result<(), ScanError>, tokio::task::JoinError>,
) -> Result<(), ScanError> {
    result.map_err(|e| ScanError::Bluetooth(format!("event task failed: {e}")))?
}

async fn run_events(
    router: Arc<Router>,
    mut central: Box<dyn Central>,
    mut events: mpsc::Receiver<ScanEvent>,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<(), ScanError> {
    let result = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            event = events.recv() => match event {
                Some(ScanEvent::StateChanged(state)) => {
                    tracing::debug!(?state, "adapter state changed");
                    match on_state_changed(central.as_mut(), state).await {
                        Ok(()) => {}
                        // A powered adapter that cannot scan never delivers readings
                        Err(error) if state == AdapterState::PoweredOn => break Err(error),
                        Err(error) => tracing::warn!(?state, %error, "cannot apply adapter state"),
                    }
                }
                Some(ScanEvent::Discovered(advertisement)) => router.handle(&advertisement),
                None => break Ok(()),
            },
        }
    };

    let stopped = central.stop().await;
    if let (Err(_), Err(error)) = (&result, &stopped) {
        tracing::warn!(%error, "cannot release adapter");
    }
    result.and(stopped)
}
