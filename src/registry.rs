use std::{
    collections::{HashMap, HashSet, hash_map::Entry},
    sync::{
        Arc,
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    },
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    compositor::{Compositor, InventoryError},
    config::DEFAULT_REFRESH_INTERVAL,
    output::{ManagedOutput, Output, OutputSnapshot},
    scenario::Launchers,
};

/// Lifecycle transitions of an output, as seen by the registry
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// Sent the first time an output shows up in the inventory
    Added(OutputSnapshot),
    /// Sent for every later inventory pass that still lists the output, and
    /// after a command changed it
    Updated(OutputSnapshot),
    /// Sent when an output disappeared, and for every output on shutdown
    Removed(OutputSnapshot),
}

impl OutputEvent {
    pub fn snapshot(&self) -> &OutputSnapshot {
        match self {
            Self::Added(s) | Self::Updated(s) | Self::Removed(s) => s,
        }
    }
}

/// Runs on the registry thread for every event
pub type Observer = Box<dyn FnMut(&OutputEvent) + Send>;

type Job = Box<dyn FnOnce(&mut dyn Output) + Send>;

enum Request {
    Refresh,
    Apply { output: String, job: Job },
    Shutdown,
}

#[derive(Debug, Error)]
#[error("output registry is no longer running")]
pub struct RegistryClosed;

/// Sends work to the registry thread
///
/// Nothing here waits for the registry, so handles are safe to use from
/// observers and transport callbacks alike.
#[derive(Clone)]
pub struct RegistryHandle {
    requests: Sender<Request>,
}

impl RegistryHandle {
    /// Schedule an extra inventory pass
    pub fn refresh(&self) -> Result<(), RegistryClosed> {
        self.send(Request::Refresh)
    }

    /// Run `job` against the output named `output` on the registry thread
    pub fn apply<F>(&self, output: impl Into<String>, job: F) -> Result<(), RegistryClosed>
    where
        F: FnOnce(&mut dyn Output) + Send + 'static,
    {
        self.send(Request::Apply {
            output: output.into(),
            job: Box::new(job),
        })
    }

    /// Stop the timer once the current pass finished, then notify removal of
    /// every known output
    pub fn shutdown(&self) -> Result<(), RegistryClosed> {
        self.send(Request::Shutdown)
    }

    fn send(&self, request: Request) -> Result<(), RegistryClosed> {
        self.requests.send(request).map_err(|_| RegistryClosed)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub refresh_interval: Duration,
    pub launchers: Launchers,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            launchers: Launchers::default(),
        }
    }
}

/// Authoritative set of outputs, reconciled against the compositor's inventory
///
/// The registry is owned by a single thread: inventory passes, commands and
/// observer callbacks never interleave, and observers always see a fully
/// reconciled registry.
pub struct OutputRegistry<C: Compositor> {
    compositor: Arc<C>,
    launchers: Arc<Launchers>,
    interval: Duration,
    outputs: HashMap<String, ManagedOutput<C>>,
    observers: Vec<Observer>,
    requests: Receiver<Request>,
}

impl<C: Compositor> OutputRegistry<C> {
    /// Create an empty registry and a handle to send it requests
    ///
    /// Nothing is fetched until [`refresh`](Self::refresh) or
    /// [`run`](Self::run) is called.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::{sync::Arc, thread};
    ///
    /// use display_agent::{OutputRegistry, RegistryOptions, Sway};
    ///
    /// let (mut registry, handle) =
    ///     OutputRegistry::new(Arc::new(Sway::new("swaymsg")), RegistryOptions::default());
    /// registry.on_added(|output| println!("{} appeared", output.name()));
    ///
    /// let worker = thread::spawn(move || registry.run());
    /// handle.shutdown().unwrap();
    /// worker.join().unwrap();
    /// ```
    pub fn new(compositor: Arc<C>, options: RegistryOptions) -> (Self, RegistryHandle) {
        let (tx, rx) = mpsc::channel();
        let registry = OutputRegistry {
            compositor,
            launchers: Arc::new(options.launchers),
            interval: options.refresh_interval,
            outputs: HashMap::new(),
            observers: Vec::new(),
            requests: rx,
        };
        (registry, RegistryHandle { requests: tx })
    }

    /// Register an observer for every event, in registration order
    pub fn subscribe(&mut self, observer: impl FnMut(&OutputEvent) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn on_added(&mut self, mut f: impl FnMut(&OutputSnapshot) + Send + 'static) {
        self.subscribe(move |event| {
            if let OutputEvent::Added(snapshot) = event {
                f(snapshot)
            }
        });
    }

    pub fn on_updated(&mut self, mut f: impl FnMut(&OutputSnapshot) + Send + 'static) {
        self.subscribe(move |event| {
            if let OutputEvent::Updated(snapshot) = event {
                f(snapshot)
            }
        });
    }

    pub fn on_removed(&mut self, mut f: impl FnMut(&OutputSnapshot) + Send + 'static) {
        self.subscribe(move |event| {
            if let OutputEvent::Removed(snapshot) = event {
                f(snapshot)
            }
        });
    }

    /// Names of all known outputs, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.outputs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<OutputSnapshot> {
        self.outputs.get(name).map(|o| o.snapshot())
    }

    /// Run one reconciliation pass
    ///
    /// Outputs new to the inventory are added, known ones are overwritten
    /// (keeping their scenario) and vanished ones are removed, in that order.
    /// A failed fetch leaves the registry untouched.
    pub fn refresh(&mut self) -> Result<(), InventoryError> {
        let records = self.compositor.outputs()?;
        debug!("inventory lists {} outputs", records.len());

        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            if !seen.insert(record.name.clone()) {
                warn!("{}: listed twice in inventory, ignoring duplicate", record.name);
                continue;
            }

            match self.outputs.entry(record.name.clone()) {
                Entry::Occupied(mut entry) => {
                    let output = entry.get_mut();
                    output.update(record);
                    notify(&mut self.observers, &OutputEvent::Updated(output.snapshot()));
                }
                Entry::Vacant(entry) => {
                    info!("{}: output added", record.name);
                    let output = entry.insert(ManagedOutput::new(
                        Arc::clone(&self.compositor),
                        Arc::clone(&self.launchers),
                        record,
                    ));
                    notify(&mut self.observers, &OutputEvent::Added(output.snapshot()));
                }
            }
        }

        let mut gone: Vec<String> = self
            .outputs
            .keys()
            .filter(|name| !seen.contains(*name))
            .cloned()
            .collect();
        gone.sort();
        for name in gone {
            if let Some(output) = self.outputs.remove(&name) {
                info!("{}: output removed", name);
                notify(&mut self.observers, &OutputEvent::Removed(output.snapshot()));
            }
        }

        Ok(())
    }

    /// Run `job` against the named output; an `Updated` event follows if the
    /// job changed it
    ///
    /// Returns `false` if no such output is known.
    pub fn apply(&mut self, name: &str, job: impl FnOnce(&mut dyn Output)) -> bool {
        let output: &mut dyn Output = match self.outputs.get_mut(name) {
            Some(output) => output,
            None => {
                warn!("{}: no such output, dropping command", name);
                return false;
            }
        };

        let before = output.snapshot();
        job(&mut *output);
        let after = output.snapshot();
        if after != before {
            notify(&mut self.observers, &OutputEvent::Updated(after));
        }
        true
    }

    /// Notify removal of every known output without forgetting any of them
    pub fn teardown(&mut self) {
        for name in self.names() {
            if let Some(output) = self.outputs.get(&name) {
                debug!("{}: calling cleanup handlers", name);
                let event = OutputEvent::Removed(output.snapshot());
                notify(&mut self.observers, &event);
            }
        }
    }

    /// Handle every queued request without waiting
    ///
    /// Returns `false` once shutdown was requested or every handle is gone.
    pub fn process_pending(&mut self) -> bool {
        loop {
            match self.requests.try_recv() {
                Ok(request) => {
                    if !self.handle(request) {
                        return false;
                    }
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Reconcile every `refresh_interval` and serve requests in between,
    /// until shutdown
    ///
    /// Ticks missed while a pass or command ran long are dropped, not
    /// queued. On exit every known output is reported as removed.
    pub fn run(mut self) {
        info!("output registry started, refreshing every {:?}", self.interval);
        let mut next_tick = Instant::now();

        loop {
            let now = Instant::now();
            if now >= next_tick {
                self.refresh_logged();
                next_tick = next_deadline(next_tick, self.interval, Instant::now());
                continue;
            }

            match self.requests.recv_timeout(next_tick - now) {
                Ok(request) => {
                    if !self.handle(request) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!("output registry stopping");
        self.teardown();
    }

    fn handle(&mut self, request: Request) -> bool {
        match request {
            Request::Refresh => self.refresh_logged(),
            Request::Apply { output, job } => {
                self.apply(&output, job);
            }
            Request::Shutdown => return false,
        }
        true
    }

    fn refresh_logged(&mut self) {
        if let Err(e) = self.refresh() {
            error!("failed to refresh outputs: {}", e);
        }
    }
}

fn notify(observers: &mut [Observer], event: &OutputEvent) {
    for observer in observers.iter_mut() {
        observer(event);
    }
}

/// First tick after `now` on the grid `previous + k * interval`
fn next_deadline(previous: Instant, interval: Duration, now: Instant) -> Instant {
    let next = previous + interval;
    if next > now || interval.is_zero() {
        return next.max(now);
    }
    let missed = now.duration_since(previous).as_nanos() / interval.as_nanos();
    debug!("refresh overran, dropping {} ticks", missed - 1);
    previous + interval * (missed as u32 + 1)
}
