//! Connection tracker
// (c) 2024 the OpenSPA developers

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::Utc;
use tokio::{
    sync::{oneshot, Mutex},
    task::AbortHandle,
};
use tracing::{debug, error, info, trace, warn};

use super::{Error, Extension, FirewallTrigger, Host, HostHistory, StuckConnection};

/// Settling time after shutdown removes every rule, before reporting completion
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct Connection {
    host: Host,
    timer: AbortHandle,
    /// Identifies the live timer; a timer whose generation no longer matches is stale
    generation: u64,
    extensions: Vec<Extension>,
}

#[derive(Debug)]
struct State {
    connections: HashMap<String, Connection>,
    accept_new: bool,
    history: Vec<HostHistory>,
    stuck: Vec<StuckConnection>,
    generation: u64,
}

impl State {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

/// Outcome of [`Tracker::admit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A new connection was created with this id
    Added(String),
    /// An existing connection for the same rule was extended
    Extended(String),
}

impl Admission {
    /// The connection id either way
    #[must_use]
    pub fn connection_id(&self) -> &str {
        match self {
            Admission::Added(id) | Admission::Extended(id) => id,
        }
    }
}

/// Summary of a completed shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connections removed cleanly over the tracker's lifetime
    pub unique_connections: usize,
    /// Connections whose rules may still be in the firewall
    pub stuck: usize,
}

/// The live set of firewall grants and their expiration timers.
///
/// All state sits behind a single mutex. Triggers are invoked with the mutex held.
#[derive(Debug)]
pub struct Tracker {
    state: Mutex<State>,
    trigger: Arc<dyn FirewallTrigger>,
    /// Timers hold this rather than a strong reference, so a dropped tracker stops them
    me: Weak<Tracker>,
}

impl Tracker {
    /// Creates a tracker that accepts new connections
    pub fn new(trigger: Arc<dyn FirewallTrigger>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            state: Mutex::new(State {
                connections: HashMap::new(),
                accept_new: true,
                history: Vec::new(),
                stuck: Vec::new(),
                generation: 0,
            }),
            trigger,
            me: me.clone(),
        })
    }

    /// Admits a new connection: runs the addition trigger, then starts the expiration timer.
    ///
    /// Rejected if the tracker is shutting down or `id` is already live.
    /// If the trigger fails nothing is recorded.
    pub async fn add_host(&self, id: &str, host: Host) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        self.add_locked(&mut state, id, host).await
    }

    /// Removes a connection: runs the expiration trigger and stops the timer.
    ///
    /// On trigger failure the connection is still dropped, but recorded as stuck.
    pub async fn remove_host(&self, id: &str) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        self.remove_locked(&mut state, id, true).await
    }

    /// Restarts a connection's timer with a new horizon of `duration` from now
    pub async fn extend(&self, id: &str, duration: Duration) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        self.extend_locked(&mut state, id, duration)
    }

    /// Extends the live connection for the same rule as `host`, if there is one;
    /// otherwise adds a new connection with a fresh id
    pub async fn admit(&self, host: Host) -> Result<Admission, Error> {
        let mut state = self.state.lock().await;
        let existing = state
            .connections
            .iter()
            .find(|(_, c)| c.host.same_rule(&host))
            .map(|(id, _)| id.clone());
        if let Some(id) = existing {
            self.extend_locked(&mut state, &id, host.duration)?;
            Ok(Admission::Extended(id))
        } else {
            let id = uuid::Uuid::new_v4().to_string();
            self.add_locked(&mut state, &id, host).await?;
            Ok(Admission::Added(id))
        }
    }

    async fn add_locked(&self, state: &mut State, id: &str, host: Host) -> Result<(), Error> {
        if !state.accept_new {
            return Err(Error::Rejected("not accepting new connections".into()));
        }
        if state.connections.contains_key(id) {
            return Err(Error::Rejected(format!("connection {id} already exists")));
        }
        if let Err(e) = self.trigger.addition(id, &host).await {
            error!(connection_id = id, "failed to add firewall rule for {host}: {e:#}");
            return Err(Error::Trigger(format!("{e:#}")));
        }
        let generation = state.next_generation();
        let timer = self.schedule(id, generation, host.duration);
        info!(
            connection_id = id,
            "opened {host} for {}s",
            host.duration.as_secs()
        );
        let _ = state.connections.insert(
            id.to_owned(),
            Connection {
                host,
                timer,
                generation,
                extensions: Vec::new(),
            },
        );
        Ok(())
    }

    /// Removal with the lock already held.
    /// The timer path passes `cancel_timer = false`; a task must not abort itself.
    async fn remove_locked(
        &self,
        state: &mut State,
        id: &str,
        cancel_timer: bool,
    ) -> Result<(), Error> {
        let Some(connection) = state.connections.remove(id) else {
            return Err(Error::UnknownConnection(id.to_owned()));
        };
        if cancel_timer {
            connection.timer.abort();
        }
        let Connection {
            host, extensions, ..
        } = connection;
        match self.trigger.expiration(id, &host).await {
            Ok(()) => {
                info!(connection_id = id, "closed {host}");
                state.history.push(HostHistory {
                    connection_id: id.to_owned(),
                    host,
                    revoked: Utc::now(),
                    extensions,
                });
                Ok(())
            }
            Err(e) => {
                let reason = format!("{e:#}");
                error!(
                    connection_id = id,
                    "failed to remove firewall rule for {host}, client might have permanent access: {reason}"
                );
                state.stuck.push(StuckConnection {
                    connection_id: id.to_owned(),
                    host,
                    since: Utc::now(),
                    extensions,
                    error: reason.clone(),
                });
                Err(Error::Stuck(reason))
            }
        }
    }

    fn extend_locked(&self, state: &mut State, id: &str, duration: Duration) -> Result<(), Error> {
        let generation = state.next_generation();
        let connection = state
            .connections
            .get_mut(id)
            .ok_or_else(|| Error::UnknownConnection(id.to_owned()))?;
        connection.timer.abort();
        connection.timer = self.schedule(id, generation, duration);
        connection.generation = generation;
        connection.extensions.push(Extension {
            extended_at: Utc::now(),
            duration,
        });
        info!(
            connection_id = id,
            "extended {} by {}s",
            connection.host,
            duration.as_secs()
        );
        Ok(())
    }

    fn schedule(&self, id: &str, generation: u64, after: Duration) -> AbortHandle {
        let me = self.me.clone();
        let id = id.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tracker) = me.upgrade() {
                tracker.expire(&id, generation).await;
            }
        })
        .abort_handle()
    }

    async fn expire(&self, id: &str, generation: u64) {
        let mut state = self.state.lock().await;
        match state.connections.get(id) {
            Some(c) if c.generation == generation => (),
            _ => {
                trace!(connection_id = id, "stale timer");
                return;
            }
        }
        debug!(connection_id = id, "expired");
        if let Err(e) = self.remove_locked(&mut state, id, false).await {
            warn!(connection_id = id, "expiry: {e}");
        }
    }

    /// Stops admitting, removes every live connection, then waits [`SHUTDOWN_DRAIN`]
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut state = self.state.lock().await;
        state.accept_new = false;
        let ids: Vec<String> = state.connections.keys().cloned().collect();
        for id in ids {
            match self.remove_locked(&mut state, &id, true).await {
                Ok(()) => debug!(connection_id = %id, "removed on shutdown"),
                Err(e) => error!(connection_id = %id, "failed to remove on shutdown: {e}"),
            }
        }
        let report = ShutdownReport {
            unique_connections: state.history.len(),
            stuck: state.stuck.len(),
        };
        drop(state);
        info!(
            unique_connections = report.unique_connections,
            stuck = report.stuck,
            "Total number of unique connections"
        );
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        report
    }

    /// Runs [`shutdown`](Tracker::shutdown) once `signal` completes.
    /// The returned channel fires when shutdown is done.
    pub fn shutdown_on<F>(self: &Arc<Self>, signal: F) -> oneshot::Receiver<ShutdownReport>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let tracker = Arc::clone(self);
        let _ = tokio::spawn(async move {
            signal.await;
            info!("Received signal to shut down, removing all connections");
            let report = tracker.shutdown().await;
            let _ = tx.send(report);
        });
        rx
    }

    /// Whether new connections are being admitted
    pub async fn accepting(&self) -> bool {
        self.state.lock().await.accept_new
    }

    /// Number of live connections
    pub async fn len(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Whether there are no live connections
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The live grant for a connection id
    pub async fn get(&self, id: &str) -> Option<Host> {
        self.state
            .lock()
            .await
            .connections
            .get(id)
            .map(|c| c.host.clone())
    }

    /// Connections removed cleanly, oldest first
    pub async fn history(&self) -> Vec<HostHistory> {
        self.state.lock().await.history.clone()
    }

    /// Connections whose rules could not be removed, oldest first
    pub async fn stuck(&self) -> Vec<StuckConnection> {
        self.state.lock().await.stuck.clone()
    }
}
