//! Single-threaded event loop
//!
//! One task owns everything: the listener, the (at most one) CVM session, the
//! agent and the poller. Each turn services exactly one of, in priority
//! order:
//!
//! 1. shutdown
//! 2. a queued admin command
//! 3. a poll tick
//! 4. a new connection, which replaces any current session
//! 5. one inbound request on the current session
//!
//! Handlers run to completion before the next turn, so the registry and the
//! session are never observed half-updated.

use std::future::{pending, Future};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, Push};
use crate::config::ConfigSource;
use crate::control::{AdminCommand, AdminHandle, AdminRequest};
use crate::error::Result;
use crate::poller::DiPoller;
use crate::registry::AgentSettings;
use crate::session::Session;
use crate::store::EventStore;

type SettingsHook = Box<dyn Fn(&AgentSettings) + Send + Sync>;

/// Pause after a failed accept so a persistent error (EMFILE) cannot spin
/// the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Reactor<S: EventStore> {
    listener: TcpListener,
    session: Option<Session>,
    agent: Agent<S>,
    poller: DiPoller,
    config: Box<dyn ConfigSource>,
    admin_rx: mpsc::UnboundedReceiver<AdminRequest>,
    io_timeout: Option<Duration>,
    verbose: bool,
    settings_hook: Option<SettingsHook>,
}

fn poll_interval(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Resolves when the current session has inbound data; never without one
async fn session_ready(session: &Option<Session>) -> io::Result<usize> {
    match session {
        Some(session) => session.wait_for_data().await,
        None => pending().await,
    }
}

impl<S: EventStore> Reactor<S> {
    pub fn new(
        listener: TcpListener,
        agent: Agent<S>,
        poller: DiPoller,
        config: Box<dyn ConfigSource>,
        io_timeout: Option<Duration>,
    ) -> (Self, AdminHandle) {
        let (handle, admin_rx) = AdminHandle::channel();
        let reactor = Self {
            listener,
            session: None,
            agent,
            poller,
            config,
            admin_rx,
            io_timeout,
            verbose: false,
            settings_hook: None,
        };
        (reactor, handle)
    }

    /// Dump the configuration after every reload
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Called with the new settings after each successful reload
    pub fn on_settings_change(&mut self, hook: impl Fn(&AgentSettings) + Send + Sync + 'static) {
        self.settings_hook = Some(Box::new(hook));
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until `shutdown` resolves
    pub async fn run<F: Future>(mut self, shutdown: F) -> Result<()> {
        tokio::pin!(shutdown);
        let mut ticker = poll_interval(self.agent.polling_delay());
        info!(
            addr = ?self.listener.local_addr().ok(),
            poll_us = self.agent.polling_delay().as_micros() as u64,
            "Reactor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Reactor stopping");
                    break;
                }

                Some(request) = self.admin_rx.recv() => {
                    let delay = self.agent.polling_delay();
                    self.handle_admin(request).await;
                    if self.agent.polling_delay() != delay {
                        ticker = poll_interval(self.agent.polling_delay());
                    }
                }

                _ = ticker.tick() => {
                    self.poll().await;
                }

                accepted = self.listener.accept() => {
                    self.install_session(accepted).await;
                }

                ready = session_ready(&self.session) => {
                    self.service_session(ready).await;
                }
            }
        }

        if let Some(session) = self.session.take() {
            info!(peer = %session.peer(), "Closing session");
        }
        Ok(())
    }

    async fn poll(&mut self) {
        for change in self.poller.tick() {
            for push in self.agent.handle_change(change) {
                self.deliver(push).await;
            }
        }
    }

    async fn install_session(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                return;
            },
        };
        if let Some(old) = self.session.take() {
            info!(old = %old.peer(), new = %peer, "Replacing CVM session");
        }
        info!(%peer, "CVM connected");
        self.session = Some(Session::new(stream, peer, self.io_timeout));
    }

    fn close_session(&mut self, reason: &str) {
        if let Some(session) = self.session.take() {
            info!(peer = %session.peer(), reason, "CVM session closed");
        }
    }

    /// Exactly one request per readiness
    async fn service_session(&mut self, ready: io::Result<usize>) {
        match ready {
            Ok(0) => {
                self.close_session("peer closed");
                return;
            },
            Ok(_) => {},
            Err(e) => {
                warn!("Session read failed: {}", e);
                self.close_session("read error");
                return;
            },
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let payload = match session.read_message().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(peer = %session.peer(), "Bad frame: {}", e);
                self.close_session("framing error");
                return;
            },
        };

        let Some(response) = self.agent.answer(&payload) else {
            return;
        };
        self.send(&response).await;
    }

    /// Send a push if anyone is listening
    async fn deliver(&mut self, push: Push) {
        if self.session.is_none() {
            debug!(device = push.device, "No CVM session, update not sent");
            return;
        }
        if let Some(message) = self.agent.update_message(&push) {
            self.send(&message).await;
        }
    }

    async fn send(&mut self, message: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = session.send_message(message).await {
            error!(peer = %session.peer(), "Send failed: {}", e);
            self.close_session("send error");
        }
    }

    async fn handle_admin(&mut self, request: AdminRequest) {
        let AdminRequest { command, reply } = request;
        debug!(%command, "Admin command received");

        let outcome = match command {
            AdminCommand::SimulateEvent { device } => match self.agent.simulate_event(device) {
                Ok(push) => {
                    self.deliver(push).await;
                    Ok(())
                },
                Err(e) => Err(e),
            },
            AdminCommand::ToggleFail { device } => match self.agent.toggle_fail(device) {
                Ok(push) => {
                    self.deliver(push).await;
                    Ok(())
                },
                Err(e) => Err(e),
            },
            AdminCommand::Reload => self.reload(),
            AdminCommand::DumpState => {
                self.agent.dump_state();
                Ok(())
            },
        };

        if let Err(e) = &outcome {
            warn!(%command, "Admin command failed: {}", e);
        }
        // Requester may have gone away
        let _ = reply.send(outcome);
    }

    /// Re-read the configuration; on failure the current generation stays
    fn reload(&mut self) -> Result<()> {
        info!(source = %self.config.describe(), "Reloading configuration");
        let generation = self
            .config
            .load()
            .inspect_err(|e| warn!("Reload failed, keeping current configuration: {}", e))?;

        self.agent.reload(generation);
        if let Some(hook) = &self.settings_hook {
            hook(self.agent.registry().settings());
        }
        if self.verbose {
            self.agent.dump_state();
        }
        Ok(())
    }
}
