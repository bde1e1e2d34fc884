//! Event Hub actor
//!
//! Single authority over connected clients, the project subscription index
//! and pending interactive requests. Every mutation flows through one bounded
//! mailbox handled sequentially by [`Hub::run`]; [`HubHandle`] is the only way
//! in.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use loom_js_runtime::{LogLevel, LogSink, UiChannel};

use super::protocol::{EventFrame, EventKind, HandshakeFrame, UiRequestPayload};

/// Outbound queue of one client; frames are pre-encoded JSON text.
pub type Outbox = mpsc::Sender<Arc<str>>;

/// Receives answers (and abandonments) of interactive requests.
pub trait UiResponseSink: Send + Sync + 'static {
    fn deliver(&self, project_id: &str, request_id: &str, outcome: Result<Value, String>);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("session {session} is not subscribed to project {project}")]
    SessionNotSubscribed { session: String, project: String },

    #[error("failed to encode broadcast: {0}")]
    Encode(String),

    #[error("client buffer full")]
    Undelivered,

    #[error("hub is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub mailbox: usize,
    /// Pending UI requests older than this are abandoned.
    pub ui_request_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox: 1_024,
            ui_request_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mailbox
// ─────────────────────────────────────────────────────────────────────────────

enum HubCommand {
    Register {
        user: Option<String>,
        outbox: Outbox,
        reply: oneshot::Sender<Uuid>,
    },
    Unregister {
        session: Uuid,
    },
    Subscribe {
        session: Uuid,
        project: String,
    },
    Unsubscribe {
        session: Uuid,
        project: String,
    },
    Broadcast {
        project: Option<String>,
        kind: EventKind,
        data: Value,
    },
    SendToUser {
        project: String,
        user: String,
        kind: EventKind,
        data: Value,
        reply: Option<oneshot::Sender<usize>>,
    },
    SendToSession {
        project: String,
        session: String,
        kind: EventKind,
        data: Value,
        reply: Option<oneshot::Sender<Result<(), HubError>>>,
    },
    UiRequest {
        project: String,
        session: String,
        request_id: String,
        schema: Value,
    },
    UiResponse {
        session: Uuid,
        project: String,
        request_id: String,
        outcome: Result<Value, String>,
    },
    SubscribedProjects {
        reply: oneshot::Sender<HashSet<String>>,
    },
    SubscriberCount {
        project: String,
        reply: oneshot::Sender<usize>,
    },
    ClientCount {
        reply: oneshot::Sender<usize>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Hub State
// ─────────────────────────────────────────────────────────────────────────────

struct Client {
    user: Option<String>,
    outbox: Outbox,
    projects: HashSet<String>,
}

struct PendingUi {
    session: Uuid,
    created: Instant,
}

pub struct Hub {
    config: HubConfig,
    clients: HashMap<Uuid, Client>,
    subscribers: HashMap<String, HashSet<Uuid>>,
    /// Keyed by (project, request ID)
    pending: HashMap<(String, String), PendingUi>,
    sink: Option<Arc<dyn UiResponseSink>>,
}

impl Hub {
    /// Spawn the hub task. It exits once every handle is dropped.
    pub fn spawn(config: HubConfig, sink: Option<Arc<dyn UiResponseSink>>) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.mailbox.max(1));
        let hub = Hub {
            config,
            clients: HashMap::new(),
            subscribers: HashMap::new(),
            pending: HashMap::new(),
            sink,
        };
        let task = tokio::spawn(hub.run(rx));
        (HubHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = sweep.tick() => self.sweep_expired(Instant::now()),
            }
        }

        let pending: Vec<_> = self.pending.drain().collect();
        for ((project, request_id), _) in pending {
            self.report(&project, &request_id, Err("hub shut down".to_string()));
        }
        tracing::debug!("hub stopped");
    }

    fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { user, outbox, reply } => {
                let session = self.register(user, outbox);
                let _ = reply.send(session);
            }
            HubCommand::Unregister { session } => self.unregister(session),
            HubCommand::Subscribe { session, project } => self.subscribe(session, project),
            HubCommand::Unsubscribe { session, project } => self.unsubscribe(session, &project),
            HubCommand::Broadcast { project, kind, data } => match project {
                Some(project) => self.broadcast_to_project(&project, kind, data),
                None => self.broadcast_to_all(kind, data),
            },
            HubCommand::SendToUser {
                project,
                user,
                kind,
                data,
                reply,
            } => {
                let delivered = self.send_to_user(&project, &user, kind, data);
                if let Some(reply) = reply {
                    let _ = reply.send(delivered);
                }
            }
            HubCommand::SendToSession {
                project,
                session,
                kind,
                data,
                reply,
            } => {
                let result = self.send_to_session(&project, &session, kind, data);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            HubCommand::UiRequest {
                project,
                session,
                request_id,
                schema,
            } => self.ui_request(project, &session, request_id, schema),
            HubCommand::UiResponse {
                session,
                project,
                request_id,
                outcome,
            } => self.ui_response(session, project, request_id, outcome),
            HubCommand::SubscribedProjects { reply } => {
                let _ = reply.send(self.subscribers.keys().cloned().collect());
            }
            HubCommand::SubscriberCount { project, reply } => {
                let _ = reply.send(self.subscribers.get(&project).map_or(0, HashSet::len));
            }
            HubCommand::ClientCount { reply } => {
                let _ = reply.send(self.clients.len());
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Clients and subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    fn register(&mut self, user: Option<String>, outbox: Outbox) -> Uuid {
        let session = Uuid::new_v4();
        let handshake = HandshakeFrame::Session {
            session_id: session.to_string(),
        };
        // The queue is empty, so the handshake is always first
        match serde_json::to_string(&handshake) {
            Ok(text) => {
                let _ = outbox.try_send(Arc::from(text));
            }
            Err(e) => tracing::error!(session = %session, error = %e, "failed to encode handshake"),
        }

        tracing::debug!(session = %session, user = ?user, "client registered");
        self.clients.insert(
            session,
            Client {
                user,
                outbox,
                projects: HashSet::new(),
            },
        );
        session
    }

    fn unregister(&mut self, session: Uuid) {
        let Some(client) = self.clients.remove(&session) else {
            return;
        };
        for project in &client.projects {
            self.remove_subscriber(project, session);
        }

        let abandoned: Vec<(String, String)> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.session == session)
            .map(|(key, _)| key.clone())
            .collect();
        for key in abandoned {
            self.pending.remove(&key);
            self.report(&key.0, &key.1, Err("session disconnected".to_string()));
        }

        tracing::debug!(session = %session, "client unregistered");
    }

    fn subscribe(&mut self, session: Uuid, project: String) {
        let Some(client) = self.clients.get_mut(&session) else {
            tracing::warn!(session = %session, project = %project, "subscribe from unknown session");
            return;
        };
        client.projects.insert(project.clone());
        self.subscribers.entry(project).or_default().insert(session);
    }

    fn unsubscribe(&mut self, session: Uuid, project: &str) {
        let Some(client) = self.clients.get_mut(&session) else {
            tracing::warn!(session = %session, project = %project, "unsubscribe from unknown session");
            return;
        };
        client.projects.remove(project);
        self.remove_subscriber(project, session);
    }

    fn remove_subscriber(&mut self, project: &str, session: Uuid) {
        if let Some(sessions) = self.subscribers.get_mut(project) {
            sessions.remove(&session);
            if sessions.is_empty() {
                self.subscribers.remove(project);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Delivery
    // ─────────────────────────────────────────────────────────────────────────

    fn encode(project: Option<&str>, kind: EventKind, data: Value) -> Option<Arc<str>> {
        match EventFrame::new(project, kind, data).encode() {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::error!(project = ?project, ?kind, error = %e, "broadcast encode failed, message skipped");
                None
            }
        }
    }

    fn push(&self, session: Uuid, frame: &Arc<str>) -> bool {
        let Some(client) = self.clients.get(&session) else {
            return false;
        };
        match client.outbox.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(session = %session, "client buffer full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(session = %session, "client queue closed");
                false
            }
        }
    }

    fn broadcast_to_project(&self, project: &str, kind: EventKind, data: Value) {
        let Some(sessions) = self.subscribers.get(project) else {
            return;
        };
        let Some(frame) = Self::encode(Some(project), kind, data) else {
            return;
        };
        for session in sessions {
            self.push(*session, &frame);
        }
    }

    fn broadcast_to_all(&self, kind: EventKind, data: Value) {
        let Some(frame) = Self::encode(None, kind, data) else {
            return;
        };
        for session in self.clients.keys() {
            self.push(*session, &frame);
        }
    }

    fn send_to_user(&self, project: &str, user: &str, kind: EventKind, data: Value) -> usize {
        let targets: Vec<Uuid> = self
            .subscribers
            .get(project)
            .into_iter()
            .flatten()
            .filter(|session| {
                self.clients
                    .get(session)
                    .and_then(|c| c.user.as_deref())
                    .is_some_and(|u| u == user)
            })
            .copied()
            .collect();

        if targets.is_empty() {
            tracing::warn!(project = %project, user = %user, "no subscribed session for user");
            return 0;
        }
        let Some(frame) = Self::encode(Some(project), kind, data) else {
            return 0;
        };
        targets.into_iter().filter(|session| self.push(*session, &frame)).count()
    }

    /// Resolve `session` as a subscriber of `project`.
    fn subscribed_session(&self, project: &str, session: &str) -> Result<Uuid, HubError> {
        let id = Uuid::parse_str(session)
            .ok()
            .filter(|id| self.clients.contains_key(id))
            .ok_or_else(|| HubError::SessionNotFound(session.to_string()))?;
        let subscribed = self
            .subscribers
            .get(project)
            .is_some_and(|sessions| sessions.contains(&id));
        if !subscribed {
            return Err(HubError::SessionNotSubscribed {
                session: session.to_string(),
                project: project.to_string(),
            });
        }
        Ok(id)
    }

    fn send_to_session(&self, project: &str, session: &str, kind: EventKind, data: Value) -> Result<(), HubError> {
        let id = self.subscribed_session(project, session).inspect_err(|e| {
            tracing::warn!(project = %project, session = %session, error = %e, "targeted send refused");
        })?;
        let frame = EventFrame::new(Some(project), kind, data)
            .encode()
            .map_err(|e| HubError::Encode(e.to_string()))?;
        if !self.push(id, &frame) {
            return Err(HubError::Undelivered);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Interactive requests
    // ─────────────────────────────────────────────────────────────────────────

    fn report(&self, project: &str, request_id: &str, outcome: Result<Value, String>) {
        match &self.sink {
            Some(sink) => sink.deliver(project, request_id, outcome),
            None => tracing::debug!(project = %project, request = %request_id, "no ui response sink"),
        }
    }

    fn ui_request(&mut self, project: String, session: &str, request_id: String, schema: Value) {
        let payload = UiRequestPayload {
            request_id: request_id.clone(),
            schema,
        };
        let data = match serde_json::to_value(&payload) {
            Ok(data) => data,
            Err(e) => {
                self.report(&project, &request_id, Err(e.to_string()));
                return;
            }
        };

        let id = match self.subscribed_session(&project, session) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(project = %project, session = %session, error = %e, "ui request refused");
                self.report(&project, &request_id, Err(e.to_string()));
                return;
            }
        };

        if let Err(e) = self.send_to_session(&project, session, EventKind::UiRequest, data) {
            self.report(&project, &request_id, Err(e.to_string()));
            return;
        }
        self.pending.insert(
            (project, request_id),
            PendingUi {
                session: id,
                created: Instant::now(),
            },
        );
    }

    fn ui_response(&mut self, session: Uuid, project: String, request_id: String, outcome: Result<Value, String>) {
        let key = (project, request_id);
        match self.pending.get(&key) {
            Some(pending) if pending.session == session => {
                self.pending.remove(&key);
                self.report(&key.0, &key.1, outcome);
            }
            Some(_) => {
                tracing::warn!(session = %session, project = %key.0, request = %key.1, "ui response from a different session dropped");
            }
            None => {
                tracing::warn!(session = %session, project = %key.0, request = %key.1, "unknown ui response dropped");
            }
        }
    }

    fn sweep_expired(&mut self, now: Instant) {
        let ttl = self.config.ui_request_ttl;
        let expired: Vec<(String, String)> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.duration_since(pending.created) >= ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.pending.remove(&key);
            tracing::debug!(project = %key.0, request = %key.1, "ui request expired");
            self.report(&key.0, &key.1, Err("ui request timed out".to_string()));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable entry point to the hub.
///
/// `async` methods wait for mailbox capacity; `try_` methods never block and
/// report whether the command was queued.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    async fn send(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.tx.send(cmd).await.map_err(|_| HubError::Closed)
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> HubCommand) -> Result<T, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    fn try_send(&self, cmd: HubCommand) -> bool {
        match self.tx.try_send(cmd) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("hub mailbox full, command dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Register a client; its outbox first receives the session frame.
    pub async fn register(&self, user: Option<String>, outbox: Outbox) -> Result<Uuid, HubError> {
        self.ask(|reply| HubCommand::Register { user, outbox, reply }).await
    }

    pub async fn unregister(&self, session: Uuid) -> Result<(), HubError> {
        self.send(HubCommand::Unregister { session }).await
    }

    pub async fn subscribe(&self, session: Uuid, project: impl Into<String>) -> Result<(), HubError> {
        self.send(HubCommand::Subscribe {
            session,
            project: project.into(),
        })
        .await
    }

    pub async fn unsubscribe(&self, session: Uuid, project: impl Into<String>) -> Result<(), HubError> {
        self.send(HubCommand::Unsubscribe {
            session,
            project: project.into(),
        })
        .await
    }

    pub async fn broadcast_to_project(&self, project: &str, kind: EventKind, data: Value) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast {
            project: Some(project.to_string()),
            kind,
            data,
        })
        .await
    }

    pub fn try_broadcast_to_project(&self, project: &str, kind: EventKind, data: Value) -> bool {
        self.try_send(HubCommand::Broadcast {
            project: Some(project.to_string()),
            kind,
            data,
        })
    }

    pub async fn broadcast_to_all(&self, kind: EventKind, data: Value) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast {
            project: None,
            kind,
            data,
        })
        .await
    }

    /// Deliver to every subscriber of `project` logged in as `user`.
    /// Returns the number of sessions reached.
    pub async fn send_to_user(&self, project: &str, user: &str, kind: EventKind, data: Value) -> Result<usize, HubError> {
        self.ask(|reply| HubCommand::SendToUser {
            project: project.to_string(),
            user: user.to_string(),
            kind,
            data,
            reply: Some(reply),
        })
        .await
    }

    /// Deliver to exactly one session, only if it is subscribed to `project`.
    pub async fn send_to_session(&self, project: &str, session: &str, kind: EventKind, data: Value) -> Result<(), HubError> {
        self.ask(|reply| HubCommand::SendToSession {
            project: project.to_string(),
            session: session.to_string(),
            kind,
            data,
            reply: Some(reply),
        })
        .await?
    }

    /// Queue an interactive request; refusals come back through the sink.
    pub fn try_ui_request(&self, project: &str, session: &str, request_id: &str, schema: Value) -> bool {
        self.try_send(HubCommand::UiRequest {
            project: project.to_string(),
            session: session.to_string(),
            request_id: request_id.to_string(),
            schema,
        })
    }

    pub async fn ui_response(
        &self,
        session: Uuid,
        project: impl Into<String>,
        request_id: impl Into<String>,
        outcome: Result<Value, String>,
    ) -> Result<(), HubError> {
        self.send(HubCommand::UiResponse {
            session,
            project: project.into(),
            request_id: request_id.into(),
            outcome,
        })
        .await
    }

    pub async fn subscribed_projects(&self) -> Result<HashSet<String>, HubError> {
        self.ask(|reply| HubCommand::SubscribedProjects { reply }).await
    }

    pub async fn subscriber_count(&self, project: &str) -> Result<usize, HubError> {
        self.ask(|reply| HubCommand::SubscriberCount {
            project: project.to_string(),
            reply,
        })
        .await
    }

    pub async fn client_count(&self) -> Result<usize, HubError> {
        self.ask(|reply| HubCommand::ClientCount { reply }).await
    }
}

impl LogSink for HubHandle {
    fn emit(&self, project_id: &str, level: LogLevel, message: &str) {
        self.try_broadcast_to_project(
            project_id,
            EventKind::Log,
            json!({ "level": level, "message": message, "at": Utc::now() }),
        );
    }
}

impl UiChannel for HubHandle {
    fn request(&self, project_id: &str, session_id: &str, request_id: &str, schema: Value) -> bool {
        self.try_ui_request(project_id, session_id, request_id, schema)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Answers(Mutex<Vec<(String, String, Result<Value, String>)>>);

    impl UiResponseSink for Answers {
        fn deliver(&self, project_id: &str, request_id: &str, outcome: Result<Value, String>) {
            self.0
                .lock()
                .push((project_id.to_string(), request_id.to_string(), outcome));
        }
    }

    async fn client(hub: &HubHandle, user: Option<&str>) -> (Uuid, mpsc::Receiver<Arc<str>>) {
        let (tx, mut rx) = mpsc::channel(16);
        let session = hub.register(user.map(str::to_string), tx).await.unwrap();
        let handshake: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(handshake["type"], "session");
        assert_eq!(handshake["sessionId"], session.to_string());
        (session, rx)
    }

    fn frames(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    /// Barrier: once a query returns, every earlier command was handled.
    async fn settle(hub: &HubHandle) {
        hub.client_count().await.unwrap();
    }

    #[tokio::test]
    async fn project_broadcasts_reach_only_subscribers() {
        let (hub, _task) = Hub::spawn(HubConfig::default(), None);
        let (a, mut rx_a) = client(&hub, None).await;
        let (b, mut rx_b) = client(&hub, None).await;

        hub.subscribe(a, "p1").await.unwrap();
        hub.subscribe(b, "p2").await.unwrap();
        hub.broadcast_to_project("p1", EventKind::Monitor, json!({ "n": 1 }))
            .await
            .unwrap();
        settle(&hub).await;

        let got = frames(&mut rx_a);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["projectId"], "p1");
        assert_eq!(got[0]["event"]["data"]["n"], 1);
        assert!(frames(&mut rx_b).is_empty());

        hub.unsubscribe(a, "p1").await.unwrap();
        hub.broadcast_to_project("p1", EventKind::Monitor, json!({ "n": 2 }))
            .await
            .unwrap();
        settle(&hub).await;
        assert!(frames(&mut rx_a).is_empty());
        assert_eq!(hub.subscriber_count("p1").await.unwrap(), 0);
        assert!(!hub.subscribed_projects().await.unwrap().contains("p1"));
    }

    #[tokio::test]
    async fn global_broadcast_reaches_everyone() {
        let (hub, _task) = Hub::spawn(HubConfig::default(), None);
        let (_, mut rx_a) = client(&hub, None).await;
        let (_, mut rx_b) = client(&hub, None).await;

        hub.broadcast_to_all(EventKind::Server, json!("draining")).await.unwrap();
        settle(&hub).await;

        for rx in [&mut rx_a, &mut rx_b] {
            let got = frames(rx);
            assert_eq!(got.len(), 1);
            assert!(got[0].get("projectId").is_none());
        }
    }

    #[tokio::test]
    async fn unregister_cleans_the_index() {
        let (hub, _task) = Hub::spawn(HubConfig::default(), None);
        let (a, _rx) = client(&hub, None).await;
        hub.subscribe(a, "p1").await.unwrap();
        assert_eq!(hub.subscriber_count("p1").await.unwrap(), 1);

        hub.unregister(a).await.unwrap();
        assert_eq!(hub.subscriber_count("p1").await.unwrap(), 0);
        assert_eq!(hub.client_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn targeted_sends_require_a_subscription() {
        let (hub, _task) = Hub::spawn(HubConfig::default(), None);
        let (a, mut rx_a) = client(&hub, Some("ada")).await;
        let (b, mut rx_b) = client(&hub, Some("ada")).await;
        hub.subscribe(a, "p1").await.unwrap();

        let refused = hub
            .send_to_session("p1", &b.to_string(), EventKind::Log, json!("x"))
            .await
            .unwrap_err();
        assert!(matches!(refused, HubError::SessionNotSubscribed { .. }));

        let missing = hub
            .send_to_session("p1", "not-a-session", EventKind::Log, json!("x"))
            .await
            .unwrap_err();
        assert!(matches!(missing, HubError::SessionNotFound(_)));

        hub.send_to_session("p1", &a.to_string(), EventKind::Log, json!("x"))
            .await
            .unwrap();
        assert_eq!(hub.send_to_user("p1", "ada", EventKind::Log, json!("y")).await.unwrap(), 1);
        assert_eq!(hub.send_to_user("p1", "bob", EventKind::Log, json!("z")).await.unwrap(), 0);

        assert_eq!(frames(&mut rx_a).len(), 2);
        assert!(frames(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn full_client_queues_drop_without_blocking_others() {
        let (hub, _task) = Hub::spawn(HubConfig::default(), None);
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        // Handshake fills the slow client's queue
        let slow = hub.register(None, slow_tx).await.unwrap();
        let (fast, mut rx_fast) = client(&hub, None).await;
        hub.subscribe(slow, "p1").await.unwrap();
        hub.subscribe(fast, "p1").await.unwrap();

        for n in 0..5 {
            hub.broadcast_to_project("p1", EventKind::Monitor, json!(n)).await.unwrap();
        }
        settle(&hub).await;
        assert_eq!(frames(&mut rx_fast).len(), 5);
    }

    #[tokio::test]
    async fn ui_requests_are_answered_by_the_requested_session_only() {
        let answers = Arc::new(Answers::default());
        let (hub, _task) = Hub::spawn(HubConfig::default(), Some(answers.clone() as Arc<dyn UiResponseSink>));
        let (a, mut rx_a) = client(&hub, None).await;
        let (b, _rx_b) = client(&hub, None).await;
        hub.subscribe(a, "p1").await.unwrap();
        hub.subscribe(b, "p1").await.unwrap();

        assert!(hub.try_ui_request("p1", &a.to_string(), "r1", json!({ "title": "Confirm" })));
        settle(&hub).await;
        let got = frames(&mut rx_a);
        assert_eq!(got[0]["event"]["type"], "ui_request");
        assert_eq!(got[0]["event"]["data"]["requestId"], "r1");

        // Wrong session is ignored, right one resolves
        hub.ui_response(b, "p1", "r1", Ok(json!("no"))).await.unwrap();
        hub.ui_response(a, "p1", "r1", Ok(json!("yes"))).await.unwrap();
        hub.ui_response(a, "p1", "r1", Ok(json!("again"))).await.unwrap();
        settle(&hub).await;

        let answers = answers.0.lock();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0], ("p1".to_string(), "r1".to_string(), Ok(json!("yes"))));
    }

    #[tokio::test]
    async fn refused_and_abandoned_ui_requests_report_errors() {
        let answers = Arc::new(Answers::default());
        let (hub, _task) = Hub::spawn(HubConfig::default(), Some(answers.clone() as Arc<dyn UiResponseSink>));
        let (a, _rx_a) = client(&hub, None).await;

        // Not subscribed yet
        hub.try_ui_request("p1", &a.to_string(), "r1", Value::Null);
        hub.subscribe(a, "p1").await.unwrap();
        hub.try_ui_request("p1", &a.to_string(), "r2", Value::Null);
        hub.unregister(a).await.unwrap();
        settle(&hub).await;

        let answers = answers.0.lock();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers[0].1, "r1");
        assert!(answers[0].2.as_ref().unwrap_err().contains("not subscribed"));
        assert_eq!(answers[1].1, "r2");
        assert_eq!(answers[1].2, Err("session disconnected".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_ui_requests_expire() {
        let answers = Arc::new(Answers::default());
        let config = HubConfig {
            ui_request_ttl: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            ..HubConfig::default()
        };
        let (hub, _task) = Hub::spawn(config, Some(answers.clone() as Arc<dyn UiResponseSink>));
        let (a, _rx_a) = client(&hub, None).await;
        hub.subscribe(a, "p1").await.unwrap();
        hub.try_ui_request("p1", &a.to_string(), "r1", Value::Null);
        settle(&hub).await;

        tokio::time::sleep(Duration::from_secs(12)).await;
        settle(&hub).await;

        let answers = answers.0.lock();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].2, Err("ui request timed out".to_string()));
    }

    #[tokio::test]
    async fn undelivered_ui_prompt_is_reported_and_not_left_pending() {
        let answers = Arc::new(Answers::default());
        let (hub, _task) = Hub::spawn(HubConfig::default(), Some(answers.clone() as Arc<dyn UiResponseSink>));

        // The handshake fills the only slot
        let (tx, _rx) = mpsc::channel(1);
        let a = hub.register(None, tx).await.unwrap();
        hub.subscribe(a, "p1").await.unwrap();

        hub.try_ui_request("p1", &a.to_string(), "r1", Value::Null);
        settle(&hub).await;
        assert_eq!(
            hub.send_to_session("p1", &a.to_string(), EventKind::Server, Value::Null).await,
            Err(HubError::Undelivered)
        );

        // Nothing pending: a late answer is dropped and disconnect reports nothing more
        hub.ui_response(a, "p1", "r1", Ok(Value::Bool(true))).await.unwrap();
        hub.unregister(a).await.unwrap();
        settle(&hub).await;

        let answers = answers.0.lock();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].1, "r1");
        assert_eq!(answers[0].2, Err("client buffer full".to_string()));
    }
}
