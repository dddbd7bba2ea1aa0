//! `GatewayActor` - single-owner actor for all relay state.
//!
//! The gateway owns the connection registry, helper pool, waiting queue,
//! room registry, and invite table. Every read-decide-write sequence
//! (matchmaking claims, invite resolution, room teardown) executes inside
//! its message loop, so no interleaving between two in-flight requests is
//! possible and no locks are needed.
//!
//! Socket tasks push decoded events into the mailbox and never touch state
//! directly; delivery back to sockets is non-blocking (`try_send`), so a
//! slow consumer can never stall the loop.

use crate::config::Config;
use crate::errors::RelayError;
use crate::events::{
    ClientEvent, HelperMeta, InviteKind, PresenceStatus, Role, SeekerMeta, ServerEvent,
    SessionNotice,
};
use crate::invites::InviteTable;
use crate::matchmaking::Matchmaker;
use crate::registry::{
    Availability, ConnectionHandle, ConnectionId, ConnectionRegistry, HelperRegistry, RoomRegistry,
    RoomState,
};

use super::messages::{GatewayMessage, GatewayStats, PresenceSnapshot};
use super::metrics::{MailboxMonitor, RelayMetrics};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Channel buffer size for the gateway mailbox.
const GATEWAY_CHANNEL_BUFFER: usize = 1000;

/// Interval between expiry sweeps (ringing rooms, forwarded invites).
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Runtime limits and deadlines for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum number of seekers in the waiting queue.
    pub max_waiting: usize,
    /// How long a forwarded invite may wait for a response.
    pub invite_expiry: Duration,
    /// How long a room may stay in `ringing` before it is torn down.
    pub ring_expiry: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_waiting: crate::config::DEFAULT_MAX_WAITING,
            invite_expiry: Duration::from_secs(crate::config::DEFAULT_INVITE_EXPIRY_SECONDS),
            ring_expiry: Duration::from_secs(crate::config::DEFAULT_RING_EXPIRY_SECONDS),
        }
    }
}

impl From<&Config> for GatewayConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_waiting: config.max_waiting,
            invite_expiry: config.invite_expiry(),
            ring_expiry: config.ring_expiry(),
        }
    }
}

/// Handle to the `GatewayActor`.
#[derive(Clone)]
pub struct GatewayHandle {
    sender: mpsc::Sender<GatewayMessage>,
    cancel_token: CancellationToken,
}

impl GatewayHandle {
    /// Forward a decoded client event from a socket task.
    pub async fn inbound(&self, conn: ConnectionHandle, event: ClientEvent) -> Result<(), RelayError> {
        self.sender
            .send(GatewayMessage::Inbound { conn, event })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))
    }

    /// Notify the gateway that a connection's transport closed.
    pub async fn connection_closed(&self, connection_id: ConnectionId) -> Result<(), RelayError> {
        self.sender
            .send(GatewayMessage::ConnectionClosed { connection_id })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))
    }

    /// Query the presence of one identity.
    pub async fn presence(&self, identity: String) -> Result<Option<PresenceSnapshot>, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GatewayMessage::QueryPresence {
                identity,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Current gateway counters.
    pub async fn stats(&self) -> Result<GatewayStats, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GatewayMessage::GetStats { respond_to: tx })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the gateway actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for socket tasks and auxiliary servers.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The `GatewayActor` implementation.
pub struct GatewayActor {
    /// Relay instance id (logging and health).
    relay_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<GatewayMessage>,
    /// Cancellation token (root for this relay).
    cancel_token: CancellationToken,
    /// Runtime limits and deadlines.
    config: GatewayConfig,
    /// Identity -> live connection, with a reverse index.
    connections: ConnectionRegistry,
    /// Helper pool in registration order.
    helpers: HelperRegistry,
    /// FIFO waiting queue of seekers.
    matchmaker: Matchmaker,
    /// Signaling rooms.
    rooms: RoomRegistry,
    /// In-flight invite requests.
    invites: InviteTable,
    /// Shared relay metrics.
    metrics: Arc<RelayMetrics>,
    /// Session lifecycle notices for the persistence collaborator.
    notices: mpsc::UnboundedSender<SessionNotice>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl GatewayActor {
    /// Spawn the gateway actor.
    ///
    /// Returns a handle and the task join handle. The cancellation token is
    /// created here and owned by the handle; callers derive child tokens
    /// from it for socket tasks.
    pub fn spawn(
        relay_id: String,
        config: GatewayConfig,
        metrics: Arc<RelayMetrics>,
        notices: mpsc::UnboundedSender<SessionNotice>,
    ) -> (GatewayHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(GATEWAY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let max_waiting = config.max_waiting;
        let actor = Self {
            relay_id: relay_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            config,
            connections: ConnectionRegistry::new(),
            helpers: HelperRegistry::new(),
            matchmaker: Matchmaker::new(max_waiting),
            rooms: RoomRegistry::new(),
            invites: InviteTable::new(),
            metrics,
            notices,
            mailbox: MailboxMonitor::new(relay_id),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = GatewayHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "relay.actor.gateway", fields(relay_id = %self.relay_id))]
    async fn run(mut self) {
        info!(
            target: "relay.gateway",
            relay_id = %self.relay_id,
            "GatewayActor started"
        );

        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.gateway",
                        relay_id = %self.relay_id,
                        "GatewayActor received cancellation signal"
                    );
                    self.notify_draining();
                    break;
                }

                _ = sweep.tick() => {
                    self.run_sweep();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "relay.gateway",
                                relay_id = %self.relay_id,
                                "GatewayActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "relay.gateway",
            relay_id = %self.relay_id,
            connections = self.connections.len(),
            messages_processed = self.mailbox.messages_processed(),
            "GatewayActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: GatewayMessage) {
        match message {
            GatewayMessage::Inbound { conn, event } => {
                self.handle_inbound(conn, event);
            }

            GatewayMessage::ConnectionClosed { connection_id } => {
                self.handle_disconnect(connection_id);
            }

            GatewayMessage::QueryPresence {
                identity,
                respond_to,
            } => {
                let snapshot = self.connections.entry(&identity).map(|e| PresenceSnapshot {
                    identity: e.identity.clone(),
                    role: e.role,
                    status: e.status,
                    custom_text: e.custom_status_text.clone(),
                    last_active_at: e.last_active_at,
                });
                let _ = respond_to.send(snapshot);
            }

            GatewayMessage::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
        }
    }

    /// Dispatch a decoded client event.
    ///
    /// `register` binds the connection; everything else resolves the sender
    /// identity from the reverse index and is rejected if unbound.
    fn handle_inbound(&mut self, conn: ConnectionHandle, event: ClientEvent) {
        let event = match event {
            ClientEvent::Register { identity, role } => {
                self.handle_register(conn, identity, role);
                return;
            }
            other => other,
        };

        let Some(identity) = self
            .connections
            .identity_for(conn.id())
            .map(str::to_string)
        else {
            self.reply_error(&conn, &RelayError::NotRegistered);
            return;
        };
        self.connections.touch(&identity);

        match event {
            // Consumed above.
            ClientEvent::Register { .. } => {}

            ClientEvent::SetStatus {
                status,
                custom_text,
            } => self.handle_set_status(&identity, status, custom_text),

            ClientEvent::SetAvailability { available, skills } => {
                self.handle_set_availability(&conn, &identity, available, skills);
            }

            ClientEvent::RequestSupport { meta } => self.handle_request_support(&identity, meta),

            ClientEvent::CancelWait => self.handle_cancel_wait(&identity),

            ClientEvent::InviteHelper { helper, kind } => {
                self.handle_invite_helper(&identity, &helper, kind);
            }

            ClientEvent::RespondToInvite { request_id, accept } => {
                self.handle_respond_to_invite(&identity, request_id, accept);
            }

            ClientEvent::CallUser { to, room_id } => self.handle_call_user(&identity, &to, room_id),

            ClientEvent::JoinRoom { room_id } => self.handle_join_room(&identity, &room_id),

            ClientEvent::Offer { room_id, payload } => {
                self.relay_signal(&conn, &identity, &room_id, payload, SignalKind::Offer);
            }

            ClientEvent::Answer { room_id, payload } => {
                self.relay_signal(&conn, &identity, &room_id, payload, SignalKind::Answer);
            }

            ClientEvent::IceCandidate { room_id, payload } => {
                self.relay_signal(&conn, &identity, &room_id, payload, SignalKind::IceCandidate);
            }

            ClientEvent::EndCall { room_id } => self.handle_end_call(&conn, &identity, &room_id),
        }
    }

    /// Bind a connection to an identity (idempotent upsert, newest wins).
    fn handle_register(&mut self, conn: ConnectionHandle, identity: String, role: Role) {
        let connection_id = conn.id();
        let replaced = self.connections.register(&identity, conn, role);

        if replaced.is_none() {
            self.metrics.connection_registered();
        }

        // A helper reconnecting mid-session keeps its Busy record; only
        // absent and Offline helpers re-enter the pool as available.
        let in_session = role == Role::Helper
            && self
                .helpers
                .get(&identity)
                .is_some_and(|record| record.availability == Availability::Busy);

        if role == Role::Helper && !in_session {
            // Registers as available by default; skills arrive via
            // set_availability.
            self.helpers.upsert_available(&identity, Vec::new(), None);
        }

        info!(
            target: "relay.gateway",
            identity = %identity,
            connection_id = %connection_id,
            role = ?role,
            superseded = replaced.is_some(),
            "Identity registered"
        );

        self.broadcast_presence(&identity, PresenceStatus::Active, None);

        if role == Role::Helper && !in_session {
            self.try_match_waiting(&identity);
        }
    }

    fn handle_set_status(
        &mut self,
        identity: &str,
        status: PresenceStatus,
        custom_text: Option<String>,
    ) {
        if self
            .connections
            .set_status(identity, status, custom_text.clone())
        {
            self.broadcast_presence(identity, status, custom_text);
        }
    }

    /// Helper availability flip. `available: true` is the queue-drain
    /// trigger; `available: false` takes the helper out of the pool without
    /// tearing down any in-progress session.
    fn handle_set_availability(
        &mut self,
        conn: &ConnectionHandle,
        identity: &str,
        available: bool,
        skills: Vec<String>,
    ) {
        let is_helper = self
            .connections
            .entry(identity)
            .is_some_and(|e| e.role == Role::Helper);
        if !is_helper {
            self.reply_error(
                conn,
                &RelayError::Conflict("Only helpers can set availability".to_string()),
            );
            return;
        }

        if available {
            self.helpers.upsert_available(identity, skills, None);
            debug!(target: "relay.match", identity = %identity, "Helper available");
            self.try_match_waiting(identity);
        } else {
            self.helpers.mark_offline(identity);
            debug!(target: "relay.match", identity = %identity, "Helper unavailable");
        }
    }

    /// Anonymous matchmaking request: match immediately if a helper is free,
    /// otherwise queue FIFO.
    fn handle_request_support(&mut self, identity: &str, meta: SeekerMeta) {
        if let Some(helper) = self.claim_reachable_helper() {
            self.establish_session(identity, meta, &helper);
            return;
        }

        match self.matchmaker.enqueue(identity, meta) {
            Ok(()) => {
                debug!(
                    target: "relay.match",
                    identity = %identity,
                    waiting = self.matchmaker.len(),
                    "Seeker queued"
                );
                self.deliver_to(identity, ServerEvent::Searching);
            }
            Err(err) => {
                warn!(
                    target: "relay.match",
                    identity = %identity,
                    error = %err,
                    "Matchmaking request rejected"
                );
                self.deliver_to(identity, ServerEvent::NoHelperAvailable);
            }
        }
    }

    fn handle_cancel_wait(&mut self, identity: &str) {
        if self.matchmaker.remove(identity) {
            debug!(target: "relay.match", identity = %identity, "Seeker left the queue");
        }
    }

    /// Claim the first available helper that still has a live connection.
    ///
    /// A record can outlive its socket only inside a single message's
    /// handling window, but a claim must never pair a seeker with a dead
    /// helper, so stale records found here are flipped offline and skipped.
    fn claim_reachable_helper(&mut self) -> Option<HelperMeta> {
        loop {
            let helper = self.helpers.claim_available()?;
            if self.connections.lookup(&helper.identity).is_some() {
                return Some(helper);
            }
            warn!(
                target: "relay.match",
                helper = %helper.identity,
                "Claimed helper has no live connection, marking offline"
            );
            self.helpers.mark_offline(&helper.identity);
        }
    }

    /// Queue-drain trigger: a helper just became available.
    ///
    /// Pops the longest-waiting seeker, then claims the helper. If the claim
    /// fails (someone else won it inside this same loop turn), the seeker
    /// goes back to the head of the queue, keeping its position.
    fn try_match_waiting(&mut self, helper_identity: &str) {
        let Some(entry) = self.matchmaker.pop_front() else {
            return;
        };

        match self.helpers.claim_specific(helper_identity) {
            Some(helper) => {
                let identity = entry.identity.clone();
                self.establish_session(&identity, entry.meta, &helper);
            }
            None => {
                self.matchmaker.requeue_front(entry);
            }
        }
    }

    /// Create an active session room for a matched pair and notify both
    /// sides. The helper must already be claimed (busy).
    fn establish_session(&mut self, seeker: &str, meta: SeekerMeta, helper: &HelperMeta) {
        let room_id = Uuid::new_v4().to_string();
        self.rooms.create(&room_id, RoomState::Active);
        self.rooms.join(&room_id, seeker);
        self.rooms.join(&room_id, &helper.identity);

        self.metrics.room_created();
        self.metrics.session_started();

        info!(
            target: "relay.match",
            seeker = %seeker,
            helper = %helper.identity,
            room_id = %room_id,
            "Session established"
        );

        self.deliver_to(
            seeker,
            ServerEvent::Matched {
                room_id: room_id.clone(),
                helper: helper.clone(),
            },
        );
        self.deliver_to(
            &helper.identity,
            ServerEvent::SessionStarted {
                room_id: room_id.clone(),
                seeker: seeker.to_string(),
                meta,
            },
        );

        let _ = self.notices.send(SessionNotice::Started {
            room_id,
            seeker: seeker.to_string(),
            helper: helper.identity.clone(),
            started_at: chrono::Utc::now(),
        });
    }

    /// Targeted invite: create, forward to the helper if reachable, confirm
    /// the forward to the requester.
    fn handle_invite_helper(&mut self, identity: &str, helper: &str, kind: InviteKind) {
        let request_id = self.invites.create(identity, helper, kind);

        let target = self.connections.lookup(helper).cloned();
        match target {
            Some(handle) => {
                self.invites.mark_forwarded(request_id);
                self.deliver_handle(
                    &handle,
                    ServerEvent::InviteIncoming {
                        request_id,
                        from: identity.to_string(),
                        kind,
                    },
                );
                self.deliver_to(identity, ServerEvent::InviteForwarded { request_id });
                debug!(
                    target: "relay.invites",
                    request_id = %request_id,
                    helper = %helper,
                    "Invite forwarded"
                );
            }
            None => {
                self.invites.fail(request_id);
                debug!(
                    target: "relay.invites",
                    request_id = %request_id,
                    helper = %helper,
                    "Invite target unreachable"
                );
                self.deliver_to(
                    identity,
                    ServerEvent::InviteFailed {
                        request_id,
                        reason: "helper unreachable".to_string(),
                    },
                );
            }
        }
    }

    /// Resolve a forwarded invite at most once. Duplicate or misdirected
    /// responses are rejected and logged, never re-applied.
    fn handle_respond_to_invite(&mut self, identity: &str, request_id: Uuid, accept: bool) {
        let invite = match self.invites.resolve(request_id, identity) {
            Ok(invite) => invite,
            Err(err) => {
                warn!(
                    target: "relay.invites",
                    request_id = %request_id,
                    identity = %identity,
                    error = %err,
                    "Ignoring invite response"
                );
                return;
            }
        };

        if !accept {
            debug!(
                target: "relay.invites",
                request_id = %request_id,
                "Invite declined"
            );
            self.deliver_to(&invite.from, ServerEvent::InviteDeclined { request_id });
            return;
        }

        // The requester may have dropped between forward and accept; the
        // disconnect handler fails such invites, so this is a narrow race.
        if self.connections.lookup(&invite.from).is_none() {
            self.deliver_to(
                identity,
                ServerEvent::InviteFailed {
                    request_id,
                    reason: "requester disconnected".to_string(),
                },
            );
            return;
        }

        // Accepting takes the helper out of the matchmaking pool for the
        // duration of the session, if it was in it.
        let helper = self
            .helpers
            .claim_specific(identity)
            .unwrap_or_else(|| HelperMeta {
                identity: identity.to_string(),
                display_name: None,
                skills: Vec::new(),
            });

        let room_id = Uuid::new_v4().to_string();
        self.rooms.create(&room_id, RoomState::Active);
        self.rooms.join(&room_id, &invite.from);
        self.rooms.join(&room_id, &helper.identity);

        self.metrics.room_created();
        self.metrics.session_started();

        info!(
            target: "relay.invites",
            request_id = %request_id,
            room_id = %room_id,
            "Invite accepted"
        );

        let accepted = ServerEvent::InviteAccepted {
            request_id,
            room_id: room_id.clone(),
        };
        self.deliver_to(&invite.from, accepted.clone());
        self.deliver_to(identity, accepted);

        let _ = self.notices.send(SessionNotice::Started {
            room_id,
            seeker: invite.from,
            helper: helper.identity,
            started_at: chrono::Utc::now(),
        });
    }

    /// Direct call: ring a known identity without matchmaking. The room is
    /// created in `ringing` and flips to `active` on the first answer.
    fn handle_call_user(&mut self, identity: &str, to: &str, room_id: Option<String>) {
        let Some(target) = self.connections.lookup(to).cloned() else {
            debug!(target: "relay.rooms", identity = %identity, "Call target unreachable");
            self.deliver_to(
                identity,
                ServerEvent::CallFailed {
                    reason: RelayError::TargetUnreachable.client_message(),
                },
            );
            return;
        };

        let room_id = room_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.rooms.join(&room_id, identity) {
            self.metrics.room_created();
        }

        debug!(
            target: "relay.rooms",
            room_id = %room_id,
            from = %identity,
            "Ringing callee"
        );

        self.deliver_handle(
            &target,
            ServerEvent::IncomingCall {
                from: identity.to_string(),
                room_id,
            },
        );
    }

    fn handle_join_room(&mut self, identity: &str, room_id: &str) {
        if self.rooms.join(room_id, identity) {
            self.metrics.room_created();
        }
        debug!(target: "relay.rooms", room_id = %room_id, identity = %identity, "Joined room");
    }

    /// Relay a WebRTC signaling payload verbatim to the other room members.
    fn relay_signal(
        &mut self,
        conn: &ConnectionHandle,
        identity: &str,
        room_id: &str,
        payload: serde_json::Value,
        kind: SignalKind,
    ) {
        let targets = {
            let Some(room) = self.rooms.get(room_id) else {
                self.reply_error(conn, &RelayError::RoomNotFound);
                return;
            };
            if !room.contains(identity) {
                self.reply_error(
                    conn,
                    &RelayError::StaleTransition("sender is not a room member".to_string()),
                );
                return;
            }
            room.members_except(identity)
        };

        if targets.is_empty() {
            // Nobody to relay to yet (caller signaling before the callee
            // joins). The payload is dropped; clients re-negotiate on join.
            debug!(
                target: "relay.rooms",
                room_id = %room_id,
                kind = ?kind,
                "No peers in room, dropping signaling payload"
            );
        }

        for peer in &targets {
            let event = kind.to_event(room_id, payload.clone());
            self.deliver_to(peer, event);
        }

        // First answer moves the call out of ringing.
        if kind == SignalKind::Answer {
            self.rooms.set_state(room_id, RoomState::Active);
        }
    }

    /// Tear down a room: notify every member (the sender included), destroy
    /// the room, and release helper members back to the pool.
    fn handle_end_call(&mut self, conn: &ConnectionHandle, identity: &str, room_id: &str) {
        let is_member = match self.rooms.get(room_id) {
            Some(room) => room.contains(identity),
            None => {
                self.reply_error(conn, &RelayError::RoomNotFound);
                return;
            }
        };
        if !is_member {
            self.reply_error(
                conn,
                &RelayError::StaleTransition("sender is not a room member".to_string()),
            );
            return;
        }

        let Some(room) = self.rooms.remove(room_id) else {
            return;
        };

        info!(target: "relay.rooms", room_id = %room_id, ended_by = %identity, "Call ended");
        self.metrics.room_removed();

        let members = room.members();
        for member in &members {
            self.deliver_to(
                member,
                ServerEvent::CallEnded {
                    room_id: room_id.to_string(),
                },
            );
        }

        if room.state == RoomState::Active {
            let _ = self.notices.send(SessionNotice::Ended {
                room_id: room_id.to_string(),
                ended_at: chrono::Utc::now(),
            });
        }

        // Helpers freed by the teardown can immediately serve the queue.
        for member in &members {
            if self.helpers.release(member) {
                debug!(target: "relay.match", helper = %member, "Helper released");
                self.try_match_waiting(member);
            }
        }
    }

    /// Full disconnect cleanup for a closed transport.
    ///
    /// A close for a superseded connection (the identity re-registered on a
    /// newer socket) resolves to nothing here and must not disturb the
    /// replacement.
    fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        let Some(entry) = self.connections.unregister(connection_id) else {
            debug!(
                target: "relay.gateway",
                connection_id = %connection_id,
                "Close for unknown or superseded connection"
            );
            return;
        };
        self.metrics.connection_removed();
        let identity = entry.identity;

        info!(
            target: "relay.gateway",
            identity = %identity,
            connection_id = %connection_id,
            "Identity disconnected"
        );

        self.broadcast_presence(&identity, PresenceStatus::Offline, None);

        if self.matchmaker.remove(&identity) {
            debug!(target: "relay.match", identity = %identity, "Removed waiting seeker");
        }

        // Rooms: peers hear about the departure exactly once per shared
        // room; rooms emptied by it are gone immediately.
        for departure in self.rooms.remove_identity(&identity) {
            for peer in &departure.remaining {
                self.deliver_to(
                    peer,
                    ServerEvent::PeerDisconnected {
                        room_id: departure.room_id.clone(),
                        identity: identity.clone(),
                    },
                );
            }
            if departure.room_deleted {
                self.metrics.room_removed();
                if departure.state == RoomState::Active {
                    let _ = self.notices.send(SessionNotice::Ended {
                        room_id: departure.room_id,
                        ended_at: chrono::Utc::now(),
                    });
                }
            }
        }

        // A helper that drops mid-session stays offline until it explicitly
        // re-registers.
        self.helpers.mark_offline(&identity);

        for invite in self.invites.fail_for_helper(&identity) {
            self.deliver_to(
                &invite.from,
                ServerEvent::InviteFailed {
                    request_id: invite.request_id,
                    reason: "helper disconnected".to_string(),
                },
            );
        }
        for invite in self.invites.fail_for_requester(&identity) {
            self.deliver_to(
                &invite.to_helper,
                ServerEvent::InviteFailed {
                    request_id: invite.request_id,
                    reason: "requester disconnected".to_string(),
                },
            );
        }
    }

    /// Periodic expiry sweep: forwarded invites past their deadline and
    /// rooms stuck in `ringing`. Also publishes gauge metrics.
    fn run_sweep(&mut self) {
        for request_id in self.invites.expired_forwarded(self.config.invite_expiry) {
            if let Some(invite) = self.invites.fail(request_id) {
                warn!(
                    target: "relay.invites",
                    request_id = %request_id,
                    "Invite expired without a response"
                );
                let failed = ServerEvent::InviteFailed {
                    request_id,
                    reason: "invite timed out".to_string(),
                };
                self.deliver_to(&invite.from, failed.clone());
                self.deliver_to(&invite.to_helper, failed);
            }
        }

        for room_id in self.rooms.ringing_expired(self.config.ring_expiry) {
            if let Some(room) = self.rooms.remove(&room_id) {
                warn!(
                    target: "relay.rooms",
                    room_id = %room_id,
                    "Ringing room expired unanswered"
                );
                self.metrics.room_removed();
                for member in room.members() {
                    self.deliver_to(
                        &member,
                        ServerEvent::CallEnded {
                            room_id: room_id.clone(),
                        },
                    );
                }
            }
        }

        let stats = self.stats();
        self.metrics.publish(&stats);
    }

    fn stats(&self) -> GatewayStats {
        GatewayStats {
            connections: self.connections.len(),
            helpers_available: self.helpers.available_count(),
            waiting: self.matchmaker.len(),
            rooms: self.rooms.len(),
            invites: self.invites.len(),
        }
    }

    /// Fan a presence change out to every live connection.
    fn broadcast_presence(
        &self,
        identity: &str,
        status: PresenceStatus,
        custom_text: Option<String>,
    ) {
        let event = ServerEvent::PresenceChanged {
            identity: identity.to_string(),
            status,
            custom_text,
        };
        for handle in self.connections.handles() {
            if !handle.deliver(event.clone()) {
                self.metrics.event_dropped();
            }
        }
    }

    /// Deliver to an identity's live connection, if any. Unreachable
    /// targets and full outbound buffers are logged and counted, never
    /// retried.
    fn deliver_to(&self, identity: &str, event: ServerEvent) {
        match self.connections.lookup(identity) {
            Some(handle) => {
                if !handle.deliver(event) {
                    self.metrics.event_dropped();
                }
            }
            None => {
                debug!(
                    target: "relay.gateway",
                    identity = %identity,
                    "Dropping event for unreachable identity"
                );
                self.metrics.event_dropped();
            }
        }
    }

    fn deliver_handle(&self, handle: &ConnectionHandle, event: ServerEvent) {
        if !handle.deliver(event) {
            self.metrics.event_dropped();
        }
    }

    /// Tell every live connection the relay is going away so clients can
    /// reconnect elsewhere instead of waiting out a dead socket.
    fn notify_draining(&self) {
        let err = RelayError::Draining;
        let event = ServerEvent::Error {
            code: err.error_code(),
            message: err.client_message(),
        };
        for handle in self.connections.handles() {
            if !handle.deliver(event.clone()) {
                self.metrics.event_dropped();
            }
        }
    }

    /// Send a typed error to the offending connection only.
    fn reply_error(&self, conn: &ConnectionHandle, err: &RelayError) {
        debug!(
            target: "relay.gateway",
            connection_id = %conn.id(),
            error = %err,
            "Rejecting inbound event"
        );
        self.deliver_handle(
            conn,
            ServerEvent::Error {
                code: err.error_code(),
                message: err.client_message(),
            },
        );
    }
}

/// Which signaling relay event to emit for an inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    fn to_event(self, room_id: &str, payload: serde_json::Value) -> ServerEvent {
        let room_id = room_id.to_string();
        match self {
            SignalKind::Offer => ServerEvent::OfferReceived { room_id, payload },
            SignalKind::Answer => ServerEvent::AnswerReceived { room_id, payload },
            SignalKind::IceCandidate => ServerEvent::IceCandidateReceived { room_id, payload },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    struct TestClient {
        conn: ConnectionHandle,
        rx: mpsc::Receiver<ServerEvent>,
    }

    fn test_client() -> TestClient {
        let (tx, rx) = mpsc::channel(32);
        TestClient {
            conn: ConnectionHandle::new(tx),
            rx,
        }
    }

    fn spawn_gateway() -> (GatewayHandle, mpsc::UnboundedReceiver<SessionNotice>) {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (handle, _task) = GatewayActor::spawn(
            "relay-test".to_string(),
            GatewayConfig::default(),
            RelayMetrics::new(),
            notice_tx,
        );
        (handle, notice_rx)
    }

    async fn recv(client: &mut TestClient) -> ServerEvent {
        timeout(Duration::from_secs(1), client.rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Skip presence broadcasts until a non-presence event arrives.
    async fn recv_non_presence(client: &mut TestClient) -> ServerEvent {
        loop {
            match recv(client).await {
                ServerEvent::PresenceChanged { .. } => continue,
                other => return other,
            }
        }
    }

    async fn register(gateway: &GatewayHandle, client: &TestClient, identity: &str, role: Role) {
        gateway
            .inbound(
                client.conn.clone(),
                ClientEvent::Register {
                    identity: identity.to_string(),
                    role,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_event_rejected() {
        let (gateway, _notices) = spawn_gateway();
        let mut client = test_client();

        gateway
            .inbound(client.conn.clone(), ClientEvent::CancelWait)
            .await
            .unwrap();

        match recv(&mut client).await {
            ServerEvent::Error { code, .. } => assert_eq!(code, 2),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_updates_presence_and_stats() {
        let (gateway, _notices) = spawn_gateway();
        let client = test_client();

        register(&gateway, &client, "alice", Role::PlainUser).await;

        let snapshot = gateway.presence("alice".to_string()).await.unwrap().unwrap();
        assert_eq!(snapshot.identity, "alice");
        assert_eq!(snapshot.status, PresenceStatus::Active);

        let stats = gateway.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
    }

    #[tokio::test]
    async fn test_reregistration_newest_wins() {
        let (gateway, _notices) = spawn_gateway();
        let old = test_client();
        let new = test_client();

        register(&gateway, &old, "alice", Role::PlainUser).await;
        register(&gateway, &new, "alice", Role::PlainUser).await;

        // Stale close of the superseded socket must not evict the new one.
        gateway.connection_closed(old.conn.id()).await.unwrap();

        let snapshot = gateway.presence("alice".to_string()).await.unwrap();
        assert!(snapshot.is_some());
        let stats = gateway.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
    }

    #[tokio::test]
    async fn test_match_with_available_helper() {
        let (gateway, mut notices) = spawn_gateway();
        let mut seeker = test_client();
        let mut helper = test_client();

        register(&gateway, &helper, "helper-1", Role::Helper).await;
        register(&gateway, &seeker, "seeker-1", Role::Seeker).await;

        gateway
            .inbound(
                seeker.conn.clone(),
                ClientEvent::RequestSupport {
                    meta: SeekerMeta::default(),
                },
            )
            .await
            .unwrap();

        let matched = recv_non_presence(&mut seeker).await;
        let ServerEvent::Matched { room_id, helper: meta } = matched else {
            panic!("expected matched, got {matched:?}");
        };
        assert_eq!(meta.identity, "helper-1");

        let started = recv_non_presence(&mut helper).await;
        let ServerEvent::SessionStarted {
            room_id: helper_room,
            seeker: seeker_id,
            ..
        } = started
        else {
            panic!("expected session_started, got {started:?}");
        };
        assert_eq!(helper_room, room_id);
        assert_eq!(seeker_id, "seeker-1");

        match notices.recv().await {
            Some(SessionNotice::Started { seeker, helper, .. }) => {
                assert_eq!(seeker, "seeker-1");
                assert_eq!(helper, "helper-1");
            }
            other => panic!("expected started notice, got {other:?}"),
        }

        // The helper is busy now; a second seeker queues.
        let mut second = test_client();
        register(&gateway, &second, "seeker-2", Role::Seeker).await;
        gateway
            .inbound(
                second.conn.clone(),
                ClientEvent::RequestSupport {
                    meta: SeekerMeta::default(),
                },
            )
            .await
            .unwrap();
        assert_eq!(recv_non_presence(&mut second).await, ServerEvent::Searching);
    }

    #[tokio::test]
    async fn test_queue_drained_when_helper_frees_up() {
        let (gateway, _notices) = spawn_gateway();
        let mut seeker = test_client();
        let mut helper = test_client();

        register(&gateway, &seeker, "seeker-1", Role::Seeker).await;
        gateway
            .inbound(
                seeker.conn.clone(),
                ClientEvent::RequestSupport {
                    meta: SeekerMeta::default(),
                },
            )
            .await
            .unwrap();
        assert_eq!(recv_non_presence(&mut seeker).await, ServerEvent::Searching);

        // Helper arrives later; the waiting seeker is matched immediately.
        register(&gateway, &helper, "helper-1", Role::Helper).await;

        match recv_non_presence(&mut seeker).await {
            ServerEvent::Matched { helper: meta, .. } => {
                assert_eq!(meta.identity, "helper-1");
            }
            other => panic!("expected matched, got {other:?}"),
        }

        let stats = gateway.stats().await.unwrap();
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.rooms, 1);
    }

    #[tokio::test]
    async fn test_invite_accept_creates_room_for_both() {
        let (gateway, mut notices) = spawn_gateway();
        let mut requester = test_client();
        let mut helper = test_client();

        register(&gateway, &requester, "user-1", Role::PlainUser).await;
        register(&gateway, &helper, "helper-1", Role::Helper).await;

        gateway
            .inbound(
                requester.conn.clone(),
                ClientEvent::InviteHelper {
                    helper: "helper-1".to_string(),
                    kind: InviteKind::Call,
                },
            )
            .await
            .unwrap();

        let incoming = recv_non_presence(&mut helper).await;
        let ServerEvent::InviteIncoming { request_id, from, .. } = incoming else {
            panic!("expected invite_incoming, got {incoming:?}");
        };
        assert_eq!(from, "user-1");
        assert!(matches!(
            recv_non_presence(&mut requester).await,
            ServerEvent::InviteForwarded { .. }
        ));

        gateway
            .inbound(
                helper.conn.clone(),
                ClientEvent::RespondToInvite {
                    request_id,
                    accept: true,
                },
            )
            .await
            .unwrap();

        let ServerEvent::InviteAccepted { room_id, .. } = recv_non_presence(&mut requester).await
        else {
            panic!("expected invite_accepted");
        };
        match recv_non_presence(&mut helper).await {
            ServerEvent::InviteAccepted { room_id: r, .. } => assert_eq!(r, room_id),
            other => panic!("expected invite_accepted, got {other:?}"),
        }

        assert!(matches!(
            notices.recv().await,
            Some(SessionNotice::Started { .. })
        ));

        // Duplicate response is rejected without a second room.
        gateway
            .inbound(
                helper.conn.clone(),
                ClientEvent::RespondToInvite {
                    request_id,
                    accept: false,
                },
            )
            .await
            .unwrap();
        let stats = gateway.stats().await.unwrap();
        assert_eq!(stats.rooms, 1);
        assert_eq!(stats.invites, 0);
    }

    #[tokio::test]
    async fn test_invite_to_unreachable_helper_fails() {
        let (gateway, _notices) = spawn_gateway();
        let mut requester = test_client();

        register(&gateway, &requester, "user-1", Role::PlainUser).await;
        gateway
            .inbound(
                requester.conn.clone(),
                ClientEvent::InviteHelper {
                    helper: "nobody".to_string(),
                    kind: InviteKind::Chat,
                },
            )
            .await
            .unwrap();

        match recv_non_presence(&mut requester).await {
            ServerEvent::InviteFailed { reason, .. } => {
                assert_eq!(reason, "helper unreachable");
            }
            other => panic!("expected invite_failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_and_signaling_relay() {
        let (gateway, _notices) = spawn_gateway();
        let mut caller = test_client();
        let mut callee = test_client();

        register(&gateway, &caller, "alice", Role::PlainUser).await;
        register(&gateway, &callee, "bob", Role::PlainUser).await;

        gateway
            .inbound(
                caller.conn.clone(),
                ClientEvent::CallUser {
                    to: "bob".to_string(),
                    room_id: None,
                },
            )
            .await
            .unwrap();

        let ServerEvent::IncomingCall { from, room_id } = recv_non_presence(&mut callee).await
        else {
            panic!("expected incoming_call");
        };
        assert_eq!(from, "alice");

        gateway
            .inbound(
                callee.conn.clone(),
                ClientEvent::JoinRoom {
                    room_id: room_id.clone(),
                },
            )
            .await
            .unwrap();

        let sdp = serde_json::json!({"sdp": "v=0..."});
        gateway
            .inbound(
                caller.conn.clone(),
                ClientEvent::Offer {
                    room_id: room_id.clone(),
                    payload: sdp.clone(),
                },
            )
            .await
            .unwrap();

        match recv_non_presence(&mut callee).await {
            ServerEvent::OfferReceived { payload, .. } => assert_eq!(payload, sdp),
            other => panic!("expected offer_received, got {other:?}"),
        }

        gateway
            .inbound(
                callee.conn.clone(),
                ClientEvent::Answer {
                    room_id: room_id.clone(),
                    payload: serde_json::json!({"sdp": "answer"}),
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            recv_non_presence(&mut caller).await,
            ServerEvent::AnswerReceived { .. }
        ));

        // End call notifies both sides and destroys the room.
        gateway
            .inbound(
                caller.conn.clone(),
                ClientEvent::EndCall {
                    room_id: room_id.clone(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            recv_non_presence(&mut caller).await,
            ServerEvent::CallEnded { .. }
        ));
        assert!(matches!(
            recv_non_presence(&mut callee).await,
            ServerEvent::CallEnded { .. }
        ));

        let stats = gateway.stats().await.unwrap();
        assert_eq!(stats.rooms, 0);
    }

    #[tokio::test]
    async fn test_signal_to_unknown_room_rejected() {
        let (gateway, _notices) = spawn_gateway();
        let mut client = test_client();

        register(&gateway, &client, "alice", Role::PlainUser).await;
        gateway
            .inbound(
                client.conn.clone(),
                ClientEvent::Offer {
                    room_id: "no-such-room".to_string(),
                    payload: serde_json::json!({}),
                },
            )
            .await
            .unwrap();

        match recv_non_presence(&mut client).await {
            ServerEvent::Error { code, .. } => assert_eq!(code, 4),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_notifies_room_peers_once() {
        let (gateway, _notices) = spawn_gateway();
        let mut seeker = test_client();
        let mut helper = test_client();

        register(&gateway, &helper, "helper-1", Role::Helper).await;
        register(&gateway, &seeker, "seeker-1", Role::Seeker).await;
        gateway
            .inbound(
                seeker.conn.clone(),
                ClientEvent::RequestSupport {
                    meta: SeekerMeta::default(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            recv_non_presence(&mut seeker).await,
            ServerEvent::Matched { .. }
        ));
        assert!(matches!(
            recv_non_presence(&mut helper).await,
            ServerEvent::SessionStarted { .. }
        ));

        gateway.connection_closed(seeker.conn.id()).await.unwrap();

        match recv_non_presence(&mut helper).await {
            ServerEvent::PeerDisconnected { identity, .. } => {
                assert_eq!(identity, "seeker-1");
            }
            other => panic!("expected peer_disconnected, got {other:?}"),
        }

        let stats = gateway.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        // Room survives with the helper still in it.
        assert_eq!(stats.rooms, 1);
    }

    #[tokio::test]
    async fn test_queued_seeker_disconnect_leaves_queue() {
        let (gateway, _notices) = spawn_gateway();
        let mut seeker = test_client();

        register(&gateway, &seeker, "seeker-1", Role::Seeker).await;
        gateway
            .inbound(
                seeker.conn.clone(),
                ClientEvent::RequestSupport {
                    meta: SeekerMeta::default(),
                },
            )
            .await
            .unwrap();
        assert_eq!(recv_non_presence(&mut seeker).await, ServerEvent::Searching);

        gateway.connection_closed(seeker.conn.id()).await.unwrap();

        let stats = gateway.stats().await.unwrap();
        assert_eq!(stats.waiting, 0);
    }

    #[tokio::test]
    async fn test_helper_disconnect_fails_forwarded_invites() {
        let (gateway, _notices) = spawn_gateway();
        let mut requester = test_client();
        let mut helper = test_client();

        register(&gateway, &requester, "user-1", Role::PlainUser).await;
        register(&gateway, &helper, "helper-1", Role::Helper).await;

        gateway
            .inbound(
                requester.conn.clone(),
                ClientEvent::InviteHelper {
                    helper: "helper-1".to_string(),
                    kind: InviteKind::Chat,
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            recv_non_presence(&mut helper).await,
            ServerEvent::InviteIncoming { .. }
        ));
        assert!(matches!(
            recv_non_presence(&mut requester).await,
            ServerEvent::InviteForwarded { .. }
        ));

        gateway.connection_closed(helper.conn.id()).await.unwrap();

        match recv_non_presence(&mut requester).await {
            ServerEvent::InviteFailed { reason, .. } => {
                assert_eq!(reason, "helper disconnected");
            }
            other => panic!("expected invite_failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_availability_flip_rejected_for_non_helper() {
        let (gateway, _notices) = spawn_gateway();
        let mut client = test_client();

        register(&gateway, &client, "alice", Role::Seeker).await;
        gateway
            .inbound(
                client.conn.clone(),
                ClientEvent::SetAvailability {
                    available: true,
                    skills: Vec::new(),
                },
            )
            .await
            .unwrap();

        match recv_non_presence(&mut client).await {
            ServerEvent::Error { code, .. } => assert_eq!(code, 5),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ringing_room_expires() {
        let (gateway, _notices) = spawn_gateway();
        let mut caller = test_client();
        let callee = test_client();

        register(&gateway, &caller, "alice", Role::PlainUser).await;
        register(&gateway, &callee, "bob", Role::PlainUser).await;

        gateway
            .inbound(
                caller.conn.clone(),
                ClientEvent::CallUser {
                    to: "bob".to_string(),
                    room_id: None,
                },
            )
            .await
            .unwrap();

        // Let the call message land before advancing past the ring deadline.
        let stats = gateway.stats().await.unwrap();
        assert_eq!(stats.rooms, 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        let stats = gateway.stats().await.unwrap();
        assert_eq!(stats.rooms, 0);

        loop {
            match recv_non_presence(&mut caller).await {
                ServerEvent::CallEnded { .. } => break,
                other => panic!("expected call_ended, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarded_invite_expires() {
        let (gateway, _notices) = spawn_gateway();
        let mut requester = test_client();
        let mut helper = test_client();

        register(&gateway, &requester, "user-1", Role::PlainUser).await;
        register(&gateway, &helper, "helper-1", Role::Helper).await;

        gateway
            .inbound(
                requester.conn.clone(),
                ClientEvent::InviteHelper {
                    helper: "helper-1".to_string(),
                    kind: InviteKind::Call,
                },
            )
            .await
            .unwrap();
        let ServerEvent::InviteIncoming { request_id, .. } = recv_non_presence(&mut helper).await
        else {
            panic!("expected invite_incoming");
        };
        assert!(matches!(
            recv_non_presence(&mut requester).await,
            ServerEvent::InviteForwarded { .. }
        ));

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        match recv_non_presence(&mut requester).await {
            ServerEvent::InviteFailed { reason, .. } => {
                assert_eq!(reason, "invite timed out");
            }
            other => panic!("expected invite_failed, got {other:?}"),
        }

        // A late accept of the expired invite is ignored.
        gateway
            .inbound(
                helper.conn.clone(),
                ClientEvent::RespondToInvite {
                    request_id,
                    accept: true,
                },
            )
            .await
            .unwrap();
        let stats = gateway.stats().await.unwrap();
        assert_eq!(stats.rooms, 0);
    }

    #[tokio::test]
    async fn test_call_to_unreachable_target_fails() {
        let (gateway, _notices) = spawn_gateway();
        let mut caller = test_client();

        register(&gateway, &caller, "alice", Role::PlainUser).await;
        gateway
            .inbound(
                caller.conn.clone(),
                ClientEvent::CallUser {
                    to: "nobody".to_string(),
                    room_id: None,
                },
            )
            .await
            .unwrap();

        match recv_non_presence(&mut caller).await {
            ServerEvent::CallFailed { reason } => {
                assert_eq!(reason, RelayError::TargetUnreachable.client_message());
            }
            other => panic!("expected call_failed, got {other:?}"),
        }

        let stats = gateway.stats().await.unwrap();
        assert_eq!(stats.rooms, 0);
    }

    #[tokio::test]
    async fn test_cancellation_notifies_clients_of_draining() {
        let (gateway, _notices) = spawn_gateway();
        let mut client = test_client();

        register(&gateway, &client, "alice", Role::PlainUser).await;

        gateway.cancel();

        match recv_non_presence(&mut client).await {
            ServerEvent::Error { code, message } => {
                assert_eq!(code, RelayError::Draining.error_code());
                assert_eq!(message, RelayError::Draining.client_message());
            }
            other => panic!("expected draining error, got {other:?}"),
        }
    }
}
