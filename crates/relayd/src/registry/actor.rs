//! Registry actor - owns the live membership and processes commands.
//!
//! The RegistryActor is the single owner of membership state. Commands are
//! processed one at a time, which makes every command one critical section:
//! no other command can observe a join or leave without the paired leader
//! recomputation and notices having been queued as well.
//!
//! Notices are handed to each member's outbound queue without waiting on
//! the socket, so the actor never blocks on I/O.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Delivery failures are logged and close the failing member only

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use relay_core::{select_leader, SessionId, Username};
use relay_protocol::{private_from, private_to, welcome_lines, ServerNotice};

use super::commands::{LeaveReason, MembershipEvent, RegistryCommand, RegistryError, Roster};
use crate::session::Session;

/// Default maximum number of members.
pub const DEFAULT_MAX_SESSIONS: usize = 100;

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all membership state.
///
/// Members are kept in a plain vector in join order. Lookups are linear
/// scans, which is fine for chat-sized membership.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Live members in join order
    members: Vec<Session>,

    /// Current leader, recomputed on every membership change
    leader: Option<SessionId>,

    /// Capacity limit
    max_sessions: usize,

    /// Event publisher for in-process observers
    event_publisher: broadcast::Sender<MembershipEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `event_publisher` - Broadcast channel for publishing events
    /// * `max_sessions` - Capacity limit for live members
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<MembershipEvent>,
        max_sessions: usize,
    ) -> Self {
        Self {
            receiver,
            members: Vec::new(),
            leader: None,
            max_sessions,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!(max_sessions = self.max_sessions, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(members = self.members.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                session,
                respond_to,
            } => {
                let result = self.handle_register(*session);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Unregister {
                session_id,
                reason,
                respond_to,
            } => {
                let removed = self.handle_unregister(session_id, reason);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.roster());
            }
            RegistryCommand::Broadcast {
                from,
                line,
                respond_to,
            } => {
                let delivered = self.handle_broadcast(from, &line);
                let _ = respond_to.send(delivered);
            }
            RegistryCommand::SendPrivate {
                from,
                target,
                text,
                respond_to,
            } => {
                let result = self.handle_send_private(from, &target, &text);
                let _ = respond_to.send(result);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Atomic check-and-add.
    ///
    /// On success the new member receives the welcome block first, then the
    /// leader is recomputed (announcing a change to everyone), then the
    /// other members learn about the join.
    fn handle_register(&mut self, session: Session) -> Result<(), RegistryError> {
        let name = session.username().clone();

        if self.members.len() >= self.max_sessions {
            warn!(
                username = %name,
                current = self.members.len(),
                max = self.max_sessions,
                "Registry is full, rejecting registration"
            );
            return Err(RegistryError::RegistryFull {
                max: self.max_sessions,
            });
        }

        if self.find_by_name(name.as_str()).is_some() {
            debug!(username = %name, "Username taken, rejecting registration");
            return Err(RegistryError::NameTaken(name.to_string()));
        }

        let session_id = session.id();
        self.members.push(session);

        info!(
            session_id = %session_id,
            username = %name,
            total_members = self.members.len(),
            "Session registered"
        );

        let _ = self.event_publisher.send(MembershipEvent::Joined {
            session_id,
            username: name.clone(),
        });

        let next_leader = self.compute_leader();
        let leader_name = next_leader.and_then(|id| self.find(id)).map(|m| m.username().clone());
        if let Some(member) = self.find(session_id) {
            let lines = welcome_lines(&name, leader_name.as_ref());
            if let Err(e) = member.deliver_lines(&lines) {
                debug!(session_id = %session_id, error = %e, "Failed to deliver welcome");
            }
        }

        self.apply_leader(next_leader);
        self.notify_except(session_id, &ServerNotice::Joined(name.to_string()).to_string());

        Ok(())
    }

    /// Idempotent removal. Returns true if the session was a member.
    fn handle_unregister(&mut self, session_id: SessionId, reason: LeaveReason) -> bool {
        let Some(index) = self.members.iter().position(|m| m.id() == session_id) else {
            debug!(session_id = %session_id, "Unregister for non-member ignored");
            return false;
        };

        let session = self.members.remove(index);
        let name = session.username().clone();
        let connected_secs = (chrono::Utc::now() - session.joined_at()).num_seconds();
        drop(session);

        info!(
            session_id = %session_id,
            username = %name,
            reason = %reason,
            connected_secs,
            total_members = self.members.len(),
            "Session removed"
        );

        let _ = self.event_publisher.send(MembershipEvent::Left {
            session_id,
            username: name.clone(),
            reason,
        });

        let next_leader = self.compute_leader();
        self.apply_leader(next_leader);
        self.notify_all(&ServerNotice::Left(name.to_string()).to_string());

        true
    }

    /// Delivers `line` to every member except `from`.
    ///
    /// Returns the number of members the line was queued for. A failed
    /// delivery closes that member and moves on.
    fn handle_broadcast(&self, from: SessionId, line: &str) -> usize {
        self.notify_except(from, line)
    }

    fn handle_send_private(
        &self,
        from: SessionId,
        target: &str,
        text: &str,
    ) -> Result<(), RegistryError> {
        let sender = self.find(from).ok_or(RegistryError::NotRegistered(from))?;
        let recipient = self
            .find_by_name(target)
            .ok_or_else(|| RegistryError::UserNotFound(target.to_string()))?;

        if let Err(e) = recipient.deliver(private_from(sender.username(), text)) {
            debug!(
                session_id = %recipient.id(),
                error = %e,
                "Failed to deliver private message"
            );
        }
        if let Err(e) = sender.deliver(private_to(target, text)) {
            debug!(session_id = %from, error = %e, "Failed to deliver private confirmation");
        }

        debug!(from = %sender.username(), to = %recipient.username(), "Private message delivered");
        Ok(())
    }

    // ========================================================================
    // Leader Selection
    // ========================================================================

    /// Runs leader selection over the current members.
    fn compute_leader(&self) -> Option<SessionId> {
        select_leader(self.members.iter().map(Session::username))
            .and_then(|name| self.members.iter().find(|m| m.username() == name))
            .map(Session::id)
    }

    /// Stores the new leader and announces it to everyone if it changed.
    fn apply_leader(&mut self, next: Option<SessionId>) {
        if next == self.leader {
            return;
        }
        self.leader = next;

        let name = next.and_then(|id| self.find(id)).map(|m| m.username().clone());
        match &name {
            Some(leader) => {
                info!(leader = %leader, "New leader elected");
                self.notify_all(&ServerNotice::NewLeader(leader.to_string()).to_string());
            }
            None => debug!("Registry empty, no leader"),
        }

        let _ = self
            .event_publisher
            .send(MembershipEvent::LeaderChanged { leader: name });
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn roster(&self) -> Roster {
        Roster {
            members: self.members.iter().map(|m| m.username().clone()).collect(),
            leader: self.leader_name().cloned(),
        }
    }

    fn leader_name(&self) -> Option<&Username> {
        self.leader.and_then(|id| self.find(id)).map(Session::username)
    }

    fn find(&self, session_id: SessionId) -> Option<&Session> {
        self.members.iter().find(|m| m.id() == session_id)
    }

    fn find_by_name(&self, name: &str) -> Option<&Session> {
        self.members.iter().find(|m| m.username().eq_ignore_case(name))
    }

    /// Returns the number of live members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    fn notify_all(&self, line: &str) -> usize {
        self.deliver_where(line, |_| true)
    }

    fn notify_except(&self, excluded: SessionId, line: &str) -> usize {
        self.deliver_where(line, |m| m.id() != excluded)
    }

    fn deliver_where(&self, line: &str, include: impl Fn(&Session) -> bool) -> usize {
        let mut delivered = 0;
        for member in self.members.iter().filter(|m| include(m)) {
            match member.deliver(line) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(
                        session_id = %member.id(),
                        username = %member.username(),
                        error = %e,
                        "Delivery failed, member will be dropped"
                    );
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{spawn_writer, Outbox};
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    /// Creates an actor that is driven directly through `handle_command`.
    fn create_actor(max: usize) -> (RegistryActor, broadcast::Receiver<MembershipEvent>) {
        let (_tx, rx) = mpsc::channel(10);
        let (event_tx, event_rx) = broadcast::channel(64);
        (RegistryActor::new(rx, event_tx, max), event_rx)
    }

    struct Member {
        session: Session,
        lines: Lines<BufReader<DuplexStream>>,
    }

    fn member(id: u64, name: &str) -> Member {
        let (client, server) = tokio::io::duplex(4096);
        let (outbox, _task): (Outbox, _) =
            spawn_writer(server, SessionId::new(id), 32, CancellationToken::new());
        Member {
            session: Session::new(SessionId::new(id), Username::parse(name).unwrap(), outbox),
            lines: BufReader::new(client).lines(),
        }
    }

    impl Member {
        async fn next(&mut self) -> String {
            self.lines.next_line().await.unwrap().unwrap()
        }

        /// Reads lines until `expected` shows up, returning what was skipped.
        async fn skip_until(&mut self, expected: &str) -> Vec<String> {
            let mut skipped = Vec::new();
            loop {
                let line = self.next().await;
                if line == expected {
                    return skipped;
                }
                skipped.push(line);
            }
        }
    }

    async fn register(actor: &mut RegistryActor, member: &Member) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Register {
            session: Box::new(member.session.clone()),
            respond_to: tx,
        });
        rx.await.unwrap()
    }

    async fn unregister(actor: &mut RegistryActor, id: u64) -> bool {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Unregister {
            session_id: SessionId::new(id),
            reason: LeaveReason::Disconnected,
            respond_to: tx,
        });
        rx.await.unwrap()
    }

    async fn snapshot(actor: &mut RegistryActor) -> Roster {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Snapshot { respond_to: tx });
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_first_member_is_welcomed_and_leads() {
        let (mut actor, mut events) = create_actor(10);
        let mut alice = member(1, "alice");

        register(&mut actor, &alice).await.unwrap();

        assert_eq!(alice.next().await, "SERVER: Welcome alice");
        assert_eq!(alice.next().await, "SERVER: Commands:");
        assert_eq!(alice.next().await, "SERVER: - @username message (private message)");
        assert_eq!(alice.next().await, "SERVER: - LIST (show online users)");
        assert_eq!(alice.next().await, "SERVER: Current leader is alice");
        assert_eq!(alice.next().await, "SERVER: New leader elected - alice");

        assert!(matches!(events.try_recv().unwrap(), MembershipEvent::Joined { .. }));
        assert_eq!(
            events.try_recv().unwrap(),
            MembershipEvent::LeaderChanged {
                leader: Some(Username::parse("alice").unwrap())
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_ignoring_case() {
        let (mut actor, mut events) = create_actor(10);
        let alice = member(1, "alice");
        let impostor = member(2, "ALICE");

        register(&mut actor, &alice).await.unwrap();
        while events.try_recv().is_ok() {}

        let result = register(&mut actor, &impostor).await;
        assert_eq!(result, Err(RegistryError::NameTaken("ALICE".to_string())));
        assert_eq!(actor.member_count(), 1);
        assert!(events.try_recv().is_err(), "rejection must not emit events");
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let (mut actor, _events) = create_actor(1);
        register(&mut actor, &member(1, "alice")).await.unwrap();

        let result = register(&mut actor, &member(2, "bob")).await;
        assert_eq!(result, Err(RegistryError::RegistryFull { max: 1 }));
        assert_eq!(actor.member_count(), 1);
    }

    #[tokio::test]
    async fn test_join_notice_goes_to_others_only() {
        let (mut actor, _events) = create_actor(10);
        let mut zoe = member(1, "zoe");
        let mut bob = member(2, "bob");

        register(&mut actor, &zoe).await.unwrap();
        register(&mut actor, &bob).await.unwrap();

        let skipped = zoe.skip_until("SERVER: bob has joined the chat").await;
        assert!(skipped.iter().all(|l| !l.contains("bob")));

        // bob is not the leader, so no leader change; his welcome names zoe
        let welcome = bob.skip_until("SERVER: Current leader is zoe").await;
        assert_eq!(welcome.len(), 4);

        unregister(&mut actor, 1).await;
        let after = bob.skip_until("SERVER: zoe has left the chat").await;
        assert_eq!(after, vec!["SERVER: New leader elected - bob"]);
    }

    #[tokio::test]
    async fn test_leader_change_announced_to_everyone() {
        let (mut actor, _events) = create_actor(10);
        let mut alice = member(1, "alice");
        let mut zed = member(2, "Zed");

        register(&mut actor, &alice).await.unwrap();
        register(&mut actor, &zed).await.unwrap();

        let skipped = alice.skip_until("SERVER: New leader elected - Zed").await;
        assert_eq!(skipped.last().unwrap(), "SERVER: New leader elected - alice");
        assert_eq!(alice.next().await, "SERVER: Zed has joined the chat");

        zed.skip_until("SERVER: New leader elected - Zed").await;
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let (mut actor, _events) = create_actor(10);
        register(&mut actor, &member(1, "alice")).await.unwrap();

        assert!(unregister(&mut actor, 1).await);
        assert!(!unregister(&mut actor, 1).await);
        assert_eq!(actor.member_count(), 0);

        let roster = snapshot(&mut actor).await;
        assert!(roster.is_empty());
        assert!(roster.leader.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_keeps_join_order() {
        let (mut actor, _events) = create_actor(10);
        for (id, name) in [(1, "mallory"), (2, "Trent"), (3, "alice")] {
            register(&mut actor, &member(id, name)).await.unwrap();
        }

        let roster = snapshot(&mut actor).await;
        let names: Vec<&str> = roster.members.iter().map(Username::as_str).collect();
        assert_eq!(names, vec!["mallory", "Trent", "alice"]);
        assert_eq!(roster.leader.unwrap().as_str(), "Trent");
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let (mut actor, _events) = create_actor(10);
        let mut alice = member(1, "alice");
        let mut bob = member(2, "bob");
        let mut carol = member(3, "carol");
        for m in [&alice, &bob, &carol] {
            register(&mut actor, m).await.unwrap();
        }

        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Broadcast {
            from: SessionId::new(1),
            line: "alice: hi".to_string(),
            respond_to: tx,
        });
        assert_eq!(rx.await.unwrap(), 2);

        bob.skip_until("alice: hi").await;
        carol.skip_until("alice: hi").await;

        // alice's last line is the join notice for carol, nothing after it
        alice.skip_until("SERVER: carol has joined the chat").await;
        drop(actor);
        drop(alice.session);
        assert!(alice.lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_private_message_routing() {
        let (mut actor, _events) = create_actor(10);
        let mut alice = member(1, "alice");
        let mut bob = member(2, "Bob");
        register(&mut actor, &alice).await.unwrap();
        register(&mut actor, &bob).await.unwrap();

        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::SendPrivate {
            from: SessionId::new(1),
            target: "bob".to_string(),
            text: "hello".to_string(),
            respond_to: tx,
        });
        assert_eq!(rx.await.unwrap(), Ok(()));

        bob.skip_until("[PM from alice]: hello").await;
        alice.skip_until("[PM to bob]: hello").await;
    }

    #[tokio::test]
    async fn test_private_message_unknown_target() {
        let (mut actor, _events) = create_actor(10);
        register(&mut actor, &member(1, "alice")).await.unwrap();

        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::SendPrivate {
            from: SessionId::new(1),
            target: "ghost".to_string(),
            text: "hi".to_string(),
            respond_to: tx,
        });
        assert_eq!(
            rx.await.unwrap(),
            Err(RegistryError::UserNotFound("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn test_failed_delivery_closes_only_that_member() {
        let (mut actor, _events) = create_actor(10);
        let alice = member(1, "alice");
        let mut bob = member(2, "bob");
        let carol = member(3, "carol");
        register(&mut actor, &alice).await.unwrap();
        register(&mut actor, &bob).await.unwrap();
        register(&mut actor, &carol).await.unwrap();

        // carol's client goes away; her writer fails on the next write
        drop(carol.lines);
        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Broadcast {
            from: SessionId::new(1),
            line: "alice: anyone?".to_string(),
            respond_to: tx,
        });
        rx.await.unwrap();

        bob.skip_until("alice: anyone?").await;
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !carol.session.is_closing() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("carol should be marked for teardown");
        assert!(!bob.session.is_closing());
        assert!(!alice.session.is_closing());
    }
}
