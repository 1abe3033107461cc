//! Integration tests for the Registry Actor.
//!
//! These tests drive the registry through `spawn_registry()` and the
//! `RegistryHandle` interface, with each member's outbound queue backed by
//! an in-memory duplex stream so delivered lines can be read back.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::time::Duration;

use relay_core::{SessionId, Username};
use relayd::registry::{spawn_registry, LeaveReason, MembershipEvent, RegistryError, RegistryHandle};
use relayd::session::{spawn_writer, Session};
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Helpers
// ============================================================================

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// A registered member plus the client end of its outbound stream.
struct Member {
    session: Session,
    lines: Lines<BufReader<DuplexStream>>,
}

impl Member {
    fn new(id: u64, name: &str) -> Self {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let (outbox, _writer) =
            spawn_writer(server, SessionId::new(id), 64, CancellationToken::new());
        let username = Username::parse(name).expect("valid username");
        Self {
            session: Session::new(SessionId::new(id), username, outbox),
            lines: BufReader::new(client).lines(),
        }
    }

    fn id(&self) -> SessionId {
        self.session.id()
    }

    async fn join(handle: &RegistryHandle, id: u64, name: &str) -> Self {
        let member = Self::new(id, name);
        handle
            .register(member.session.clone())
            .await
            .expect("registration should succeed");
        member
    }

    async fn recv(&mut self) -> String {
        timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .expect("read failed")
            .expect("stream ended")
    }

    /// Reads until `expected` arrives and returns the lines skipped on the way.
    async fn skip_until(&mut self, expected: &str) -> Vec<String> {
        let mut skipped = Vec::new();
        loop {
            let line = self.recv().await;
            if line == expected {
                return skipped;
            }
            skipped.push(line);
        }
    }

    /// Asserts nothing is waiting to be read.
    async fn assert_quiet(&mut self) {
        let result = timeout(Duration::from_millis(50), self.lines.next_line()).await;
        assert!(result.is_err(), "unexpected line: {result:?}");
    }
}

fn names(roster: &relayd::registry::Roster) -> Vec<&str> {
    roster.members.iter().map(Username::as_str).collect()
}

// ============================================================================
// Membership
// ============================================================================

#[tokio::test]
async fn test_snapshot_after_distinct_joins() {
    let handle = spawn_registry(10);
    let _alice = Member::join(&handle, 1, "alice").await;
    let _zed = Member::join(&handle, 2, "Zed").await;
    let _bob = Member::join(&handle, 3, "bob").await;

    let roster = handle.snapshot().await;
    assert_eq!(names(&roster), vec!["alice", "Zed", "bob"]);
    assert_eq!(roster.leader.as_ref().map(Username::as_str), Some("Zed"));
    assert_eq!(
        roster.lines(),
        vec![
            "SERVER: Online users (3):",
            "- alice",
            "- Zed (Leader)",
            "- bob",
        ]
    );
}

#[tokio::test]
async fn test_duplicate_join_has_no_effect() {
    let handle = spawn_registry(10);
    let mut alice = Member::join(&handle, 1, "alice").await;
    alice.skip_until("SERVER: New leader elected - alice").await;

    let mut events = handle.subscribe();
    let impostor = Member::new(2, "ALICE");
    let result = handle.register(impostor.session.clone()).await;
    assert_eq!(result, Err(RegistryError::NameTaken("ALICE".to_string())));

    assert_eq!(handle.snapshot().await.len(), 1);
    assert!(events.try_recv().is_err(), "rejected join published an event");
    alice.assert_quiet().await;
}

#[tokio::test]
async fn test_capacity_limit() {
    let handle = spawn_registry(2);
    let _a = Member::join(&handle, 1, "a").await;
    let _b = Member::join(&handle, 2, "b").await;

    let c = Member::new(3, "c");
    assert_eq!(
        handle.register(c.session.clone()).await,
        Err(RegistryError::RegistryFull { max: 2 })
    );

    assert!(handle.unregister(SessionId::new(1), LeaveReason::Disconnected).await);
    handle
        .register(c.session.clone())
        .await
        .expect("room after a leave");
}

#[tokio::test]
async fn test_unregister_is_idempotent() {
    let handle = spawn_registry(10);
    let alice = Member::join(&handle, 1, "alice").await;

    assert!(handle.unregister(alice.id(), LeaveReason::Disconnected).await);
    assert!(!handle.unregister(alice.id(), LeaveReason::Disconnected).await);
    assert!(handle.snapshot().await.is_empty());
}

// ============================================================================
// Leader
// ============================================================================

#[tokio::test]
async fn test_leader_removal_recomputes_before_leave_notice() {
    let handle = spawn_registry(10);
    let mut alice = Member::join(&handle, 1, "alice").await;
    let mut bob = Member::join(&handle, 2, "bob").await;
    let zoe = Member::join(&handle, 3, "zoe").await;
    alice.skip_until("SERVER: zoe has joined the chat").await;
    bob.skip_until("SERVER: zoe has joined the chat").await;

    assert!(handle.unregister(zoe.id(), LeaveReason::Disconnected).await);

    for member in [&mut alice, &mut bob] {
        assert_eq!(member.recv().await, "SERVER: New leader elected - bob");
        assert_eq!(member.recv().await, "SERVER: zoe has left the chat");
    }

    let roster = handle.snapshot().await;
    assert_eq!(roster.leader.as_ref().map(Username::as_str), Some("bob"));
}

#[tokio::test]
async fn test_leader_unchanged_is_not_announced() {
    let handle = spawn_registry(10);
    let mut zoe = Member::join(&handle, 1, "zoe").await;
    zoe.skip_until("SERVER: New leader elected - zoe").await;

    let alice = Member::join(&handle, 2, "alice").await;
    assert_eq!(zoe.recv().await, "SERVER: alice has joined the chat");

    handle.unregister(alice.id(), LeaveReason::Disconnected).await;
    assert_eq!(zoe.recv().await, "SERVER: alice has left the chat");
    zoe.assert_quiet().await;
}

#[tokio::test]
async fn test_membership_events() {
    let handle = spawn_registry(10);
    let mut events = handle.subscribe();

    let alice = Member::join(&handle, 1, "alice").await;
    handle.unregister(alice.id(), LeaveReason::DeliveryFailed).await;

    let alice_name = Username::parse("alice").unwrap();
    let expected = vec![
        MembershipEvent::Joined {
            session_id: SessionId::new(1),
            username: alice_name.clone(),
        },
        MembershipEvent::LeaderChanged {
            leader: Some(alice_name.clone()),
        },
        MembershipEvent::Left {
            session_id: SessionId::new(1),
            username: alice_name,
            reason: LeaveReason::DeliveryFailed,
        },
        MembershipEvent::LeaderChanged { leader: None },
    ];

    for want in expected {
        let got = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
        assert_eq!(got, want);
    }
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn test_broadcast_excludes_sender() {
    let handle = spawn_registry(10);
    let mut alice = Member::join(&handle, 1, "alice").await;
    let mut bob = Member::join(&handle, 2, "bob").await;
    alice.skip_until("SERVER: bob has joined the chat").await;
    bob.skip_until("SERVER: New leader elected - bob").await;

    let delivered = handle.broadcast(alice.id(), "alice: hi").await.unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(bob.recv().await, "alice: hi");
    alice.assert_quiet().await;
}

#[tokio::test]
async fn test_private_message_and_unknown_target() {
    let handle = spawn_registry(10);
    let mut alice = Member::join(&handle, 1, "alice").await;
    let mut bob = Member::join(&handle, 2, "Bob").await;
    alice.skip_until("SERVER: Bob has joined the chat").await;
    bob.skip_until("SERVER: New leader elected - Bob").await;

    handle.send_private(alice.id(), "bob", "hello").await.unwrap();
    assert_eq!(bob.recv().await, "[PM from alice]: hello");
    assert_eq!(alice.recv().await, "[PM to bob]: hello");

    assert_eq!(
        handle.send_private(alice.id(), "ghost", "hi").await,
        Err(RegistryError::UserNotFound("ghost".to_string()))
    );
    bob.assert_quiet().await;
}

#[tokio::test]
async fn test_cloned_handles_share_state() {
    let handle = spawn_registry(10);
    let other = handle.clone();
    assert!(other.is_connected());

    let _alice = Member::join(&handle, 1, "alice").await;
    let roster = other.snapshot().await;
    assert_eq!(names(&roster), vec!["alice"]);
}
