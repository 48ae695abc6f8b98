/// Subscription lifecycle tests: join/leave pairing across navigation events
mod common;

use common::{eventually, manager, FakeSession, MemoryTransport, ScriptedAuthorizer, ServerScript, Wire};
use estate_realtime::channel::protocol::CONVERSATION_LIST_NAMESPACE;
use estate_realtime::channel::EventHandlers;
use estate_realtime::{ActivationPolicy, ConversationId, Owner, SubscriptionController, SubscriptionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const USER_CHANNEL: &str = "private-conversation-list.user.7";

fn list_controller(
    manager: Arc<estate_realtime::channel::ConnectionManager>,
    session: Arc<FakeSession>,
) -> SubscriptionController {
    SubscriptionController::new(
        manager,
        session,
        CONVERSATION_LIST_NAMESPACE,
        Owner::CurrentUser,
        ActivationPolicy::EveryFocus,
        EventHandlers::new(),
    )
}

#[tokio::test]
async fn missing_session_skips_subscription() {
    let transport = MemoryTransport::new();
    let manager = manager(transport.clone(), ScriptedAuthorizer::new());
    let controller = list_controller(manager.clone(), FakeSession::signed_out());

    assert_eq!(controller.activate().await, SubscriptionState::Idle);
    assert_eq!(controller.state().await, SubscriptionState::Idle);
    assert_eq!(transport.opens(), 0);
    assert_eq!(manager.connect_count(), 0);

    // Teardown without a join is a no-op
    controller.deactivate().await;
    assert!(transport.log().is_empty());
}

#[tokio::test]
async fn activate_is_idempotent_and_leave_happens_once() {
    let transport = MemoryTransport::new();
    let manager = manager(transport.clone(), ScriptedAuthorizer::new());
    let controller = list_controller(manager, FakeSession::signed_in(7, "t"));

    assert_eq!(controller.activate().await, SubscriptionState::Subscribed);
    assert_eq!(
        controller.channel_name().await.as_deref(),
        Some("conversation-list.user.7")
    );
    assert_eq!(controller.activate().await, SubscriptionState::Subscribed);
    assert_eq!(transport.joins(USER_CHANNEL), 1);

    controller.deactivate().await;
    controller.deactivate().await;
    assert_eq!(controller.state().await, SubscriptionState::Idle);
    assert!(controller.channel_name().await.is_none());
    assert!(eventually(|| transport.leaves(USER_CHANNEL) == 1).await);
    sleep(Duration::from_millis(30)).await;
    assert_eq!(transport.leaves(USER_CHANNEL), 1);
}

#[tokio::test]
async fn focus_blur_cycles_pair_every_join_with_a_leave() {
    let transport = MemoryTransport::new();
    let manager = manager(transport.clone(), ScriptedAuthorizer::new());
    let controller = list_controller(manager.clone(), FakeSession::signed_in(7, "t"));

    assert_eq!(controller.on_mount().await, SubscriptionState::Idle);
    for _ in 0..3 {
        assert_eq!(controller.on_focus().await, SubscriptionState::Subscribed);
        controller.on_blur().await;
    }
    controller.on_unmount().await;

    assert!(eventually(|| transport.leaves(USER_CHANNEL) == 3).await);
    let expected: Vec<Wire> = (0..3)
        .flat_map(|_| [Wire::Join(USER_CHANNEL.into()), Wire::Leave(USER_CHANNEL.into())])
        .collect();
    assert_eq!(transport.log(), expected);
    // The shared connection outlives the screen
    assert!(manager.is_connected().await);
    assert_eq!(transport.opens(), 1);
}

#[tokio::test]
async fn deactivate_during_join_leaves_once_the_join_lands() {
    let transport = MemoryTransport::with_script(ServerScript {
        join_delay: Duration::from_millis(150),
        ..Default::default()
    });
    let manager = manager(transport.clone(), ScriptedAuthorizer::new());
    let controller = Arc::new(list_controller(manager.clone(), FakeSession::signed_in(7, "t")));

    let activation = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.activate().await })
    };
    assert!(eventually(|| transport.joins(USER_CHANNEL) == 1).await);
    assert_eq!(controller.state().await, SubscriptionState::Resolving);

    controller.deactivate().await;
    assert_eq!(controller.state().await, SubscriptionState::Idle);
    assert_eq!(transport.leaves(USER_CHANNEL), 0);

    assert_eq!(activation.await.unwrap(), SubscriptionState::Idle);
    assert!(eventually(|| transport.leaves(USER_CHANNEL) == 1).await);
    assert_eq!(
        transport.log(),
        vec![Wire::Join(USER_CHANNEL.into()), Wire::Leave(USER_CHANNEL.into())]
    );
    let connection = manager.get_connection().await.unwrap();
    assert!(connection.channels().await.is_empty());
}

#[tokio::test]
async fn refocus_waits_for_the_previous_leave() {
    let transport = MemoryTransport::with_script(ServerScript {
        join_delay: Duration::from_millis(100),
        ..Default::default()
    });
    let manager = manager(transport.clone(), ScriptedAuthorizer::new());
    let controller = Arc::new(list_controller(manager, FakeSession::signed_in(7, "t")));

    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.on_focus().await })
    };
    assert!(eventually(|| transport.joins(USER_CHANNEL) == 1).await);
    controller.on_blur().await;

    // Queued behind the first activation's late leave
    assert_eq!(controller.on_focus().await, SubscriptionState::Subscribed);
    assert_eq!(first.await.unwrap(), SubscriptionState::Idle);

    assert_eq!(
        transport.log(),
        vec![
            Wire::Join(USER_CHANNEL.into()),
            Wire::Leave(USER_CHANNEL.into()),
            Wire::Join(USER_CHANNEL.into()),
        ]
    );
}

#[tokio::test]
async fn auth_failure_degrades_without_leaking() {
    let transport = MemoryTransport::new();
    let authorizer = ScriptedAuthorizer::denying(&[USER_CHANNEL]);
    let manager = manager(transport.clone(), authorizer);
    let controller = list_controller(manager.clone(), FakeSession::signed_in(7, "t"));

    assert_eq!(controller.activate().await, SubscriptionState::Failed);
    assert!(controller.last_error().await.is_some());
    assert!(controller.channel_name().await.is_none());

    controller.deactivate().await;
    assert_eq!(controller.state().await, SubscriptionState::Idle);
    assert!(transport.log().is_empty());

    // The connection survives for other screens
    let other = list_controller(manager.clone(), FakeSession::signed_in(8, "t"));
    assert_eq!(other.activate().await, SubscriptionState::Subscribed);
    assert_eq!(transport.opens(), 1);
}

#[tokio::test]
async fn one_live_subscription_per_channel_system_wide() {
    let transport = MemoryTransport::new();
    let manager = manager(transport.clone(), ScriptedAuthorizer::new());
    let session = FakeSession::signed_in(7, "t");
    let first = list_controller(manager.clone(), session.clone());
    let second = list_controller(manager.clone(), session);

    assert_eq!(first.activate().await, SubscriptionState::Subscribed);
    assert_eq!(second.activate().await, SubscriptionState::Failed);
    assert_eq!(transport.joins(USER_CHANNEL), 1);

    // The refused screen's teardown must not touch the other screen's channel
    second.deactivate().await;
    sleep(Duration::from_millis(30)).await;
    assert_eq!(transport.leaves(USER_CHANNEL), 0);
    assert_eq!(first.state().await, SubscriptionState::Subscribed);
}

#[tokio::test]
async fn detail_screen_follows_owner_changes() {
    let transport = MemoryTransport::new();
    let manager = manager(transport.clone(), ScriptedAuthorizer::new());
    let controller = SubscriptionController::new(
        manager,
        FakeSession::signed_in(7, "t"),
        "conversation",
        Owner::Conversation(ConversationId(5)),
        ActivationPolicy::OnceOnMount,
        EventHandlers::new(),
    );

    assert_eq!(controller.on_focus().await, SubscriptionState::Idle);
    assert_eq!(controller.on_mount().await, SubscriptionState::Subscribed);
    // Focus changes do not churn a detail subscription
    controller.on_blur().await;
    assert_eq!(controller.state().await, SubscriptionState::Subscribed);

    assert_eq!(
        controller.change_owner(Owner::Conversation(ConversationId(6))).await,
        SubscriptionState::Subscribed
    );
    controller.on_unmount().await;

    assert!(eventually(|| transport.leaves("private-conversation.6") == 1).await);
    assert_eq!(
        transport.log(),
        vec![
            Wire::Join("private-conversation.5".into()),
            Wire::Leave("private-conversation.5".into()),
            Wire::Join("private-conversation.6".into()),
            Wire::Leave("private-conversation.6".into()),
        ]
    );
}

#[tokio::test]
async fn dropped_screen_still_leaves() {
    let transport = MemoryTransport::new();
    let manager = manager(transport.clone(), ScriptedAuthorizer::new());
    let controller = list_controller(manager, FakeSession::signed_in(7, "t"));
    assert_eq!(controller.activate().await, SubscriptionState::Subscribed);

    drop(controller);
    assert!(eventually(|| transport.leaves(USER_CHANNEL) == 1).await);
}

#[tokio::test]
async fn cancelled_activation_releases_its_channel() {
    let transport = MemoryTransport::with_script(ServerScript {
        join_delay: Duration::from_millis(100),
        ..Default::default()
    });
    let manager = manager(transport.clone(), ScriptedAuthorizer::new());
    let controller = list_controller(manager.clone(), FakeSession::signed_in(7, "t"));

    // Screen task gives up while the server has not confirmed yet
    let abandoned = timeout(Duration::from_millis(30), controller.activate()).await;
    assert!(abandoned.is_err());
    assert_eq!(controller.state().await, SubscriptionState::Idle);
    assert!(eventually(|| transport.leaves(USER_CHANNEL) == 1).await);

    // The late confirmation must not bring the channel back
    sleep(Duration::from_millis(150)).await;
    let connection = manager.get_connection().await.unwrap();
    assert!(connection.channels().await.is_empty());

    assert_eq!(controller.activate().await, SubscriptionState::Subscribed);
    assert_eq!(
        transport.log(),
        vec![
            Wire::Join(USER_CHANNEL.into()),
            Wire::Leave(USER_CHANNEL.into()),
            Wire::Join(USER_CHANNEL.into()),
        ]
    );
}

#[tokio::test]
async fn lost_connection_is_rejoined_instead_of_reported_live() {
    let transport = MemoryTransport::new();
    let manager = manager(transport.clone(), ScriptedAuthorizer::new());
    let controller = SubscriptionController::new(
        manager.clone(),
        FakeSession::signed_in(7, "t"),
        "conversation",
        Owner::Conversation(ConversationId(5)),
        ActivationPolicy::OnceOnMount,
        EventHandlers::new(),
    );
    assert_eq!(controller.on_mount().await, SubscriptionState::Subscribed);

    manager.disconnect().await;
    assert_eq!(controller.state().await, SubscriptionState::Idle);
    assert!(controller.channel_name().await.is_none());

    // Refocusing the mounted screen joins again on a fresh connection
    assert_eq!(controller.on_focus().await, SubscriptionState::Subscribed);
    assert_eq!(transport.opens(), 2);
    assert_eq!(transport.joins("private-conversation.5"), 2);
    assert_eq!(controller.channel_name().await.as_deref(), Some("conversation.5"));
    let connection = manager.get_connection().await.unwrap();
    assert_eq!(connection.channels().await, vec!["private-conversation.5".to_string()]);

    controller.on_unmount().await;
    assert!(eventually(|| transport.leaves("private-conversation.5") == 1).await);
}
