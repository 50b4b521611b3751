// Conversation list tests
// Sidebar construction on screen start: grouping, ordering, unread state and placeholders.

mod common;
use common::{at, backend, open_screen, ALICE, BOB, CAROL, ME};

use anyhow::Result;
use volunteer_messenger::messaging::view::{self, PanelState};
use volunteer_messenger::{ConversationTarget, Launch, MessagingScreen, NEW_CONTACT, START_A_CONVERSATION, UNKNOWN_USER};

/// One entry per partner, previewing the latest message, newest conversation first
#[tokio::test]
async fn test_one_entry_per_partner_newest_first() -> Result<()> {
    let backend = backend();
    backend.seed(ALICE, ME, "first from alice", at(0), true);
    backend.seed(ME, ALICE, "reply to alice", at(5), true);
    backend.seed(BOB, ME, "hello from bob", at(10), true);

    let screen = open_screen(&backend, None).await;
    let sidebar = screen.sidebar();

    assert_eq!(sidebar.state, PanelState::Ready);
    assert_eq!(sidebar.conversations.len(), 2);
    assert_eq!(sidebar.conversations[0].partner_id, BOB);
    assert_eq!(sidebar.conversations[0].partner_name, "Bob's Shelter");
    assert_eq!(sidebar.conversations[1].partner_id, ALICE);
    assert_eq!(sidebar.conversations[1].last_message, "reply to alice");
    assert!(screen.thread().is_none());
    Ok(())
}

/// Unread only counts messages addressed to me that are not yet read
#[tokio::test]
async fn test_unread_flag_aggregates_incoming_messages() -> Result<()> {
    let backend = backend();
    backend.seed(ALICE, ME, "unread one", at(0), false);
    backend.seed(ALICE, ME, "unread two", at(1), false);
    backend.seed(ME, BOB, "my own unread-by-bob message", at(2), false);

    let screen = open_screen(&backend, None).await;
    let alice = screen.sidebar().get(ALICE).expect("alice entry");
    let bob = screen.sidebar().get(BOB).expect("bob entry");

    assert!(alice.has_unread());
    assert_eq!(alice.unread_count, 2);
    assert!(!bob.has_unread());
    Ok(())
}

/// Navigating to someone with no history shows a placeholder and opens the chat
#[tokio::test]
async fn test_target_without_history_gets_placeholder() -> Result<()> {
    let backend = backend();
    backend.seed(ALICE, ME, "older thread", at(0), true);

    let target = ConversationTarget::from_params(Some(BOB), Some("Bob From The Listing"));
    let screen = open_screen(&backend, target).await;

    let placeholder = screen.sidebar().get(BOB).expect("placeholder entry");
    assert!(placeholder.is_new);
    assert_eq!(placeholder.partner_name, "Bob From The Listing");
    assert_eq!(placeholder.last_message, START_A_CONVERSATION);
    // Stamped "now", so it sorts above the older thread
    assert_eq!(screen.sidebar().conversations[0].partner_id, BOB);
    assert_eq!(screen.sidebar().active.as_deref(), Some(BOB));

    let thread = screen.thread().expect("chat opened");
    assert_eq!(thread.partner_id, BOB);
    assert_eq!(thread.state, PanelState::Empty);
    Ok(())
}

/// A target that already has history does not get a second entry
#[tokio::test]
async fn test_target_with_history_is_not_duplicated() -> Result<()> {
    let backend = backend();
    backend.seed(ALICE, ME, "hi", at(0), false);

    let screen = open_screen(&backend, Some(ConversationTarget::new(ALICE, None))).await;

    assert_eq!(screen.sidebar().conversations.len(), 1);
    assert!(!screen.sidebar().conversations[0].is_new);
    // Opening the chat clears the unread marker
    assert!(!screen.sidebar().conversations[0].has_unread());
    assert_eq!(screen.thread().map(|t| t.partner_name.as_str()), Some("Alice Food Bank"));
    Ok(())
}

/// Names fall back from full name to email to "Unknown User"; unknown targets are "New Contact"
#[tokio::test]
async fn test_partner_name_fallbacks() -> Result<()> {
    let backend = backend();
    backend.seed(CAROL, ME, "from carol", at(0), true);
    backend.seed("ghost", ME, "from nobody", at(1), true);

    let screen = open_screen(&backend, Some(ConversationTarget::new("stranger", None))).await;

    assert_eq!(screen.sidebar().get(CAROL).unwrap().partner_name, "carol@library.org");
    assert_eq!(screen.sidebar().get("ghost").unwrap().partner_name, UNKNOWN_USER);
    assert_eq!(screen.sidebar().get("stranger").unwrap().partner_name, NEW_CONTACT);
    Ok(())
}

/// A failing profile lookup still lists every conversation
#[tokio::test]
async fn test_profile_failure_keeps_conversations() -> Result<()> {
    let backend = backend();
    backend.seed(ALICE, ME, "hi", at(0), true);
    backend.set_fail_profiles(true);

    let screen = open_screen(&backend, None).await;

    assert_eq!(screen.sidebar().conversations.len(), 1);
    assert_eq!(screen.sidebar().conversations[0].partner_name, UNKNOWN_USER);
    Ok(())
}

#[tokio::test]
async fn test_empty_history_shows_empty_state() -> Result<()> {
    let backend = backend();
    let screen = open_screen(&backend, None).await;

    assert_eq!(screen.sidebar().state, PanelState::Empty);
    assert!(screen.sidebar().conversations.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_load_failure_shows_error() -> Result<()> {
    let backend = backend();
    backend.seed(ALICE, ME, "hi", at(0), true);
    backend.set_fail_reads(true);

    let screen = open_screen(&backend, None).await;

    assert_eq!(screen.sidebar().state, PanelState::Error(view::CONVERSATIONS_ERROR.to_string()));
    assert!(screen.sidebar().conversations.is_empty());
    Ok(())
}

/// No signed-in user means no screen and no subscriptions
#[tokio::test]
async fn test_signed_out_redirects_to_login() -> Result<()> {
    let backend = backend();
    backend.sign_out();

    let launch = MessagingScreen::start(backend.services(), Default::default(), None).await;

    assert!(matches!(launch, Launch::RedirectToLogin));
    assert!(backend.active_subscriptions().is_empty());
    Ok(())
}

/// Opening the screen establishes exactly one inbox subscription filtered to me
#[tokio::test]
async fn test_inbox_subscription_on_start() -> Result<()> {
    let backend = backend();
    let screen = open_screen(&backend, None).await;

    let subscriptions = backend.active_subscriptions();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].to_string(), format!("recipient_id=eq.{}", ME));
    assert!(screen.inbox_subscription().is_some());
    assert!(screen.chat_subscription().is_none());
    Ok(())
}
