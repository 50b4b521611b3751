// Common test utilities for integration tests
// Builds a seeded in-memory backend and drives the messaging screen's event loop.
#![allow(dead_code)]

use std::sync::Once;

use chrono::{DateTime, Duration, TimeZone, Utc};
use log::{debug, LevelFilter};
use tokio::time::{timeout, Duration as TokioDuration};

use volunteer_messenger::config::DisplayConfig;
use volunteer_messenger::store::memory::MemoryBackend;
use volunteer_messenger::{ConversationTarget, Launch, MessagingScreen};

pub const ME: &str = "volunteer-1";
pub const ALICE: &str = "org-alice";
pub const BOB: &str = "org-bob";
pub const CAROL: &str = "org-carol";

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// Fixed reference point so orderings in assertions are stable.
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
}

/// A backend with me signed in and three named partners, no messages.
pub fn backend() -> MemoryBackend {
    setup_logging();
    let backend = MemoryBackend::new();
    backend.sign_in(ME);
    backend.add_profile(ME, Some("Vera Volunteer"), None);
    backend.add_profile(ALICE, Some("Alice Food Bank"), None);
    backend.add_profile(BOB, Some("Bob's Shelter"), None);
    backend.add_profile(CAROL, None, Some("carol@library.org"));
    backend
}

/// Start the screen and let any requested chat finish loading.
pub async fn open_screen(backend: &MemoryBackend, target: Option<ConversationTarget>) -> MessagingScreen {
    let mut screen = match MessagingScreen::start(backend.services(), DisplayConfig::default(), target).await {
        Launch::Ready(screen) => screen,
        Launch::RedirectToLogin => panic!("expected a signed-in screen"),
    };
    drain_events(&mut screen).await;
    screen
}

/// Open a chat and apply its history.
pub async fn open_chat(screen: &mut MessagingScreen, partner_id: &str) {
    screen.open_chat(partner_id, None).await;
    drain_events(screen).await;
}

/// Dispatch events until none arrive for a short while. Returns how many were applied.
pub async fn drain_events(screen: &mut MessagingScreen) -> usize {
    let mut applied = 0;
    while let Ok(Some(event)) = timeout(TokioDuration::from_millis(100), screen.next_event()).await {
        debug!("Test dispatching {:?}", event);
        screen.dispatch(event);
        applied += 1;
    }
    applied
}

pub fn bubble_bodies(screen: &MessagingScreen) -> Vec<String> {
    screen
        .thread()
        .map(|t| t.bubbles.iter().map(|b| b.body.clone()).collect())
        .unwrap_or_default()
}
