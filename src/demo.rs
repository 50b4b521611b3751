use chrono::{Duration, Utc};
use log::{info, warn};
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;

use volunteer_messenger::store::memory::MemoryBackend;
use volunteer_messenger::store::{ChangeFeed, FeedFilter, MessageStore};
use volunteer_messenger::{NewMessage, Services};

// Offline backend for `--demo`: a seeded in-memory store plus partners that answer.

pub const DEMO_USER: &str = "volunteer-demo";

const PARTNERS: &[(&str, &str)] = &[
    ("org-food-bank", "Riverside Food Bank"),
    ("org-shelter", "Northside Shelter"),
    ("org-library", "City Library Literacy Program"),
];

pub fn seeded_backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.sign_in(DEMO_USER);
    backend.add_profile(DEMO_USER, Some("Demo Volunteer"), Some("demo@example.org"));
    for (id, name) in PARTNERS {
        backend.add_profile(id, Some(name), None);
    }

    let now = Utc::now();
    backend.seed("org-food-bank", DEMO_USER, "Thanks for signing up for the pantry shift!", now - Duration::hours(5), true);
    backend.seed(DEMO_USER, "org-food-bank", "Happy to help. What time should I arrive?", now - Duration::hours(4), true);
    backend.seed("org-food-bank", DEMO_USER, "9am at the side entrance works.", now - Duration::minutes(90), false);
    backend.seed("org-shelter", DEMO_USER, "We still need two people for Sunday dinner.", now - Duration::days(1), false);
    backend.seed(DEMO_USER, "org-library", "Is the reading hour still on Thursday?", now - Duration::days(2), true);

    backend
}

/// Partners reply to whatever the demo user sends them, and one of them
/// writes in unprompted so the new-message popup shows up.
pub fn spawn_partners(backend: MemoryBackend, services: &Services) {
    let feed = services.feed.clone();
    tokio::spawn(async move {
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Err(e) = feed.subscribe(FeedFilter::sender(DEMO_USER), tx).await {
            warn!("Demo partners could not subscribe: {}", e);
            return;
        }
        while let Some(event) = rx.recv().await {
            let partner = event.record.recipient_id.clone();
            let reply = format!("Got it: \"{}\". We'll follow up soon!", event.record.body);
            let backend = backend.clone();
            tokio::spawn(async move {
                tokio::time::sleep(StdDuration::from_millis(1500)).await;
                if let Err(e) = backend.create(NewMessage::new(&partner, DEMO_USER, &reply)).await {
                    warn!("Demo reply from {} failed: {}", partner, e);
                }
            });
        }
    });

    let messages = services.messages.clone();
    tokio::spawn(async move {
        tokio::time::sleep(StdDuration::from_secs(8)).await;
        info!("Demo: sending unprompted message from org-shelter");
        let new = NewMessage::new("org-shelter", DEMO_USER, "Could you also bring a few extra blankets?");
        if let Err(e) = messages.create(new).await {
            warn!("Demo message failed: {}", e);
        }
    });
}
