//! Timeline Demo Binary
//!
//! Seeds an in-memory graph store with a handful of users, follows and
//! posts, then opens a live home timeline and logs every snapshot it
//! publishes while more activity arrives.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `TIMELINE_DAILY_POST_QUOTA`: posts plus replies per local day (default: 5)
//! - `TIMELINE_MAX_POST_CHARS`: maximum post length (default: 777)
//! - `TIMELINE_MAX_HANDLE_CHARS`: maximum handle length (default: 14)
//! - `DEMO_SETTLE_MS`: how long to wait for a snapshot before giving up (default: 2000)
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! LOG_FORMAT=pretty cargo run --bin timeline_demo
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use timeline_kernel::{
    Compose, FanOutAggregator, FeedRequest, FeedSnapshot, InMemoryGraphStore, LikeStateReconciler,
    PostComposer, RelationGraph, ReplyThreadAssembler, TimelineConfig, UserDirectoryAssembler, UserId, UserRecord,
    STORE_SCHEMA_VERSION,
};

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "timeline_demo=info,timeline_kernel=info".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .init();
    }
}

/// Wait until a snapshot with at least `len` posts arrives, logging each one.
async fn settle(updates: &mut UnboundedReceiver<FeedSnapshot>, len: usize, budget: Duration) -> Option<FeedSnapshot> {
    let deadline = Instant::now() + budget;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        let snapshot = tokio::time::timeout(remaining, updates.recv()).await.ok()??;
        info!(
            generation = snapshot.generation(),
            size = snapshot.len(),
            newest = snapshot.posts().first().map(|p| p.text.as_str()).unwrap_or(""),
            fingerprint = %snapshot.fingerprint(),
            "home timeline snapshot"
        );
        if snapshot.len() >= len {
            return Some(snapshot);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let version = env!("CARGO_PKG_VERSION");
    info!(version = version, schema_version = STORE_SCHEMA_VERSION, "Starting timeline demo");

    let config = TimelineConfig::from_env();
    let settle_budget = std::env::var("DEMO_SETTLE_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(2));
    info!(
        daily_post_quota = config.daily_post_quota,
        max_post_chars = config.max_post_chars,
        "Configuration loaded"
    );

    let store = Arc::new(InMemoryGraphStore::new());
    let composer = PostComposer::new(Arc::clone(&store), config);
    let relations = RelationGraph::new(Arc::clone(&store));

    let ada = UserId::new("ada");
    let bob = UserId::new("bob");
    let cy = UserId::new("cy");
    composer.register_user(&ada, UserRecord::new("ada", "Ada Lovelace")).await?;
    composer.register_user(&bob, UserRecord::new("bob", "Bob Kahn")).await?;
    composer.register_user(&cy, UserRecord::new("cy", "Cy Twombly")).await?;

    relations.follow(&ada, &bob).await?;
    composer.publish(&ada, "first light", Compose::Post).await?;
    composer.publish(&bob, "packets all the way down", Compose::Post).await?;
    composer.publish(&cy, "nobody follows me yet", Compose::Post).await?;

    let directory = UserDirectoryAssembler::new(Arc::clone(&store)).with_viewer(ada.clone()).open();
    let mut roster = directory.updates();
    match tokio::time::timeout(settle_budget, async {
        loop {
            match roster.recv().await {
                Some(users) if users.len() >= 3 => return Some(users),
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await
    {
        Ok(Some(users)) => info!(handles = ?users.handles(), "user directory snapshot"),
        _ => warn!("user directory did not converge"),
    }
    directory.cancel();

    let aggregator = FanOutAggregator::new(Arc::clone(&store));
    let handle = aggregator.open(FeedRequest::HomeTimeline { viewer: ada.clone() });
    let mut updates = handle.updates();

    if settle(&mut updates, 2, settle_budget).await.is_none() {
        warn!("home timeline did not converge on seeded posts");
    }

    // A late follow opens a new branch on the live handle.
    relations.follow(&ada, &cy).await?;
    let snapshot = match settle(&mut updates, 3, settle_budget).await {
        Some(snapshot) => snapshot,
        None => {
            warn!(branches = handle.branch_count(), "late follow did not reach the timeline");
            return Err("timeline did not converge".into());
        }
    };
    info!(branches = handle.branch_count(), "late follow folded in");

    // Like the newest post and reply to it.
    let newest = snapshot.posts().first().cloned().ok_or("timeline is empty")?;
    let likes = LikeStateReconciler::new(Arc::clone(&store));
    let liked = likes.toggle_like(&newest, &ada).await?;
    info!(post_id = %liked.id, likes = liked.likes, did_liked = liked.did_liked, "like toggled");

    let thread = ReplyThreadAssembler::new(Arc::clone(&store)).with_viewer(ada.clone());
    let thread_handle = thread.open_thread(&liked);
    composer.publish(&ada, "welcome aboard", Compose::Reply(&liked)).await?;

    let mut replies = thread_handle.updates();
    match tokio::time::timeout(settle_budget, replies.recv()).await {
        Ok(Some(thread)) => info!(root = %thread.root_id(), replies = thread.len(), "reply thread snapshot"),
        _ => warn!(root = %liked.id, "reply thread stayed empty"),
    }

    thread_handle.cancel();
    handle.cancel();
    info!(
        subscribers = store.subscriber_count(&timeline_kernel::StorePath::user_posts(&ada)),
        "Timeline demo complete"
    );

    Ok(())
}
