//! cx-session - inspect and save a translation draft
//!
//! Usage:
//!   cx-session <draft.json>           # Print progress and MT abuse warnings
//!   cx-session <draft.json> --save    # Also save the draft to the wiki
//!
//! Saving requires CX_API_URL (and usually CX_CSRF_TOKEN). The tracker
//! tunables are read from the environment when present.

use anyhow::{bail, Context, Result};
use cx_session::api::MediaWikiClient;
use cx_session::config::Config;
use cx_session::draft::Draft;
use cx_session::events::{drain, EventBus, SessionEvent};
use cx_session::session::{self, SessionSettings};
use cx_session::surface::TargetSurface;
use cx_session::tracker::TranslationTracker;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cx_session=info".parse()?),
        )
        .init();

    // Parse CLI arguments
    let args: Vec<String> = std::env::args().skip(1).collect();
    let save = args.iter().any(|arg| arg == "--save");
    let Some(path) = args.iter().find(|arg| !arg.starts_with("--")) else {
        bail!("Usage: cx-session <draft.json> [--save]");
    };

    let draft = Draft::load(&PathBuf::from(path))?;
    let config = if save {
        Some(Config::from_env()?)
    } else {
        Config::from_env().ok()
    };
    let settings = config.as_ref().map(SessionSettings::from).unwrap_or_default();
    let surface: Arc<dyn TargetSurface> = Arc::new(draft.surface());

    print_report(&draft, surface.clone(), &settings)?;

    if let Some(config) = config.filter(|_| save) {
        save_draft(draft, surface, &config, settings).await?;
    }

    Ok(())
}

/// Run the tracker over every target section and print what it found.
fn print_report(
    draft: &Draft,
    surface: Arc<dyn TargetSurface>,
    settings: &SessionSettings,
) -> Result<()> {
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let mut tracker = TranslationTracker::new(
        &draft.translation,
        surface,
        events,
        settings.tracker.clone(),
    );

    let now = Instant::now();
    for section_number in draft.target_sections.keys() {
        tracker.add_section_to_change_queue(*section_number, now);
    }
    tracker.process_change_queue();
    // Sections validated on their first translation are checked now
    tracker.process_validation_queue();
    let progress = tracker.translation_progress();

    println!("\n========== TRANSLATION PROGRESS ==========");
    println!(
        "{} ({}) -> {} ({})",
        draft.translation.source_title,
        draft.translation.source_language,
        draft.translation.target_title,
        draft.translation.target_language
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&progress).context("Failed to serialize progress")?
    );

    let warnings: Vec<SessionEvent> = drain(&mut rx)
        .into_iter()
        .filter(|event| matches!(event, SessionEvent::MtAbuseWarning(_)))
        .collect();
    if warnings.is_empty() {
        println!("\nNo sections above the unmodified MT threshold.");
    }
    for event in warnings {
        if let SessionEvent::MtAbuseWarning(warning) = event {
            println!(
                "\nSection {}: {}% unmodified machine translation (threshold {}%)",
                warning.section_number,
                warning.percentage,
                warning.threshold * 100.0
            );
        }
    }
    println!("==========================================\n");

    Ok(())
}

/// Save the draft once through a session.
async fn save_draft(
    draft: Draft,
    surface: Arc<dyn TargetSurface>,
    config: &Config,
    settings: SessionSettings,
) -> Result<()> {
    let client = Arc::new(MediaWikiClient::from_config(config));
    let sections: Vec<_> = draft.target_sections.keys().copied().collect();
    let handle = session::spawn(
        draft.translation,
        surface,
        client,
        settings,
        EventBus::default(),
    );

    for section_number in sections {
        handle
            .section_changed(cx_session::section::target_section_id(section_number))
            .await?;
    }

    info!("Saving draft to {}", config.api_url);
    match handle.save_now().await {
        Ok(Some(receipt)) => {
            println!(
                "Saved sections {:?} at {}",
                receipt.sections,
                receipt.at.to_rfc3339()
            );
            if let Some(id) = receipt.translation_id {
                println!("Translation id: {}", id);
            }
        }
        Ok(None) => println!("Nothing to save."),
        Err(e) => {
            warn!("Saving failed: {}", e);
            handle.shutdown().await?;
            return Err(e).context("Failed to save the draft");
        }
    }

    info!("{}", handle.metrics().report().to_log_string());
    handle.shutdown().await?;
    Ok(())
}
