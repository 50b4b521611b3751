use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::Parser;
use log::{debug, error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

mod credentials;
mod demo;
mod ui;
mod utils;

use crate::{
    credentials::{clear_session, load_session, save_session, CachedSession},
    ui::{ChatUI, UiAction},
};
use volunteer_messenger::config::{self, AppConfig, DisplayConfig};
use volunteer_messenger::store::realtime::RealtimeFeed;
use volunteer_messenger::store::rest::{AuthSession, RestClient};
use volunteer_messenger::{ConversationTarget, Launch, MessagingScreen, Services};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Terminal messaging for volunteers and the organisations they help.",
    long_about = "Chat with volunteer organisations from the terminal.\n\n\
    Backend settings come from VM_PROJECT_URL / VM_ANON_KEY or <config dir>/volunteer-messenger/config.json.\n\
    Use --demo to try it without a backend."
)]
struct Args {
    /// Run against a seeded in-memory backend
    #[arg(long)]
    demo: bool,

    /// Open the conversation with this user on start
    #[arg(long, value_name = "USER_ID")]
    recipient_id: Option<String>,

    /// Display name for --recipient-id
    #[arg(long, value_name = "NAME")]
    name: Option<String>,

    /// Override the directory holding config.json and credentials.json
    #[arg(long, value_name = "PATH")]
    config_dir: Option<PathBuf>,

    /// Where to write the log file
    #[arg(long, value_name = "PATH", default_value = "volunteer-messenger.log")]
    log_file: PathBuf,

    /// Forget the cached session before starting
    #[arg(long)]
    sign_out: bool,
}

/// Prompts for email and password on the terminal
fn prompt_login() -> Result<(String, String)> {
    eprintln!("Email:");
    let email = utils::read_line()?;
    eprintln!("Password:");
    let password = utils::read_line()?;
    if email.is_empty() || password.is_empty() {
        return Err(anyhow!("Email and password are required"));
    }
    Ok((email, password))
}

/// Reuse the cached refresh token if it still works, otherwise ask.
async fn sign_in(rest: &RestClient) -> Result<AuthSession> {
    if let Some(cached) = load_session()? {
        if let Some(refresh_token) = cached.get_refresh_token() {
            match rest.refresh_session(&refresh_token).await {
                Ok(session) => {
                    info!("Resumed session for {}", cached.email);
                    save_session(&CachedSession::new(&cached.email, &session.refresh_token))?;
                    return Ok(session);
                }
                Err(e) => warn!("Cached session for {} is no longer valid: {}", cached.email, e),
            }
        }
    }

    let (email, password) = prompt_login()?;
    let session = rest.sign_in_with_password(&email, &password).await?;
    save_session(&CachedSession::new(&email, &session.refresh_token))?;
    Ok(session)
}

/// Backend collaborators plus the realtime socket, which needs closing on exit.
async fn connect_backend() -> Result<(Services, DisplayConfig, Arc<RealtimeFeed>)> {
    let app_config = AppConfig::load()?.ok_or_else(|| {
        anyhow!(
            "No backend configured. Set {} and {}, write config.json, or run with --demo",
            config::ENV_PROJECT_URL,
            config::ENV_ANON_KEY
        )
    })?;

    let rest = RestClient::new(&app_config.backend);
    println!("Signing in to {}...", rest.base_url());
    let session = sign_in(&rest).await?;
    info!("Signed in as {}", session.user.id);

    let feed = Arc::new(RealtimeFeed::new(&app_config.backend, rest.access_token()));
    let rest = Arc::new(rest);
    let services = Services {
        identity: rest.clone(),
        messages: rest.clone(),
        profiles: rest,
        feed: feed.clone(),
    };
    Ok((services, app_config.display(), feed))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    utils::setup_logging(args.log_file.to_str(), LevelFilter::Debug)?;
    info!("Volunteer messenger starting up");
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);
    info!("Logging to file: {}", args.log_file.display());

    if let Some(dir) = &args.config_dir {
        config::set_config_dir_override(dir.clone());
        info!("Config directory overridden to: {}", dir.display());
    }

    if args.sign_out {
        clear_session()?;
    }

    let target = ConversationTarget::from_params(args.recipient_id.as_deref(), args.name.as_deref());

    let (services, display, realtime) = if args.demo {
        info!("Running with the in-memory demo backend");
        let backend = demo::seeded_backend();
        let services = backend.services();
        demo::spawn_partners(backend, &services);
        (services, DisplayConfig::default(), None)
    } else {
        let (services, display, feed) = connect_backend().await?;
        (services, display, Some(feed))
    };

    let mut screen = match MessagingScreen::start(services, display, target).await {
        Launch::Ready(screen) => screen,
        Launch::RedirectToLogin => {
            eprintln!("You are not signed in. Run again to log in.");
            clear_session()?;
            return Ok(());
        }
    };
    info!("Messaging screen ready for {}", screen.me());

    let mut terminal = ui::setup_terminal()?;
    let mut chat_ui = ChatUI::new();

    let result = run_main_loop(&mut chat_ui, &mut terminal, &mut screen).await;

    screen.shutdown().await;
    if let Some(feed) = realtime {
        feed.disconnect().await;
    }
    ui::restore_terminal(terminal)?;

    if let Err(e) = &result {
        error!("Main loop exited with error: {}", e);
    }
    result
}

/// Run the main event loop
async fn run_main_loop(
    chat_ui: &mut ChatUI,
    terminal: &mut ui::Terminal<ui::CrosstermBackend<std::io::Stdout>>,
    screen: &mut MessagingScreen,
) -> Result<()> {
    loop {
        chat_ui.sync_input(screen.input());
        chat_ui.follow_active(screen.sidebar());
        terminal.draw(|f| chat_ui.draw(f, screen))?;

        screen.tick(Utc::now());

        if let Some(action) = chat_ui.handle_input(screen)? {
            debug!("UI action: {:?}", action);
            match action {
                UiAction::Quit => break,
                UiAction::InputChanged(text) => screen.set_input(&text),
                UiAction::Send => {
                    if !screen.submit() {
                        debug!("Nothing to send");
                    }
                }
                UiAction::OpenConversation { partner_id, partner_name } => {
                    screen.open_chat(&partner_id, Some(&partner_name)).await;
                }
                UiAction::OpenToast => screen.activate_toast().await,
                UiAction::DismissAlert => screen.dismiss_alert(),
            }
        }

        // Apply everything that arrived while we were drawing. Loads and sends
        // finish in background tasks, so this never waits on the network.
        while let Some(event) = screen.try_next_event() {
            screen.dispatch(event);
        }
    }

    info!("Exiting main loop");
    Ok(())
}
