/// Inbox - follows the signed-in user's conversation list live
use colored::Colorize;
use estate_realtime::api::HttpApiClient;
use estate_realtime::channel::{install_shared, ConnectionManager, HttpAuthorizer, WebSocketTransport};
use estate_realtime::conversations::Conversation;
use estate_realtime::inbox::ConversationInbox;
use estate_realtime::session::SessionStore;
use estate_realtime::Config;
use std::env;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let session = Arc::new(
        SessionStore::new(&config.session_dir)
            .map_err(|e| anyhow::anyhow!("Session store error: {}", e))?,
    );
    match session.login_user() {
        Some(login) => info!("Signed in as user {}", login.user.id),
        None => warn!(
            "No login session in {}; live updates unavailable",
            config.session_dir.display()
        ),
    }

    let api = Arc::new(HttpApiClient::new(config.api_base_url.clone(), session.clone())?);
    let authorizer = Arc::new(HttpAuthorizer::new(config.auth_url.clone(), session.clone())?);
    let transport = Arc::new(WebSocketTransport::new(config.connect_timeout));
    let manager = install_shared(Arc::new(ConnectionManager::new(
        config.clone(),
        transport,
        authorizer,
    )));

    let inbox = ConversationInbox::new(manager.clone(), session, api);
    let mut events = inbox.subscribe();

    let state = inbox.on_focus().await;
    info!("Subscription state: {:?}", state);
    print_list(&inbox.snapshot(), inbox.total_unread());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received");
                break;
            }
            event = events.recv() => match event {
                Ok(_) => print_list(&inbox.snapshot(), inbox.total_unread()),
                Err(RecvError::Lagged(n)) => {
                    warn!("Renderer lagged {} events", n);
                    print_list(&inbox.snapshot(), inbox.total_unread());
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    inbox.on_unmount().await;
    manager.disconnect().await;
    Ok(())
}

fn print_list(conversations: &[Conversation], unread: u64) {
    println!();
    println!("{} ({} unread)", "Conversations".bold(), unread);
    if conversations.is_empty() {
        println!("  {}", "(none)".dimmed());
        return;
    }
    for c in conversations {
        let when = c.activity_time().format("%Y-%m-%d %H:%M").to_string();
        let preview = c
            .last_message
            .as_ref()
            .map(|m| m.body.as_str())
            .unwrap_or("");
        let badge = if c.unread_count > 0 {
            format!(" [{}]", c.unread_count).yellow().to_string()
        } else {
            String::new()
        };
        println!("  #{:<6} {}  {}{}", c.id.0, when.dimmed(), preview, badge);
    }
}
