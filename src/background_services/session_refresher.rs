//! Responsible for keeping the session alive. Watches the published auth
//! state and asks the dispatcher to refresh the token shortly before it
//! expires, so auth stays current without any interaction.

use std::time::Duration;

use chrono::Utc;
use tokio::select;
use tokio::sync::mpsc::Sender;
use tokio::sync::{oneshot, watch};
use tokio::time::sleep;
use tracing::{error, info};

use crate::app::{Command, CommandEnvelope};
use crate::auth::Session;

/// Refresh this long before the token would expire.
const REFRESH_MARGIN_SECS: i64 = 60;

pub async fn run(
    mut sessions: watch::Receiver<Option<Session>>,
    commands: Sender<CommandEnvelope>,
) {
    loop {
        let expires_at = sessions.borrow_and_update().as_ref().map(|s| s.expires_at);

        let Some(expires_at) = expires_at else {
            // signed out; wait for a session to appear
            if sessions.changed().await.is_err() {
                break;
            }
            continue;
        };

        let refresh_at = expires_at - chrono::Duration::seconds(REFRESH_MARGIN_SECS);
        let wait = (refresh_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        select! {
            changed = sessions.changed() => {
                if changed.is_err() {
                    break;
                }
                // new session (or sign-out); recompute the deadline
                continue;
            }
            _ = sleep(wait) => {}
        }

        let (reply, result) = oneshot::channel();
        let envelope = CommandEnvelope {
            command: Command::RefreshSession,
            reply,
        };
        if commands.send(envelope).await.is_err() {
            break;
        }

        match result.await {
            Ok(Ok(())) => info!("session refreshed"),
            Ok(Err(e)) => {
                error!("session refresh failed: {e}");
                sleep(Duration::from_secs(60)).await;
            }
            Err(_) => break,
        }
    }

    info!("Channel closed");
}
