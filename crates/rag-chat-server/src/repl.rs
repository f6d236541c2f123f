use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::services::conversation::ConversationManager;

pub const EXIT_COMMAND: &str = "Exit";
const PROMPT: &str = "Anything you want to know about ML: ";

pub fn banner() -> String {
    let design = "#".repeat(20);
    format!("{design} Welcome to my RAG {design}\nPress '{EXIT_COMMAND}' to Exit\n")
}

/// Interactive loop over one session until `Exit` or end of input.
/// Failed queries are reported and the loop carries on.
pub async fn run<R, W>(
    manager: &ConversationManager,
    session_id: &str,
    input: R,
    mut output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(banner().as_bytes()).await?;

    let mut lines = input.lines();
    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query == EXIT_COMMAND {
            break;
        }
        if query.is_empty() {
            continue;
        }

        match manager.handle_query(session_id, query).await {
            Ok(answer) => {
                output.write_all(format!("{}\n\n", answer).as_bytes()).await?;
            }
            Err(e) => {
                warn!("Chat query failed: {}", e);
                output.write_all(format!("[error] {}\n\n", e).as_bytes()).await?;
            }
        }
    }

    output.flush().await?;
    Ok(())
}
