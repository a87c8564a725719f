//! Destination channel resolution.

use std::io::{BufRead, Write};

use anyhow::Result;
use tracing::{error, info, warn};
use zip_sender_core::contract::{ChatClient, ChatId, ClientError};

use crate::load_config::ConfigStore;

/// Candidate forms of a user-entered chat reference, in the order they should be tried.
///
/// Numeric ids get the `-100` channel prefix when it is missing. Bare names are tried as given
/// and then as `@name`.
pub fn normalize_chat_ref(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        if trimmed.starts_with("-100") {
            return vec![trimmed.to_string()];
        }
        let normalized = format!("-100{digits}");
        if trimmed.starts_with('-') {
            return vec![normalized];
        }
        return vec![normalized, trimmed.to_string()];
    }

    if trimmed.starts_with('@') {
        return vec![trimmed.to_string()];
    }
    vec![trimmed.to_string(), format!("@{trimmed}")]
}

/// First candidate of `raw` that the client can see, or `None`.
pub async fn verify_channel<C>(client: &C, raw: &str) -> Option<ChatId>
where
    C: ChatClient + ?Sized,
{
    for candidate in normalize_chat_ref(raw) {
        info!(chat = %candidate, "Checking channel access");
        match client.get_chat(&candidate).await {
            Ok(chat) => {
                info!(
                    chat = %candidate,
                    title = chat.title.as_deref().unwrap_or("-"),
                    kind = %chat.kind,
                    "Channel found"
                );
                return Some(ChatId(candidate));
            }
            Err(ClientError::ChatNotFound(description)) => {
                warn!(chat = %candidate, %description, "Channel not found in this format");
            }
            Err(e) => {
                error!(chat = %candidate, error = %e, "Cannot access channel; the account must be a member with permission to post");
                return None;
            }
        }
    }
    None
}

/// The configured channel if it verifies, otherwise one entered on `input`.
///
/// An empty line, `q` or EOF cancels and yields `None`. A channel chosen interactively is
/// persisted to the store.
pub async fn select_channel<C, R, W>(
    client: &C,
    store: &mut ConfigStore,
    input: &mut R,
    output: &mut W,
) -> Result<Option<ChatId>>
where
    C: ChatClient + ?Sized,
    R: BufRead,
    W: Write,
{
    let configured = store.settings().channel_id.clone();
    if !configured.trim().is_empty() {
        info!(channel_id = %configured, "Trying configured channel");
        if let Some(chat) = verify_channel(client, &configured).await {
            if chat.as_str() != configured {
                store.update(|s| s.channel_id = chat.as_str().to_string())?;
            }
            return Ok(Some(chat));
        }
        warn!(channel_id = %configured, "Configured channel is not valid");
    }

    writeln!(
        output,
        "Enter the channel id (-100...) or @username. The account must be a member allowed to post."
    )?;
    loop {
        write!(output, "Channel (empty or q to cancel): ")?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            info!("Channel selection cancelled");
            return Ok(None);
        }
        let answer = line.trim();
        if answer.is_empty() || answer.eq_ignore_ascii_case("q") {
            info!("Channel selection cancelled");
            return Ok(None);
        }
        match verify_channel(client, answer).await {
            Some(chat) => {
                store.update(|s| s.channel_id = chat.as_str().to_string())?;
                info!(channel_id = %chat, config_path = ?store.path(), "Channel saved to config");
                return Ok(Some(chat));
            }
            None => writeln!(output, "Invalid channel or no access. Try again.")?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_id_gets_channel_prefix() {
        assert_eq!(normalize_chat_ref(" 1234567890 "), vec!["-1001234567890", "1234567890"]);
    }

    #[test]
    fn negative_id_without_prefix_is_rewritten() {
        assert_eq!(normalize_chat_ref("-1234567890"), vec!["-1001234567890"]);
    }

    #[test]
    fn full_channel_id_is_kept() {
        assert_eq!(normalize_chat_ref("-1001234567890"), vec!["-1001234567890"]);
    }

    #[test]
    fn usernames() {
        assert_eq!(normalize_chat_ref("@drops"), vec!["@drops"]);
        assert_eq!(normalize_chat_ref("drops"), vec!["drops", "@drops"]);
    }

    #[test]
    fn blank_has_no_candidates() {
        assert!(normalize_chat_ref("   ").is_empty());
    }
}
