//! Local CLI channel adapter.
//!
//! Every CLI invocation shares one synthetic origin, `(local, "cli")` — there
//! is exactly one conversation, not one per process, so `/clear` and session
//! history behave the same across separate CLI runs.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use skynet_core::config::CliConfig;
use skynet_core::types::ConversationKey;

use crate::context::CliAppContext;

const ORIGIN_PLATFORM: &str = "local";
const ORIGIN_CHAT_ID: &str = "cli";

fn session_key() -> String {
    ConversationKey::new(ORIGIN_PLATFORM, ORIGIN_CHAT_ID, None)
        .as_str()
        .to_string()
}

/// Local CLI channel adapter.
pub struct CliAdapter<C: CliAppContext + 'static> {
    ctx: Arc<C>,
    config: CliConfig,
}

impl<C: CliAppContext + 'static> CliAdapter<C> {
    pub fn new(config: &CliConfig, ctx: Arc<C>) -> Self {
        Self {
            ctx,
            config: config.clone(),
        }
    }

    /// Run a single one-shot message (e.g. `skynet ask "say hi"`) and return
    /// the process exit code.
    ///
    /// Exit code is only meaningful for slash commands: 0 on success,
    /// non-zero if the command failed or was unrecognized. Regular questions
    /// always exit 0 once a reply is printed.
    pub async fn run_once(&self, input: &str) -> i32 {
        let key = session_key();
        let trimmed = input.trim();

        if trimmed.starts_with('/') {
            return self.handle_line(trimmed, &key).await;
        }

        match self.ask(trimmed, &key).await {
            Ok(reply) => {
                println!("{reply}");
                0
            }
            Err(e) => {
                eprintln!("error: {e}");
                1
            }
        }
    }

    /// Run the interactive REPL, reading one message per line from stdin
    /// until EOF.
    pub async fn run(self) {
        let key = session_key();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if trimmed.starts_with('/') {
                        self.handle_line(trimmed, &key).await;
                        continue;
                    }
                    match self.ask(trimmed, &key).await {
                        Ok(reply) => println!("{reply}"),
                        Err(e) => eprintln!("error: {e}"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "cli: failed to read stdin line");
                    break;
                }
            }
        }
    }

    /// Handle a slash-command line, print the reply, and return an exit code.
    async fn handle_line(&self, text: &str, key: &str) -> i32 {
        if let Some(response) =
            skynet_agent::pipeline::slash::handle_slash_command(text, key, "local", &self.ctx).await
        {
            println!("{response}");
            return 0;
        }
        if let Some(response) = self.handle_local_command(text, key) {
            println!("{response}");
            return 0;
        }
        eprintln!("error: unrecognized command: {text}");
        1
    }

    fn handle_local_command(&self, text: &str, key: &str) -> Option<String> {
        let trimmed = text.trim();

        if trimmed.eq_ignore_ascii_case("/clear") {
            let resolved = skynet_agent::pipeline::resolve_conversation_key(key, "local");
            let count = match self.ctx.sessions().get(&resolved) {
                Ok(Some(session)) => {
                    let before = session.message_count;
                    let _ = self.ctx.sessions().rewrite_transcript(&session.id, &[]);
                    before
                }
                _ => 0,
            };
            return Some(format!(
                "Session cleared. Removed {count} messages. Starting a fresh conversation."
            ));
        }

        if trimmed.eq_ignore_ascii_case("/whoami") {
            return Some(format!(
                "Session key: `{key}`\n\nProvider: `{}`",
                self.ctx.agent().provider().name()
            ));
        }

        None
    }

    async fn ask(&self, text: &str, key: &str) -> Result<String, skynet_agent::provider::ProviderError> {
        use skynet_agent::pipeline::process_message_non_streaming;

        let model_override = self.config.model.as_deref();
        let pm = process_message_non_streaming(
            &self.ctx,
            key,
            "local",
            text,
            None,
            model_override,
            None,
            None,
            None,
            None,
        )
        .await?;
        Ok(pm.content)
    }
}
