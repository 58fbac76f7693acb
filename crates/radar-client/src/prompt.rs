//! User confirmation and notices, injected into the core.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

#[async_trait]
pub trait Prompter: Send + Sync {
    /// Ask a yes/no question.  Anything but an explicit yes is a no.
    async fn confirm(&self, prompt: &str) -> bool;

    fn notify(&self, message: &str);
}

/// Terminal prompter: questions and notices on stderr, answers from stdin.
pub struct StdioPrompter;

#[async_trait]
impl Prompter for StdioPrompter {
    async fn confirm(&self, prompt: &str) -> bool {
        let mut stderr = tokio::io::stderr();
        let question = format!("{prompt} [y/N] ");
        if stderr.write_all(question.as_bytes()).await.is_err() || stderr.flush().await.is_err() {
            return false;
        }
        let mut line = String::new();
        match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
            Ok(_) => is_yes(&line),
            Err(e) => {
                warn!("Failed to read confirmation: {}", e);
                false
            }
        }
    }

    fn notify(&self, message: &str) {
        eprintln!("{message}");
    }
}

/// Answers every question the same way.  Used for `--yes` and tests.
pub struct AutoPrompter {
    pub answer: bool,
}

#[async_trait]
impl Prompter for AutoPrompter {
    async fn confirm(&self, prompt: &str) -> bool {
        info!("Auto-answering {:?} with {}", prompt, self.answer);
        self.answer
    }

    fn notify(&self, message: &str) {
        info!("{}", message);
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
