//! Terminal front-end: questions go to stderr, answers come from a line reader.

use async_trait::async_trait;
use marco_mcp::{Answer, Frontend, FrontendError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

/// Typing one of these at a question abandons the command.
const ABANDON_WORDS: [&str; 3] = ["q", "quit", "cancel"];

pub struct TerminalFrontend<R = BufReader<Stdin>> {
    input: Mutex<R>,
    /// `--yes`: destructive actions are confirmed without asking.
    assume_yes: bool,
}

impl TerminalFrontend {
    pub fn stdin(assume_yes: bool) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), assume_yes)
    }
}

impl<R: AsyncBufRead + Unpin + Send> TerminalFrontend<R> {
    pub fn new(input: R, assume_yes: bool) -> Self {
        Self {
            input: Mutex::new(input),
            assume_yes,
        }
    }

    /// Next line without its terminator; `Closed` at end of input.
    async fn read_line(&self) -> Result<String, FrontendError> {
        let mut line = String::new();
        let read = self
            .input
            .lock()
            .await
            .read_line(&mut line)
            .await
            .map_err(|e| FrontendError::Io(e.to_string()))?;
        if read == 0 {
            return Err(FrontendError::Closed);
        }
        Ok(line.trim().to_string())
    }
}

/// A number picks from `options`; anything else is taken verbatim.
fn pick_option(line: &str, options: &[String]) -> String {
    match line.parse::<usize>() {
        Ok(n) if (1..=options.len()).contains(&n) => options[n - 1].clone(),
        _ => line.to_string(),
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> Frontend for TerminalFrontend<R> {
    async fn ask_user(&self, question: &str, options: &[String]) -> Result<Answer, FrontendError> {
        eprintln!("{}", question);
        for (i, option) in options.iter().enumerate() {
            eprintln!("  {}) {}", i + 1, option);
        }
        eprint!("> ");

        let line = self.read_line().await?;
        if line.is_empty() || ABANDON_WORDS.contains(&line.to_lowercase().as_str()) {
            return Ok(Answer::Abandon);
        }
        Ok(Answer::Text(pick_option(&line, options)))
    }

    async fn confirm_destructive(&self, description: &str) -> Result<bool, FrontendError> {
        if self.assume_yes {
            eprintln!("{} (confirmed by --yes)", description);
            return Ok(true);
        }
        eprint!("{} [y/N] ", description);
        let line = self.read_line().await?;
        Ok(matches!(line.to_lowercase().as_str(), "y" | "yes"))
    }
}
