//! Operator confirmation
//!
//! The apply pipeline blocks on operator input in two places: the plan
//! confirmation gate and the manual DNS prompt. Both go through [`Prompt`]
//! so the pipeline can be driven without a terminal.

use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};
use tokio::sync::Mutex;

use crate::{Error, Result};

/// Source of operator answers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Prompt: Send + Sync {
    /// Print `question` and read one line of input
    async fn read_line(&self, question: &str) -> Result<String>;

    /// Ask a yes/no question; only an explicit yes confirms
    async fn confirm(&self, question: &str) -> Result<bool> {
        let answer = self.read_line(&format!("{} [type \"yes\" to continue]: ", question)).await?;
        Ok(is_affirmative(&answer))
    }
}

/// Whether an answer counts as explicit confirmation
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "yes" | "y")
}

/// Prompt that writes questions to `W` and reads answers line by line from `R`
///
/// One reader is kept for the prompt's lifetime so input buffered past the
/// first answer (piped stdin) is still there for the next question.
pub struct LinePrompt<R, W> {
    io: Mutex<(R, W)>,
}

/// Prompt on the process's stdin and stdout
pub type StdinPrompt = LinePrompt<BufReader<Stdin>, Stdout>;

impl<R, W> LinePrompt<R, W> {
    /// Create a prompt over the given reader and writer
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }

    /// Give back the reader and writer
    pub fn into_parts(self) -> (R, W) {
        self.io.into_inner()
    }
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> fmt::Debug for LinePrompt<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinePrompt").finish_non_exhaustive()
    }
}

#[async_trait]
impl<R, W> Prompt for LinePrompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read_line(&self, question: &str) -> Result<String> {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;
        writer.write_all(question.as_bytes()).await?;
        writer.flush().await?;

        let mut input = String::new();
        let read = reader
            .read_line(&mut input)
            .await
            .map_err(|e| Error::prompt(format!("reading user input: {}", e)))?;
        if read == 0 {
            return Err(Error::prompt("stdin closed before an answer was given"));
        }
        Ok(input)
    }
}
