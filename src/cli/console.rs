use crate::agent::ChatAgent;
use log::error;
use std::error::Error;
use tokio::io::{ AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt };

pub const CONSOLE_SESSION_ID: &str = "console";
const PROMPT: &str = "Enter a message (type \"exit\" to quit): ";

/// Terminal chat loop: one line in, one reply out, until `exit` or end of input.
pub async fn run_console<R, W>(
    agent: &ChatAgent,
    input: R,
    mut output: W
) -> Result<(), Box<dyn Error + Send + Sync>>
    where R: AsyncBufRead + Unpin, W: AsyncWrite + Unpin
{
    let mut lines = input.lines();
    output.write_all(b"Welcome to the chat console!\n").await?;

    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") {
            output.write_all(b"Goodbye!\n").await?;
            break;
        }
        if line.is_empty() {
            continue;
        }

        match agent.get_response(line, CONSOLE_SESSION_ID).await {
            Ok(reply) => {
                output.write_all(reply.as_bytes()).await?;
                output.write_all(b"\n").await?;
            }
            Err(e) => {
                error!("Console chat error: {}", e);
                output.write_all(b"Sorry, something went wrong. Please try again.\n").await?;
            }
        }
    }
    output.flush().await?;
    Ok(())
}
