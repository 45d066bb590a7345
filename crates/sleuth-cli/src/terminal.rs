use std::io::{IsTerminal, Write};

use async_trait::async_trait;
use sleuth_session::{InputEvent, Notice, Operator};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Line-oriented operator on stdin/stdout. Ctrl-C while waiting for input
/// becomes [`InputEvent::Interrupt`].
pub(crate) struct StdinOperator {
    lines: Lines<BufReader<Stdin>>,
    interactive: bool,
    /// A streamed reply is being printed.
    streaming: bool,
}

impl StdinOperator {
    pub(crate) fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            interactive: std::io::stdin().is_terminal(),
            streaming: false,
        }
    }
}

#[async_trait]
impl Operator for StdinOperator {
    async fn read_line(&mut self, prompt: &str) -> InputEvent {
        print!("{prompt}");
        let _ = std::io::stdout().flush();
        tokio::select! {
            line = self.lines.next_line() => match line {
                Ok(Some(line)) => InputEvent::Line(line),
                Ok(None) => InputEvent::Eof,
                Err(e) => {
                    tracing::warn!("stdin read failed: {}", e);
                    InputEvent::Eof
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                InputEvent::Interrupt
            }
        }
    }

    fn show(&mut self, notice: Notice) {
        let mut out = std::io::stdout().lock();
        match notice {
            Notice::ModelDelta(text) => {
                self.streaming = true;
                let _ = write!(out, "{text}");
                let _ = out.flush();
                return;
            }
            Notice::ModelReply(text) => {
                if self.streaming {
                    let _ = writeln!(out);
                } else if !text.is_empty() {
                    let _ = writeln!(out, "{text}");
                }
                self.streaming = false;
                return;
            }
            _ => {}
        }
        if self.streaming {
            let _ = writeln!(out);
            self.streaming = false;
        }

        let _ = match notice {
            Notice::Info(text) | Notice::Output(text) => writeln!(out, "{text}"),
            Notice::Error(text) => {
                drop(out);
                eprintln!("{text}");
                Ok(())
            }
            Notice::ToolCall(call) => writeln!(out, "  [tool] {call}"),
            Notice::Stop {
                location,
                reason,
                exception,
                source,
            } => {
                let _ = writeln!(
                    out,
                    "\n-> Stopped at {}:{} in {} ({reason})",
                    location.file, location.line, location.function
                );
                if let Some(exception) = exception {
                    let _ = writeln!(out, "   {exception}");
                }
                match source {
                    Some(source) => write!(out, "{source}"),
                    None => Ok(()),
                }
            }
            Notice::WatchChanged {
                expression,
                previous,
                current,
            } => writeln!(
                out,
                "  watch {expression}: {} -> {current}",
                previous.as_deref().unwrap_or("<unset>")
            ),
            Notice::ModelDelta(_) | Notice::ModelReply(_) => Ok(()),
        };
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}
