use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{LazyLock, Mutex};

use anyhow::{Context, anyhow};
use regex::Regex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Install the global subscriber. `SLEUTH_LOG` sets the filter (default
/// `warn`); output goes to `log_file` when given, else stderr.
pub(crate) fn init(log_file: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("SLEUTH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            install(filter, RedactingWriter::new(Mutex::new(file)), json, false)
        }
        None => install(filter, RedactingWriter::new(std::io::stderr), json, true),
    }
}

fn install<M>(filter: EnvFilter, writer: M, json: bool, ansi: bool) -> anyhow::Result<()>
where
    M: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow!("failed to initialise logging: {e}"))
}

/// Wraps any [`MakeWriter`] so API keys never reach the log sink.
pub(crate) struct RedactingWriter<M> {
    inner: M,
}

impl<M> RedactingWriter<M> {
    pub(crate) fn new(inner: M) -> Self {
        Self { inner }
    }
}

pub(crate) struct Redacted<W> {
    inner: W,
}

impl<W: Write> Write for Redacted<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let original = String::from_utf8_lossy(buf);
        let redacted = redact_secrets(&original);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for RedactingWriter<M> {
    type Writer = Redacted<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Redacted {
            inner: self.inner.make_writer(),
        }
    }
}

/// Replace API keys, bearer tokens and `api_key=` values with `[REDACTED]`.
pub(crate) fn redact_secrets(input: &str) -> String {
    static TOKENS: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?x)
              sk-ant-api\S{10,}              # Anthropic API keys
            | sk-[A-Za-z0-9_\-]{20,}         # OpenAI-style keys
            | (?i:bearer)\s+[A-Za-z0-9._\-]{16,}
            ",
        )
        .expect("token redaction regex should compile")
    });
    static KEY_PAIRS: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)(api[_-]?key["']?\s*[:=]\s*["']?)[^\s"',&]+"#)
            .expect("key pair redaction regex should compile")
    });

    let masked = TOKENS.replace_all(input, "[REDACTED]");
    KEY_PAIRS.replace_all(&masked, "${1}[REDACTED]").into_owned()
}
