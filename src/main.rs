use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use retyper::device::{open_surface, resolve_backend, Backend};
use retyper::markup::{chunk, preprocess};
use retyper::model::{
    Chunk, Document, FormattingMode, Outcome, Point, SessionEvent, SessionOptions, SessionReport,
    SessionState,
};
use retyper::pacing::Pacer;
use retyper::session::validate_document;
use retyper::sim::SimSurface;
use retyper::verify::evaluate;
use retyper::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Auto,
    X11,
}

impl BackendArg {
    fn to_library(self) -> Backend {
        match self {
            BackendArg::Auto => Backend::Auto,
            BackendArg::X11 => Backend::X11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormattingArg {
    /// Type clean text, then select each marked span and apply its shortcut.
    After,
    /// Toggle Ctrl+B/I/U while typing.
    Inline,
    /// Strip markers and type plain text only.
    Ignore,
}

impl FormattingArg {
    fn to_library(self) -> FormattingMode {
        match self {
            FormattingArg::After => FormattingMode::After,
            FormattingArg::Inline => FormattingMode::Inline,
            FormattingArg::Ignore => FormattingMode::Ignore,
        }
    }
}

fn parse_point(s: &str) -> std::result::Result<Point, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got {s:?}"))?;
    let x = x.trim().parse().map_err(|_| format!("invalid x coordinate {x:?}"))?;
    let y = y.trim().parse().map_err(|_| format!("invalid y coordinate {y:?}"))?;
    Ok(Point::new(x, y))
}

#[derive(Debug, Args, Clone)]
struct TypingArgs {
    /// Base delay between keystrokes, in milliseconds
    #[arg(long, default_value_t = 20)]
    delay_ms: u64,

    /// Maximum random deviation from the base delay, in milliseconds
    #[arg(long, default_value_t = 5)]
    jitter_ms: u64,

    /// Characters typed between in-chunk verifications (0 disables them)
    #[arg(long, default_value_t = 100)]
    verify_interval: usize,

    #[arg(long, default_value_t = 500)]
    max_chunk_size: usize,

    /// Pause between chunks, in milliseconds
    #[arg(long, default_value_t = 500)]
    chunk_pause_ms: u64,

    /// Accept >= 95% similarity even with errors left (default requires 99% and no errors)
    #[arg(long)]
    lenient: bool,

    /// Verify and report mismatches without correcting them
    #[arg(long)]
    no_correct: bool,

    /// Maximum mismatch records per verification
    #[arg(long, default_value_t = 20)]
    max_errors: usize,

    /// How **bold**, _italic_ and __underline__ markers are handled.
    #[arg(long, value_enum, default_value_t = FormattingArg::After)]
    formatting: FormattingArg,

    /// Keep single line breaks instead of turning them into paragraph breaks
    #[arg(long)]
    keep_line_breaks: bool,

    /// Optional RNG seed for keystroke jitter (for debugging)
    #[arg(long)]
    seed: Option<u64>,
}

impl TypingArgs {
    fn to_options(&self, countdown_secs: u64) -> SessionOptions {
        SessionOptions {
            delay_ms: self.delay_ms,
            jitter_ms: self.jitter_ms,
            verify_interval: self.verify_interval,
            max_chunk_size: self.max_chunk_size,
            strict: !self.lenient,
            correct: !self.no_correct,
            max_errors: self.max_errors,
            countdown_secs,
            chunk_pause_ms: self.chunk_pause_ms,
            normalize_paragraphs: !self.keep_line_breaks,
            formatting: self.formatting.to_library(),
            seed: self.seed,
            ..SessionOptions::default()
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "retyper")]
#[command(about = "Types text into a focused editor, verifies the result and repairs mistakes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Type a document into the editor under the pointer
    Run {
        /// Input backend.
        ///
        /// - auto: choose a backend based on the runtime environment
        /// - x11: force X11 (XTEST)
        #[arg(long, value_enum, default_value_t = BackendArg::Auto)]
        backend: BackendArg,

        /// Input text file, or '-' for stdin
        #[arg(long, value_name = "PATH")]
        input: PathBuf,

        /// Screen point to click before typing (defaults to the pointer position)
        #[arg(long, value_name = "X,Y", value_parser = parse_point)]
        at: Option<Point>,

        /// Countdown seconds before typing starts
        #[arg(long, default_value_t = 5)]
        countdown: u64,

        /// Write the JSON session report to this file
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,

        /// Disable console status output
        #[arg(long)]
        no_status: bool,

        #[command(flatten)]
        typing: TypingArgs,
    },

    /// Run a full session against an in-memory editor and print the report (JSON)
    Simulate {
        /// Input text file, or '-' for stdin
        #[arg(long, value_name = "PATH")]
        input: PathBuf,

        /// Inject a typo every N typed letters or digits (0 disables)
        #[arg(long, default_value_t = 0)]
        typo_every: usize,

        /// Maximum number of injected typos
        #[arg(long, default_value_t = 10)]
        typo_limit: usize,

        /// Disable console status output
        #[arg(long)]
        no_status: bool,

        #[command(flatten)]
        typing: TypingArgs,
    },

    /// Compare two files the way a session verifies (JSON)
    Check {
        #[arg(long, value_name = "PATH")]
        expected: PathBuf,

        #[arg(long, value_name = "PATH")]
        actual: PathBuf,

        #[arg(long)]
        lenient: bool,

        #[arg(long, default_value_t = 20)]
        max_errors: usize,
    },

    /// Show the preprocessed document and its chunks (JSON)
    Chunks {
        /// Input text file, or '-' for stdin
        #[arg(long, value_name = "PATH")]
        input: PathBuf,

        #[arg(long, default_value_t = 500)]
        max_chunk_size: usize,

        #[arg(long)]
        keep_line_breaks: bool,
    },
}

#[derive(Debug, Serialize)]
struct ChunksPreview {
    document: Document,
    chunks: Vec<Chunk>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn read_input(path: &PathBuf) -> Result<String> {
    if path.as_os_str() == std::ffi::OsStr::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }

    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write_output(path: &PathBuf, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn print_status(event: &SessionEvent) {
    const RESET: &str = "\x1b[0m";
    const TYPING: &str = "\x1b[34m";
    const CHECK: &str = "\x1b[33m";
    const DONE: &str = "\x1b[32m";
    const STOP: &str = "\x1b[31m";

    match event {
        SessionEvent::StateChanged(state @ SessionState::Typing(_)) => {
            eprintln!("{TYPING}Typing{RESET} {state}");
        }
        SessionEvent::StateChanged(
            state @ (SessionState::Verifying | SessionState::Correcting | SessionState::Formatting),
        ) => {
            eprintln!("{CHECK}Check{RESET} {state}");
        }
        SessionEvent::StateChanged(SessionState::Done) => eprintln!("{DONE}Done{RESET}"),
        SessionEvent::StateChanged(state @ (SessionState::Cancelled | SessionState::Failed)) => {
            eprintln!("{STOP}Stopped{RESET} {state}");
        }
        SessionEvent::StateChanged(_) => {}
        SessionEvent::Progress { typed, total } => {
            let pct = if *total == 0 {
                100.0
            } else {
                (*typed as f64) * 100.0 / (*total as f64)
            };
            eprintln!("Progress {typed}/{total} ({pct:.1}%)");
        }
        SessionEvent::Status(line) => eprintln!("{line}"),
    }
}

fn summarize(report: &SessionReport) {
    let pct = report
        .verification
        .as_ref()
        .map(|v| format!("{:.1}%", v.match_percentage))
        .unwrap_or_else(|| "n/a".to_string());
    eprintln!(
        "Finished: {:?}, {}/{} chunks, match {pct}, {} correction pass(es), {} dropped char(s)",
        report.outcome,
        report.chunks_typed,
        report.chunks_total,
        report.correction_passes,
        report.dropped.len()
    );
}

fn outcome_result(report: &SessionReport) -> Result<()> {
    match report.outcome {
        Outcome::Verified => Ok(()),
        Outcome::Partial => Err(anyhow!(
            "typed text did not verify; see the report for remaining errors"
        )),
        Outcome::Cancelled => Err(anyhow!("aborted")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Command::Run {
            backend,
            input,
            at,
            countdown,
            report,
            no_status,
            typing,
        } => {
            // Fail fast on unsupported environments/backends.
            resolve_backend(backend.to_library())?;

            let text = read_input(&input)?;
            let surface = open_surface(backend.to_library())?;
            let mut session = Session::new(surface, typing.to_options(countdown))?;

            let cancel = session.cancel_token();
            ctrlc::set_handler(move || cancel.cancel())
                .context("failed to install Ctrl+C handler")?;

            let mut observer = |event: &SessionEvent| {
                if !no_status {
                    print_status(event);
                }
            };
            let outcome = session.run(&text, at, &mut observer)?;

            summarize(&outcome);
            if let Some(path) = report {
                let json =
                    serde_json::to_string_pretty(&outcome).context("failed to serialize report")?;
                write_output(&path, &json)?;
            }
            outcome_result(&outcome)?;
        }
        Command::Simulate {
            input,
            typo_every,
            typo_limit,
            no_status,
            typing,
        } => {
            let text = read_input(&input)?;
            let surface = SimSurface::new().with_typos(typo_every, typo_limit);
            let pacer = Pacer::instant(typing.seed.unwrap_or(0));
            let mut session = Session::with_pacer(surface, typing.to_options(0), pacer)?;

            let mut observer = |event: &SessionEvent| {
                if !no_status {
                    print_status(event);
                }
            };
            let outcome = session.run(&text, None, &mut observer)?;

            summarize(&outcome);
            let json =
                serde_json::to_string_pretty(&outcome).context("failed to serialize report")?;
            println!("{json}");
        }
        Command::Check {
            expected,
            actual,
            lenient,
            max_errors,
        } => {
            let options = SessionOptions {
                strict: !lenient,
                max_errors,
                ..SessionOptions::default()
            };
            let expected = read_input(&expected)?;
            let actual = read_input(&actual)?;
            let result = evaluate(
                &expected,
                &actual,
                options.success_threshold(),
                options.strict,
                options.max_errors,
            );
            for error in &result.errors {
                eprintln!("{error}");
            }
            let json =
                serde_json::to_string_pretty(&result).context("failed to serialize result")?;
            println!("{json}");
        }
        Command::Chunks {
            input,
            max_chunk_size,
            keep_line_breaks,
        } => {
            let text = read_input(&input)?;
            let document = preprocess(&text, !keep_line_breaks);
            validate_document(&document)?;
            let chunks = chunk(&document.text, max_chunk_size);
            eprintln!(
                "{} chars, {} chunk(s), {} formatting span(s)",
                document.char_len(),
                chunks.len(),
                document.spans.len()
            );
            let json = serde_json::to_string_pretty(&ChunksPreview { document, chunks })
                .context("failed to serialize preview")?;
            println!("{json}");
        }
    }

    Ok(())
}
