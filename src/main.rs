// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Command-line interface for chatgpt2md.
//!
//! This binary provides the `chatgpt2md` command for converting ChatGPT
//! conversation exports from JSON to Markdown format.

use chatgpt2md::renderer::RenderOptions;
use chatgpt2md::warning::Warning;
use chatgpt2md::{ConvertError, ErrorKind};
use lexopt::prelude::*;
use snafu::prelude::*;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Where to write the rendered output.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OutputTarget {
    /// Write to the given file, or directory when the input is a directory.
    Path(PathBuf),
    /// Write to stdout.
    Stdout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

struct Cli {
    input: Option<PathBuf>,
    output: Option<OutputTarget>,
    render: RenderOptions,
    verbosity: Verbosity,
    dry_run: bool,
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to parse arguments: {source}"))]
    ParseArgs { source: lexopt::Error },

    #[snafu(display("failed to read input path: {source}"))]
    Prompt { source: io::Error },

    #[snafu(display("cannot write a directory of conversions to stdout"))]
    DirectoryToStdout,

    #[snafu(display("input file does not exist: {}", path.display()))]
    MissingInput { path: PathBuf },

    #[snafu(display("failed to read {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: io::Error },

    #[snafu(display("failed to convert {}: {source}", path.display()))]
    Convert { path: PathBuf, source: ConvertError },

    #[snafu(display("failed to create directory {}: {source}", path.display()))]
    CreateOutputDir { path: PathBuf, source: io::Error },

    #[snafu(display("failed to write {}: {source}", path.display()))]
    WriteFile { path: PathBuf, source: io::Error },

    #[snafu(display("failed to write to stdout: {source}"))]
    WriteStdout { source: io::Error },
}

impl Error {
    fn exit_code(&self) -> ExitCode {
        let code = match self {
            Self::ParseArgs { .. } | Self::Prompt { .. } | Self::DirectoryToStdout => 1,
            Self::MissingInput { .. } | Self::ReadFile { .. } => 2,
            Self::Convert { source, .. } => match source.kind() {
                ErrorKind::InvalidJson => 3,
                ErrorKind::MalformedInput => 4,
            },
            Self::CreateOutputDir { .. } | Self::WriteFile { .. } | Self::WriteStdout { .. } => 5,
        };
        ExitCode::from(code)
    }
}

fn print_help() {
    println!(
        "\
{name} {version}
Convert ChatGPT conversation exports to Markdown

Usage: {name} [OPTIONS] [INPUT] [OUTPUT]

Arguments:
  [INPUT]   Conversation JSON file, or a directory of them (prompted if omitted)
  [OUTPUT]  Output file (default: INPUT with a .md extension)

Options:
  -i, --input <INPUT>       Input file or directory (overrides the positional)
  -o, --output <OUTPUT>     Output file, directory, or - for stdout
      --heading-offset <N>  Shift heading levels by N (0-5, default: 0)
      --utc                 Format timestamps in UTC instead of local time

Content display (use --show-* or --hide-*):
      --show-title          Include the conversation title (default: on)
      --hide-title          Hide the conversation title
      --show-timestamps     Include timestamps (default: on)
      --hide-timestamps     Hide timestamps
      --show-model          Include model ID (default: on)
      --hide-model          Hide model ID
      --show-reasoning      Include reasoning blocks (default: on)
      --hide-reasoning      Hide reasoning blocks

Other options:
  -q, --quiet               Only report warnings and errors
  -v, --verbose             Report skipped content
  -n, --dry-run             Show what would be written without writing
  -h, --help                Print help
  -V, --version             Print version",
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
    );
}

fn parse_args() -> Result<Cli, lexopt::Error> {
    let mut positional = Vec::new();
    let mut input = None;
    let mut output = None;
    let mut render = RenderOptions::default();
    let mut verbosity = Verbosity::Normal;
    let mut dry_run = false;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Short('i') | Long("input") => input = Some(parser.value()?.string()?),
            Short('o') | Long("output") => output = Some(parser.value()?.string()?),
            // Show/hide flags - last one wins
            Long("show-title") => render.show_title = true,
            Long("hide-title") => render.show_title = false,
            Long("show-timestamps") => render.show_timestamps = true,
            Long("hide-timestamps") => render.show_timestamps = false,
            Long("show-model") => render.show_model = true,
            Long("hide-model") => render.show_model = false,
            Long("show-reasoning") => render.show_reasoning = true,
            Long("hide-reasoning") => render.show_reasoning = false,
            Long("utc") => render.utc = true,
            Long("heading-offset") => {
                let val: u8 = parser
                    .value()?
                    .parse()
                    .map_err(|_| "heading-offset must be a number 0-5")?;
                if val > 5 {
                    return Err("heading-offset must be 0-5".into());
                }
                render.heading_offset = val;
            }
            Short('q') | Long("quiet") => verbosity = Verbosity::Quiet,
            Short('v') | Long("verbose") => verbosity = Verbosity::Verbose,
            Short('n') | Long("dry-run") => dry_run = true,
            Short('h') | Long("help") => {
                print_help();
                std::process::exit(0);
            }
            Short('V') | Long("version") => {
                println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            Value(val) if positional.len() < 2 => positional.push(val.string()?),
            _ => return Err(arg.unexpected()),
        }
    }

    // Flags take precedence over the positionals
    let mut positional = positional.into_iter();
    let (positional_input, positional_output) = (positional.next(), positional.next());
    let input = input.or(positional_input);
    let output = output.or(positional_output);

    Ok(Cli {
        input: input.as_deref().map(normalize_path),
        output: output.as_deref().map(|raw| {
            if raw.trim() == "-" {
                OutputTarget::Stdout
            } else {
                OutputTarget::Path(normalize_path(raw))
            }
        }),
        render,
        verbosity,
        dry_run,
    })
}

fn init_logging(verbosity: Verbosity) {
    let default = match verbosity {
        Verbosity::Quiet => "warn",
        Verbosity::Normal => "info",
        Verbosity::Verbose => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let cli = match parse_args().context(ParseArgsSnafu) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("error: {err}");
            return err.exit_code();
        }
    };

    init_logging(cli.verbosity);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            err.exit_code()
        }
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    let input = match &cli.input {
        Some(path) => path.clone(),
        None => match prompt_input_path()? {
            Some(path) => path,
            None => {
                info!("Cancelled");
                return Ok(());
            }
        },
    };

    if input.is_dir() {
        return process_directory(&input, cli);
    }

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| OutputTarget::Path(default_output_path(&input)));
    process_file(&input, &output, cli)
}

/// Asks for an input path on stderr until a readable file is given.
///
/// Returns `None` if the user cancels or stdin is closed.
fn prompt_input_path() -> Result<Option<PathBuf>, Error> {
    let stdin = io::stdin();
    let mut stderr = io::stderr();
    write!(
        stderr,
        "Path to a ChatGPT conversation export (quotes allowed, q to quit): "
    )
    .context(PromptSnafu)?;

    loop {
        stderr.flush().context(PromptSnafu)?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context(PromptSnafu)? == 0 {
            return Ok(None);
        }

        let answer = line.trim();
        if is_cancel(answer) {
            return Ok(None);
        }

        let candidate = normalize_path(answer);
        if candidate.is_file() {
            return Ok(Some(candidate));
        }

        write!(
            stderr,
            "Not a readable file: {answer}\nTry again (q to quit): "
        )
        .context(PromptSnafu)?;
    }
}

fn is_cancel(answer: &str) -> bool {
    answer.is_empty()
        || ["q", "quit", "exit"]
            .iter()
            .any(|word| answer.eq_ignore_ascii_case(word))
}

/// Returns the input path with its extension replaced by `.md`.
fn default_output_path(input: &Path) -> PathBuf {
    input.with_extension("md")
}

/// Collects all JSON files beneath `dir`, sorted by path.
fn collect_json_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

/// Converts every export beneath `dir`, next to its input or mirrored into
/// the output directory.
fn process_directory(dir: &Path, cli: &Cli) -> Result<(), Error> {
    let out_dir = match &cli.output {
        Some(OutputTarget::Stdout) => return DirectoryToStdoutSnafu.fail(),
        Some(OutputTarget::Path(path)) => Some(path.as_path()),
        None => None,
    };

    let files = collect_json_files(dir);
    if files.is_empty() {
        warn!("No JSON files found in {}", dir.display());
    }

    for file in &files {
        let target = match out_dir {
            Some(out) => out
                .join(file.strip_prefix(dir).unwrap_or(file.as_path()))
                .with_extension("md"),
            None => default_output_path(file),
        };
        process_file(file, &OutputTarget::Path(target), cli)?;
    }

    Ok(())
}

/// Converts a single file and writes the result to `output`.
fn process_file(input: &Path, output: &OutputTarget, cli: &Cli) -> Result<(), Error> {
    ensure!(input.is_file(), MissingInputSnafu { path: input });

    let json = std::fs::read_to_string(input).context(ReadFileSnafu { path: input })?;
    let conversion =
        chatgpt2md::convert(&json, &cli.render).context(ConvertSnafu { path: input })?;
    report_warnings(input, &conversion.warnings);

    match output {
        OutputTarget::Stdout => {
            if cli.dry_run {
                info!("Would write {} to stdout", input.display());
                return Ok(());
            }
            io::stdout()
                .lock()
                .write_all(conversion.markdown.as_bytes())
                .context(WriteStdoutSnafu)?;
        }
        OutputTarget::Path(path) => {
            if cli.dry_run {
                info!("Would write {}", path.display());
                return Ok(());
            }
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).context(CreateOutputDirSnafu { path: parent })?;
            }
            std::fs::write(path, &conversion.markdown).context(WriteFileSnafu { path })?;
            info!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn report_warnings(input: &Path, warnings: &[Warning]) {
    for warning in warnings {
        match warning {
            Warning::UnrecognizedContent { .. } => debug!("{}: {warning}", input.display()),
            Warning::UnpairedOutput { .. } | Warning::RewriteDegradation { .. } => {
                warn!("{}: {warning}", input.display());
            }
        }
    }
}

/// Cleans up a user-supplied path.
///
/// Surrounding whitespace and one pair of matching quotes are removed, then
/// environment variables and a leading `~` are expanded.
fn normalize_path(raw: &str) -> PathBuf {
    let unquoted = strip_quotes(raw.trim()).trim();
    expand_home(&expand_vars(unquoted, |name| std::env::var(name).ok()))
}

fn strip_quotes(s: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|q| s.strip_prefix(q)?.strip_suffix(q))
        .unwrap_or(s)
}

fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with(['/', '\\']) => &rest[1..],
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

/// Expands `$VAR`, `${VAR}` and `%VAR%`. Unknown variables are left as written.
fn expand_vars(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find(['$', '%']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match var_reference(tail) {
            Some((name, len)) => {
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&tail[..len]),
                }
                rest = &tail[len..];
            }
            None => {
                out.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Parses a variable reference at the start of `s`, returning the name and
/// the byte length of the whole reference.
fn var_reference(s: &str) -> Option<(&str, usize)> {
    let is_name = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let valid = |name: &str| !name.is_empty() && name.chars().all(is_name);

    if let Some(braced) = s.strip_prefix("${") {
        let name = &braced[..braced.find('}')?];
        valid(name).then_some((name, name.len() + 3))
    } else if let Some(bare) = s.strip_prefix('$') {
        let end = bare.find(|c: char| !is_name(c)).unwrap_or(bare.len());
        (end > 0).then_some((&bare[..end], end + 1))
    } else if let Some(percent) = s.strip_prefix('%') {
        let name = &percent[..percent.find('%')?];
        valid(name).then_some((name, name.len() + 2))
    } else {
        None
    }
}
