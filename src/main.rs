use std::cell::Cell;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use env_logger::Env;
use log::LevelFilter;

use mkv_chapter_editor::chapter::chapters_to_string;
use mkv_chapter_editor::editor::{
    ChapterEditor, PromptEditor, ScriptedEditor, parse_set, read_titles_file,
};
use mkv_chapter_editor::process::SystemToolRunner;
use mkv_chapter_editor::{Config, Dialect, EditSession, ToolEvent};

#[derive(Parser, Debug)]
#[command(name = "mkv-chapter-editor")]
#[command(version)]
#[command(about = "Rename the chapters of MKV files without re-encoding")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON configuration file
    #[arg(short, long, global = true, default_value = "mkv-chapter-editor.json")]
    config: PathBuf,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the chapters of a file
    List {
        file: PathBuf,

        /// ffmetadata or matroska, defaults to the configured dialect
        #[arg(short, long)]
        dialect: Option<Dialect>,

        /// Print the chapter list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Change chapter titles and write a new file
    Edit {
        file: PathBuf,

        #[arg(short, long)]
        dialect: Option<Dialect>,

        /// File with one title per line, one line per chapter
        #[arg(short, long)]
        titles: Option<PathBuf>,

        /// Set a single title, e.g. --set 3=Credits (repeatable)
        #[arg(short, long = "set", value_name = "N=TITLE", value_parser = parse_set_arg)]
        sets: Vec<(usize, String)>,

        /// Output file, defaults to <prefix><name> next to the input
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_set_arg(s: &str) -> std::result::Result<(usize, String), String> {
    parse_set(s).map_err(|e| e.to_string())
}

fn verbosity(verbose: u8) -> Option<LevelFilter> {
    match verbose {
        0 => None,
        1 => Some(LevelFilter::Debug),
        _ => Some(LevelFilter::Trace),
    }
}

/// Starts logging before the config is read. Unless RUST_LOG is set, the
/// level is narrowed once the config's `log_level` is known.
fn init_logger(verbose: u8) -> bool {
    let from_env = std::env::var_os(env_logger::DEFAULT_FILTER_ENV).is_some();
    let mut builder = env_logger::Builder::from_env(Env::default());
    if !from_env {
        builder.filter_level(LevelFilter::Trace);
    }
    builder.init();
    if !from_env {
        log::set_max_level(verbosity(verbose).unwrap_or(LevelFilter::Info));
    }
    from_env
}

fn load_config(cli: &Cli) -> Result<Config> {
    let from_env = init_logger(cli.verbose);
    let config = Config::from_file(&cli.config)?;
    if !from_env {
        let level = match verbosity(cli.verbose) {
            Some(level) => level,
            None => config.log_filter()?,
        };
        log::set_max_level(level);
    }
    Ok(config)
}

fn list(config: &Config, file: PathBuf, dialect: Dialect, json: bool) -> Result<()> {
    let runner = SystemToolRunner::new(config.tool_timeout);
    let mut session = EditSession::new(&file, dialect, config, &runner);
    let chapters = session
        .extract()
        .with_context(|| format!("Failed to read chapters of {}", file.display()))?;

    let chapters = chapters.to_vec();
    let info = session.container_info();

    if json {
        let listing = serde_json::json!({ "info": info, "chapters": chapters });
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("{}", file.display());
    if let Some(info) = info {
        print!("{info}");
    }
    println!();
    if chapters.is_empty() {
        println!("No chapters");
    } else {
        print!("{}", chapters_to_string(&chapters));
    }
    Ok(())
}

fn edit(
    config: &Config,
    file: PathBuf,
    dialect: Dialect,
    titles: Option<PathBuf>,
    sets: Vec<(usize, String)>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut scripted = ScriptedEditor::new();
    if let Some(path) = titles {
        scripted = scripted.with_titles(read_titles_file(path)?);
    }
    for (index, title) in sets {
        scripted = scripted.with_set(index, title);
    }

    let stdin = io::stdin();
    let mut prompt;
    let editor: &mut dyn ChapterEditor = if scripted.is_empty() {
        prompt = PromptEditor::new(stdin.lock(), io::stdout());
        &mut prompt
    } else {
        &mut scripted
    };

    let progress_shown = Cell::new(false);
    let show_progress = |event: &ToolEvent<'_>| {
        if let ToolEvent::Progress { tool, progress } = event {
            if let Some(percent) = progress.percent {
                eprint!("\r{tool}: {percent:>3}%");
                progress_shown.set(true);
            }
        }
    };

    let runner = SystemToolRunner::new(config.tool_timeout);
    let mut session =
        EditSession::new(&file, dialect, config, &runner).with_observer(&show_progress);
    let result = session.run(editor, output.as_deref());
    if progress_shown.get() {
        eprintln!();
    }
    let outcome =
        result.with_context(|| format!("Failed to edit chapters of {}", file.display()))?;

    println!(
        "Wrote {} chapters to {}",
        outcome.chapter_count,
        outcome.output_path.display()
    );
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Command::List {
            file,
            dialect,
            json,
        } => list(&config, file, dialect.unwrap_or(config.dialect), json),
        Command::Edit {
            file,
            dialect,
            titles,
            sets,
            output,
        } => edit(
            &config,
            file,
            dialect.unwrap_or(config.dialect),
            titles,
            sets,
            output,
        ),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
