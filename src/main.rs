use anyhow::{Context, Result};
use boardpatch::config::{self, CodecConfig};
use boardpatch::cursor::hex_lines;
use boardpatch::{EditSession, LoadReport, SourceGuard};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "boardpatch")]
#[command(about = "Edit the net block and JSON trailer of binary board images", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (otherwise $BOARDPATCH_CONFIG, ./boardpatch.toml, ~/.boardpatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log decoder detail to stderr (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the net block and JSON trailer of an image
    Inspect { file: PathBuf },

    /// List net records
    Nets {
        file: PathBuf,

        /// Only show nets whose name contains TERM (case-insensitive)
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Rename one net and rebuild the image
    Rename {
        file: PathBuf,

        /// Position of the record in the net block
        #[arg(long, conflicts_with = "net", required_unless_present = "net")]
        position: Option<usize>,

        /// Current name of the net
        #[arg(long)]
        net: Option<String>,

        /// New name
        #[arg(long)]
        to: String,

        /// Write here instead of overwriting FILE
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show what would change without writing
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Print the JSON trailer document
    Json {
        file: PathBuf,

        #[arg(short, long)]
        pretty: bool,
    },

    /// Replace the JSON trailer document and rebuild the image
    SetJson {
        file: PathBuf,

        /// JSON file holding the new document
        #[arg(long)]
        from: PathBuf,

        /// Write here instead of overwriting FILE
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show what would change without writing
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show a line diff of the pretty-printed documents
        #[arg(short, long)]
        diff: bool,
    },

    /// Append a marker and a default JSON document to an image without one
    AddJson {
        file: PathBuf,

        /// Write here instead of overwriting FILE
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print raw bytes as hex
    Hexdump {
        file: PathBuf,

        /// Start offset (decimal or 0x-prefixed hex)
        #[arg(long, default_value = "0", value_parser = parse_offset)]
        offset: usize,

        /// Number of bytes
        #[arg(long, default_value_t = 50)]
        count: usize,
    },

    /// Report which header layout validates for every .pcb file under DIR
    Scan { dir: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (config, config_path) = config::discover(cli.config.as_deref())?;
    if let Some(path) = &config_path {
        tracing::debug!(path = %path.display(), "loaded config");
    }

    match cli.command {
        Commands::Inspect { file } => cmd_inspect(&file, &config),
        Commands::Nets { file, search } => cmd_nets(&file, search.as_deref(), &config),
        Commands::Rename {
            file,
            position,
            net,
            to,
            output,
            dry_run,
        } => cmd_rename(
            &file,
            position,
            net.as_deref(),
            &to,
            output.as_deref(),
            dry_run,
            &config,
        ),
        Commands::Json { file, pretty } => cmd_json(&file, pretty, &config),
        Commands::SetJson {
            file,
            from,
            output,
            dry_run,
            diff,
        } => cmd_set_json(&file, &from, output.as_deref(), dry_run, diff, &config),
        Commands::AddJson { file, output } => cmd_add_json(&file, output.as_deref(), &config),
        Commands::Hexdump {
            file,
            offset,
            count,
        } => cmd_hexdump(&file, offset, count),
        Commands::Scan { dir } => cmd_scan(&dir, &config),
    }
}

/// Install the stderr subscriber. `-v` wins over `RUST_LOG`.
fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
        1 => EnvFilter::new("boardpatch=debug"),
        _ => EnvFilter::new("boardpatch=trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_offset(value: &str) -> Result<usize, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid offset '{value}': {e}"))
}

/// Helper: Fingerprint and decode a board image.
fn open(file: &Path, config: &CodecConfig) -> Result<(SourceGuard, EditSession, LoadReport)> {
    let (guard, bytes) = SourceGuard::capture(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let (session, report) = EditSession::load(bytes, config.clone());
    Ok((guard, session, report))
}

fn print_warnings(report: &LoadReport) {
    for warning in &report.warnings {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }
}

/// Helper: Write the rebuilt image, to `output` or back over the source.
fn save(guard: &SourceGuard, output: Option<&Path>, bytes: &[u8]) -> Result<PathBuf> {
    let target = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| guard.path().to_path_buf());
    guard
        .write(&target, bytes)
        .with_context(|| format!("failed to write {}", target.display()))?;
    Ok(target)
}

/// Helper: Show a line diff between two texts
fn display_diff(label: &str, original: &str, modified: &str) {
    println!("\n{}", format!("--- {label} (original)").dimmed());
    println!("{}", format!("+++ {label} (edited)").dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

/// Closest existing net name, for "did you mean" hints.
fn closest_name<'a>(names: impl Iterator<Item = &'a str>, target: &str) -> Option<&'a str> {
    names
        .map(|name| (name, strsim::normalized_levenshtein(name, target)))
        .filter(|(_, score)| *score >= 0.5)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(name, _)| name)
}

fn cmd_inspect(file: &Path, config: &CodecConfig) -> Result<()> {
    let (_, session, report) = open(file, config)?;

    println!("{}", file.display().to_string().bold());
    println!("  Size: {} bytes", session.image().len());

    match session.netlist() {
        Some(block) => {
            println!(
                "  Net block: {} layout, offset {} (0x{:X}), {} bytes declared",
                block.layout.name().cyan(),
                block.start_offset,
                block.start_offset,
                block.total_size
            );
            println!(
                "  Nets: {} ({} entries scanned)",
                block.records.len().to_string().green(),
                block.entries_scanned
            );
            if let Some(offset) = block.sentinel_offset {
                println!("  End sentinel: offset {offset}");
            }
        }
        None => println!("  Net block: {}", "not found".yellow()),
    }

    match session.trailer() {
        Some(trailer) => {
            println!(
                "  JSON trailer: marker at {} ({}), payload {}..{}",
                trailer.marker_offset,
                trailer.marker.name(),
                trailer.payload_start,
                trailer.payload_end
            );
            println!(
                "  Parts: {}, JSON nets: {}",
                trailer.document.parts().len(),
                trailer.document.nets().len()
            );
        }
        None => println!("  JSON trailer: {}", "absent".dimmed()),
    }

    print_warnings(&report);
    Ok(())
}

fn cmd_nets(file: &Path, search: Option<&str>, config: &CodecConfig) -> Result<()> {
    let (_, session, report) = open(file, config)?;
    print_warnings(&report);

    let term = search.map(|s| s.trim().to_lowercase()).unwrap_or_default();
    println!(
        "{}",
        format!("{:>5}  {:>10}  {:>5}  {}", "pos", "index", "size", "name").bold()
    );
    let mut shown = 0;
    for (position, record) in session.records().iter().enumerate() {
        if !term.is_empty() && !record.name.to_lowercase().contains(&term) {
            continue;
        }
        println!(
            "{:>5}  {:>10}  {:>5}  {}",
            position, record.index, record.encoded_size, record.name
        );
        shown += 1;
    }
    println!(
        "{}",
        format!("{shown} of {} nets", session.records().len()).dimmed()
    );
    Ok(())
}

fn cmd_rename(
    file: &Path,
    position: Option<usize>,
    net: Option<&str>,
    to: &str,
    output: Option<&Path>,
    dry_run: bool,
    config: &CodecConfig,
) -> Result<()> {
    let (guard, mut session, report) = open(file, config)?;
    print_warnings(&report);

    let position = match (position, net) {
        (Some(position), _) => position,
        (None, Some(name)) => match session.find_net(name) {
            Some(position) => position,
            None => {
                let names = session.records().iter().map(|r| r.name.as_str());
                match closest_name(names, name) {
                    Some(hint) => anyhow::bail!("no net named '{name}' (did you mean '{hint}'?)"),
                    None => anyhow::bail!("no net named '{name}'"),
                }
            }
        },
        (None, None) => anyhow::bail!("either --position or --net is required"),
    };

    let old_name = session
        .records()
        .get(position)
        .map(|r| r.name.clone())
        .unwrap_or_default();
    session.rename_net(position, to)?;
    let before = session.image().len();
    let rebuilt = session.rebuild().context("rebuild failed, nothing written")?;

    if dry_run {
        println!("{}", "[DRY RUN - nothing written]".cyan());
    }
    println!(
        "{} net {}: {} -> {} ({} -> {} bytes)",
        "✓".green(),
        position,
        old_name,
        to.bold(),
        before,
        rebuilt.len()
    );
    if !dry_run {
        let target = save(&guard, output, rebuilt)?;
        println!("  Wrote {}", target.display());
    }
    Ok(())
}

fn cmd_json(file: &Path, pretty: bool, config: &CodecConfig) -> Result<()> {
    let (_, session, report) = open(file, config)?;
    print_warnings(&report);

    let document = session
        .document()
        .ok_or_else(|| anyhow::anyhow!("{} has no JSON trailer", file.display()))?;
    let text = if pretty {
        document.to_pretty_string()
    } else {
        serde_json::to_string(document.as_map())?
    };
    println!("{text}");
    Ok(())
}

fn cmd_set_json(
    file: &Path,
    from: &Path,
    output: Option<&Path>,
    dry_run: bool,
    show_diff: bool,
    config: &CodecConfig,
) -> Result<()> {
    let (guard, mut session, report) = open(file, config)?;
    print_warnings(&report);

    let text =
        fs::read_to_string(from).with_context(|| format!("failed to read {}", from.display()))?;
    let original = session.format_json().unwrap_or_default();
    session
        .replace_json_text(&text)
        .with_context(|| format!("cannot use {} as trailer document", from.display()))?;

    if show_diff {
        let modified = session.format_json().unwrap_or_default();
        display_diff(&file.display().to_string(), &original, &modified);
    }

    let before = session.image().len();
    let rebuilt = session.rebuild().context("rebuild failed, nothing written")?;
    if dry_run {
        println!("{}", "[DRY RUN - nothing written]".cyan());
    }
    println!(
        "{} JSON trailer replaced ({} -> {} bytes)",
        "✓".green(),
        before,
        rebuilt.len()
    );
    if !dry_run {
        let target = save(&guard, output, rebuilt)?;
        println!("  Wrote {}", target.display());
    }
    Ok(())
}

fn cmd_add_json(file: &Path, output: Option<&Path>, config: &CodecConfig) -> Result<()> {
    let (guard, mut session, report) = open(file, config)?;
    print_warnings(&report);

    let before = session.image().len();
    let report = session.add_json_trailer()?;
    print_warnings(&report);

    let target = save(&guard, output, session.image())?;
    println!(
        "{} JSON trailer added ({} -> {} bytes)",
        "✓".green(),
        before,
        session.image().len()
    );
    println!("  Wrote {}", target.display());
    Ok(())
}

fn cmd_hexdump(file: &Path, offset: usize, count: usize) -> Result<()> {
    let bytes = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let lines = hex_lines(&bytes, offset, count);
    if lines.is_empty() {
        anyhow::bail!(
            "offset {offset} is past the end of {} ({} bytes)",
            file.display(),
            bytes.len()
        );
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn cmd_scan(dir: &Path, config: &CodecConfig) -> Result<()> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        let is_pcb = entry
            .path()
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pcb"));
        if entry.file_type().is_file() && is_pcb {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();

    if files.is_empty() {
        println!("{}", format!("No .pcb files under {}", dir.display()).yellow());
        return Ok(());
    }

    let mut resolved = 0;
    for path in &files {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), path.display(), e);
                continue;
            }
        };
        let (session, report) = EditSession::load(bytes, config.clone());
        match session.netlist() {
            Some(block) => {
                resolved += 1;
                println!(
                    "{} {}: {} at {}, {} nets{}",
                    "✓".green(),
                    path.display(),
                    block.layout.name().cyan(),
                    block.start_offset,
                    block.records.len(),
                    if session.trailer().is_some() {
                        ", JSON trailer"
                    } else {
                        ""
                    }
                );
            }
            None => println!("{} {}: no header layout validated", "✗".red(), path.display()),
        }
        for warning in &report.warnings {
            println!("    {}", warning.to_string().dimmed());
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} resolved", resolved.to_string().green());
    println!(
        "  {} unresolved",
        (files.len() - resolved).to_string().red()
    );
    Ok(())
}
