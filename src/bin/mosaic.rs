use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use emblem_mosaic::{
    ArtifactFormat, EmblemSource, EngineConfig, GridDims, IngestOutcome, MosaicSession,
    OutputDims, TargetGrid,
};

#[derive(Parser, Debug)]
#[command(name = "mosaic", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the per-cell target brightness an emblem produces.
    Targets(TargetsArgs),
    /// Build a composite from a directory of photos, ingested in file-name order.
    Build(BuildArgs),
    /// Print the default engine configuration as JSON.
    Config,
}

#[derive(Parser, Debug)]
struct TargetsArgs {
    /// Emblem image.
    #[arg(long)]
    emblem: PathBuf,

    #[arg(long, default_value_t = 20)]
    cols: u32,

    #[arg(long, default_value_t = 20)]
    rows: u32,

    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct BuildArgs {
    /// Emblem image.
    #[arg(long)]
    emblem: PathBuf,

    /// Directory of photos.
    #[arg(long)]
    photos: PathBuf,

    /// Output composite path.
    #[arg(long)]
    out: PathBuf,

    /// Engine configuration JSON. Grid and output flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    cols: Option<u32>,

    #[arg(long)]
    rows: Option<u32>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long, value_enum)]
    format: Option<FormatChoice>,

    /// Print every broadcast event as a JSON line on stdout.
    #[arg(long)]
    events: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatChoice {
    Jpeg,
    Png,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Targets(args) => cmd_targets(args),
        Command::Build(args) => cmd_build(args).await,
        Command::Config => {
            let json = serde_json::to_string_pretty(&EngineConfig::default())?;
            println!("{json}");
            Ok(())
        }
    }
}

fn cmd_targets(args: TargetsArgs) -> anyhow::Result<()> {
    let grid = GridDims::new(args.cols, args.rows)?;
    let output = OutputDims::new(args.cols, args.rows);
    let targets = TargetGrid::configure(grid, &EmblemSource::Path(args.emblem), output)?;

    if args.json {
        let rows: Vec<Vec<f64>> = targets
            .cells()
            .chunks(args.cols as usize)
            .map(|row| row.iter().map(|c| c.target).collect())
            .collect();
        println!("{}", serde_json::to_string(&rows)?);
        return Ok(());
    }
    for row in targets.cells().chunks(args.cols as usize) {
        let line: Vec<String> = row.iter().map(|c| format!("{:5.1}", c.target)).collect();
        println!("{}", line.join(" "));
    }
    Ok(())
}

async fn cmd_build(args: BuildArgs) -> anyhow::Result<()> {
    let mut cfg = match &args.config {
        Some(p) => EngineConfig::from_json_file(p)?,
        None => EngineConfig::default(),
    };
    let s = &mut cfg.settings;
    s.grid = GridDims {
        cols: args.cols.unwrap_or(s.grid.cols),
        rows: args.rows.unwrap_or(s.grid.rows),
    };
    s.output = OutputDims::new(
        args.width.unwrap_or(s.output.width),
        args.height.unwrap_or(s.output.height),
    );
    s.emblem_path = args.emblem.clone();
    cfg.artifact.path = args.out.clone();
    cfg.artifact.public_location = args.out.display().to_string();
    match args.format {
        Some(FormatChoice::Jpeg) => cfg.artifact.format = ArtifactFormat::default(),
        Some(FormatChoice::Png) => cfg.artifact.format = ArtifactFormat::Png,
        None => {}
    }
    cfg.validate()?;

    let photos = list_photos(&args.photos)?;
    let session = MosaicSession::start(&cfg, EmblemSource::Path(args.emblem.clone())).await?;
    let mut feed = args.events.then(|| session.subscribe());

    let (mut rejected, mut queued) = (0usize, 0usize);
    for path in &photos {
        let bytes = std::fs::read(path).with_context(|| format!("read '{}'", path.display()))?;
        let label = path.file_name().map(|n| n.to_string_lossy().into_owned());
        match session.ingest_bytes(bytes, label).await? {
            IngestOutcome::Rejected { reason } => {
                rejected += 1;
                tracing::warn!(path = %path.display(), %reason, "skipping photo");
            }
            IngestOutcome::Queued { .. } => queued += 1,
            IngestOutcome::Assigned { .. } => {}
        }
        if let Some(feed) = feed.as_mut() {
            while let Some(ev) = feed.try_next() {
                println!("{}", ev.to_json());
            }
        }
    }

    let stats = session.stats();
    session.shutdown().await;
    eprintln!(
        "ingested {} photos ({} rejected, {} queued), filled {}/{} cells",
        photos.len(),
        rejected,
        queued,
        stats.filled,
        stats.total_cells
    );
    eprintln!("wrote {}", args.out.display());
    if !args.events {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}

fn list_photos(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("read photo dir '{}'", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}
