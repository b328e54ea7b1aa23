mod config;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use prefetch_core::{
    ContextRecord, DatasetSplit, FetchDepth, PrefetchError, PrefetchResult, QuestionSource,
    Questions, RetrievedPassage, Retriever, RetrieverKind,
};
use prefetch_store::{
    coverage, open_retriever, ArchiveFetcher, ArchiveWriter, CacheKeyResolver, CacheOrigin,
    DiskRetriever, HttpFetcher, MemberCompression, OfflineFetcher, PrefetchedRetriever,
    QuestionFile, RetrieverOptions,
};

use crate::config::Config;

#[derive(Parser)]
#[command(
    name = "prefetch",
    version,
    about = "Prefetched retrieval cache for retrieval-augmented QA experiments"
)]
struct Cli {
    /// Directory holding downloaded archives and the in-memory caches
    #[arg(long, global = true)]
    checkpoint: Option<PathBuf>,

    /// Dataset name (FACTOIDQA, STRATEGYQA, EntityQuestions, ...)
    #[arg(long, global = true)]
    dataset: Option<String>,

    /// Dataset split (train, dev, test)
    #[arg(long, global = true)]
    split: Option<String>,

    /// Retriever type that produced the archive, or "none"
    #[arg(long, global = true)]
    retriever: Option<String>,

    /// Prefetched depth of the archive (integer or "varying")
    #[arg(long, global = true)]
    depth: Option<String>,

    /// Build-time top-k of the in-memory cache
    #[arg(long, global = true)]
    top_k: Option<usize>,

    /// Serve from the in-memory cache instead of seeking the archive
    #[arg(long, global = true)]
    in_memory: bool,

    /// Question file (JSONL, JSON array, or zip with --questions-member)
    #[arg(long, global = true)]
    questions: Option<PathBuf>,

    /// Member of the --questions zip archive
    #[arg(long, global = true)]
    questions_member: Option<String>,

    /// Never download; fail if an archive is missing
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve the prefetched passages for a question
    Retrieve {
        /// Question text, exactly as keyed in the archive
        question: String,

        /// Number of passages
        #[arg(short, long, default_value = "5")]
        k: usize,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print the stored archive record for a question
    Show {
        question: String,

        /// Print the line exactly as stored
        #[arg(long)]
        raw: bool,
    },

    /// Build the offset index and print its statistics
    Index,

    /// Build (or load) the in-memory cache for the configured split
    Warm,

    /// Measure at which rank the first answer-bearing passage appears
    Coverage {
        /// Deepest rank to inspect (default: archive depth)
        #[arg(long)]
        max_k: Option<usize>,

        /// Write the report as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download the configured archive if it is not present
    Fetch,

    /// Pack a JSONL file of context records into a zip archive
    Pack {
        /// JSONL input, one {"question", "context"} record per line
        input: PathBuf,

        /// Archive to create
        archive: PathBuf,

        /// Member name inside the archive
        #[arg(short, long, default_value = "data.jsonl")]
        member: String,

        /// Store uncompressed so lookups can seek directly
        #[arg(long)]
        stored: bool,

        /// Parse and validate every record before writing it
        #[arg(long)]
        validate: bool,
    },

    /// List the archive keys known to the registry
    Keys,

    /// Show the active configuration
    Config,
}

/// Effective settings after config file and flags are merged.
struct Settings {
    options: RetrieverOptions,
    resolver: CacheKeyResolver,
    questions: Option<QuestionFile>,
    offline: bool,
}

impl Settings {
    fn fetcher(&self) -> Box<dyn ArchiveFetcher> {
        if self.offline {
            Box::new(OfflineFetcher)
        } else {
            Box::new(HttpFetcher::new())
        }
    }

    fn question_source(&self) -> &dyn QuestionSource {
        match &self.questions {
            Some(file) => file as &dyn QuestionSource,
            None => &NoQuestions,
        }
    }
}

/// Stands in when no question file is configured; only fails if a drain
/// actually needs the questions.
struct NoQuestions;

impl QuestionSource for NoQuestions {
    fn questions(&self) -> PrefetchResult<Questions<'_>> {
        Err(PrefetchError::Configuration(
            "no question file configured (set [dataset] path or pass --questions)".into(),
        ))
    }
}

fn default_checkpoint_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "prefetch", "prefetch")
        .map(|dirs| dirs.data_dir().join("checkpoints"))
        .unwrap_or_else(|| PathBuf::from(".checkpoints"))
}

fn build_settings(cli: &Cli, cfg: &Config) -> Result<Settings> {
    let checkpoint_dir = cli
        .checkpoint
        .clone()
        .or_else(|| cfg.experiment.checkpoint_path.as_ref().map(PathBuf::from))
        .unwrap_or_else(default_checkpoint_dir);

    let dataset = cli.dataset.clone().unwrap_or_else(|| cfg.dataset.name.clone());
    let split: DatasetSplit = cli
        .split
        .as_deref()
        .unwrap_or(&cfg.dataset.split)
        .parse()?;

    let kind = cli.retriever.as_deref().unwrap_or(&cfg.retriever.kind);
    let retriever = if kind.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(kind.parse::<RetrieverKind>()?)
    };
    let depth: FetchDepth = cli
        .depth
        .as_deref()
        .unwrap_or(&cfg.retriever.prefetched_k_size)
        .parse()?;

    let questions = match (&cli.questions, &cfg.dataset.path) {
        (Some(path), _) => Some(question_file(path, cli.questions_member.as_deref())),
        (None, Some(path)) => Some(question_file(
            Path::new(path),
            cfg.dataset.member.as_deref(),
        )),
        (None, None) => None,
    };

    let options = RetrieverOptions {
        checkpoint_dir,
        dataset,
        split,
        retriever,
        depth,
        top_k: cli.top_k.unwrap_or(cfg.retriever.retriever_top_k),
        load_in_memory: cli.in_memory || cfg.retriever.load_in_memory,
    };
    debug!("effective retriever options: {options:?}");

    Ok(Settings {
        options,
        resolver: CacheKeyResolver::new(cfg.registry()?),
        questions,
        offline: cli.offline,
    })
}

fn question_file(path: &Path, member: Option<&str>) -> QuestionFile {
    match member {
        Some(m) => QuestionFile::in_archive(path, m),
        None => QuestionFile::new(path),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config()?;

    match &cli.command {
        Commands::Pack {
            input,
            archive,
            member,
            stored,
            validate,
        } => return cmd_pack(input, archive, member, *stored, *validate),
        Commands::Config => return cmd_config(&cli, &cfg),
        _ => {}
    }

    let settings = build_settings(&cli, &cfg)?;
    match cli.command {
        Commands::Retrieve { question, k, json } => cmd_retrieve(&settings, &question, k, json),
        Commands::Show { question, raw } => cmd_show(&settings, &question, raw),
        Commands::Index => cmd_index(&settings),
        Commands::Warm => cmd_warm(&settings),
        Commands::Coverage { max_k, output } => cmd_coverage(&settings, max_k, output),
        Commands::Fetch => cmd_fetch(&settings),
        Commands::Keys => cmd_keys(&settings),
        Commands::Pack { .. } | Commands::Config => unreachable!("handled above"),
    }
}

// ---------------------------------------------------------------------------
// Retrieval commands
// ---------------------------------------------------------------------------

fn open_configured(settings: &Settings) -> Result<PrefetchedRetriever> {
    let fetcher = settings.fetcher();
    let retriever = open_retriever(
        &settings.options,
        &settings.resolver,
        fetcher.as_ref(),
        settings.question_source(),
    )
    .context("failed to open prefetched retriever")?;
    match retriever {
        Some(r) => Ok(r),
        None => bail!("retrieval is disabled (retriever type is \"none\")"),
    }
}

fn open_disk(settings: &Settings) -> Result<DiskRetriever> {
    let Some(key) = settings.options.archive_key() else {
        bail!("retrieval is disabled (retriever type is \"none\")");
    };
    let fetcher = settings.fetcher();
    DiskRetriever::open(
        &key,
        settings.options.split,
        &settings.resolver,
        fetcher.as_ref(),
        &settings.options.checkpoint_dir,
    )
    .with_context(|| format!("failed to open archive {}", key.file_name()))
}

fn cmd_retrieve(settings: &Settings, question: &str, k: usize, json: bool) -> Result<()> {
    let retriever = open_configured(settings)?;
    let passages = retriever.retrieve(question, k)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&passages)?);
        return Ok(());
    }
    if passages.is_empty() {
        println!("No prefetched passages for \"{question}\".");
        return Ok(());
    }
    for p in &passages {
        print_passage(p);
    }
    Ok(())
}

fn cmd_show(settings: &Settings, question: &str, raw: bool) -> Result<()> {
    let retriever = open_disk(settings)?;
    let Some(line) = retriever.raw_record(question)? else {
        bail!("question not in archive: \"{question}\"");
    };
    if raw {
        println!("{}", String::from_utf8_lossy(&line));
    } else {
        let record = ContextRecord::from_line(&line)?;
        println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Ok(())
}

fn cmd_index(settings: &Settings) -> Result<()> {
    let start = Instant::now();
    let retriever = open_disk(settings)?;
    let index = retriever.index();
    let stats = index.stats();

    println!("Archive:    {}", index.member().path().display());
    println!("Member:     {}", index.member().name());
    println!("Questions:  {}", index.len());
    println!("Lines:      {}", stats.lines);
    println!("Duplicates: {}", stats.duplicates);
    println!("Blank:      {}", stats.blank_lines);
    println!("Bytes:      {}", stats.bytes);
    println!("Elapsed:    {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn cmd_warm(settings: &Settings) -> Result<()> {
    let mut options = settings.options.clone();
    options.load_in_memory = true;
    let warm = Settings {
        options,
        resolver: settings.resolver.clone(),
        questions: settings.questions.clone(),
        offline: settings.offline,
    };

    let start = Instant::now();
    match open_configured(&warm)? {
        PrefetchedRetriever::Memory(m) => {
            println!(
                "{} cache {} ({} questions, k={}, created {}) in {:.2}s",
                match m.origin() {
                    CacheOrigin::Loaded => "Loaded",
                    CacheOrigin::Drained => "Built",
                },
                m.key(),
                m.len(),
                m.k_build(),
                m.created_at().format("%Y-%m-%d %H:%M"),
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        PrefetchedRetriever::Disk(_) => bail!("expected an in-memory retriever"),
    }
}

fn cmd_coverage(settings: &Settings, max_k: Option<usize>, output: Option<PathBuf>) -> Result<()> {
    let max_k = match (max_k, settings.options.depth) {
        (Some(k), _) => k,
        (None, FetchDepth::Fixed(k)) => k,
        (None, FetchDepth::Varying) => bail!("--max-k is required for varying-depth archives"),
    };
    let retriever = open_disk(settings)?;
    let report = coverage::analyze(&retriever, settings.question_source(), max_k)?;

    println!(
        "{} questions, {} with a hit within {max_k}, {} without",
        report.total_questions,
        report.hits(),
        report.misses
    );
    println!("{:<8} {:>8} {:>12}", "Rank", "Count", "Cumulative");
    println!("{}", "-".repeat(30));
    for (rank, pct) in report.cumulative() {
        let count = report.first_hit.get(&rank).copied().unwrap_or(0);
        println!("{rank:<8} {count:>8} {pct:>11.1}%");
    }

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Archive commands
// ---------------------------------------------------------------------------

fn cmd_fetch(settings: &Settings) -> Result<()> {
    let Some(key) = settings.options.archive_key() else {
        bail!("retrieval is disabled (retriever type is \"none\")");
    };
    let resolved = settings.resolver.resolve_split(&key, settings.options.split)?;
    let fetcher = settings.fetcher();
    let path = resolved
        .location
        .ensure_local(&settings.options.checkpoint_dir, fetcher.as_ref())?;
    println!("{} -> {}", key.file_name(), path.display());
    Ok(())
}

fn cmd_pack(
    input: &Path,
    archive: &Path,
    member: &str,
    stored: bool,
    validate: bool,
) -> Result<()> {
    let compression = if stored {
        MemberCompression::Stored
    } else {
        MemberCompression::Deflated
    };
    let reader = BufReader::new(
        File::open(input).with_context(|| format!("opening {}", input.display()))?,
    );

    let mut writer = ArchiveWriter::create(archive, compression)?;
    writer.start_member(member)?;
    if validate {
        use std::io::BufRead;
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = ContextRecord::from_line(line.as_bytes())
                .with_context(|| format!("line {} of {}", i + 1, input.display()))?;
            writer
                .write_record(&record)
                .with_context(|| format!("line {} of {}", i + 1, input.display()))?;
        }
    } else {
        writer.copy_lines(reader)?;
    }
    let lines = writer.finish()?;
    println!("Packed {lines} records into {}:{member}", archive.display());
    Ok(())
}

fn cmd_keys(settings: &Settings) -> Result<()> {
    let registry = settings.resolver.registry();
    println!("Datasets: {}", registry.dataset_names().collect::<Vec<_>>().join(", "));
    println!();
    for name in registry.archive_names() {
        println!("  {name}");
    }
    Ok(())
}

fn cmd_config(cli: &Cli, cfg: &Config) -> Result<()> {
    println!("Config: {}", config::show_config_path());
    let settings = build_settings(cli, cfg)?;
    let o = &settings.options;
    println!();
    println!("checkpoint_path   = {}", o.checkpoint_dir.display());
    println!("dataset           = {}", o.dataset);
    println!("split             = {}", o.split);
    println!(
        "retriever         = {}",
        o.retriever.map_or_else(|| "none".to_string(), |k| k.to_string())
    );
    println!("prefetched_k_size = {}", o.depth);
    println!("retriever_top_k   = {}", o.top_k);
    println!("load_in_memory    = {}", o.load_in_memory);
    match &settings.questions {
        Some(q) => println!("questions         = {}", q.path().display()),
        None => println!("questions         = (none)"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_passage(p: &RetrievedPassage) {
    let marker = if p.has_answer { " *" } else { "" };
    println!("[{}] {}  score={:.4}{marker}", p.rank, p.id, p.score);
    if !p.title.is_empty() {
        println!("    {}", p.title);
    }
    println!("    {}", truncate(&p.text, 200));
    println!();
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max {
        s
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("prefetch").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_override_config() {
        let cli = parse(&[
            "--dataset",
            "STRATEGYQA",
            "--split",
            "val",
            "--retriever",
            "DPR",
            "--top-k",
            "8",
            "--in-memory",
            "keys",
        ]);
        let settings = build_settings(&cli, &Config::default()).unwrap();
        let o = &settings.options;
        assert_eq!(o.dataset, "STRATEGYQA");
        assert_eq!(o.split, DatasetSplit::Dev);
        assert_eq!(o.retriever, Some(RetrieverKind::Dpr));
        assert_eq!(o.depth, FetchDepth::Fixed(100));
        assert_eq!(o.top_k, 8);
        assert!(o.load_in_memory);
        assert!(settings.questions.is_none());
    }

    #[test]
    fn test_retriever_none() {
        let cli = parse(&["--retriever", "none", "keys"]);
        let settings = build_settings(&cli, &Config::default()).unwrap();
        assert!(settings.options.archive_key().is_none());
    }

    #[test]
    fn test_bad_split_rejected() {
        let cli = parse(&["--split", "holdout", "keys"]);
        assert!(build_settings(&cli, &Config::default()).is_err());
    }

    #[test]
    fn test_no_questions_fails_lazily() {
        assert!(NoQuestions.questions().is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a\nb", 10), "a b");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[test]
    fn test_pack_then_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("records.jsonl");
        std::fs::write(
            &input,
            concat!(
                r#"{"question":"what is x?","context":[{"id":"a","rank":1,"title":"X","text":"x","score":"3.0","has_answer":true}]}"#,
                "\n\n",
                r#"{"question":"what is y?","context":[]}"#,
                "\n",
            ),
        )
        .unwrap();
        let archive = dir.path().join("packed.zip");
        cmd_pack(&input, &archive, "data.jsonl", false, true).unwrap();

        let retriever = DiskRetriever::from_archive(&archive, "data.jsonl", dir.path()).unwrap();
        assert_eq!(retriever.index().len(), 2);
        assert_eq!(retriever.retrieve("what is x?", 3).unwrap()[0].id, "a");
    }
}
