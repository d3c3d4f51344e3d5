use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;

use paperdrive_core::{
    Config, Library, MemoryCache, MemoryStore, Paper, RemotePdfOpener, ReqwestTransport,
    SourceFailure,
};
use paperdrive_pdf::{OutlineNode, PdfAnalyzer, PdfInfo};

/// paperdrive - search, fetch and inspect academic papers
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to a TOML config file (defaults to $PAPERDRIVE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Semantic Scholar API key (defaults to $S2_API_KEY)
    #[arg(long, global = true)]
    s2_api_key: Option<String>,

    /// Print JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search the configured sources
    Search {
        /// Query words
        #[arg(required = true)]
        query: Vec<String>,

        /// Results per source
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Fetch and fuse metadata for one paper
    Fetch {
        /// PDF or abstract page URL
        #[arg(long)]
        url: Option<String>,

        /// Paper title
        #[arg(long)]
        title: Option<String>,
    },
    /// Extract outline, destinations and annotations from a PDF
    Analyze {
        /// Local path, file:// or http(s) URL
        location: String,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let env_path = std::env::var_os("PAPERDRIVE_CONFIG").map(PathBuf::from);
    match path.map(Path::to_path_buf).or(env_path) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

struct Printer {
    color: bool,
}

impl Printer {
    fn bold(&self, s: &str) -> String {
        if self.color { s.bold().to_string() } else { s.to_string() }
    }

    fn dim(&self, s: &str) -> String {
        if self.color { s.dimmed().to_string() } else { s.to_string() }
    }

    fn cyan(&self, s: &str) -> String {
        if self.color { s.cyan().to_string() } else { s.to_string() }
    }

    fn warn(&self, s: &str) -> String {
        if self.color { s.yellow().to_string() } else { s.to_string() }
    }

    fn paper(&self, paper: &Paper, config: &Config) {
        println!("{}", self.bold(&paper.format(&config.title_format)));
        let desc = paper.format(&config.desc_format);
        if !desc.trim_matches(|c: char| c == ',' || c.is_whitespace()).is_empty() {
            println!("  {desc}");
        }
        if !paper.pdf_url.is_empty() {
            println!("  {}", self.cyan(&paper.pdf_url));
        }
        if !paper.tags.is_empty() {
            println!("  {}", self.dim(&paper.tags.join(" ")));
        }
        if paper.num_citations > 0 || !paper.references.is_empty() {
            println!(
                "  {} citations, {} references",
                paper.num_citations,
                paper.references.len()
            );
        }
        println!("  {}", self.dim(&format!("id: {}", paper.id)));
    }

    fn failures(&self, failures: &[SourceFailure]) {
        for f in failures {
            eprintln!("{}", self.warn(&format!("warning: {} failed: {}", f.source, f.error)));
        }
    }

    fn outline(&self, nodes: &[OutlineNode], depth: usize) {
        for node in nodes {
            println!("{}{}", "  ".repeat(depth + 1), node.name);
            self.outline(&node.items, depth + 1);
        }
    }

    fn pdf_info(&self, info: &PdfInfo) {
        match &info.outline {
            Some(outline) => {
                println!("{}", self.bold("Outline"));
                self.outline(outline, 0);
            }
            None => println!("{}", self.dim("No outline")),
        }

        println!("{} ({})", self.bold("Destinations"), info.destinations.len());
        for (name, dest) in &info.destinations {
            let text = dest.text.as_ref().map(|t| t.text.as_str()).unwrap_or("");
            println!("  {} p.{} {}", self.cyan(name), dest.page + 1, self.dim(text));
        }

        let annotated: usize = info.annotations.iter().map(Vec::len).sum();
        println!(
            "{} {} on {} pages",
            self.bold("Annotations"),
            annotated,
            info.annotations.iter().filter(|a| !a.is_empty()).count()
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(key) = args.s2_api_key.or_else(|| std::env::var("S2_API_KEY").ok()) {
        config.s2_api_key = Some(key);
    }

    let printer = Printer {
        color: !args.no_color,
    };

    match args.command {
        Command::Search { query, limit } => {
            let query = query.join(" ");
            let library = Library::connect(
                config.clone(),
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryCache::new()),
            )
            .await?;
            log::info!("searching for '{query}'");
            let outcome = library.search(&query, limit).await;
            printer.failures(&outcome.failures);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome.papers)?);
            } else {
                for paper in &outcome.papers {
                    printer.paper(paper, &config);
                }
            }
        }
        Command::Fetch { url, title } => {
            if url.is_none() && title.is_none() {
                anyhow::bail!("fetch needs --url or --title");
            }
            let library = Library::connect(
                config.clone(),
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryCache::new()),
            )
            .await?;
            let paper = Paper {
                pdf_url: url.unwrap_or_default(),
                title: title.unwrap_or_default(),
                ..Paper::default()
            };
            let outcome = library.fetch(&paper).await?;
            printer.failures(&outcome.failures);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome.paper)?);
            } else {
                printer.paper(&outcome.paper, &config);
                if let Some(info) = &outcome.paper.pdf_info {
                    printer.pdf_info(info);
                }
            }
        }
        Command::Analyze { location } => {
            let transport = Arc::new(ReqwestTransport::new(&config)?);
            let analyzer = PdfAnalyzer::new(Arc::new(RemotePdfOpener::new(transport)));
            let info = analyzer
                .analyze(&location, &[])
                .await
                .with_context(|| format!("could not analyze {location}"))?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                printer.pdf_info(&info);
            }
        }
    }

    Ok(())
}
