use std::path::Path;
use std::process;

use clap::{Parser, Subcommand};
use crawlq::config_adapters::{crawl_context_from_settings, scheduler_config_from_settings};
use crawlq::settings::{parse_python_value, Settings};
use crawlq_core::error::Result;
use crawlq_core::request::Request;
use crawlq_scheduler::{QueueScheduler, RequestFingerprinter, Scheduler};
use log::warn;
use tokio::runtime::Runtime;

/// Settings file read when `--settings` is not given
const DEFAULT_SETTINGS: &str = "settings.py";

#[derive(Parser)]
#[command(
    name = "crawlq",
    about = "Crawl request scheduler with memory, disk and broker queues",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule requests
    #[command(name = "push")]
    Push {
        /// URLs to schedule
        #[arg(required = true)]
        urls: Vec<String>,

        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Request priority; higher runs first
        #[arg(short, long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,

        /// Schedule even if the request was seen before
        #[arg(long)]
        dont_filter: bool,

        /// Settings file to use
        #[arg(short, long)]
        settings: Option<String>,
    },

    /// Take requests from the queue and print them
    #[command(name = "pop")]
    Pop {
        /// Maximum number of requests to take
        #[arg(short, long, default_value_t = 1)]
        count: usize,

        /// Settings file to use
        #[arg(short, long)]
        settings: Option<String>,
    },

    /// Show pending and seen request counts
    #[command(name = "stats")]
    Stats {
        /// Settings file to use
        #[arg(short, long)]
        settings: Option<String>,
    },

    /// Print the fingerprint of a request
    #[command(name = "fingerprint")]
    Fingerprint {
        /// Request URL
        url: String,

        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Request body
        #[arg(short, long)]
        body: Option<String>,

        /// Header included in the fingerprint, as `Name: value`
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Get or set a setting value
    #[command(name = "settings")]
    Settings {
        /// Name of the setting to get or set
        name: Option<String>,

        /// Value to set the setting to
        value: Option<String>,

        /// Settings file to use
        #[arg(short, long)]
        settings_file: Option<String>,
    },

    /// Show version information
    #[command(name = "version")]
    Version,
}

fn main() {
    let cli = Cli::parse();

    env_logger::init();

    match cli.command {
        Commands::Push {
            urls,
            method,
            priority,
            dont_filter,
            settings,
        } => {
            let settings = load_settings(settings.as_deref());
            run(push(&settings, &urls, &method, priority, dont_filter));
        }
        Commands::Pop { count, settings } => {
            let settings = load_settings(settings.as_deref());
            run(pop(&settings, count));
        }
        Commands::Stats { settings } => {
            let settings = load_settings(settings.as_deref());
            run(stats(&settings));
        }
        Commands::Fingerprint {
            url,
            method,
            body,
            headers,
        } => {
            if let Err(e) = fingerprint(&url, &method, body.as_deref(), &headers) {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
        Commands::Settings {
            name,
            value,
            settings_file,
        } => {
            manage_settings(name.as_deref(), value.as_deref(), settings_file.as_deref());
        }
        Commands::Version => {
            show_version();
        }
    }
}

fn run<F: std::future::Future<Output = Result<()>>>(task: F) {
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error creating runtime: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(task) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn open_scheduler(settings: &Settings) -> Result<QueueScheduler> {
    let config = scheduler_config_from_settings(settings)?;
    let context = crawl_context_from_settings(settings)?;
    if !config.queue.is_serialized() {
        warn!(
            "Queue kind {} does not outlive this command; set JOBDIR or SCHEDULER_QUEUE",
            config.queue
        );
    }

    let scheduler = QueueScheduler::new(config);
    if let Err(e) = scheduler.open(context).await {
        // release whatever the failed open acquired
        let _ = scheduler.close("open failed").await;
        return Err(e);
    }
    Ok(scheduler)
}

async fn push(
    settings: &Settings,
    urls: &[String],
    method: &str,
    priority: i32,
    dont_filter: bool,
) -> Result<()> {
    let requests = urls
        .iter()
        .map(|url| {
            Request::builder(url.as_str())
                .method(method)
                .priority(priority)
                .dont_filter(dont_filter)
                .build()
        })
        .collect::<Result<Vec<_>>>()?;

    let scheduler = open_scheduler(settings).await?;
    for request in requests {
        let line = request.to_string();
        match scheduler.enqueue(request).await {
            Ok(true) => println!("Scheduled {}", line),
            Ok(false) => println!("Skipped {} (duplicate)", line),
            Err(e) => {
                let _ = scheduler.close("error").await;
                return Err(e);
            }
        }
    }
    scheduler.close("finished").await
}

async fn pop(settings: &Settings, count: usize) -> Result<()> {
    let scheduler = open_scheduler(settings).await?;
    for _ in 0..count {
        match scheduler.dequeue().await {
            Ok(Some(request)) => println!("{}", request),
            Ok(None) => break,
            Err(e) => {
                let _ = scheduler.close("error").await;
                return Err(e);
            }
        }
    }
    scheduler.close("finished").await
}

async fn stats(settings: &Settings) -> Result<()> {
    let scheduler = open_scheduler(settings).await?;
    let pending = scheduler.size().await;
    println!("Queue: {}", scheduler.config().queue);
    match &pending {
        Ok(pending) => println!("Pending requests: {}", pending),
        Err(e) => eprintln!("Error reading queue size: {}", e),
    }
    println!("Seen fingerprints: {}", scheduler.dupefilter().seen_count());
    scheduler.close("finished").await?;
    pending.map(|_| ())
}

fn fingerprint(url: &str, method: &str, body: Option<&str>, headers: &[String]) -> Result<()> {
    let mut builder = Request::builder(url).method(method);
    if let Some(body) = body {
        builder = builder.text_body(body);
    }

    let mut names = Vec::new();
    for header in headers {
        let (name, value) = header.split_once(':').ok_or_else(|| {
            crawlq_core::error::Error::invalid_request(format!(
                "Header must look like 'Name: value': {}",
                header
            ))
        })?;
        builder = builder.header(name.trim(), value.trim());
        names.push(name.trim().to_string());
    }

    let request = builder.build()?;
    println!("{}", RequestFingerprinter::with_headers(&names).fingerprint(&request));
    Ok(())
}

fn manage_settings(name: Option<&str>, value: Option<&str>, settings_file: Option<&str>) {
    let mut settings = load_settings(settings_file);

    match (name, value) {
        (Some(name), Some(value)) => {
            println!("Setting {} = {}", name, value);

            if let Err(e) = settings.set(name, parse_python_value(value)) {
                eprintln!("Error setting setting: {}", e);
                process::exit(1);
            }

            let settings_path = settings_file.unwrap_or(DEFAULT_SETTINGS);
            if let Err(e) = settings.save(settings_path) {
                eprintln!("Error saving settings: {}", e);
                process::exit(1);
            }

            println!("Setting saved successfully");
        }
        (Some(name), None) => match settings.get::<serde_json::Value>(name) {
            Ok(value) => println!("{} = {}", name, value),
            Err(e) => {
                eprintln!("Error getting setting: {}", e);
                process::exit(1);
            }
        },
        (None, _) => {
            println!("All settings:");
            for (key, value) in settings.all() {
                println!("  {} = {}", key, value);
            }
        }
    }
}

fn show_version() {
    println!("crawlq version {}", env!("CARGO_PKG_VERSION"));
    println!("Crawl request scheduler with memory, disk and broker queues");
}

fn load_settings(settings_path: Option<&str>) -> Settings {
    let path = match settings_path {
        Some(path) => path,
        None if Path::new(DEFAULT_SETTINGS).exists() => DEFAULT_SETTINGS,
        None => return Settings::default(),
    };

    match Settings::from_file(path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings from {}: {}", path, e);
            process::exit(1);
        }
    }
}
