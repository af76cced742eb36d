//! `cfetch restore`: run the engine against a local mirror and write each
//! completed payload to `<out>/<signature-hex>`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cfetch_cas::{AuthorizedGroups, Signature, SignatureWriter};
use cfetch_config::{log_cli_debug, log_cli_info, log_cli_warn};
use cfetch_engine::{Delivery, Engine, EngineConfig, MirrorFetcher, RunReport};
use clap::Args;
use parking_lot::Mutex;
use tracing::field::display;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Authorization result (JSON) listing containers and signatures
    #[arg(long, value_name = "FILE")]
    pub groups: PathBuf,

    /// Local mirror of the blob service, laid out as <host>/<path>
    #[arg(long, value_name = "DIR")]
    pub mirror: PathBuf,

    /// Output directory (default: [output] directory from config)
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Fetch worker threads
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Decode worker threads
    #[arg(long)]
    pub decode_threads: Option<usize>,

    /// Wall-clock limit in seconds (0 = none)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Retries per container after the first attempt
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Writes completed payloads to files and remembers everything else.
pub struct FileDelivery {
    out_dir: PathBuf,
    written: Mutex<BTreeMap<Signature, u64>>,
    failed: Mutex<BTreeSet<Signature>>,
    write_errors: Mutex<BTreeMap<Signature, String>>,
}

impl FileDelivery {
    pub fn new(out_dir: impl Into<PathBuf>) -> Result<Self> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
        Ok(Self {
            out_dir,
            written: Mutex::new(BTreeMap::new()),
            failed: Mutex::new(BTreeSet::new()),
            write_errors: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn path_for(&self, signature: &Signature) -> PathBuf {
        self.out_dir.join(signature.to_hex())
    }

    /// Write through a temporary name so a partial file never looks finished.
    fn write_one(&self, writer: SignatureWriter) -> std::io::Result<u64> {
        let target = self.path_for(writer.signature());
        let partial = target.with_extension("part");
        let mut file = BufWriter::new(File::create(&partial)?);
        let written = writer.write_to(&mut file)?;
        drop(file);
        fs::rename(&partial, &target)?;
        Ok(written)
    }
}

impl Delivery for FileDelivery {
    fn completed(&self, writers: HashMap<Signature, SignatureWriter>) {
        for (signature, writer) in writers {
            match self.write_one(writer) {
                Ok(bytes) => {
                    log_cli_debug!(
                        "Signature restored",
                        signature = display(&signature),
                        bytes = bytes,
                    );
                    self.written.lock().insert(signature, bytes);
                }
                Err(e) => {
                    log_cli_warn!(
                        "Failed to write restored signature",
                        signature = display(&signature),
                        error = display(&e),
                    );
                    self.write_errors.lock().insert(signature, e.to_string());
                }
            }
        }
    }

    fn failed(&self, signatures: HashSet<Signature>) {
        self.failed.lock().extend(signatures);
    }
}

pub fn run(args: RestoreArgs) -> Result<ExitCode> {
    let (mut config, config_dir) = {
        let global = cfetch_config::config();
        (EngineConfig::from_config(&global), global.output.directory.clone())
    };
    if let Some(jobs) = args.jobs {
        config.fetch_threads = jobs.max(1);
    }
    if let Some(decode) = args.decode_threads {
        config.decode_threads = decode.max(1);
    }
    if let Some(secs) = args.timeout {
        config.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if let Some(retries) = args.max_retries {
        config.retry.max_retries = retries;
    }

    let groups = load_groups(&args.groups)?;
    let out_dir = args.out.unwrap_or(config_dir);
    log_cli_info!(
        "Restoring",
        groups = display(args.groups.display()),
        mirror = display(args.mirror.display()),
        out = display(out_dir.display()),
        signatures = groups.signatures.len(),
    );

    let delivery = Arc::new(FileDelivery::new(&out_dir)?);
    let report = Engine::new(config)
        .run_groups(&groups, Arc::new(MirrorFetcher::new(args.mirror)), delivery.clone())
        .context("Restore run failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary_json(&report, &delivery))?);
    } else {
        print_summary(&report, &delivery, &out_dir);
    }

    let clean = report.is_clean()
        && delivery.failed.lock().is_empty()
        && delivery.write_errors.lock().is_empty();
    Ok(if clean { ExitCode::SUCCESS } else { ExitCode::from(2) })
}

fn load_groups(path: &Path) -> Result<AuthorizedGroups> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read groups file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse groups file {}", path.display()))
}

fn print_summary(report: &RunReport, delivery: &FileDelivery, out_dir: &Path) {
    let written = delivery.written.lock();
    let failed = delivery.failed.lock();
    let write_errors = delivery.write_errors.lock();
    let bytes: u64 = written.values().sum();

    println!("Restore Summary");
    println!("===============");
    println!(
        "  Restored:    {} signatures ({} bytes) to {}",
        written.len(),
        bytes,
        out_dir.display()
    );
    println!("  Failed:      {}", failed.len());
    println!("  Unresolved:  {}", report.unresolved.len());
    println!(
        "  Containers:  {} fetched, {} failed ({} bytes)",
        report.stats.containers_fetched, report.stats.containers_failed, report.stats.bytes_fetched
    );
    println!(
        "  Retries:     {} fetch, {} decode",
        report.stats.fetch_retries, report.stats.decode_retries
    );
    println!("  Peak memory: {} bytes held", report.store.peak_bytes_held);
    println!("  Duration:    {:.2}s", report.stats.duration.as_secs_f64());

    if !report.completed_within_timeout {
        println!();
        println!("Timed out; {} queued jobs dropped", report.dropped_jobs);
    }
    if let Some(fatal) = &report.fatal {
        println!();
        println!("Aborted: {}", fatal);
    }
    for (title, sigs) in [
        ("Failed signatures:", failed.iter().collect::<Vec<_>>()),
        ("Unresolved signatures:", report.unresolved.iter().collect()),
    ] {
        if !sigs.is_empty() {
            println!();
            println!("{}", title);
            for sig in sigs {
                println!("  {}", sig);
            }
        }
    }
    if !write_errors.is_empty() {
        println!();
        println!("Write errors:");
        for (sig, err) in write_errors.iter() {
            println!("  {}: {}", sig, err);
        }
    }
}

fn hex_list<'a>(sigs: impl Iterator<Item = &'a Signature>) -> Vec<String> {
    sigs.map(Signature::to_hex).collect()
}

fn summary_json(report: &RunReport, delivery: &FileDelivery) -> serde_json::Value {
    let written = delivery.written.lock();
    serde_json::json!({
        "restored": hex_list(written.keys()),
        "failed": hex_list(delivery.failed.lock().iter()),
        "unresolved": hex_list(report.unresolved.iter()),
        "write_errors": delivery
            .write_errors
            .lock()
            .iter()
            .map(|(sig, err)| (sig.to_hex(), err.clone()))
            .collect::<BTreeMap<_, _>>(),
        "completed_within_timeout": report.completed_within_timeout,
        "fatal": report.fatal.as_ref().map(ToString::to_string),
        "stats": {
            "containers_fetched": report.stats.containers_fetched,
            "containers_failed": report.stats.containers_failed,
            "bytes_fetched": report.stats.bytes_fetched,
            "fetch_retries": report.stats.fetch_retries,
            "decode_retries": report.stats.decode_retries,
            "unauthorized": report.stats.unauthorized,
            "peak_bytes_held": report.store.peak_bytes_held,
            "duration_ms": report.stats.duration.as_millis() as u64,
        },
    })
}
