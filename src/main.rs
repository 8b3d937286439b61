//! Thin CLI layer: parse args, styled output, and call into assetry-core.
//! Crash-proof: panic caught and reported; all errors return Result.

use assetry_core::{
    integrity, BuildTool, BuildWatcher, ContentStore, GcOutcome, Manifest, RemoteResource,
    Settings,
};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::env;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

// ---- UI helpers (no-op when stdout isn't a TTY) ----

fn use_color() -> bool {
    std::io::stdout().is_terminal() && env::var("NO_COLOR").unwrap_or_default().is_empty()
}

fn success(msg: &str) {
    if use_color() {
        println!("{}", msg.green());
    } else {
        println!("{}", msg);
    }
}

fn error(msg: &str) {
    if use_color() {
        eprintln!("{}", msg.red());
    } else {
        eprintln!("{}", msg);
    }
}

fn info(msg: &str) {
    if use_color() {
        println!("{}", msg.cyan());
    } else {
        println!("{}", msg);
    }
}

fn dim(msg: &str) {
    if use_color() {
        println!("{}", msg.dimmed());
    } else {
        println!("{}", msg);
    }
}

/// Run a long-running task; in quiet mode or without a TTY, just run it.
fn run_with_spinner<T, F>(message: &str, quiet: bool, f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    if quiet || !use_color() {
        return f();
    }
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⠈⠐⠠⠰⠸⠹")
        .template("{spinner:.dim} {msg}")
    {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    let tick = Duration::from_millis(80);
    loop {
        match rx.recv_timeout(tick) {
            Ok(res) => {
                spinner.finish_and_clear();
                return res;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                spinner.finish_and_clear();
                return Err("Operation failed.".to_string());
            }
            Err(mpsc::RecvTimeoutError::Timeout) => spinner.tick(),
        }
    }
}

fn format_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = n as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", n, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

// ---- settings ----

fn settings(matches: &ArgMatches) -> Result<Settings, String> {
    let cwd = env::current_dir().map_err(|e| e.to_string())?;
    let mut settings = assetry_core::load_config(&cwd)
        .and_then(|c| c.resolve())
        .map_err(|e| e.to_string())?;
    if let Some(dir) = matches.get_one::<PathBuf>("cache-dir") {
        settings.cache_dir = dir.clone();
    }
    Ok(settings)
}

/// Store for commands that download; collects garbage once at startup.
fn open_store(settings: &Settings) -> Result<ContentStore, String> {
    let store = ContentStore::new(&settings.cache_dir, settings.gc);
    match store.gc().map_err(|e| e.to_string())? {
        GcOutcome::Collected { removed } => {
            tracing::info!(removed, "cache collected at startup")
        }
        outcome => tracing::debug!(?outcome, "startup gc"),
    }
    Ok(store)
}

fn build_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("root")
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .help("Project directory the build tool runs in"),
    )
    .arg(
        Arg::new("entrypoint")
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .help("Entry file, relative to root"),
    )
    .arg(
        Arg::new("outdir")
            .long("outdir")
            .default_value("dist")
            .value_parser(value_parser!(PathBuf))
            .help("Output directory (relative paths are under root)"),
    )
    .arg(
        Arg::new("tool")
            .long("tool")
            .help("Build tool name or path (default: ASSETRY_BUILD_TOOL, .assetryrc, or bun)"),
    )
}

fn resolve_tool(sub_m: &ArgMatches, settings: &Settings, root: &Path) -> BuildTool {
    let name = sub_m
        .get_one::<String>("tool")
        .cloned()
        .unwrap_or_else(|| settings.build_tool.clone());
    BuildTool::resolve(&name, root)
}

fn cli() -> Command {
    Command::new("assetry")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Content-addressed static assets: verified downloads, immutable URLs, live rebuilds")
        .after_help(
            "Examples:\n  assetry fetch https://unpkg.com/htmx.org@1.9.12/dist/htmx.min.js --sha256 <hex>\n  assetry routes assets.json\n  assetry watch . src/index.ts --outdir dist\n  assetry cache gc --force",
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("More log output (-v info, -vv debug)"),
        )
        .arg(
            Arg::new("cache-dir")
                .long("cache-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Override the cache directory"),
        )
        .subcommand(
            Command::new("fetch")
                .about("Download a remote asset into the cache and verify it")
                .arg(Arg::new("url").required(true).help("Asset URL (http, https or file)"))
                .arg(
                    Arg::new("sha256")
                        .long("sha256")
                        .required(true)
                        .help("Expected SHA-256, hex"),
                )
                .arg(
                    Arg::new("quiet")
                        .short('q')
                        .long("quiet")
                        .action(ArgAction::SetTrue)
                        .help("Print only the serving path"),
                ),
        )
        .subcommand(
            Command::new("hash")
                .about("Print the SHA-256, path token and SRI string of a file")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("routes")
                .about("Build the route map for a manifest and list it")
                .arg(
                    Arg::new("manifest")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the JSON asset manifest"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Machine-readable output"),
                ),
        )
        .subcommand(build_args(
            Command::new("build").about("Run the build tool once"),
        ))
        .subcommand(build_args(
            Command::new("watch")
                .about("Run the build tool in watch mode until stdin closes or Ctrl-C"),
        ))
        .subcommand(
            Command::new("cache")
                .about("Cache management")
                .subcommand_required(true)
                .subcommand(Command::new("dir").about("Print the cache directory"))
                .subcommand(Command::new("list").about("List cached entries"))
                .subcommand(Command::new("size").about("Show total cache size"))
                .subcommand(
                    Command::new("gc")
                        .about("Collect the cache if the interval has elapsed")
                        .arg(
                            Arg::new("force")
                                .long("force")
                                .action(ArgAction::SetTrue)
                                .help("Collect regardless of the last run"),
                        ),
                )
                .subcommand(Command::new("clean").about("Remove every cached entry")),
        )
}

fn run() -> Result<(), String> {
    let matches = cli().get_matches();
    assetry_core::init_logging(matches.get_count("verbose"));

    match matches.subcommand() {
        Some(("fetch", sub_m)) => {
            let settings = settings(&matches)?;
            let store = open_store(&settings)?;
            let url = sub_m.get_one::<String>("url").cloned().unwrap_or_default();
            let sha = sub_m.get_one::<String>("sha256").cloned().unwrap_or_default();
            let quiet = sub_m.get_flag("quiet");
            let remote = run_with_spinner(&format!("Fetching {}", url), quiet, move || {
                RemoteResource::new(&store, &url, &sha).map_err(|e| e.to_string())
            })?;
            let path = remote.path(&settings.prefix);
            if quiet {
                println!("{}", path);
            } else {
                success(&format!(
                    "Verified {} ({})",
                    remote.name(),
                    format_bytes(remote.content().len() as u64)
                ));
                println!("{}", path);
            }
        }
        Some(("hash", sub_m)) => {
            let file = sub_m
                .get_one::<PathBuf>("file")
                .ok_or_else(|| "missing file".to_string())?;
            let bytes = std::fs::read(file).map_err(|e| format!("{}: {}", file.display(), e))?;
            let hex = integrity::sha256_hex(&bytes);
            println!("sha256     {}", hex);
            println!("token      {}", integrity::encode_hash(&hex));
            println!("integrity  {}", integrity::sri_sha256(&bytes));
        }
        Some(("routes", sub_m)) => {
            let settings = settings(&matches)?;
            let store = open_store(&settings)?;
            let manifest_path = sub_m
                .get_one::<PathBuf>("manifest")
                .ok_or_else(|| "missing manifest".to_string())?;
            let manifest = Manifest::load(manifest_path).map_err(|e| e.to_string())?;
            let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
            let prefix = manifest.prefix_or(&settings.prefix);
            let resources = manifest
                .resources(&store, base)
                .map_err(|e| e.to_string())?;
            let map = assetry_core::build_map(&prefix, &resources).map_err(|e| e.to_string())?;

            let rows: Vec<(&str, String, usize)> = map
                .paths()
                .into_iter()
                .filter_map(|p| {
                    map.get(p).map(|entry| {
                        let ct = entry
                            .headers
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        (p, ct, entry.body.len())
                    })
                })
                .collect();
            if sub_m.get_flag("json") {
                let json: Vec<serde_json::Value> = rows
                    .iter()
                    .map(|(path, ct, len)| {
                        serde_json::json!({ "path": path, "contentType": ct, "bytes": len })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
                );
            } else if rows.is_empty() {
                dim("No resources in manifest.");
            } else {
                for (path, ct, len) in rows {
                    println!("{}  {}  {}", path, ct, format_bytes(len as u64));
                }
            }
        }
        Some(("build", sub_m)) => {
            let settings = settings(&matches)?;
            let (root, entry, outdir) = build_inputs(sub_m)?;
            let tool = resolve_tool(sub_m, &settings, &root);
            tool.build_once(&root, &entry, &outdir)
                .map_err(|e| e.to_string())?;
            success(&format!("Built {}", entry.display()));
        }
        Some(("watch", sub_m)) => {
            let settings = settings(&matches)?;
            let (root, entry, outdir) = build_inputs(sub_m)?;
            let tool = resolve_tool(sub_m, &settings, &root);
            let rebuilds = Arc::new(AtomicUsize::new(0));
            let counter = rebuilds.clone();
            let watcher = BuildWatcher::watch(&tool, &root, &entry, &outdir, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                success(&format!("Rebuilt ({})", n));
            })
            .map_err(|e| e.to_string())?;
            info(&format!(
                "Watching {} with {} (pid {}). Close stdin or press Ctrl-C to stop.",
                entry.display(),
                tool.display_name(),
                watcher.pid()
            ));
            // Block until stdin reaches EOF.
            let mut sink = Vec::new();
            let _ = std::io::stdin().read_to_end(&mut sink);
            watcher.close().map_err(|e| e.to_string())?;
            dim(&format!(
                "Stopped after {} rebuild(s).",
                rebuilds.load(Ordering::SeqCst)
            ));
        }
        Some(("cache", sub_m)) => {
            let settings = settings(&matches)?;
            let store = ContentStore::new(&settings.cache_dir, settings.gc);
            match sub_m.subcommand() {
                Some(("dir", _)) => println!("{}", store.dir().display()),
                Some(("list", _)) => {
                    let entries = store.entries().map_err(|e| e.to_string())?;
                    if entries.is_empty() {
                        dim("Cache is empty.");
                    }
                    for entry in entries {
                        println!("{}  {}", entry.hash, format_bytes(entry.size));
                    }
                }
                Some(("size", _)) => {
                    let bytes = store.size_bytes().map_err(|e| e.to_string())?;
                    println!("{}", format_bytes(bytes));
                }
                Some(("gc", gc_m)) => {
                    let outcome = if gc_m.get_flag("force") {
                        store.gc_forced()
                    } else {
                        store.gc()
                    }
                    .map_err(|e| e.to_string())?;
                    match outcome {
                        GcOutcome::MarkerCreated => dim("First run: GC marker created."),
                        GcOutcome::NotDue { next_due } => match next_due {
                            Some(at) => dim(&format!(
                                "Not due (policy {}); next run after {}.",
                                store.policy(),
                                at.to_rfc3339()
                            )),
                            None => dim("Not due."),
                        },
                        GcOutcome::NothingToCollect => dim("Nothing to collect."),
                        GcOutcome::Collected { removed } => {
                            success(&format!("Removed {} cached file(s).", removed))
                        }
                    }
                }
                Some(("clean", _)) => {
                    let removed = store.clear().map_err(|e| e.to_string())?;
                    success(&format!("Removed {} cached file(s).", removed));
                }
                _ => return Err("Unknown cache command. Run `assetry cache --help`.".to_string()),
            }
        }
        _ => {
            if use_color() {
                println!("{}", "assetry".bright_cyan().bold());
            } else {
                println!("assetry");
            }
            dim("Content-addressed static assets with live rebuilds.");
            dim("\nRun `assetry --help` for details.");
        }
    }

    Ok(())
}

fn build_inputs(sub_m: &ArgMatches) -> Result<(PathBuf, PathBuf, PathBuf), String> {
    let get = |name: &str| {
        sub_m
            .get_one::<PathBuf>(name)
            .cloned()
            .ok_or_else(|| format!("missing {}", name))
    };
    Ok((get("root")?, get("entrypoint")?, get("outdir")?))
}

fn main() {
    if !use_color() {
        colored::control::set_override(false);
    }

    let code = match std::panic::catch_unwind(run) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            error(&e);
            1
        }
        Err(_) => {
            error("An unexpected error occurred. Please report this issue.");
            1
        }
    };
    std::process::exit(code);
}
