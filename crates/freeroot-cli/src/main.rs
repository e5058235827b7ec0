//! freeroot CLI - Ubuntu rootfs under PRoot from the command line

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use freeroot::{CommandResult, Config, Launcher, RootfsPath, RunOptions, Session};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "freeroot")]
#[command(author, version, about = "Ubuntu root filesystem under PRoot, no root required")]
struct Cli {
    /// Rootfs directory [env: FREEROOT_DIR] [default: ./rootfs]
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Ubuntu base point release, e.g. 22.04.3
    #[arg(long, global = true)]
    release: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and extract the rootfs if needed
    Setup,

    /// Run a shell command inside the rootfs
    Run {
        /// Command text, passed to the guest shell
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Kill the command after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Shallow-clone a git repository inside the rootfs
    Clone {
        url: String,

        /// Guest directory to clone into
        target: Option<String>,

        /// Branch or tag to check out
        #[arg(short, long)]
        branch: Option<String>,

        /// Do not install git with apt when it is missing
        #[arg(long)]
        no_install: bool,
    },

    /// Open an interactive login shell inside the rootfs
    Shell,

    /// Delete the rootfs directory
    Cleanup,

    /// Show host and rootfs information
    Info,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => "freeroot=info",
        1 => "freeroot=debug,freeroot_sandbox=debug",
        _ => "freeroot=trace,freeroot_sandbox=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = build_config(&cli)?;
    tracing::debug!(
        rootfs = %config.rootfs_dir.display(),
        release = %config.point_release,
        mirror = %config.mirror,
        "resolved configuration"
    );

    match cli.command {
        Commands::Setup => {
            let session = Session::setup(config).context("setup failed")?;
            let report = SetupReport {
                rootfs: session.path().to_path_buf(),
                arch: session.arch().to_string(),
                proot: session.proot().to_path_buf(),
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("rootfs: {}", report.rootfs.display());
                println!("arch:   {}", report.arch);
                println!("proot:  {}", report.proot.display());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Run { command, timeout } => {
            let mut session = Session::setup(config).context("setup failed")?;
            let mut opts = RunOptions::new();
            if let Some(secs) = timeout {
                opts = opts.timeout(Duration::from_secs(secs));
            }
            let text = command.join(" ");
            tracing::debug!(command = %text, timeout = ?timeout, "running");
            let result = session.run_command_with(&text, &opts)?;
            report_result(&result, cli.json)
        }

        Commands::Clone {
            url,
            target,
            branch,
            no_install,
        } => {
            let mut session = Session::setup(config).context("setup failed")?;
            let mut builder = freeroot::git::clone(&url).ensure_git(!no_install);
            if let Some(target) = target {
                builder = builder.target_dir(target);
            }
            if let Some(branch) = branch {
                builder = builder.branch(branch);
            }
            let result = builder.exec(&mut session)?;
            report_result(&result, cli.json)
        }

        Commands::Shell => {
            let mut session = Session::setup(config).context("setup failed")?;
            let code = session.shell()?;
            Ok(exit_code(code))
        }

        Commands::Cleanup => {
            let dir = config.absolute_rootfs_dir()?;
            freeroot::cleanup_dir(&dir)?;
            if cli.json {
                println!("{}", serde_json::json!({ "removed": dir }));
            } else {
                println!("removed {}", dir.display());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Info => {
            let info = Info::collect(config)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("arch:        {}", info.arch.as_deref().unwrap_or("unsupported"));
                println!("rootfs:      {}", info.rootfs.display());
                println!("provisioned: {}", info.provisioned);
                println!("release:     {}", info.release);
                if let Some(url) = &info.url {
                    println!("url:         {url}");
                }
                match &info.proot {
                    Some(path) => println!("proot:       {}", path.display()),
                    None => println!("proot:       not found (downloaded on setup)"),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::from_env();
    if let Some(dir) = &cli.dir {
        config.rootfs_dir = dir.clone();
    }
    if let Some(point) = &cli.release {
        config.release = release_dir(point);
        config.point_release = point.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// `22.04.3` lives under `releases/22.04/`.
fn release_dir(point: &str) -> String {
    let parts: Vec<&str> = point.split('.').collect();
    if parts.len() > 2 {
        parts[..2].join(".")
    } else {
        point.to_string()
    }
}

fn report_result(result: &CommandResult, json: bool) -> anyhow::Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print!("{}", result.output);
        if result.interrupted() {
            eprintln!("command {:?} after {:?}", result.status, result.duration);
        }
    }
    Ok(exit_code(result.exit_code))
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(exit_status(code))
}

/// Shell exit statuses are one byte. A negative code means the guest's
/// status is unknown, which is a failure.
fn exit_status(code: i32) -> u8 {
    if code < 0 {
        return 1;
    }
    code.min(255) as u8
}

#[derive(Serialize)]
struct SetupReport {
    rootfs: PathBuf,
    arch: String,
    proot: PathBuf,
}

#[derive(Serialize)]
struct Info {
    arch: Option<String>,
    rootfs: PathBuf,
    provisioned: bool,
    release: String,
    url: Option<String>,
    proot: Option<PathBuf>,
}

impl Info {
    fn collect(config: Config) -> anyhow::Result<Self> {
        let rootfs = config.absolute_rootfs_dir()?;
        let arch = freeroot::resolve_architecture().ok();

        let proot = match arch {
            Some(arch) => {
                // Lookup only; nothing is fetched or executed.
                let launcher = Launcher::new(
                    config.clone(),
                    std::sync::Arc::new(freeroot::HttpFetcher::new()?),
                    std::sync::Arc::new(freeroot::HostExecutor),
                );
                launcher.locate_proot(&RootfsPath::new(&rootfs, arch)).ok().flatten()
            }
            None => None,
        };

        Ok(Self {
            arch: arch.map(|a| a.to_string()),
            provisioned: freeroot::is_provisioned(&rootfs),
            release: config.point_release.clone(),
            url: arch.map(|a| config.rootfs_url(a)),
            proot,
            rootfs,
        })
    }
}
