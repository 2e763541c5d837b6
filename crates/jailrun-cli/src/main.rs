//! jailrun CLI - ephemeral chroot jails

use clap::{Args, Parser, Subcommand};
use jailrun_core::bootstrap::{child_main, ChildDirective, BOOTSTRAP_FAILURE};
use jailrun_core::config::{parse_log_level, DEFAULT_LOG_LEVEL};
use jailrun_core::{Jail, JailError, JailSpec, MountProbe, Preset};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jailrun")]
#[command(author, version, about = "Run a command inside an ephemeral chroot jail")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, alias = "log.level", default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare the jail root, bind host paths and run a command inside it
    Run {
        #[command(flatten)]
        jail: JailArgs,

        /// Command and arguments to run in the jail (defaults to /bin/sh)
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Unmount everything `run` mounted under the jail root
    Unmount {
        #[command(flatten)]
        jail: JailArgs,
    },

    /// Bootstrap inside the new namespaces (internal)
    #[command(hide = true)]
    Child {
        root: PathBuf,
        #[arg(value_name = "LOG_LEVEL")]
        level: String,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Print the version
    Version,
}

#[derive(Args)]
struct JailArgs {
    /// Jail root directory (absolute)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Host path to bind read-write (repeatable)
    #[arg(long = "bind")]
    binds: Vec<PathBuf>,

    /// Host path to bind read-only (repeatable)
    #[arg(long = "ro-bind")]
    ro_binds: Vec<PathBuf>,

    /// Apply the default temp dirs, etc files and read-only system binds
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    preset: bool,

    /// How to tell whether a bind target is already mounted
    #[arg(long, default_value_t = MountProbe::DirContents)]
    probe: MountProbe,

    /// JSON jail spec to start from; flags extend it
    #[arg(long)]
    config: Option<PathBuf>,
}

impl JailArgs {
    fn into_spec(self, log_level: &str, command: Vec<String>) -> Result<JailSpec, JailError> {
        let mut builder = match &self.config {
            Some(path) => JailSpec::from_json_file(path)?.into_builder(),
            None => JailSpec::builder(),
        };

        if let Some(root) = self.root {
            builder = builder.root(root);
        }
        for bind in self.binds {
            builder = builder.bind(bind);
        }
        for bind in self.ro_binds {
            builder = builder.ro_bind(bind);
        }
        if self.preset {
            builder = builder.preset(&Preset::default());
        }
        if self.config.is_none() || self.probe != MountProbe::default() {
            builder = builder.probe(self.probe);
        }
        if let Some((program, args)) = command.split_first() {
            builder = builder.command(program.clone(), args.to_vec());
        }

        builder.log_level(log_level).build()
    }
}

fn init_tracing(level: &str) -> Result<(), JailError> {
    let level = parse_log_level(level)?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(LevelFilter::from_level(level).into()),
        )
        .init();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("{}", jailrun_core::VERSION);
        return ExitCode::SUCCESS;
    }

    let level = match &cli.command {
        Commands::Child { level, .. } => level.as_str(),
        _ => cli.log_level.as_str(),
    };
    if let Err(e) = init_tracing(level) {
        eprintln!("jailrun: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Run { jail, command } => jail
            .into_spec(&cli.log_level, command)
            .and_then(Jail::new)
            .and_then(|mut jail| jail.run()),

        Commands::Unmount { jail } => jail
            .into_spec(&cli.log_level, vec![])
            .and_then(Jail::new)
            .and_then(|mut jail| jail.unmount()),

        Commands::Child {
            root,
            level,
            command,
        } => {
            let code = match ChildDirective::new(root, level, command) {
                Ok(directive) => child_main(directive),
                Err(e) => {
                    tracing::error!("{e}");
                    BOOTSTRAP_FAILURE
                }
            };
            return exit_code(code);
        }

        Commands::Version => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("jailrun: {e}");
            exit_code(e.exit_code())
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
