//! Skiff CLI
//!
//! Command-line interface for running compiled Skiff module images
//! (`.skb` files) and inspecting their bytecode.

use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use skiff_runtime::{dasm, Machine, ModuleImage, Unwind};

#[derive(ClapParser)]
#[command(name = "skiff")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Skiff VM - run compiled .skb module images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and run one or more compiled module images
    Run {
        /// Input .skb module images, loaded and run in order
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Write vm-dasm/vm-constants/vm-values to the CWD on exit
        #[arg(long)]
        dump_state: bool,
    },

    /// Disassemble a compiled module image
    Dasm {
        /// Input .skb module image
        image: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SKIFF_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { images, dump_state } => run_images(&images, dump_state),
        Commands::Dasm { image } => run_dasm(&image),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "skiff", &mut io::stdout());
        }
    }
}

fn read_image(path: &Path) -> ModuleImage {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("skiff: cannot read {}: {e}", path.display());
            process::exit(1);
        }
    };
    match ModuleImage::from_bytes(&bytes) {
        Ok(img) => img,
        Err(e) => {
            eprintln!("skiff: {}: {e}", path.display());
            process::exit(1);
        }
    }
}

fn run_images(paths: &[PathBuf], dump_state: bool) {
    let mut m = Machine::new();

    let mut status = 0;
    for path in paths {
        let img = read_image(path);
        match m.run_image(&img) {
            Ok(_) => {}
            Err(Unwind::Exit(s)) => {
                status = s;
                break;
            }
            Err(Unwind::Jump { level, code }) => {
                // a jump that escaped every run loop: the stack it wanted
                // is gone
                eprintln!("skiff: stray {code:?} jump to run level {level}");
                status = 1;
                break;
            }
        }
    }

    if dump_state
        && let Err(e) = m.dump_exit_artifacts(Path::new("."))
    {
        eprintln!("skiff: writing exit artifacts: {e}");
    }

    process::exit(status);
}

fn run_dasm(path: &Path) {
    let img = read_image(path);
    let mut m = Machine::new();
    let (_module, pc0) = m.load_image(&img);
    print!("{}", dasm::disassemble(&m, pc0, m.code.len()));
}
