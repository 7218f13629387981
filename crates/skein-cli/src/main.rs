//! `skein` — CLI de skein
//!
//! Ici on fait uniquement : parsing d'arguments, initialisation des traces,
//! et délégation à `skein_cli` (lib).

#![forbid(unsafe_code)]

use std::{io, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};

use skein_cli as cli; // notre lib interne (src/lib.rs)

// ──────────────────────────── CLI (clap) ────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "skein", version, about = "skein CLI : exécuter ou désassembler un bytecode SKBC", long_about = None)]
struct Opt {
    /// Augmente la verbosité (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux (casse la verbosité)
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue, global = true)]
    quiet: bool,

    /// Sous-commandes
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Exécuter un bytecode
    Run {
        /// Programme (.skbc, ou - pour stdin)
        program: Option<PathBuf>,
        /// Annule l'exécution après N millisecondes
        #[arg(long = "timeout-ms")]
        timeout_ms: Option<u64>,
        /// Nombre maximal d'objets alloués (-1 = illimité)
        #[arg(long = "max-allocs", allow_negative_numbers = true)]
        max_allocs: Option<i64>,
        /// Longueur maximale d'une chaîne produite
        #[arg(long = "max-string-len")]
        max_string_len: Option<usize>,
        /// Nombre maximal d'éléments d'un tableau produit
        #[arg(long = "max-array-len")]
        max_array_len: Option<usize>,
        /// Afficher le temps d'exécution
        #[arg(long)]
        time: bool,
    },

    /// Désassembler un bytecode vers du texte
    Disasm {
        /// Bytecode
        input: Option<PathBuf>,
        /// Sortie texte (stdout si omis)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspecter un bytecode
    Inspect {
        /// Bytecode
        input: Option<PathBuf>,
        /// Sortie JSON
        #[arg(long)]
        json: bool,
    },
}

// ──────────────────────────── Entrée / Sortie ────────────────────────────

fn input_from_opt(p: Option<PathBuf>) -> cli::Input {
    match p {
        Some(path) if path.as_os_str() == "-" => cli::Input::Stdin,
        Some(path) => cli::Input::Path(path),
        None => cli::Input::Stdin,
    }
}

fn output_from_opt(output: Option<PathBuf>) -> cli::Output {
    output.map_or(cli::Output::Stdout, cli::Output::Path)
}

// ──────────────────────────── Logger / Verbosité ────────────────────────────

fn init_telemetry(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    cli::init_telemetry(level);
}

// ──────────────────────────── main ────────────────────────────

fn main() -> ExitCode {
    match real_main() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn real_main() -> Result<i32> {
    let opt = Opt::parse();
    init_telemetry(opt.verbose, opt.quiet);

    use cli::{Command as C, DisasmTask, InspectTask, RunTask};

    let command = match opt.cmd {
        Command::Run { program, timeout_ms, max_allocs, max_string_len, max_array_len, time } => C::Run(RunTask {
            program: input_from_opt(program),
            timeout_ms,
            max_allocs,
            max_string_len,
            max_array_len,
            time,
        }),
        Command::Disasm { input, output } => {
            C::Disasm(DisasmTask { input: input_from_opt(input), output: output_from_opt(output) })
        }
        Command::Inspect { input, json } => C::Inspect(InspectTask { input: input_from_opt(input), json }),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    cli::execute(command, &mut out).context("échec d'exécution de la commande")
}
