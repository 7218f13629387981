//! skein-cli — bibliothèque interne du binaire `skein`
//!
//! Le parsing d'arguments reste dans `main.rs` ; ici, la logique testable :
//! - `run` : charge un `.skbc`, applique les limites, exécute, rapporte
//! - `disasm` : constantes + instructions de la fonction principale
//! - `inspect` : en-tête, sections, statistiques (texte ou JSON)
//!
//! Les sorties vont dans un `Write` fourni par l'appelant, les statuts sur
//! stderr.

#![deny(unused_must_use)]
#![forbid(unsafe_code)]

use std::{
    collections::BTreeMap,
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use skein_bytecode::{Bytecode, FORMAT_VERSION, MAGIC};
use skein_runtime::{CancelToken, Limits, Object};
use skein_vm::{ExecContext, Vm, VmConfig};
use tracing::{debug, info};

#[cfg(feature = "color")]
use owo_colors::{OwoColorize, Stream, Style};

// ───────────────────────────── Types publics ─────────────────────────────

/// Commande haut-niveau (le parsing CLI reste dans main.rs).
#[derive(Clone, Debug)]
pub enum Command {
    /// Exécute un bytecode.
    Run(RunTask),
    /// Désassemble un bytecode.
    Disasm(DisasmTask),
    /// Inspecte un bytecode.
    Inspect(InspectTask),
}

#[derive(Clone, Debug, Default)]
pub struct RunTask {
    pub program: Input,
    pub timeout_ms: Option<u64>,
    pub max_allocs: Option<i64>,
    pub max_string_len: Option<usize>,
    pub max_array_len: Option<usize>,
    pub time: bool, // afficher le timing
}

#[derive(Clone, Debug, Default)]
pub struct DisasmTask {
    pub input: Input,
    pub output: Output, // fichier ou stdout
}

#[derive(Clone, Debug, Default)]
pub struct InspectTask {
    pub input: Input,
    pub json: bool,
}

/// Entrée : fichier ou `-` (=stdin).
#[derive(Clone, Debug, Default)]
pub enum Input {
    Path(PathBuf),
    #[default]
    Stdin,
}

/// Sortie texte.
#[derive(Clone, Debug, Default)]
pub enum Output {
    Path(PathBuf),
    #[default]
    Stdout,
}

/// Codes de sortie de `run`.
pub mod exit {
    /// Fin normale.
    pub const OK: i32 = 0;
    /// Erreur d'exécution du script.
    pub const RUNTIME_ERROR: i32 = 1;
    /// Annulation (délai dépassé).
    pub const ABORTED: i32 = 2;
}

// ───────────────────────────── Initialisation ─────────────────────────────

/// Installe le subscriber `tracing` (stderr). `RUST_LOG` prime sur `level`.
pub fn init_telemetry(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).with_target(false).try_init();
}

// ───────────────────────────── Exécution ─────────────────────────────

/// Exécute `cmd` ; retourne le code de sortie du processus.
pub fn execute(cmd: Command, out: &mut dyn Write) -> Result<i32> {
    match cmd {
        Command::Run(task) => run_entry(&task),
        Command::Disasm(task) => disasm_entry(&task, out).map(|()| exit::OK),
        Command::Inspect(task) => inspect_entry(&task, out).map(|()| exit::OK),
    }
}

fn load(input: &Input) -> Result<(Vec<u8>, Bytecode)> {
    let data = read_input(input)?;
    let bc = Bytecode::decode(&data, &()).with_context(|| format!("bytecode invalide: {}", input_name(input)))?;
    debug!(bytes = data.len(), constants = bc.constants.len(), "bytecode chargé");
    Ok((data, bc))
}

/// Limites par défaut surchargées par les options de la tâche.
pub fn limits_for(task: &RunTask) -> Limits {
    let mut limits = Limits::default();
    if let Some(n) = task.max_allocs {
        limits.max_allocs = n;
    }
    if let Some(n) = task.max_string_len {
        limits.max_string_len = n;
    }
    if let Some(n) = task.max_array_len {
        limits.max_array_len = n;
    }
    limits
}

fn run_entry(task: &RunTask) -> Result<i32> {
    let (_, bc) = load(&task.program)?;
    bc.validate().context("bytecode incohérent")?;

    let cancel = match task.timeout_ms {
        Some(ms) => CancelToken::with_timeout(Duration::from_millis(ms)),
        None => CancelToken::new(),
    };
    let ctx = ExecContext::new(limits_for(task), cancel);
    let mut vm = Vm::new(bc, Vec::new(), VmConfig::default(), ctx);

    let started = Instant::now();
    let result = vm.run();
    if task.time {
        status_info("time", &format!("{:?}", started.elapsed()));
    }
    match result {
        Ok(Object::Undefined) => Ok(exit::OK),
        Ok(value) => {
            info!(%value, "valeur de retour");
            Ok(exit::OK)
        }
        Err(err) if err.is_aborted() => {
            eprintln!("{err}");
            Ok(exit::ABORTED)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(exit::RUNTIME_ERROR)
        }
    }
}

/// Listing texte d'un programme.
pub fn disassemble(bc: &Bytecode) -> String {
    let mut text = String::from("== constants ==\n");
    for line in bc.format_constants() {
        text.push_str(&line);
        text.push('\n');
    }
    text.push_str("== main ==\n");
    for line in bc.format_instructions() {
        text.push_str(&line);
        text.push('\n');
    }
    text
}

fn disasm_entry(task: &DisasmTask, out: &mut dyn Write) -> Result<()> {
    let (_, bc) = load(&task.input)?;
    let text = disassemble(&bc);
    match &task.output {
        Output::Stdout => out.write_all(text.as_bytes())?,
        Output::Path(path) => {
            write_text_atomic(path, &text)?;
            status_ok("disasm", &display(path));
        }
    }
    Ok(())
}

/// Résumé d'un fichier SKBC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inspection {
    pub size: usize,
    pub format_version: u16,
    pub opcode_revision: u16,
    pub sources: Vec<String>,
    pub constants: usize,
    pub constant_kinds: BTreeMap<String, usize>,
    pub functions: usize,
    pub instruction_bytes: usize,
    pub main_instruction_bytes: usize,
    pub objects: usize,
}

/// Inspecte un programme déjà décodé (`data` = octets bruts du fichier).
pub fn inspect(data: &[u8], bc: &Bytecode) -> Result<Inspection> {
    let header = data.get(MAGIC.len()..MAGIC.len() + 4).ok_or_else(|| anyhow!("en-tête tronqué"))?;
    let mut constant_kinds = BTreeMap::new();
    let mut functions = 0;
    let mut instruction_bytes = bc.main_function.instructions.len();
    for c in &bc.constants {
        *constant_kinds.entry(c.type_name().into_owned()).or_insert(0) += 1;
        if let Object::CompiledFunction(f) = c {
            functions += 1;
            instruction_bytes += f.instructions.len();
        }
    }
    Ok(Inspection {
        size: data.len(),
        format_version: u16::from_be_bytes([header[0], header[1]]),
        opcode_revision: u16::from_be_bytes([header[2], header[3]]),
        sources: bc.file_set.files.iter().map(|f| f.name.clone()).collect(),
        constants: bc.constants.len(),
        constant_kinds,
        functions,
        instruction_bytes,
        main_instruction_bytes: bc.main_function.instructions.len(),
        objects: bc.count_objects(),
    })
}

fn inspect_entry(task: &InspectTask, out: &mut dyn Write) -> Result<()> {
    let (data, bc) = load(&task.input)?;
    let report = inspect(&data, &bc)?;
    if task.json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
        return Ok(());
    }
    let kinds = report.constant_kinds.iter().map(|(k, n)| format!("{n} {k}")).collect::<Vec<_>>().join(", ");
    writeln!(out, "size         : {} bytes", report.size)?;
    writeln!(out, "format       : SKBC v{} (opcode revision {})", report.format_version, report.opcode_revision)?;
    if report.format_version != FORMAT_VERSION {
        writeln!(out, "               (moteur : v{FORMAT_VERSION})")?;
    }
    writeln!(out, "sources      : {} ({})", report.sources.len(), report.sources.join(", "))?;
    writeln!(out, "constants    : {} ({kinds})", report.constants)?;
    writeln!(out, "functions    : {}", report.functions)?;
    writeln!(out, "instructions : {} bytes (main {})", report.instruction_bytes, report.main_instruction_bytes)?;
    writeln!(out, "objects      : {}", report.objects)?;
    Ok(())
}

// ───────────────────────────── Utilitaires E/S ─────────────────────────────

fn read_input(input: &Input) -> Result<Vec<u8>> {
    match input {
        Input::Path(path) => fs::read(path).with_context(|| format!("lecture de {}", display(path))),
        Input::Stdin => {
            let mut buf = Vec::new();
            io::stdin().lock().read_to_end(&mut buf).context("lecture de stdin")?;
            Ok(buf)
        }
    }
}

fn input_name(input: &Input) -> String {
    match input {
        Input::Path(path) => display(path),
        Input::Stdin => "<stdin>".to_owned(),
    }
}

fn write_text_atomic(path: &Path, text: &str) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let tmp = unique_tmp_path(parent, path.file_name().unwrap_or_default());
    fs::write(&tmp, text).with_context(|| format!("écriture de {}", display(&tmp)))?;
    fs::rename(&tmp, path).or_else(|_| {
        // fallback : copie puis suppr tmp
        fs::copy(&tmp, path).map(|_| ()).and_then(|()| fs::remove_file(&tmp))
    })?;
    Ok(())
}

fn unique_tmp_path(dir: &Path, base: &std::ffi::OsStr) -> PathBuf {
    let mut i = 0u32;
    loop {
        let candidate = dir.join(format!("{}.tmp{}", base.to_string_lossy(), i));
        if !candidate.exists() {
            return candidate;
        }
        i = i.wrapping_add(1);
    }
}

fn display(p: &Path) -> String {
    p.to_string_lossy().to_string()
}

// ───────────────────────────── Sorties ─────────────────────────────

#[derive(Clone, Copy, Debug)]
enum Tone {
    Ok,
    Info,
}

fn status_ok(tag: &str, msg: &str) {
    eprintln!("{}", status_line(tag, msg, Tone::Ok));
}

fn status_info(tag: &str, msg: &str) {
    eprintln!("{}", status_line(tag, msg, Tone::Info));
}

/// Étiquette alignée à droite, colorée seulement si stderr le supporte.
fn status_line(tag: &str, msg: &str, tone: Tone) -> String {
    let tag = format!("{tag:>8}");
    #[cfg(feature = "color")]
    {
        let style = match tone {
            Tone::Ok => Style::new().green().bold(),
            Tone::Info => Style::new().blue().bold(),
        };
        format!("{} {msg}", tag.if_supports_color(Stream::Stderr, |t| t.style(style)))
    }
    #[cfg(not(feature = "color"))]
    {
        let _ = tone;
        format!("{tag} {msg}")
    }
}

// ───────────────────────────── Tests ─────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use skein_ast::build::*;
    use skein_ast::BinaryOp;
    use skein_compiler::{compile, CompilerOptions, SymbolTable};
    use skein_core::SourceFileSet;

    fn write_program(dir: &Path, stmts: Vec<skein_ast::Stmt>) -> PathBuf {
        let mut symbols = SymbolTable::with_builtins();
        let mut files = SourceFileSet::new();
        files.add_file("main", None, 64);
        let bc = compile(&file("main", stmts), files, &mut symbols, CompilerOptions::default()).unwrap();
        let path = dir.join("prog.skbc");
        bc.write_file(&path).unwrap();
        path
    }

    fn run_task(path: PathBuf) -> RunTask {
        RunTask { program: Input::Path(path), ..RunTask::default() }
    }

    #[test]
    fn run_reports_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let ok = write_program(dir.path(), vec![define("x", bin(int(1), BinaryOp::Add, int(2)))]);
        assert_eq!(execute(Command::Run(run_task(ok)), &mut Vec::new()).unwrap(), exit::OK);

        let bad = write_program(dir.path(), vec![define("x", bin(int(1), BinaryOp::Add, str("a")))]);
        assert_eq!(execute(Command::Run(run_task(bad)), &mut Vec::new()).unwrap(), exit::RUNTIME_ERROR);

        let spin = write_program(dir.path(), vec![for_(None, None, None, vec![])]);
        let task = RunTask { timeout_ms: Some(20), ..run_task(spin) };
        assert_eq!(execute(Command::Run(task), &mut Vec::new()).unwrap(), exit::ABORTED);
    }

    #[test]
    fn status_lines_align_the_tag() {
        let line = status_line("run", "prog.skbc", Tone::Ok);
        assert!(line.contains("     run"));
        assert!(line.ends_with(" prog.skbc"));
        assert!(status_line("time", "1ms", Tone::Info).ends_with(" 1ms"));
    }

    #[test]
    fn array_limit_flag_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let big = write_program(dir.path(), vec![define("a", call(ident("range"), vec![int(0), int(100)]))]);
        let task = RunTask { max_array_len: Some(10), ..run_task(big) };
        assert_eq!(execute(Command::Run(task), &mut Vec::new()).unwrap(), exit::RUNTIME_ERROR);
    }

    #[test]
    fn limits_follow_flags() {
        let task = RunTask { max_allocs: Some(10), max_string_len: Some(3), max_array_len: Some(7), ..RunTask::default() };
        let limits = limits_for(&task);
        assert_eq!((limits.max_allocs, limits.max_string_len, limits.max_array_len), (10, 3, 7));
        assert_eq!(limits.max_bytes_len, Limits::default().max_bytes_len);

        let dir = tempfile::tempdir().unwrap();
        let long = write_program(dir.path(), vec![define("s", bin(str("ab"), BinaryOp::Add, str("cd")))]);
        let task = RunTask { max_string_len: Some(3), ..run_task(long) };
        assert_eq!(execute(Command::Run(task), &mut Vec::new()).unwrap(), exit::RUNTIME_ERROR);
    }

    #[test]
    fn disasm_lists_constants_and_main() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(dir.path(), vec![define("x", int(7))]);
        let mut out = Vec::new();
        execute(Command::Disasm(DisasmTask { input: Input::Path(path), output: Output::Stdout }), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("== constants ==\n"));
        assert!(text.contains("== main ==\n"));
        assert!(text.contains("SUSPEND"));
    }

    #[test]
    fn disasm_writes_to_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(dir.path(), vec![define("x", int(7))]);
        let target = dir.path().join("prog.txt");
        let task = DisasmTask { input: Input::Path(path), output: Output::Path(target.clone()) };
        execute(Command::Disasm(task), &mut Vec::new()).unwrap();
        assert!(fs::read_to_string(target).unwrap().contains("== main =="));
    }

    #[test]
    fn inspect_counts_constants() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(
            dir.path(),
            vec![define("f", func(&["a"], vec![ret(Some(ident("a")))])), define("s", str("hi")), define("n", int(3))],
        );
        let data = fs::read(&path).unwrap();
        let bc = Bytecode::decode(&data, &()).unwrap();
        let report = inspect(&data, &bc).unwrap();
        assert_eq!(report.format_version, FORMAT_VERSION);
        assert_eq!(report.sources, ["main"]);
        assert_eq!(report.constants, 3);
        assert_eq!(report.functions, 1);
        assert_eq!(report.constant_kinds.get("string"), Some(&1));

        let mut out = Vec::new();
        execute(Command::Inspect(InspectTask { input: Input::Path(path), json: true }), &mut out).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["functions"], 1);
    }

    #[test]
    fn garbage_is_rejected_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.skbc");
        fs::write(&path, b"not bytecode").unwrap();
        let err = execute(Command::Inspect(InspectTask { input: Input::Path(path), json: false }), &mut Vec::new())
            .unwrap_err();
        assert!(err.to_string().starts_with("bytecode invalide"));
    }
}
