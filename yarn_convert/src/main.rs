//! Command-line front end for `yarn_convert`.
//!
//! `convert` turns compiled Yarn programs into a dialogue database, `dump`
//! lists a program's instructions and `check` validates an existing database.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::info;
use yarn_convert::localization::load_localized_strings;
use yarn_convert::sources::{load_node_metadata, load_programs, load_string_tables};
use yarn_convert::{YarnProject, convert_project, load_config};
use yarn_data::{DialogueDatabase, Operand, validate_database};

#[derive(Parser)]
#[command(author, version, about = "Convert compiled Yarn programs into dialogue databases.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert programs and string tables into a dialogue database.
    Convert(ConvertArgs),
    /// Print every node's instructions with their labels.
    Dump(DumpArgs),
    /// Validate an existing dialogue database.
    Check(CheckArgs),
}

#[derive(Args)]
struct ConvertArgs {
    /// Compiled program (.yarnc, .json or .ron). Repeat to merge several.
    #[arg(long = "program", value_name = "FILE", required = true)]
    programs: Vec<PathBuf>,
    /// String table CSV written by the Yarn compiler.
    #[arg(long = "strings", value_name = "CSV")]
    strings: Vec<PathBuf>,
    /// Yarn source file; node headers supply conversation actors.
    #[arg(long = "source", value_name = "YARN")]
    sources: Vec<PathBuf>,
    /// Localized string table, locale in the file name (`Sally (de).csv`).
    #[arg(long = "localized", value_name = "CSV")]
    localized: Vec<PathBuf>,
    /// Converter settings.
    #[arg(long, value_name = "TOML")]
    config: Option<PathBuf>,
    /// Existing database to convert onto.
    #[arg(long, value_name = "FILE")]
    into: Option<PathBuf>,
    /// Output database (.ron, or .json).
    #[arg(long, value_name = "FILE")]
    out: PathBuf,
}

#[derive(Args)]
struct DumpArgs {
    /// Compiled program (.yarnc, .json or .ron).
    #[arg(long = "program", value_name = "FILE", required = true)]
    programs: Vec<PathBuf>,
}

#[derive(Args)]
struct CheckArgs {
    /// Database to validate (.ron or .json).
    #[arg(long, value_name = "FILE")]
    database: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Convert(args) => convert(&args),
        Commands::Dump(args) => dump(&args),
        Commands::Check(args) => check(&args),
    }
}

fn convert(args: &ConvertArgs) -> Result<()> {
    let config = args.config.as_deref().map(load_config).unwrap_or_default();
    let patterns = config.patterns()?;

    let program = load_programs(&args.programs)?;
    let strings = load_string_tables(&args.strings)?;
    let metadata = load_node_metadata(&args.sources)?;
    let localized = load_localized_strings(&args.localized, &patterns)?;
    let project = YarnProject::new(program, strings, metadata).context("rebuilding node structure")?;

    let base = match &args.into {
        Some(path) => read_database(path)?,
        None => DialogueDatabase::default(),
    };
    let db = convert_project(&config, &project, base, localized).context("converting program")?;
    write_database(&args.out, &db)?;
    info!(
        "wrote {} conversation(s) to '{}'",
        db.conversations.len(),
        args.out.display()
    );
    report_problems(&db)
}

fn dump(args: &DumpArgs) -> Result<()> {
    let program = load_programs(&args.programs)?;
    for node in program.nodes.values() {
        let labels: HashMap<usize, &str> = node.labels.iter().map(|(label, index)| (*index, label.as_str())).collect();
        if node.tags.is_empty() {
            println!("{}:", node.name);
        } else {
            println!("{}: [{}]", node.name, node.tags.join(", "));
        }
        for (index, instruction) in node.instructions.iter().enumerate() {
            if let Some(label) = labels.get(&index) {
                println!("  {label}:");
            }
            let operands: Vec<String> = instruction.operands.iter().map(operand_text).collect();
            println!("    {index:>4}  {:?} {}", instruction.opcode, operands.join(" "));
        }
        println!();
    }
    Ok(())
}

fn operand_text(operand: &Operand) -> String {
    match operand {
        Operand::None => "null".to_string(),
        Operand::Bool(value) => value.to_string(),
        Operand::Float(value) => value.to_string(),
        Operand::String(text) => format!("{text:?}"),
    }
}

fn check(args: &CheckArgs) -> Result<()> {
    let db = read_database(&args.database)?;
    report_problems(&db)?;
    println!("'{}' is valid", args.database.display());
    Ok(())
}

fn report_problems(db: &DialogueDatabase) -> Result<()> {
    let problems = validate_database(db);
    if problems.is_empty() {
        return Ok(());
    }
    for problem in &problems {
        eprintln!("- {problem}");
    }
    bail!("database failed validation with {} problem(s)", problems.len());
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn read_database(path: &Path) -> Result<DialogueDatabase> {
    let text = fs::read_to_string(path).with_context(|| format!("reading database '{}'", path.display()))?;
    if is_json(path) {
        serde_json::from_str(&text).with_context(|| format!("parsing JSON database '{}'", path.display()))
    } else {
        ron::from_str(&text).with_context(|| format!("parsing RON database '{}'", path.display()))
    }
}

fn write_database(path: &Path, db: &DialogueDatabase) -> Result<()> {
    let text = if is_json(path) {
        serde_json::to_string_pretty(db).context("serializing database as JSON")?
    } else {
        ron::ser::to_string_pretty(db, ron::ser::PrettyConfig::default()).context("serializing database as RON")?
    };
    fs::write(path, text).with_context(|| format!("writing database '{}'", path.display()))
}
