use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tabula::{SchemaParser, SchemaRuntime};

#[derive(Parser)]
#[command(name = "tabula")]
#[command(about = "Parse, validate and expand schema-as-code documents")]
struct Cli {
    /// KEY=VALUE pairs used instead of the process environment
    #[arg(long = "env", global = true)]
    env: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and validate a schema, then print a summary
    Check { file: PathBuf },
    /// Print the canonical (expanded) document
    Expand {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let parser = build_parser(&cli.env)?;

    match cli.command {
        Command::Check { file } => check(&parser, &file),
        Command::Expand { file, format } => expand(&parser, &file, format),
    }
}

fn build_parser(pairs: &[String]) -> Result<SchemaParser> {
    if pairs.is_empty() {
        return Ok(SchemaParser::new());
    }
    let mut vars = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid --env '{}', expected KEY=VALUE", pair))?;
        vars.insert(key.trim().to_string(), value.to_string());
    }
    Ok(SchemaParser::with_env(vars))
}

fn read_source(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("Failed to read '{}'", file.display()))
}

fn check(parser: &SchemaParser, file: &Path) -> Result<()> {
    let source = read_source(file)?;
    let schema = parser
        .parse(&source)
        .with_context(|| format!("'{}' is not a valid schema", file.display()))?;
    let runtime = SchemaRuntime::new(schema).context("Failed to build runtime")?;
    let schema = runtime.schema();

    println!("{} v{}", schema.name, schema.version);
    for name in runtime.table_names() {
        let table = &schema.tables[name];
        println!(
            "  {:<20} {:>3} columns  {:>2} indexes  {:>2} automations",
            name,
            table.columns.len(),
            table.indexes.len(),
            table.automations.len()
        );
    }
    println!(
        "{} relations, {} roles, {} workflows",
        runtime.relations().len(),
        runtime.permissions().roles().count(),
        schema.workflows.len()
    );
    Ok(())
}

fn expand(parser: &SchemaParser, file: &Path, format: Format) -> Result<()> {
    let source = read_source(file)?;
    let document = parser
        .expand_document(&source)
        .with_context(|| format!("Failed to expand '{}'", file.display()))?;
    let output = match format {
        Format::Yaml => serde_yaml::to_string(&document)?,
        Format::Json => serde_json::to_string_pretty(&document)?,
    };
    println!("{}", output.trim_end());
    Ok(())
}
