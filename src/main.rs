//! # bundler-core
//!
//! A Rust asset bundler core: module graph, edit-log renderers for
//! JavaScript/CSS/HTML, a JS bundle assembler, and a common-bundle
//! extractor, driven by a small Builder orchestration layer.
//!
//! ## Usage
//!
//! ```bash
//! bundler-core [OPTIONS] <FILE>
//! bundler-core --config build.json
//! ```

use std::path::PathBuf;
use std::process;

use clap::{Arg, Command};

mod build;
mod bundler;
mod config;
mod extractor;
mod graph;
mod module;
mod parser;
mod path_text;
mod render;
mod resolve;
mod scope;
mod sourcemap;
mod text_document;

use config::BuildConfig;

const VERSION: &str = "0.1.0";
const APP_NAME: &str = "bundler-core";

#[derive(Debug, Clone)]
struct CliConfig {
    input_file: Option<PathBuf>,
    config_file: Option<PathBuf>,
    verbose: bool,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("no input file or --config given")]
    MissingInput,
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("build error: {0}")]
    Build(#[from] build::BuildError),
}

type CliResult<T> = Result<T, CliError>;

fn main() {
    if let Err(error) = run() {
        eprintln!("Error: {error}");
        process::exit(1);
    }
}

fn run() -> CliResult<()> {
    let cli = parse_command_line_arguments();

    display_welcome_message();
    if cli.verbose {
        display_verbose_info(&cli);
    }

    let build_config = match (&cli.config_file, &cli.input_file) {
        (Some(path), _) => BuildConfig::from_file(path)?,
        (None, Some(path)) => {
            let mime = guess_entry_mime(path);
            BuildConfig::default_single_entry(path.to_string_lossy(), mime)
        }
        (None, None) => {
            display_usage_information();
            return Err(CliError::MissingInput);
        }
    };

    if cli.verbose {
        println!("🔍 Phase 1: Building module graph");
    }

    let mut builder = build::Builder::new(build_config);
    let generated = builder.build()?;

    if cli.verbose {
        println!("📊 Generated {} module(s)", generated.len());
        for module in &generated {
            println!("   📦 {} ({} bytes)", module.path, module.size);
        }
    }

    println!("✅ Build completed successfully!");
    Ok(())
}

fn guess_entry_mime(path: &std::path::Path) -> String {
    resolve::guess_mime_type(path)
}

fn parse_command_line_arguments() -> CliConfig {
    let matches = Command::new(APP_NAME)
        .version(VERSION)
        .author("bundler-core contributors")
        .about("bundler-core - a module graph and bundle assembler")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::SetTrue)
                .help("Enable verbose output for debugging"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Path to a BuildConfig JSON file"),
        )
        .arg(
            Arg::new("input")
                .help("Single entry file to bundle (convenience, ignored if --config is given)")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .index(1),
        )
        .get_matches();

    CliConfig {
        input_file: matches.get_one::<PathBuf>("input").cloned(),
        config_file: matches.get_one::<PathBuf>("config").cloned(),
        verbose: matches.get_flag("verbose"),
    }
}

fn display_welcome_message() {
    println!("🦀 Hello Rust!");
    println!("Welcome to bundler-core v{VERSION}");
}

fn display_verbose_info(config: &CliConfig) {
    println!("🔍 Verbose mode enabled");
    println!("📋 Configuration:");
    if let Some(ref config_file) = config.config_file {
        println!("   📁 Config file: {}", config_file.display());
    }
    if let Some(ref input_path) = config.input_file {
        println!("   📁 Input file: {}", input_path.display());
    }
}

fn display_usage_information() {
    println!("💡 Usage: {APP_NAME} [OPTIONS] <FILE>");
    println!("   Use --help for more information");
    println!("   Example: {APP_NAME} --verbose my_script.js");
    println!("   Example: {APP_NAME} --config build.json");
}
