//! Registry Tool CLI
//!
//! Developer tool over a registry snapshot file: canonicalize schemas,
//! register them, and inspect subjects and versions.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use schema_registry::{
    Canonicalizer, CompatibilityLevel, GlobalId, Reference, RegistryConfig, SchemaFormat, SchemaRegistry,
    VersionSelector,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "registry-tool")]
#[command(about = "Canonicalize, register and inspect schemas")]
struct Cli {
    /// Config file (defaults to registry.toml and friends)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Snapshot file holding the registry state
    #[arg(short, long, global = true)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the canonical form of a schema file
    Canonicalize {
        /// Schema type (AVRO, JSON, PROTOBUF); guessed from the extension if omitted
        #[arg(short = 't', long = "type")]
        format: Option<SchemaFormat>,
        /// Schema file
        file: PathBuf,
        /// Dependency as import-name=path, may be repeated
        #[arg(short, long = "dep")]
        deps: Vec<String>,
    },

    /// Register a schema file under a subject
    Register {
        /// Subject name, optionally `group/name`
        subject: String,
        /// Schema file
        file: PathBuf,
        #[arg(short = 't', long = "type")]
        format: Option<SchemaFormat>,
        /// Reference as name=subject:version, may be repeated
        #[arg(short, long = "reference")]
        references: Vec<String>,
        /// Deduplicate by canonical form
        #[arg(long)]
        normalize: bool,
    },

    /// Print a schema by subject and version, or by global id
    Get {
        /// Subject name
        #[arg(required_unless_present = "id")]
        subject: Option<String>,
        /// Version number, `latest` or -1
        #[arg(default_value = "latest")]
        version: String,
        /// Global id instead of subject/version
        #[arg(long, conflicts_with = "subject")]
        id: Option<i64>,
    },

    /// List subjects
    Subjects,

    /// List the versions of a subject
    Versions { subject: String },

    /// Show or set a compatibility level
    Compatibility {
        /// Subject; the global level when omitted
        #[arg(short, long)]
        subject: Option<String>,
        /// New level
        level: Option<CompatibilityLevel>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = RegistryConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    let snapshot = cli.snapshot.clone().or_else(|| config.snapshot_path());

    match cli.command {
        Commands::Canonicalize { format, file, deps } => {
            let format = format_for(format, &file)?;
            let mut closure = BTreeMap::new();
            for dep in deps {
                let (name, path) = dep
                    .split_once('=')
                    .ok_or_else(|| anyhow!("dependency '{dep}' is not name=path"))?;
                closure.insert(name.to_string(), read(Path::new(path))?);
            }
            let canonicalizer = Canonicalizer::new(config.registry.protobuf_file_name.clone());
            let canonical = canonicalizer.canonicalize(format, read(&file)?.as_bytes(), &closure)?;
            println!("{canonical}");
            Ok(())
        }

        Commands::Register {
            subject,
            file,
            format,
            references,
            normalize,
        } => {
            let format = format_for(format, &file)?;
            let registry = open(&config, snapshot.as_deref())?;
            let subject = registry.subject(&subject);
            let references = references
                .iter()
                .map(|r| parse_reference(&registry, r))
                .collect::<Result<Vec<_>>>()?;
            let mut options = registry.default_options();
            options.normalize |= normalize;

            let id = registry.register_schema(&subject, format, read(&file)?, &references, options)?;
            let version = registry.get_version(&subject, VersionSelector::Latest)?;
            println!("✅ {} version {} -> global id {}", subject, version.version, id);
            save(&registry, snapshot.as_deref())
        }

        Commands::Get { subject, version, id } => {
            let registry = open(&config, snapshot.as_deref())?;
            let content = match (id, subject) {
                (Some(id), _) => registry.get_content_by_global_id(GlobalId(id))?,
                (None, Some(subject)) => {
                    let selector: VersionSelector = version.parse()?;
                    registry.get_schema(&registry.subject(&subject), selector)?
                }
                (None, None) => bail!("either a subject or --id is required"),
            };
            println!("{}", content.raw);
            Ok(())
        }

        Commands::Subjects => {
            let registry = open(&config, snapshot.as_deref())?;
            for subject in registry.list_subjects() {
                println!("{subject}");
            }
            Ok(())
        }

        Commands::Versions { subject } => {
            let registry = open(&config, snapshot.as_deref())?;
            let subject = registry.subject(&subject);
            for ordinal in registry.list_versions(&subject)? {
                let version = registry.get_version(&subject, VersionSelector::Version(ordinal))?;
                println!(
                    "{:>4}  global id {:<6} {:?}  {}",
                    version.version, version.global_id, version.state, version.created_at
                );
            }
            Ok(())
        }

        Commands::Compatibility { subject, level } => {
            let registry = open(&config, snapshot.as_deref())?;
            let subject = subject.map(|s| registry.subject(&s));
            match level {
                Some(level) => {
                    registry.set_compatibility(subject.as_ref(), level);
                    save(&registry, snapshot.as_deref())?;
                    println!("✅ compatibility set to {level}");
                }
                None => println!("{}", registry.get_compatibility(subject.as_ref())),
            }
            Ok(())
        }

        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn format_for(format: Option<SchemaFormat>, file: &Path) -> Result<SchemaFormat> {
    if let Some(format) = format {
        return Ok(format);
    }
    match file.extension().and_then(|e| e.to_str()) {
        Some("avsc") => Ok(SchemaFormat::Avro),
        Some("json") => Ok(SchemaFormat::Json),
        Some("proto") => Ok(SchemaFormat::Protobuf),
        _ => bail!("cannot guess the schema type of {}; pass --type", file.display()),
    }
}

/// `name=subject:version`
fn parse_reference(registry: &SchemaRegistry, text: &str) -> Result<Reference> {
    let (name, target) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("reference '{text}' is not name=subject:version"))?;
    let (subject, version) = target
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("reference '{text}' is missing a version"))?;
    let version: u32 = version
        .parse()
        .with_context(|| format!("reference '{text}' has an invalid version"))?;
    Ok(Reference::new(name, registry.subject(subject), version))
}

fn open(config: &RegistryConfig, snapshot: Option<&Path>) -> Result<SchemaRegistry> {
    match snapshot {
        Some(path) if path.exists() => SchemaRegistry::load_snapshot(config.clone(), path)
            .with_context(|| format!("loading snapshot {}", path.display())),
        _ => Ok(SchemaRegistry::new(config.clone())),
    }
}

fn save(registry: &SchemaRegistry, snapshot: Option<&Path>) -> Result<()> {
    match snapshot {
        Some(path) => registry
            .save_snapshot(path)
            .with_context(|| format!("writing snapshot {}", path.display())),
        None => {
            eprintln!("⚠️  no snapshot path configured; changes are not persisted");
            Ok(())
        }
    }
}
