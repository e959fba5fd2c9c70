use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use memorealm::json::{class_to_json, create_or_update_from_json, export_class};
use memorealm::{Realm, RealmConfig, SchemaSet};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "realm-tool")]
#[command(about = "Developer tooling for memorealm snapshot files")]
struct Cli {
    /// JSON file with the declared classes
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    /// Snapshot file of the Realm
    #[arg(long, global = true)]
    realm: Option<PathBuf>,

    #[arg(long, global = true, default_value_t = 0)]
    schema_version: u64,

    /// Default depth for exported relationships
    #[arg(long, global = true, default_value_t = 1)]
    max_detach_depth: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the Realm and check the stored schema against the declared one
    Validate,
    /// Import a JSON object or array of objects into a class
    Import {
        #[arg(long)]
        class: String,
        #[arg(long)]
        input: PathBuf,
        /// Update objects whose primary key already exists
        #[arg(long)]
        update: bool,
    },
    /// Export every object of a class as a JSON array
    Export {
        #[arg(long)]
        class: String,
        /// Relationship depth; defaults to --max-detach-depth
        #[arg(long)]
        depth: Option<usize>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Validate => validate(config),
        Command::Import { class, input, update } => import(config, &class, &input, update),
        Command::Export { class, depth, out } => export(config, &class, depth, out.as_deref()),
    }
}

fn load_config(cli: &Cli) -> Result<RealmConfig> {
    let schema_path = cli
        .schema
        .as_deref()
        .ok_or_else(|| anyhow!("--schema <path> is required"))?;
    let realm_path = cli
        .realm
        .as_deref()
        .ok_or_else(|| anyhow!("--realm <path> is required"))?;
    let schema = SchemaSet::from_json_file(schema_path)
        .with_context(|| format!("Failed to load schema from '{}'", schema_path.display()))?;

    let name = realm_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("default.realm");
    Ok(RealmConfig::new(schema)
        .name(name)
        .path(realm_path)
        .schema_version(cli.schema_version)
        .max_detach_depth(cli.max_detach_depth))
}

fn validate(config: RealmConfig) -> Result<()> {
    let path = config.path.clone().unwrap_or_default();
    let mut realm = Realm::open(config).with_context(|| format!("Validation of '{}' failed", path.display()))?;
    for class in realm.schema().classes() {
        println!("{}: {} objects", class.class_name, realm.count(&class.class_name)?);
    }
    realm.close()?;
    println!("Schema of '{}' is valid", path.display());
    Ok(())
}

fn import(config: RealmConfig, class: &str, input: &Path, update: bool) -> Result<()> {
    let content = fs::read_to_string(input).with_context(|| format!("Failed to read '{}'", input.display()))?;
    let document: JsonValue =
        serde_json::from_str(&content).with_context(|| format!("'{}' is not valid JSON", input.display()))?;
    let items = match document {
        JsonValue::Array(items) => items,
        other => vec![other],
    };

    let mut realm = Realm::open(config)?;
    realm.begin_write()?;
    for (index, item) in items.iter().enumerate() {
        if let Err(e) = create_or_update_from_json(&mut realm, class, item, update) {
            realm.cancel_write()?;
            return Err(anyhow!(e).context(format!("Failed to import item {} into '{}'", index, class)));
        }
    }
    realm.commit_write()?;
    info!(class, count = items.len(), "import finished");
    println!("Imported {} objects into '{}'", items.len(), class);
    realm.close()?;
    Ok(())
}

fn export(config: RealmConfig, class: &str, depth: Option<usize>, out: Option<&Path>) -> Result<()> {
    let mut realm = Realm::open(config)?;
    let document = match depth {
        Some(depth) => class_to_json(&realm, class, depth)?,
        None => export_class(&realm, class)?,
    };
    realm.close()?;

    let rendered = serde_json::to_string_pretty(&document)?;
    match out {
        Some(path) => {
            fs::write(path, rendered).with_context(|| format!("Failed to write '{}'", path.display()))?;
            println!("Exported '{}' to {}", class, path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
