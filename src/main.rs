pub mod api;
pub mod binning;
pub mod config;
pub mod layers;
pub mod regional;
pub mod server;
pub mod study_view;
pub mod table;
pub mod types;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::api::ApiClient;
use crate::binning::RegionFilter;
use crate::table::StudyTable;
use crate::types::{Schema, StudyKey};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the dashboard API and static assets
    Serve,
    /// Print quantile colour stops for a regional attribute
    Bands {
        #[arg(short, long)]
        attribute: String,
        /// County label; omit for the whole region
        #[arg(short, long)]
        region: Option<String>,
        /// Print the Mapbox layer JSON instead of the stop table
        #[arg(long)]
        layer: bool,
    },
    /// Inspect and manage saved studies
    Studies {
        #[command(subcommand)]
        action: StudyAction,
    },
}

#[derive(Args)]
struct Owner {
    #[arg(short, long, env = "STUDY_USER")]
    user: String,
    /// lts, sidewalk (sw), bike or pedestrian
    #[arg(short, long, default_value = "lts")]
    schema: Schema,
}

#[derive(Subcommand)]
enum StudyAction {
    /// List a user's studies as a table
    List {
        #[command(flatten)]
        owner: Owner,
        /// Emit the table as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the detail page of a shared study
    Show {
        #[command(flatten)]
        owner: Owner,
        #[arg(long)]
        study: String,
    },
    Rename {
        #[command(flatten)]
        owner: Owner,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    Delete {
        #[command(flatten)]
        owner: Owner,
        #[arg(long)]
        study: String,
    },
    /// Turn the public link on (or off with --off)
    Share {
        #[command(flatten)]
        owner: Owner,
        #[arg(long)]
        study: String,
        #[arg(long)]
        off: bool,
    },
    /// Save the study geometry as GeoJSON
    Download {
        #[command(flatten)]
        owner: Owner,
        #[arg(long)]
        study: String,
        /// Target file or directory; defaults to `<study>.geojson` here
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app_config = config::AppConfig::load_from_file(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::start_server(app_config).await?;
        }
        Commands::Bands { attribute, region, layer } => {
            let cfg = &app_config.regional;
            let regional = regional::RegionalLayer::load(&cfg.geojson, &cfg.region_property)?;
            let filter = RegionFilter::from_label(region.as_deref(), &cfg.all_regions_label);
            let stops = regional.bands(&attribute, &filter, &cfg.palette);

            if layer {
                let label = match &filter {
                    RegionFilter::All => None,
                    RegionFilter::Only(l) => Some(l.as_str()),
                };
                let spec = layers::regional_line_layer(
                    &attribute,
                    &stops,
                    &cfg.region_property,
                    label,
                    cfg.fallback_color(),
                );
                println!("{}", serde_json::to_string_pretty(&spec)?);
            } else if stops.is_empty() {
                println!("No values for '{}'; layer uses {}", attribute, cfg.fallback_color());
            } else {
                for stop in &stops {
                    println!("{:>14}  {}", table::format_number(stop.value), stop.color);
                }
                if let Some(max) = regional.attribute_max(&attribute, &filter) {
                    println!("max: {}", table::format_number(max));
                }
            }
        }
        Commands::Studies { action } => {
            let api = ApiClient::new(&app_config.api.base_url);
            run_study_action(&api, &app_config, action).await?;
        }
    }

    Ok(())
}

async fn run_study_action(api: &ApiClient, app_config: &config::AppConfig, action: StudyAction) -> anyhow::Result<()> {
    match action {
        StudyAction::List { owner, json } => {
            let studies = api
                .list_studies(&owner.user, owner.schema)
                .await
                .context("Failed to fetch studies")?;
            let table = StudyTable::build(&studies, owner.schema, &app_config.server.public_link_prefix);
            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else if table.is_empty() {
                println!("No studies have been created yet!");
            } else {
                println!("{}", table.render_text());
            }
        }
        StudyAction::Show { owner, study } => {
            let key = StudyKey::new(owner.user, owner.schema, study);
            let study = study_view::resolve_shared_study(api, &key).await?;
            println!("{}", study_view::StudyDetail::new(&study, key.schema).render_text());
        }
        StudyAction::Rename { owner, from, to } => {
            api.rename_study(&owner.user, owner.schema, &from, &to)
                .await
                .with_context(|| format!("Failed to rename '{}'", from))?;
            println!("Renamed '{}' to '{}'", from, to.trim());
        }
        StudyAction::Delete { owner, study } => {
            let key = StudyKey::new(owner.user, owner.schema, study);
            api.delete_study(&key)
                .await
                .with_context(|| format!("Failed to delete {}", key))?;
            println!("Deleted {}", key);
        }
        StudyAction::Share { owner, study, off } => {
            let key = StudyKey::new(owner.user, owner.schema, study);
            api.set_shared(&key, !off)
                .await
                .with_context(|| format!("Failed to update sharing for {}", key))?;
            if off {
                println!("{} is private", key);
            } else {
                let study = types::Study {
                    username: key.username.clone(),
                    seg_name: key.seg_name.clone(),
                    ..Default::default()
                };
                println!(
                    "{} is shared at {}",
                    key,
                    table::public_link(&app_config.server.public_link_prefix, &study, key.schema)
                );
            }
        }
        StudyAction::Download { owner, study, output } => {
            let key = StudyKey::new(owner.user, owner.schema, study);
            let path = api
                .download_study(&key, output.as_deref())
                .await
                .with_context(|| format!("Failed to download {}", key))?;
            println!("Saved {} to {:?}", key, path);
        }
    }
    Ok(())
}
