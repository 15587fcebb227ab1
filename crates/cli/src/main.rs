//! `annolink` -- command-line client for DVID and Clio annotation sources.
//!
//! # Environment variables
//!
//! | Variable               | Required | Default | Description                                  |
//! |------------------------|----------|---------|----------------------------------------------|
//! | `ANNOLINK_SOURCE`      | yes      | --      | Source locator, e.g. `dvid://http://host:8000/<node>/<instance>` |
//! | `ANNOLINK_USER`        | no       | --      | User identity for writes (overrides the locator) |
//! | `ANNOLINK_TOKEN`       | no       | --      | Literal bearer token                         |
//! | `ANNOLINK_AUTH_SERVER` | no       | --      | Token endpoint (overrides the locator)       |
//!
//! Each variable can also be passed as a flag. A `.env` file is honoured.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use annolink_core::Annotation;
use annolink_fetch::{
    AuthServerProvider, CredentialProvider, FetchConfig, HttpTransport, ReqwestTransport,
    StaticTokenProvider,
};
use annolink_source::{AnnotationSource, ChunkBounds, SourceParameters};

#[derive(Debug, Parser)]
#[command(name = "annolink", version, about = "Read and write DVID/Clio annotations")]
struct Cli {
    /// Source locator (`dvid://...` or `clio://...`).
    #[arg(long, env = "ANNOLINK_SOURCE")]
    source: String,

    /// User identity stamped on writes.
    #[arg(long, env = "ANNOLINK_USER")]
    user: Option<String>,

    /// Literal bearer token.
    #[arg(long, env = "ANNOLINK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Auth server handing out bearer tokens.
    #[arg(long, env = "ANNOLINK_AUTH_SERVER")]
    auth_server: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download a chunk (or, in tag mode, every tagged annotation).
    Bulk {
        /// Chunk offset as `x,y,z`.
        #[arg(long, value_delimiter = ',', num_args = 3, allow_hyphen_values = true)]
        offset: Vec<i64>,
        /// Chunk size as `x,y,z`.
        #[arg(long, value_delimiter = ',', num_args = 3)]
        size: Vec<i64>,
    },
    /// Print one annotation.
    Get { id: String },
    /// Create a point annotation.
    Add {
        #[arg(long, value_delimiter = ',', num_args = 3, allow_hyphen_values = true)]
        point: Vec<f64>,
        #[arg(long, default_value = "Note")]
        kind: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete an annotation.
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "annolink=info,annolink_source=info,annolink_fetch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut parameters = SourceParameters::from_locator(&cli.source)
        .with_context(|| format!("parsing source locator {}", cli.source))?;
    if let Some(user) = cli.user {
        parameters.user = Some(user);
    }
    if let Some(auth) = cli.auth_server {
        parameters.auth_server = Some(auth);
    }

    let fetch_config = FetchConfig {
        request_timeout: Duration::from_secs(cli.timeout_secs),
        ..Default::default()
    };
    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(fetch_config.request_timeout)?);
    let credentials: Option<Arc<dyn CredentialProvider>> =
        match (&cli.token, &parameters.auth_server) {
            (Some(token), _) => Some(Arc::new(StaticTokenProvider::new(token.clone()))),
            (None, Some(url)) => Some(Arc::new(AuthServerProvider::new(
                transport.clone(),
                url.clone(),
            ))),
            (None, None) => None,
        };

    tracing::info!(
        source = %cli.source,
        user = parameters.user().unwrap_or("-"),
        credentials = credentials.is_some(),
        "Opening annotation source",
    );
    let source = AnnotationSource::new(parameters, transport, credentials, fetch_config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Bulk { offset, size } => {
            let bounds = ChunkBounds::new(triple(&offset, "offset")?, triple(&size, "size")?);
            let batch = source.download_bulk(&bounds, &cancel).await?;
            let summary = serde_json::json!({
                "points": batch.points.len(),
                "lines": batch.lines.len(),
                "ids": batch.ids().collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Get { id } => {
            let annotation = source.download_metadata(&id, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&annotation)?);
        }
        Command::Add {
            point,
            kind,
            title,
            description,
        } => {
            let [x, y, z] = triple(&point, "point")?;
            let mut annotation = Annotation::point([x, y, z], kind);
            if let Some(title) = title {
                annotation = annotation.with_property("title", title);
            }
            if let Some(description) = description {
                annotation = annotation.with_description(description);
            }
            let id = source.add(&annotation, &cancel).await?;
            println!("{id}");
        }
        Command::Delete { id } => {
            source.delete(&id, &cancel).await?;
            println!("deleted {id}");
        }
    }

    Ok(())
}

fn triple<T: Copy>(values: &[T], name: &str) -> anyhow::Result<[T; 3]> {
    values
        .try_into()
        .map_err(|_| anyhow::anyhow!("--{name} takes exactly three comma-separated values"))
}
