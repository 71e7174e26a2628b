//! NRT Mosaic - Deep Zoom tiles that dissolve into photomosaics.
//!
//! This binary loads the pyramid index, starts the HTTP server, and runs the
//! offline shard consolidation.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nrt_mosaic::{
    concatenate_tree,
    config::{Cli, Command, ConcatConfig, ServeConfig},
    server::{create_router, RouterConfig},
    source::{FileImageSource, HttpImageSource, ImageSource},
    tile::{decode_grey, MosaicCache},
    DeepZoomCoordinator, PyramidIndex,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(*config).await,
        Command::Concat(config) => run_concat(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("NRT Mosaic v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Shard root: {}", config.shard_root.display());
    info!(
        "  Pyramids: max level {}, bucket size {}, collapse up {} / down {}",
        config.pyramid.max_level,
        config.pyramid.bucket_size,
        config.collapse_up,
        config.collapse_down
    );
    info!(
        "  Levels: first basic {}, last basic {}, last render {}, turtle {}",
        config.first_basic_level,
        config.last_basic_level,
        config.last_render_level,
        config.turtle_level
    );
    info!(
        "  Fill: {:?}, grey {}, missing grey {}",
        config.fill_style,
        config.pyramid.fill_grey,
        config.pyramid.missing_grey()
    );

    let index = match load_index(&config).await {
        Ok(index) => Arc::new(index),
        Err(e) => {
            error!("Failed to load pyramid index: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match config.tile_root.clone() {
        Some(root) => {
            info!("  Image source: directory {}", root.display());
            serve(config, index, FileImageSource::new(root)).await
        }
        None => {
            info!("  Image source: {}", config.image_server);
            let source = HttpImageSource::new(config.image_server.clone());
            serve(config, index, source).await
        }
    }
}

/// Load all shards on blocking threads.
async fn load_index(config: &ServeConfig) -> Result<PyramidIndex, String> {
    let root = config.shard_root.clone();
    let index_config = config.index_config();
    let start = Instant::now();

    let index = tokio::task::spawn_blocking(move || PyramidIndex::load(&root, index_config))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;

    info!(
        "Loaded {} pyramids in {}ms",
        index.len(),
        start.elapsed().as_millis()
    );
    Ok(index)
}

async fn serve<S: ImageSource + 'static>(
    config: ServeConfig,
    index: Arc<PyramidIndex>,
    source: S,
) -> ExitCode {
    let deepzoom_settings = match config.deepzoom_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let turtle = match &config.turtle_image {
        Some(path) => match std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| decode_grey(&bytes).map_err(|e| e.to_string()))
        {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(
                    "Could not load placeholder image {}: {}, drawing one instead",
                    path.display(),
                    e
                );
                None
            }
        },
        None => None,
    };

    let cache = MosaicCache::new(Arc::new(source), index, config.mosaic_settings());
    let coordinator = DeepZoomCoordinator::new(cache, deepzoom_settings, turtle);
    let router = create_router(coordinator, build_router_config(&config));

    let addr = config.bind_address();
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/image/random/", addr);
    info!("────────────────────────────────────────────────────────────────");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "nrt_mosaic=debug,tower_http=debug"
    } else {
        "nrt_mosaic=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_jpeg_quality(config.jpeg_quality)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Concat Command
// =============================================================================

async fn run_concat(config: ConcatConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let settings = config.pyramid.settings();
    let bucket_size = config.pyramid.bucket_size;
    let tree_root = config.tree_root.clone();
    let shard_root = config.shard_root.clone();
    let overwrite = config.overwrite;

    let result = tokio::task::spawn_blocking(move || {
        concatenate_tree(&tree_root, &shard_root, settings, bucket_size, overwrite)
    })
    .await;

    match result {
        Ok(Ok(summary)) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Could not serialize summary: {}", e),
            }
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!("Concatenation failed: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Concatenation task failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
