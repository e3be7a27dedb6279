//! `storefront`: drive a wishlist session against the local storefront database.

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use db::{
    DBService,
    models::product::{CreateProduct, Product},
};
use services::services::{
    cache::{FileWishlistCache, WishlistCache},
    config::Config,
    identity::{Identity, IdentityProvider, SessionIdentity},
    wishlist::{SyncPhase, WishlistError, WishlistService},
    wishlist_store::SqliteWishlistStore,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "storefront", version, about = "Storefront wishlist client")]
struct Cli {
    /// Signed-in user. Wishlist commands fail when omitted.
    #[arg(long, env = "STOREFRONT_USER")]
    user: Option<Uuid>,

    #[arg(long, env = "STOREFRONT_USER_EMAIL")]
    email: Option<String>,

    /// TOML config file; STOREFRONT_* variables override it
    #[arg(long, env = "STOREFRONT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the liked products
    List,
    /// Like or unlike a product
    Toggle { product_id: String },
    /// Remove every product from the wishlist
    Clear,
    /// Add a product to the catalog
    AddProduct {
        #[arg(long)]
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        price: f64,
        #[arg(long)]
        original_price: Option<f64>,
        #[arg(long)]
        rating: Option<f64>,
        #[arg(long)]
        discount: Option<i64>,
        #[arg(long)]
        category_id: Option<String>,
        #[arg(long)]
        image: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load config")?;
    let db = DBService::new(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;

    let identity = cli.user.map(|id| Identity {
        id,
        email: cli.email,
    });

    let result = match cli.command {
        Command::AddProduct {
            id,
            title,
            price,
            original_price,
            rating,
            discount,
            category_id,
            image,
        } => {
            let data = CreateProduct {
                id,
                title,
                image,
                price,
                original_price,
                rating,
                discount,
                category_id,
            };
            let product = Product::create(&db.pool, &data)
                .await
                .context("failed to add product")?;
            info!(product_id = %product.id, "Product added");
            println!("{}\t{}\t{:.2}", product.id, product.title, product.price);
            return Ok(ExitCode::SUCCESS);
        }
        Command::List => {
            let wishlist = open_session(&db, &config, identity).await;
            list(&db, &wishlist).await
        }
        Command::Toggle { product_id } => {
            let wishlist = open_session(&db, &config, identity).await;
            wishlist
                .try_toggle(&product_id)
                .await
                .map(|outcome| println!("{}\t{}", product_id, outcome))
        }
        Command::Clear => {
            let wishlist = open_session(&db, &config, identity).await;
            wishlist.try_clear().await.map(|()| println!("cleared"))
        }
    };

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(WishlistError::Unauthenticated) => {
            eprintln!("sign in required: pass --user <uuid>");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            eprintln!("error: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Build the wishlist service over the database, drive it from a session
/// signed in as `identity` and wait for the first sync to settle.
async fn open_session(
    db: &DBService,
    config: &Config,
    identity: Option<Identity>,
) -> WishlistService {
    let cache: Option<Arc<dyn WishlistCache>> = config.resolved_cache_dir().map(|dir| {
        let cache = FileWishlistCache::new(dir);
        debug!(dir = %cache.dir().display(), "Wishlist cache enabled");
        Arc::new(cache) as Arc<dyn WishlistCache>
    });
    let wishlist = WishlistService::new(
        Arc::new(SqliteWishlistStore::new(db.pool.clone())),
        config.remote_timeout(),
        cache,
    );

    let provider = Arc::new(match identity {
        Some(identity) => SessionIdentity::signed_in(identity),
        None => SessionIdentity::new(),
    });
    let Some(user_id) = provider.current_user().map(|identity| identity.id) else {
        return wishlist;
    };

    let mut state = wishlist.subscribe();
    wishlist.follow(provider);
    let synced = state
        .wait_for(|state| state.user_id() == Some(user_id) && state.phase() == SyncPhase::Ready)
        .await
        .map(|_| ());
    if synced.is_err() {
        warn!(user_id = %user_id, "Wishlist state closed before the session synced");
    }
    wishlist
}

async fn list(db: &DBService, wishlist: &WishlistService) -> Result<(), WishlistError> {
    // The session fetch may have failed; list needs a confirmed view.
    wishlist.refresh().await?;

    let mut ids: Vec<String> = wishlist.entries().into_iter().collect();
    ids.sort();
    let catalog = Product::find_by_ids(&db.pool, &ids)
        .await
        .map_err(|e| WishlistError::Store(e.into()))?;

    let products = wishlist.wishlisted_products(&catalog);
    println!(
        "{} item{} saved",
        ids.len(),
        if ids.len() == 1 { "" } else { "s" }
    );
    for product in &products {
        println!("{}\t{}\t{:.2}", product.id, product.title, product.price);
    }
    for id in ids.iter().filter(|id| !catalog.iter().any(|p| &p.id == *id)) {
        println!("{}\t(unknown product)", id);
    }
    Ok(())
}
