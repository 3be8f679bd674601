use deployform::db;
use deployform::models::form_data::PgFormStore;
use deployform::realtime::{RedisEventBus, RedisPresenceStore};
use deployform::web::app::App;
use deployform::web::state::AppState;
use deployform::AppConfig;
use std::env::args;
use std::process::exit;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    let args: Vec<String> = args().collect();
    if args.len() < 2 {
        println!(
            "usage: {} CFG",
            args.first().map(String::as_str).unwrap_or("deployform")
        );
        exit(1);
    }

    let cfg: AppConfig = AppConfig::new_from_file_and_env(args[1].as_ref()).unwrap_or_else(|e| {
        eprintln!("error: {}", e);
        exit(1);
    });

    let _guard = sentry::init((
        cfg.sentry_dsn.clone(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(cfg.env.clone().into()),
            ..Default::default()
        },
    ));

    // initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // the dump carries database and redis credentials
    if !cfg.is_production() {
        tracing::debug!("config: {:?}", cfg);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("error starting runtime: {}", e);
            exit(1);
        });

    runtime.block_on(async {
        let db_pool = cfg.connect_database().await.unwrap_or_else(|e| {
            eprintln!("error connecting to database: {}", e);
            exit(1);
        });
        if let Err(e) = db::migrate(&db_pool).await {
            eprintln!("error running migrations: {}", e);
            exit(1);
        }

        let redis_pool = cfg.connect_redis().await.unwrap_or_else(|e| {
            eprintln!("error connecting to redis: {}", e);
            exit(1);
        });
        let redis_client = cfg.redis_client().unwrap_or_else(|e| {
            eprintln!("error connecting to redis: {}", e);
            exit(1);
        });

        let forms = Arc::new(PgFormStore::new(db_pool));
        let presence = Arc::new(RedisPresenceStore::new(redis_pool.clone(), cfg.presence_ttl));
        let bus = Arc::new(RedisEventBus::new(redis_pool, redis_client));

        let state = AppState::new(cfg.clone(), forms, presence, bus).unwrap_or_else(|e| {
            eprintln!("error loading templates: {}", e);
            exit(1);
        });
        match &state.allow_list {
            Ok(allow_list) => {
                tracing::info!("allowing {} client addresses", allow_list.ips().len())
            }
            Err(e) => {
                tracing::error!("allow-list is unusable, every request will get 503: {}", e)
            }
        }

        if let Err(e) = App::new(state).serve().await {
            tracing::error!("server error: {}", e);
            exit(1);
        }
    });
}
