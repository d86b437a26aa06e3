//! WebRTC server binary entry point
//!
//! Serves the shared depth camera to browser viewers over WebRTC with HTTP
//! offer/answer signaling.
//!
//! # Usage
//!
//! ```bash
//! # Default: signaling on 0.0.0.0:8081
//! cargo run -p stereocast-webrtc-server
//!
//! # Custom bind address and ICE servers
//! cargo run -p stereocast-webrtc-server -- \
//!   --listen 0.0.0.0:9000 \
//!   --stun-servers stun:stun.l.google.com:19302 \
//!   --max-sessions 16
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stereocast_core::DeviceManager;
use stereocast_webrtc::{signaling, SessionManager, TransportConfig};

/// Stereocast WebRTC Server
///
/// Fans one stereo depth camera out to any number of concurrently connected
/// WebRTC viewers, each receiving labeled color and depth tracks.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Signaling listen address
    #[arg(short, long, default_value = "0.0.0.0:8081", env = "STEREOCAST_LISTEN")]
    listen: String,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "STEREOCAST_STUN_SERVERS"
    )]
    stun_servers: Vec<String>,

    /// Maximum concurrent viewer sessions
    #[arg(long, default_value_t = 32, env = "STEREOCAST_MAX_SESSIONS")]
    max_sessions: usize,

    /// Seconds to wait for graceful session teardown on shutdown
    #[arg(long, default_value_t = 10, env = "STEREOCAST_SHUTDOWN_TIMEOUT")]
    shutdown_timeout: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Ctrl+C handler before anything else, with a watchdog so a hung
    // teardown can never keep the process alive.
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);
    let watchdog_secs = args.shutdown_timeout + 5;

    ctrlc::set_handler(move || {
        eprintln!("Shutdown signal received");

        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(watchdog_secs));
            eprintln!("Graceful shutdown timeout ({watchdog_secs}s), forcing exit");
            std::process::exit(0);
        });
    })
    .expect("Failed to set Ctrl+C handler");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("stereocast-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %args.listen,
        "Stereocast WebRTC server starting"
    );

    let config = TransportConfig {
        stun_servers: args.stun_servers.clone(),
        max_sessions: args.max_sessions,
    };
    config.validate()?;

    info!(
        stun_servers = config.stun_servers.len(),
        max_sessions = config.max_sessions,
        "Transport configuration loaded"
    );

    // The capture device itself is opened lazily by the first session, so
    // the server comes up even with the camera still unplugged.
    let devices = Arc::new(DeviceManager::new());
    let manager = SessionManager::new(config, devices)?;

    let app = signaling::router(Arc::clone(&manager));
    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!("Signaling endpoint listening on {}", listener.local_addr()?);

    let shutdown_future = async move {
        while !shutdown_flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        info!("Shutdown signal received, stopping signaling endpoint");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_future)
        .await?;

    // Sessions first, shared device last; bounded so process exit is never
    // hostage to one stuck peer connection.
    info!("Signaling endpoint stopped, closing sessions");
    match tokio::time::timeout(
        Duration::from_secs(args.shutdown_timeout),
        manager.shutdown(),
    )
    .await
    {
        Ok(()) => info!("Shut down gracefully"),
        Err(_) => warn!(
            "Session teardown exceeded {}s, exiting anyway",
            args.shutdown_timeout
        ),
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
