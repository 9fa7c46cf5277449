//! ohdsrv - overheight detection field agent

use clap::Parser;
use common::wait_for_shutdown;
use errors::OhdResult;
use tracing::{error, info, warn};

use ohdsrv::bootstrap::{self, Args};
use ohdsrv::config::{ConfigSource, DeviceConfigFile, ServiceSettings};
use ohdsrv::poller::DiPoller;
use ohdsrv::store::FileEventStore;
use ohdsrv::{Agent, AdminHandle, Reactor};

fn main() -> OhdResult<()> {
    let args = Args::parse();
    args.check_home()?;

    // One thread: polling and network I/O interleave on a single reactor
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> OhdResult<()> {
    let log_guard = bootstrap::initialize_logging(&args)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        home = %args.home.display(),
        "Starting ohdsrv"
    );

    let settings = ServiceSettings::load(args.settings_path().as_deref())?;

    let source = DeviceConfigFile::new(args.config_path(), &args.home);
    let generation = source.load().map_err(|e| {
        error!("Cannot load device configuration: {}", e);
        errors::startup_error!("{}", e)
    })?;
    log_guard.set_max_dir_bytes(generation.settings.log_file_limit);

    let port = bootstrap::resolve_port(&generation.settings);
    let listener = bootstrap::bind_listener(&settings.bind_host, port).await?;

    let poller = DiPoller::new(bootstrap::create_driver(&settings), settings.di_slot);
    poller.prepare();

    let agent = Agent::new(generation, FileEventStore);
    agent.dump_state();

    let (reactor, admin) = Reactor::new(
        listener,
        agent,
        poller,
        Box::new(source),
        settings.io_timeout(),
    );
    let mut reactor = reactor.with_verbose(args.verbose);
    let log_limit = log_guard.limit_handle();
    reactor.on_settings_change(move |agent_settings| {
        let limit = agent_settings.log_file_limit;
        if log_limit.get() != limit {
            info!(bytes = limit, "Log directory limit changed");
            log_limit.set(limit);
        }
    });

    spawn_control_socket(&settings, &admin);

    reactor
        .run(async {
            let signal = wait_for_shutdown().await;
            info!(signal, "Shutdown signal received");
        })
        .await?;

    drop(admin);
    info!("ohdsrv stopped");
    Ok(())
}

#[cfg(unix)]
fn spawn_control_socket(settings: &ServiceSettings, admin: &AdminHandle) {
    let Some(path) = settings.control_socket.clone() else {
        return;
    };
    let handle = admin.clone();
    tokio::spawn(async move {
        if let Err(e) = ohdsrv::control::serve_control_socket(path, handle).await {
            warn!("Control socket stopped: {}", e);
        }
    });
}

#[cfg(not(unix))]
fn spawn_control_socket(settings: &ServiceSettings, _admin: &AdminHandle) {
    if settings.control_socket.is_some() {
        warn!("Control socket is only supported on Unix");
    }
}
