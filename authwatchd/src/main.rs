mod config;
mod net;

use std::{net::SocketAddr, process::ExitCode, sync::Arc};

use authwatch::{
	action::{self, Dispatcher, Notifier},
	cache::{CacheError, RedisCache},
	reputation::{DnsResolver, Reputation, VerifyError},
	Checker,
};
use config::{Config, ConfigError};
use thiserror::Error;
use tokio::{
	io,
	net::TcpListener,
	signal::unix::{signal, SignalKind},
	sync::watch,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
	// Logging isn't up until we know the filter, so config errors go straight to stderr
	let config = match Config::get() {
		Ok(Some(config)) => config,
		Ok(None) => return ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("{}", StartupError::Config(err));
			return ExitCode::from(1);
		}
	};

	init_logging(config.log_level.as_deref());

	match run(config).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			error!("{}", err);
			ExitCode::from(err.exit_code())
		}
	}
}

fn init_logging(level: Option<&str>) {
	let filter = match level {
		Some(level) => EnvFilter::new(level),
		None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
	};

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.init();
}

async fn run(config: Config) -> Result<(), StartupError> {
	let resolver = Arc::new(DnsResolver::from_system_conf(config.dns_timeout));
	let reputation = Reputation::new(resolver, config.api_key.as_str(), config.dns_timeout);

	if config.skip_key_check {
		warn!("skipping API key check");
	} else {
		reputation.verify_key(&config.zones.client).await?;
		info!(zone = %config.zones.client, "API key accepted");
	}

	let cache = RedisCache::connect(&config.redis).await?;
	info!(
		host = %config.redis.host,
		port = config.redis.port,
		set = %config.redis.set,
		"connected to redis"
	);

	let address = config.socket_address();
	let listener = TcpListener::bind(address)
		.await
		.map_err(|source| StartupError::Bind { address, source })?;

	info!(
		address = %address,
		action = %config.mode,
		zone = %config.zones.client,
		recipient_zone = %config.zones.recipient,
		"listening for policy requests"
	);

	let (notifier, notifications) = Notifier::channel();
	let checker = Arc::new(Checker::new(
		Arc::new(cache),
		reputation,
		config.zones,
		Dispatcher::new(config.mode, notifier),
	));

	// The notification queue closes once the listener drops the last checker
	let notify_task = tokio::spawn(action::run_notifications(notifications, config.command));

	let (tx, rx) = watch::channel(false);
	let listen_task = tokio::spawn(net::listen(listener, checker, rx));

	shutdown_signal().await?;
	info!("received shutdown signal, beginning graceful shutdown");

	// Connections may all be closed already; a failed send is fine
	let _ = tx.send(true);
	let (listened, notified) = tokio::join!(listen_task, notify_task);
	for result in [listened, notified] {
		if let Err(err) = result {
			warn!(error = %err, "task ended abnormally");
		}
	}

	info!("shutdown complete");
	Ok(())
}

async fn shutdown_signal() -> Result<(), StartupError> {
	let mut terminate = signal(SignalKind::terminate()).map_err(StartupError::Signal)?;
	let mut hangup = signal(SignalKind::hangup()).map_err(StartupError::Signal)?;
	let mut quit = signal(SignalKind::quit()).map_err(StartupError::Signal)?;

	tokio::select! {
		result = tokio::signal::ctrl_c() => result.map_err(StartupError::Signal)?,
		_ = terminate.recv() => (),
		_ = hangup.recv() => (),
		_ = quit.recv() => (),
	};

	Ok(())
}

#[derive(Debug, Error)]
enum StartupError {
	#[error("{0}")]
	Config(#[from] ConfigError),
	#[error("test lookup failed, check your API key: {0}")]
	ApiKey(#[from] VerifyError),
	#[error("failed to connect to redis: {0}")]
	Cache(#[from] CacheError),
	#[error("failed to listen on {address}: {source}")]
	Bind { address: SocketAddr, source: io::Error },
	#[error("failed to install signal handler: {0}")]
	Signal(io::Error),
}

impl StartupError {
	fn exit_code(&self) -> u8 {
		match self {
			Self::Bind { .. } => 2,
			_ => 1,
		}
	}
}
