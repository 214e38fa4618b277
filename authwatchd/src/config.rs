use std::{
	net::{IpAddr, SocketAddr},
	str::FromStr,
	time::Duration,
};

use authwatch::{action::Mode, cache::RedisSettings, Zones};
use confindent::Confindent;
use getopts::{Matches, Options};
use thiserror::Error;

const DEFAULT_CONFIG: &str = "/etc/authwatch/authwatch.conf";
const LOCAL_CONFIG: &str = "authwatch.conf";

pub struct Config {
	pub address: IpAddr,
	pub port: u16,
	pub api_key: String,
	pub mode: Mode,
	/// Shell command run once for every newly found compromised account.
	pub command: Option<String>,
	pub dns_timeout: Duration,
	pub zones: Zones,
	pub skip_key_check: bool,
	pub log_level: Option<String>,
	pub redis: RedisSettings,
}

impl Config {
	fn options() -> Options {
		let mut opts = Options::new();
		opts.optflag("h", "help", "Print this help message");
		opts.optopt(
			"l",
			"listen-address",
			"The IP address to listen for policy connections on\nDefault: 127.0.0.1",
			"IP_ADDR",
		);
		opts.optopt("p", "port", "The port to listen on\nDefault: 9998", "PORT");
		opts.optopt(
			"c",
			"config",
			&format!("An alternate location to read the config from\nDefault: {}", DEFAULT_CONFIG),
			"PATH",
		);
		opts.optopt("k", "api-key", "Reputation service API key", "KEY");
		opts.optopt(
			"a",
			"action",
			"What to do with compromised accounts: reject, hold or log\nDefault: log",
			"ACTION",
		);
		opts.optopt(
			"",
			"command",
			"Command to run for each newly found compromised account",
			"COMMAND",
		);
		opts.optopt(
			"",
			"dns-timeout",
			"Seconds to wait for a reputation lookup\nDefault: 5",
			"SECONDS",
		);
		opts.optopt("", "zone", "Zone to look up client addresses in", "ZONE");
		opts.optopt("", "recipient-zone", "Zone to look up recipients in", "ZONE");
		opts.optflag(
			"",
			"skip-key-check",
			"Don't check the API key with a test lookup at startup",
		);
		opts.optopt(
			"L",
			"log-level",
			"Log filter, e.g. debug or authwatch=trace\nDefault: $RUST_LOG or info",
			"FILTER",
		);
		opts
	}

	fn print_usage<S: AsRef<str>>(prgm: S, opts: &Options) {
		let brief = format!("Usage: {} [options]", prgm.as_ref());
		println!("{}", opts.usage(&brief));
	}

	pub fn socket_address(&self) -> SocketAddr {
		SocketAddr::new(self.address, self.port)
	}

	/// Read the command line and config file. Returns `None` when there's
	/// nothing to run, like after printing the help message.
	pub fn get() -> Result<Option<Self>, ConfigError> {
		let args: Vec<String> = std::env::args().collect();
		let opts = Self::options();
		let matches = opts.parse(args.iter().skip(1))?;

		if matches.opt_present("help") {
			Self::print_usage(args.first().map(String::as_str).unwrap_or("authwatchd"), &opts);
			return Ok(None);
		}

		let file = match matches.opt_str("config") {
			Some(path) => Confindent::from_file(&path)
				.map_err(|err| ConfigError::File(path, err.to_string()))?,
			None => match Confindent::from_file(DEFAULT_CONFIG) {
				Ok(c) => c,
				Err(_) => Confindent::from_file(LOCAL_CONFIG)
					.map_err(|err| ConfigError::File(LOCAL_CONFIG.into(), err.to_string()))?,
			},
		};

		Self::from_parts(&matches, &file).map(Some)
	}

	fn from_parts(matches: &Matches, file: &Confindent) -> Result<Self, ConfigError> {
		// Options specified on the command line take priority. We only take the
		// cli_key and convert to the config key internally so that we can remain
		// consistent.
		let find_value = |cli_key: &str| -> Option<String> {
			matches
				.opt_str(cli_key)
				.or_else(|| file.child_value(conf_key(cli_key)).map(|s| s.into()))
		};

		let address = parse_or(
			"listen-address",
			find_value("listen-address"),
			IpAddr::from([127, 0, 0, 1]),
		)?;
		let port = parse_or("port", find_value("port"), 9998)?;

		let api_key = find_value("api-key")
			.filter(|key| !key.trim().is_empty())
			.ok_or(ConfigError::MissingApiKey)?;

		let mode = match find_value("action") {
			Some(action) => parse_value("action", &action)?,
			None => Mode::default(),
		};

		let dns_timeout =
			Duration::from_secs(parse_or("dns-timeout", find_value("dns-timeout"), 5)?);

		let defaults = Zones::default();
		let zones = Zones {
			client: find_value("zone").unwrap_or(defaults.client),
			recipient: find_value("recipient-zone").unwrap_or(defaults.recipient),
		};

		let skip_key_check = matches.opt_present("skip-key-check")
			|| parse_or("skip-key-check", find_value("skip-key-check"), false)?;

		Ok(Self {
			address,
			port,
			api_key,
			mode,
			command: find_value("command").filter(|command| !command.trim().is_empty()),
			dns_timeout,
			zones,
			skip_key_check,
			log_level: find_value("log-level"),
			redis: Self::redis_settings(file)?,
		})
	}

	fn redis_settings(file: &Confindent) -> Result<RedisSettings, ConfigError> {
		let mut settings = RedisSettings::default();

		let section = match file.child("Redis") {
			None => return Ok(settings),
			Some(section) => section,
		};

		if let Some(host) = section.child_value("Host") {
			settings.host = host.into();
		}
		if let Some(port) = section.child_value("Port") {
			settings.port = parse_value("Redis Port", port)?;
		}
		if let Some(database) = section.child_value("Database") {
			settings.database = parse_value("Redis Database", database)?;
		}
		settings.username = section.child_value("Username").map(|s| s.into());
		settings.password = section.child_value("Password").map(|s| s.into());
		if let Some(set) = section.child_value("Set") {
			settings.set = set.into();
		}

		Ok(settings)
	}
}

/// `listen-address` becomes `ListenAddress`
fn conf_key(cli_key: &str) -> String {
	cli_key
		.split('-')
		.map(|word| {
			let mut c = word.chars();
			match c.next() {
				None => String::new(),
				Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
			}
		})
		.collect()
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
	value.trim().parse().map_err(|_| ConfigError::Value {
		key: key.into(),
		value: value.into(),
	})
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError> {
	match value {
		Some(value) => parse_value(key, &value),
		None => Ok(default),
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("{0}")]
	Arguments(#[from] getopts::Fail),
	#[error("failed to parse conf file {0}: {1}")]
	File(String, String),
	#[error("failed to parse '{value}' as {key}")]
	Value { key: String, value: String },
	#[error("API key is not set")]
	MissingApiKey,
}
