//! What to do once an account is confirmed compromised.

use std::{convert::Infallible, fmt, process::Output, str::FromStr};

use tokio::{
	process::Command,
	sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use tracing::{debug, info, warn};

use crate::policy::{Request, Verdict};

/// The configured response to a compromised account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
	Reject,
	Hold,
	/// Only log and notify. Mail is let through.
	Log,
	/// A mode we don't know. Treated like [Mode::Log], with a warning.
	Unknown(String),
}

impl FromStr for Mode {
	type Err = Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s.to_lowercase().as_str() {
			"reject" => Mode::Reject,
			"hold" => Mode::Hold,
			"log" => Mode::Log,
			_ => Mode::Unknown(s.to_owned()),
		})
	}
}

impl fmt::Display for Mode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Mode::Reject => write!(f, "reject"),
			Mode::Hold => write!(f, "hold"),
			Mode::Log => write!(f, "log"),
			Mode::Unknown(mode) => write!(f, "{}", mode),
		}
	}
}

impl Default for Mode {
	fn default() -> Self {
		Mode::Log
	}
}

pub struct Dispatcher {
	mode: Mode,
	notifier: Notifier,
}

impl Dispatcher {
	pub fn new(mode: Mode, notifier: Notifier) -> Self {
		Self { mode, notifier }
	}

	/// Pick the verdict for a request whose account is compromised.
	pub fn decide(&self, request: &Request) -> Verdict {
		match &self.mode {
			Mode::Reject => Verdict::Reject,
			Mode::Hold => Verdict::Hold,
			Mode::Log => Verdict::Dunno,
			Mode::Unknown(mode) => {
				warn!(
					instance = request.instance().unwrap_or("-"),
					ip = request.client_address().unwrap_or("-"),
					username = request.username().unwrap_or("-"),
					"unknown action {}; logging only!",
					mode
				);
				Verdict::Dunno
			}
		}
	}

	/// Hand the request to the notifier. Returns immediately.
	pub fn notify(&self, request: Request) {
		self.notifier.notify(request)
	}
}

/// Sending half of the notification queue. Cheap to clone.
#[derive(Clone)]
pub struct Notifier {
	sender: UnboundedSender<Request>,
}

impl Notifier {
	pub fn channel() -> (Self, UnboundedReceiver<Request>) {
		let (sender, receiver) = mpsc::unbounded_channel();
		(Self { sender }, receiver)
	}

	pub fn notify(&self, request: Request) {
		if self.sender.send(request).is_err() {
			warn!("notification queue is closed; dropping notification");
		}
	}
}

/// Drain the notification queue until every [Notifier] is dropped. Each request
/// runs `command` in its own task so a slow command never holds up the next one.
pub async fn run_notifications(mut receiver: UnboundedReceiver<Request>, command: Option<String>) {
	while let Some(request) = receiver.recv().await {
		match &command {
			Some(command) => {
				tokio::spawn(notify_command(command.clone(), request));
			}
			None => debug!(
				instance = request.instance().unwrap_or("-"),
				username = request.username().unwrap_or("-"),
				"no command configured, nothing to notify"
			),
		}
	}
}

async fn notify_command(command: String, request: Request) {
	let instance = request.instance().unwrap_or("-").to_owned();

	match run_command(&command, &request).await {
		Err(err) => {
			warn!(instance = %instance, error = %err, "command \"{}\" failed to start", command)
		}
		Ok(output) => {
			let stdout = String::from_utf8_lossy(&output.stdout);
			let stderr = String::from_utf8_lossy(&output.stderr);

			if !output.status.success() {
				warn!(
					instance = %instance,
					status = %output.status,
					"command \"{}\" returned error: {}",
					command,
					stderr.trim()
				);
			} else if !stdout.trim().is_empty() || !stderr.trim().is_empty() {
				info!(
					instance = %instance,
					"{}: {} {}",
					command,
					stdout.trim(),
					stderr.trim()
				);
			}
		}
	}
}

/// Run `command` with the shell. The request's attributes are its whole
/// environment; nothing is inherited from the daemon.
pub async fn run_command(command: &str, request: &Request) -> std::io::Result<Output> {
	Command::new("/bin/sh")
		.arg("-c")
		.arg(command)
		.env_clear()
		.envs(request.iter())
		.kill_on_drop(true)
		.output()
		.await
}
