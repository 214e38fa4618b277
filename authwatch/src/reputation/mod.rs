//! Lookups against a DNS based reputation service.
//!
//! The service answers with one or more A records in `127.0.0.0/8` when an
//! identifier is listed and NXDOMAIN when it isn't. Anything else is treated as
//! a failed lookup.

use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

mod dns;
mod identifier;

pub use dns::{DnsError, DnsResolver, Resolve};
pub use identifier::Identifier;

/// Zone listing client addresses of sessions using compromised credentials.
pub const DEFAULT_ZONE: &str = "authbl.mail.abusix.zone";
/// Zone listing recipients that compromised accounts are known to send to.
pub const DEFAULT_RECIPIENT_ZONE: &str = "authbl-rcpt.mail.abusix.zone";

// The service always lists this address and answers it with 127.0.0.4, which
// lets us check the API key works before taking traffic.
const TEST_POINT: &str = "127.0.0.2";
const TEST_ANSWER: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 4);

#[derive(Debug)]
pub enum Lookup {
	/// Every answer was a return code in 127.0.0.0/8.
	Listed(Vec<Ipv4Addr>),
	NotListed,
	Error(LookupError),
}

impl Lookup {
	pub fn from_answer(answer: Result<Vec<Ipv4Addr>, DnsError>) -> Self {
		match answer {
			Ok(addresses) => {
				if let Some(unexpected) = addresses.iter().find(|addr| addr.octets()[0] != 127) {
					Lookup::Error(LookupError::UnexpectedAnswer(*unexpected))
				} else if addresses.is_empty() {
					Lookup::NotListed
				} else {
					Lookup::Listed(addresses)
				}
			}
			Err(err) if err.is_negative() => Lookup::NotListed,
			Err(err) => Lookup::Error(err.into()),
		}
	}

	pub fn is_listed(&self) -> bool {
		matches!(self, Lookup::Listed(_))
	}
}

#[derive(Debug, Error)]
pub enum LookupError {
	#[error("reputation service returned {0}, which is not a 127.0.0.0/8 return code")]
	UnexpectedAnswer(Ipv4Addr),
	#[error(transparent)]
	Dns(#[from] DnsError),
}

#[derive(Clone)]
pub struct Reputation {
	resolver: Arc<dyn Resolve>,
	api_key: String,
	timeout: Duration,
}

impl Reputation {
	pub fn new<S: Into<String>>(resolver: Arc<dyn Resolve>, api_key: S, timeout: Duration) -> Self {
		Self {
			resolver,
			api_key: api_key.into(),
			timeout,
		}
	}

	pub fn query_name(&self, identifier: &str, zone: &str) -> String {
		Identifier::classify(identifier).query_name(&self.api_key, zone)
	}

	/// Ask `zone` about `identifier`. A lookup that doesn't finish within the
	/// configured timeout is an error, not a miss.
	pub async fn lookup(&self, identifier: &str, zone: &str) -> Lookup {
		let query = self.query_name(identifier, zone);

		let answer = match timeout(self.timeout, self.resolver.ipv4_lookup(&query)).await {
			Ok(answer) => answer,
			Err(_elapsed) => Err(DnsError::Timeout),
		};

		let lookup = Lookup::from_answer(answer);
		debug!(item = identifier, query = %query, result = ?lookup, "dns lookup");
		lookup
	}

	/// Check that the API key is accepted by looking up the service's test point.
	pub async fn verify_key(&self, zone: &str) -> Result<(), VerifyError> {
		match self.lookup(TEST_POINT, zone).await {
			Lookup::Listed(answers) if answers.contains(&TEST_ANSWER) => Ok(()),
			Lookup::Listed(answers) => Err(VerifyError::WrongAnswer(answers)),
			Lookup::NotListed => Err(VerifyError::NotListed),
			Lookup::Error(err) => Err(VerifyError::Lookup(err)),
		}
	}
}

#[derive(Debug, Error)]
pub enum VerifyError {
	#[error("test point is not listed")]
	NotListed,
	#[error("invalid response from test point: {0:?}")]
	WrongAnswer(Vec<Ipv4Addr>),
	#[error("test lookup failed: {0}")]
	Lookup(#[from] LookupError),
}
