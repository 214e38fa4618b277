//! The decision made for each complete request.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
	action::Dispatcher,
	cache::DecisionCache,
	policy::{Request, Verdict},
	reputation::{Lookup, LookupError, Reputation, DEFAULT_RECIPIENT_ZONE, DEFAULT_ZONE},
};

#[derive(Clone, Debug, PartialEq)]
pub struct Zones {
	/// Queried with the client address.
	pub client: String,
	/// Queried with the recipient address.
	pub recipient: String,
}

impl Default for Zones {
	fn default() -> Self {
		Self {
			client: String::from(DEFAULT_ZONE),
			recipient: String::from(DEFAULT_RECIPIENT_ZONE),
		}
	}
}

pub struct Checker {
	cache: Arc<dyn DecisionCache>,
	reputation: Reputation,
	zones: Zones,
	dispatcher: Dispatcher,
}

impl Checker {
	pub fn new(
		cache: Arc<dyn DecisionCache>,
		reputation: Reputation,
		zones: Zones,
		dispatcher: Dispatcher,
	) -> Self {
		Self {
			cache,
			reputation,
			zones,
			dispatcher,
		}
	}

	/// Decide on one request. Errors from the cache or the reputation service
	/// never reach the caller; at worst the request gets [Verdict::Dunno].
	pub async fn check(&self, mut request: Request) -> Verdict {
		debug!(attributes = ?request, "received attributes");

		// Only authenticated sessions can have compromised credentials
		if !request.is_authenticated() {
			debug!(
				instance = request.instance().unwrap_or("-"),
				ip = request.client_address().unwrap_or("-"),
				"skipping as non-authenticated connection"
			);
			return Verdict::Dunno;
		}

		request.normalize_username();
		let Some(username) = request.username().map(str::to_owned) else {
			return Verdict::Dunno;
		};

		let cached = match self.cache.is_member(&username).await {
			Ok(cached) => cached,
			Err(err) => {
				warn!(
					instance = request.instance().unwrap_or("-"),
					username = %username,
					error = %err,
					"cache lookup failed, checking reputation instead"
				);
				false
			}
		};

		if cached {
			info!(
				instance = request.instance().unwrap_or("-"),
				ip = request.client_address().unwrap_or("-"),
				username = %username,
				"found in cache database"
			);
			return self.dispatcher.decide(&request);
		}

		if !self.is_listed(&request).await {
			return Verdict::Dunno;
		}

		if let Err(err) = self.cache.add(&username).await {
			warn!(
				instance = request.instance().unwrap_or("-"),
				username = %username,
				error = %err,
				"failed to add account to cache"
			);
		}

		info!(
			instance = request.instance().unwrap_or("-"),
			ip = request.client_address().unwrap_or("-"),
			username = %username,
			"found new compromised account!"
		);

		let verdict = self.dispatcher.decide(&request);
		self.dispatcher.notify(request);
		verdict
	}

	/// Ask about the client address, then the recipient. Stops at the first hit.
	async fn is_listed(&self, request: &Request) -> bool {
		if let Some(address) = request.client_address() {
			if self.lookup(request, address, &self.zones.client).await {
				return true;
			}
		}

		if let Some(recipient) = request.recipient() {
			let recipient = recipient.to_lowercase();
			if self.lookup(request, &recipient, &self.zones.recipient).await {
				return true;
			}
		}

		false
	}

	async fn lookup(&self, request: &Request, item: &str, zone: &str) -> bool {
		match self.reputation.lookup(item, zone).await {
			Lookup::Listed(_) => true,
			Lookup::NotListed => false,
			Lookup::Error(err @ LookupError::UnexpectedAnswer(_)) => {
				warn!(
					instance = request.instance().unwrap_or("-"),
					item,
					zone,
					error = %err,
					"reputation service misbehaving"
				);
				false
			}
			Lookup::Error(err) => {
				debug!(
					instance = request.instance().unwrap_or("-"),
					item,
					zone,
					error = %err,
					"dns lookup error"
				);
				false
			}
		}
	}
}

#[cfg(test)]
mod test {
	use std::{net::Ipv4Addr, time::Duration};

	use tokio::sync::mpsc::UnboundedReceiver;

	use super::*;
	use crate::{
		action::{Mode, Notifier},
		cache::MemoryCache,
		test_support::{Answer, ScriptedResolver, UnreachableCache},
	};

	const CLIENT_QUERY: &str = "7.2.0.192.K.authbl.test.";

	struct Harness {
		checker: Checker,
		cache: Arc<MemoryCache>,
		resolver: Arc<ScriptedResolver>,
		notifications: UnboundedReceiver<Request>,
	}

	impl Harness {
		fn new(mode: Mode) -> Self {
			Self::with_cache(mode, Arc::new(MemoryCache::new()))
		}

		fn with_cache(mode: Mode, cache: Arc<MemoryCache>) -> Self {
			let resolver = Arc::new(ScriptedResolver::new());
			let (notifier, notifications) = Notifier::channel();
			let checker = Checker::new(
				cache.clone(),
				Reputation::new(resolver.clone(), "K", Duration::from_millis(200)),
				Zones {
					client: String::from("authbl.test"),
					recipient: String::from("rcpt.test"),
				},
				Dispatcher::new(mode, notifier),
			);

			Self {
				checker,
				cache,
				resolver,
				notifications,
			}
		}

		fn recipient_query(recipient: &str) -> String {
			Reputation::new(Arc::new(ScriptedResolver::new()), "K", Duration::ZERO)
				.query_name(recipient, "rcpt.test")
		}

		fn notification_count(&mut self) -> usize {
			let mut count = 0;
			while self.notifications.try_recv().is_ok() {
				count += 1;
			}
			count
		}
	}

	fn authenticated() -> Request {
		[
			("request", "smtpd_access_policy"),
			("instance", "1a2b.5f3e2d1c.0"),
			("sasl_method", "PLAIN"),
			("sasl_username", "Bob@Example.com"),
			("client_address", "192.0.2.7"),
			("recipient", "Victim@Example.org"),
		]
		.into_iter()
		.collect()
	}

	#[tokio::test]
	async fn unauthenticated_passes_without_lookups() {
		let mut harness = Harness::new(Mode::Reject);
		let request: Request = [("client_address", "192.0.2.7"), ("sasl_method", "")]
			.into_iter()
			.collect();

		assert_eq!(harness.checker.check(request).await, Verdict::Dunno);
		assert!(harness.resolver.queries().is_empty());
		assert_eq!(harness.notification_count(), 0);
	}

	#[tokio::test]
	async fn cached_account_skips_dns() {
		let cache = Arc::new(MemoryCache::new());
		cache.add("bob@example.com").await.unwrap();
		let mut harness = Harness::with_cache(Mode::Reject, cache);

		assert_eq!(harness.checker.check(authenticated()).await, Verdict::Reject);
		assert!(harness.resolver.queries().is_empty());
		assert_eq!(harness.notification_count(), 0);
	}

	#[tokio::test]
	async fn listed_client_confirms_account() {
		let mut harness = Harness::new(Mode::Hold);
		harness.resolver.answer(CLIENT_QUERY, Answer::Listed(2));

		assert_eq!(harness.checker.check(authenticated()).await, Verdict::Hold);

		// Recipient never asked about
		assert_eq!(harness.resolver.queries(), vec![CLIENT_QUERY]);
		assert!(harness.cache.is_member("bob@example.com").await.unwrap());
		assert_eq!(harness.cache.len(), 1);

		let notification = harness.notifications.try_recv().unwrap();
		assert_eq!(notification.username(), Some("bob@example.com"));
		assert_eq!(notification.recipient(), Some("Victim@Example.org"));
		assert_eq!(harness.notification_count(), 0);
	}

	#[tokio::test]
	async fn listed_recipient_confirms_account() {
		let mut harness = Harness::new(Mode::Reject);
		let recipient_query = Harness::recipient_query("victim@example.org");
		harness.resolver.answer(&recipient_query, Answer::Listed(3));

		assert_eq!(harness.checker.check(authenticated()).await, Verdict::Reject);
		assert_eq!(
			harness.resolver.queries(),
			vec![CLIENT_QUERY.to_owned(), recipient_query]
		);
		assert_eq!(harness.notification_count(), 1);
	}

	#[tokio::test]
	async fn nothing_listed_passes() {
		let mut harness = Harness::new(Mode::Reject);

		assert_eq!(harness.checker.check(authenticated()).await, Verdict::Dunno);
		assert_eq!(harness.resolver.queries().len(), 2);
		assert!(harness.cache.is_empty());
		assert_eq!(harness.notification_count(), 0);
	}

	#[tokio::test]
	async fn second_sighting_uses_cache() {
		let mut harness = Harness::new(Mode::Reject);
		harness.resolver.answer(CLIENT_QUERY, Answer::Listed(2));

		assert_eq!(harness.checker.check(authenticated()).await, Verdict::Reject);
		assert_eq!(harness.checker.check(authenticated()).await, Verdict::Reject);

		assert_eq!(harness.resolver.queries().len(), 1);
		assert_eq!(harness.notification_count(), 1);
	}

	#[tokio::test]
	async fn log_mode_still_records() {
		let mut harness = Harness::new(Mode::Log);
		harness.resolver.answer(CLIENT_QUERY, Answer::Listed(2));

		assert_eq!(harness.checker.check(authenticated()).await, Verdict::Dunno);
		assert_eq!(harness.cache.len(), 1);
		assert_eq!(harness.notification_count(), 1);
	}

	#[tokio::test]
	async fn dns_errors_move_on_to_recipient() {
		let mut harness = Harness::new(Mode::Reject);
		let recipient_query = Harness::recipient_query("victim@example.org");
		harness.resolver.answer(CLIENT_QUERY, Answer::ServFail);
		harness.resolver.answer(&recipient_query, Answer::Listed(2));

		assert_eq!(harness.checker.check(authenticated()).await, Verdict::Reject);
		assert_eq!(harness.notification_count(), 1);
	}

	#[tokio::test]
	async fn anomalous_answer_is_never_listed() {
		let mut harness = Harness::new(Mode::Reject);
		harness.resolver.answer(
			CLIENT_QUERY,
			Answer::Addresses(vec![Ipv4Addr::new(203, 0, 113, 5)]),
		);

		assert_eq!(harness.checker.check(authenticated()).await, Verdict::Dunno);
		assert!(harness.cache.is_empty());
		assert_eq!(harness.notification_count(), 0);
	}

	#[tokio::test]
	async fn timeouts_do_not_hang_the_request() {
		let mut harness = Harness::new(Mode::Reject);
		let recipient_query = Harness::recipient_query("victim@example.org");
		harness.resolver.answer(CLIENT_QUERY, Answer::Hang);
		harness.resolver.answer(&recipient_query, Answer::Hang);

		assert_eq!(harness.checker.check(authenticated()).await, Verdict::Dunno);
		assert_eq!(harness.notification_count(), 0);
	}

	#[tokio::test]
	async fn unreachable_cache_falls_back_to_dns() {
		let resolver = Arc::new(ScriptedResolver::new());
		resolver.answer(CLIENT_QUERY, Answer::Listed(2));
		let (notifier, mut notifications) = Notifier::channel();
		let checker = Checker::new(
			Arc::new(UnreachableCache),
			Reputation::new(resolver.clone(), "K", Duration::from_millis(200)),
			Zones {
				client: String::from("authbl.test"),
				recipient: String::from("rcpt.test"),
			},
			Dispatcher::new(Mode::Reject, notifier),
		);

		assert_eq!(checker.check(authenticated()).await, Verdict::Reject);
		assert_eq!(resolver.queries(), vec![CLIENT_QUERY]);
		assert!(notifications.try_recv().is_ok());
	}

	#[tokio::test]
	async fn missing_addresses_are_skipped() {
		let mut harness = Harness::new(Mode::Reject);
		let request: Request = [("sasl_method", "LOGIN"), ("sasl_username", "bob")]
			.into_iter()
			.collect();

		assert_eq!(harness.checker.check(request).await, Verdict::Dunno);
		assert!(harness.resolver.queries().is_empty());
		assert_eq!(harness.notification_count(), 0);
	}
}
