use std::{collections::HashMap, net::Ipv4Addr, sync::Mutex};

use async_trait::async_trait;
use redis::{ErrorKind, RedisError};

use crate::{
	cache::{CacheError, DecisionCache},
	reputation::{DnsError, Resolve},
};

pub(crate) enum Answer {
	/// Answer with 127.0.0.<code>
	Listed(u8),
	Addresses(Vec<Ipv4Addr>),
	ServFail,
	/// Never answer.
	Hang,
}

/// Answers from a fixed table and remembers every name it was asked for.
/// Names missing from the table don't exist.
#[derive(Default)]
pub(crate) struct ScriptedResolver {
	answers: Mutex<HashMap<String, Answer>>,
	queries: Mutex<Vec<String>>,
}

impl ScriptedResolver {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	pub(crate) fn answer(&self, name: &str, answer: Answer) {
		self.answers.lock().unwrap().insert(name.to_owned(), answer);
	}

	pub(crate) fn queries(&self) -> Vec<String> {
		self.queries.lock().unwrap().clone()
	}
}

#[async_trait]
impl Resolve for ScriptedResolver {
	async fn ipv4_lookup(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
		self.queries.lock().unwrap().push(name.to_owned());

		let answer = {
			let answers = self.answers.lock().unwrap();
			let answer = match answers.get(name) {
				None => Some(Err(DnsError::NotFound)),
				Some(Answer::Listed(code)) => Some(Ok(vec![Ipv4Addr::new(127, 0, 0, *code)])),
				Some(Answer::Addresses(addresses)) => Some(Ok(addresses.clone())),
				Some(Answer::ServFail) => Some(Err(DnsError::Resolve("SERVFAIL".into()))),
				Some(Answer::Hang) => None,
			};
			answer
		};

		match answer {
			Some(answer) => answer,
			None => std::future::pending().await,
		}
	}
}

/// A cache whose store can't be reached.
pub(crate) struct UnreachableCache;

impl UnreachableCache {
	fn error() -> CacheError {
		RedisError::from((ErrorKind::IoError, "connection refused")).into()
	}
}

#[async_trait]
impl DecisionCache for UnreachableCache {
	async fn is_member(&self, _username: &str) -> Result<bool, CacheError> {
		Err(Self::error())
	}

	async fn add(&self, _username: &str) -> Result<(), CacheError> {
		Err(Self::error())
	}
}
