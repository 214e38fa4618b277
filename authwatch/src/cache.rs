//! The shared set of accounts already confirmed compromised.

use std::{collections::HashSet, sync::Mutex};

use async_trait::async_trait;
use redis::{
	aio::ConnectionManager, AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo,
	RedisError,
};
use thiserror::Error;

pub const DEFAULT_SET: &str = "compromised_accts";

/// Members are only ever added. Adding a member twice is not an error.
#[async_trait]
pub trait DecisionCache: Send + Sync {
	async fn is_member(&self, username: &str) -> Result<bool, CacheError>;

	async fn add(&self, username: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Error)]
pub enum CacheError {
	#[error("cache store error: {0}")]
	Redis(#[from] RedisError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RedisSettings {
	pub host: String,
	pub port: u16,
	pub database: i64,
	pub username: Option<String>,
	pub password: Option<String>,
	/// Key of the set holding compromised usernames.
	pub set: String,
}

impl Default for RedisSettings {
	fn default() -> Self {
		Self {
			host: String::from("127.0.0.1"),
			port: 6379,
			database: 0,
			username: None,
			password: None,
			set: String::from(DEFAULT_SET),
		}
	}
}

impl RedisSettings {
	fn connection_info(&self) -> ConnectionInfo {
		ConnectionInfo {
			addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
			redis: RedisConnectionInfo {
				db: self.database,
				username: self.username.clone(),
				password: self.password.clone(),
				..Default::default()
			},
		}
	}
}

/// A Redis set shared by every daemon using the same server. The connection
/// manager reconnects on its own after the server goes away.
#[derive(Clone)]
pub struct RedisCache {
	connection: ConnectionManager,
	set: String,
}

impl RedisCache {
	/// Connect to the server. Fails if it can't be reached right now.
	pub async fn connect(settings: &RedisSettings) -> Result<Self, CacheError> {
		let client = redis::Client::open(settings.connection_info())?;
		let connection = ConnectionManager::new(client).await?;

		Ok(Self {
			connection,
			set: settings.set.clone(),
		})
	}
}

#[async_trait]
impl DecisionCache for RedisCache {
	async fn is_member(&self, username: &str) -> Result<bool, CacheError> {
		let mut connection = self.connection.clone();
		Ok(connection.sismember(&self.set, username).await?)
	}

	async fn add(&self, username: &str) -> Result<(), CacheError> {
		let mut connection = self.connection.clone();
		connection.sadd::<_, _, ()>(&self.set, username).await?;
		Ok(())
	}
}

/// A set that lives and dies with the process.
#[derive(Default)]
pub struct MemoryCache {
	members: Mutex<HashSet<String>>,
}

impl MemoryCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.members.lock().map(|members| members.len()).unwrap_or(0)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn contains(&self, username: &str) -> bool {
		self.members
			.lock()
			.map(|members| members.contains(username))
			.unwrap_or(false)
	}
}

#[async_trait]
impl DecisionCache for MemoryCache {
	async fn is_member(&self, username: &str) -> Result<bool, CacheError> {
		Ok(self.contains(username))
	}

	async fn add(&self, username: &str) -> Result<(), CacheError> {
		if let Ok(mut members) = self.members.lock() {
			members.insert(username.to_owned());
		}
		Ok(())
	}
}
