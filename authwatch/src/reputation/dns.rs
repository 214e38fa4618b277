use std::{net::Ipv4Addr, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{
	config::{ResolverConfig, ResolverOpts},
	error::{ResolveError, ResolveErrorKind},
	proto::op::ResponseCode,
	system_conf, TokioAsyncResolver,
};
use thiserror::Error;
use tracing::warn;

/// Forward A record lookups. Implemented by [DnsResolver] for real traffic and
/// by scripted resolvers in tests.
#[async_trait]
pub trait Resolve: Send + Sync {
	async fn ipv4_lookup(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError>;
}

pub struct DnsResolver {
	resolver: TokioAsyncResolver,
}

impl DnsResolver {
	/// Use the nameservers from the system configuration, falling back to the
	/// resolver library's defaults if it can't be read.
	pub fn from_system_conf(timeout: Duration) -> Self {
		let (config, mut opts) = match system_conf::read_system_conf() {
			Ok(conf) => conf,
			Err(err) => {
				warn!(error = %err, "failed to read system resolver configuration, using defaults");
				(ResolverConfig::default(), ResolverOpts::default())
			}
		};
		opts.timeout = timeout;

		Self {
			resolver: TokioAsyncResolver::tokio(config, opts),
		}
	}
}

#[async_trait]
impl Resolve for DnsResolver {
	async fn ipv4_lookup(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
		let lookup = self.resolver.ipv4_lookup(name).await?;
		Ok(lookup.iter().map(|a| a.0).collect())
	}
}

#[derive(Debug, Error)]
pub enum DnsError {
	#[error("name does not exist")]
	NotFound,
	#[error("name has no A records")]
	NoData,
	#[error("lookup timed out")]
	Timeout,
	#[error("failed to resolve name: {0}")]
	Resolve(ResolveError),
}

impl DnsError {
	/// NXDOMAIN and NODATA both mean there is nothing listed under the name.
	pub fn is_negative(&self) -> bool {
		matches!(self, DnsError::NotFound | DnsError::NoData)
	}
}

impl From<ResolveError> for DnsError {
	fn from(err: ResolveError) -> Self {
		match err.kind() {
			ResolveErrorKind::NoRecordsFound {
				response_code: ResponseCode::NXDomain,
				..
			} => return DnsError::NotFound,
			ResolveErrorKind::NoRecordsFound {
				response_code: ResponseCode::NoError,
				..
			} => return DnsError::NoData,
			ResolveErrorKind::Timeout => return DnsError::Timeout,
			_ => (),
		}

		DnsError::Resolve(err)
	}
}
