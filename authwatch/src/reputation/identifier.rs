use std::net::{Ipv4Addr, Ipv6Addr};

use sha1::{Digest, Sha1};

/// Something the reputation service can be asked about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identifier<'a> {
	V4(Ipv4Addr),
	V6(Ipv6Addr),
	/// Anything that isn't an IP address, usually an email address. It is
	/// looked up by its SHA-1 hash.
	Opaque(&'a str),
}

impl<'a> Identifier<'a> {
	/// Scoped IPv6 literals like `fe80::1%eth0` don't parse as addresses and are
	/// hashed as opaque. Postfix doesn't send zone IDs in `client_address`.
	pub fn classify(input: &'a str) -> Self {
		if let Ok(v4) = input.parse() {
			Identifier::V4(v4)
		} else if let Ok(v6) = input.parse() {
			Identifier::V6(v6)
		} else {
			Identifier::Opaque(input)
		}
	}

	/// The leftmost labels of the query name, before the key and zone.
	pub fn label(&self) -> String {
		match self {
			Identifier::V4(ip) => {
				let [a, b, c, d] = ip.octets();
				format!("{}.{}.{}.{}", d, c, b, a)
			}
			Identifier::V6(ip) => ipv6_nibbles(ip),
			Identifier::Opaque(string) => hex::encode(Sha1::digest(string.as_bytes())),
		}
	}

	/// Build the name to query: `<label>.<api_key>.<zone>.`
	pub fn query_name(&self, api_key: &str, zone: &str) -> String {
		format!("{}.{}.{}.", self.label(), api_key, zone)
	}
}

/// All 32 nibbles of the fully expanded address, least significant first and
/// separated by dots, the same shape as an `ip6.arpa` name.
fn ipv6_nibbles(ip: &Ipv6Addr) -> String {
	let digits: String = ip
		.segments()
		.iter()
		.map(|segment| format!("{:04x}", segment))
		.collect();

	let mut nibbles = String::with_capacity(digits.len() * 2);
	for digit in digits.chars().rev() {
		if !nibbles.is_empty() {
			nibbles.push('.');
		}
		nibbles.push(digit);
	}

	nibbles
}
