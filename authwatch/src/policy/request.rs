use std::collections::HashMap;

const SASL_METHOD: &str = "sasl_method";
const SASL_USERNAME: &str = "sasl_username";
const CLIENT_ADDRESS: &str = "client_address";
const RECIPIENT: &str = "recipient";
const INSTANCE: &str = "instance";

/// The attributes of one policy request. Later values for a name replace earlier ones.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct Request {
	attributes: HashMap<String, String>,
}

impl Request {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record one attribute line. The name ends at the first `=`; a line
	/// without one is kept whole as the name with an empty value.
	pub fn push_line(&mut self, line: &str) {
		let (name, value) = line.split_once('=').unwrap_or((line, ""));
		self.insert(name, value);
	}

	pub fn insert<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
		self.attributes.insert(name.into(), value.into());
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self.attributes.get(name).map(String::as_str)
	}

	/// Like [Request::get], but treats an empty value as missing. Postfix sends
	/// every attribute it knows about, so unset ones arrive as `name=`.
	pub fn get_nonempty(&self, name: &str) -> Option<&str> {
		self.get(name).filter(|value| !value.is_empty())
	}

	pub fn is_empty(&self) -> bool {
		self.attributes.is_empty()
	}

	pub fn len(&self) -> usize {
		self.attributes.len()
	}

	pub fn clear(&mut self) {
		self.attributes.clear();
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.attributes
			.iter()
			.map(|(name, value)| (name.as_str(), value.as_str()))
	}

	/// True when the session authenticated with SASL, i.e. both the method and
	/// the username are present and non-empty.
	pub fn is_authenticated(&self) -> bool {
		self.sasl_method().is_some() && self.username().is_some()
	}

	pub fn sasl_method(&self) -> Option<&str> {
		self.get_nonempty(SASL_METHOD)
	}

	pub fn username(&self) -> Option<&str> {
		self.get_nonempty(SASL_USERNAME)
	}

	pub fn client_address(&self) -> Option<&str> {
		self.get_nonempty(CLIENT_ADDRESS)
	}

	pub fn recipient(&self) -> Option<&str> {
		self.get_nonempty(RECIPIENT)
	}

	pub fn instance(&self) -> Option<&str> {
		self.get_nonempty(INSTANCE)
	}

	/// Usernames are case-insensitive. The lowercased form is stored back so
	/// everything downstream, the notification included, sees the same value.
	pub fn normalize_username(&mut self) {
		if let Some(username) = self.attributes.get_mut(SASL_USERNAME) {
			*username = username.to_lowercase();
		}
	}
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Request {
	fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
		let mut request = Request::new();
		for (name, value) in iter {
			request.insert(name, value);
		}
		request
	}
}
