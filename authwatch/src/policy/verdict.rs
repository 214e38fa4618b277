use std::fmt;

/// The action returned to Postfix for one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
	Reject,
	Hold,
	/// Neither accept nor reject; Postfix moves on to its next restriction.
	Dunno,
}

impl Verdict {
	pub fn token(&self) -> &'static str {
		match self {
			Verdict::Reject => "REJECT",
			Verdict::Hold => "HOLD",
			Verdict::Dunno => "DUNNO",
		}
	}

	/// The full reply, terminated by the blank line that ends a policy response.
	pub fn as_string(&self) -> String {
		format!("action={}\n\n", self.token())
	}
}

impl fmt::Display for Verdict {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.token())
	}
}
