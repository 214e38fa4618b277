use super::Request;

/// Collects attribute lines for one connection. Holds no I/O; the caller feeds it
/// lines and gets a [Request] back each time one is complete.
#[derive(Default, Debug)]
pub struct Session {
	request: Request,
}

impl Session {
	pub fn new() -> Self {
		Self::default()
	}

	/// Push one input line, with or without its line ending.
	///
	/// A blank line ends the request if any attribute has been seen. Postfix may
	/// send a lone blank line when tearing the connection down, so a blank line
	/// with nothing collected is ignored. The session starts over empty after
	/// every completed request.
	pub fn push_line(&mut self, line: &str) -> Option<Request> {
		let line = line.strip_suffix('\n').unwrap_or(line);
		let line = line.strip_suffix('\r').unwrap_or(line);

		if !line.is_empty() {
			self.request.push_line(line);
			None
		} else if self.request.is_empty() {
			None
		} else {
			Some(std::mem::take(&mut self.request))
		}
	}

	/// True while part of a request has been collected but not finished.
	pub fn is_collecting(&self) -> bool {
		!self.request.is_empty()
	}
}
