//! The Postfix policy delegation protocol: attribute requests in, verdicts out.

mod request;
mod session;
mod verdict;

pub use request::Request;
pub use session::Session;
pub use verdict::Verdict;
