use std::{sync::Arc, time::Duration};

use authwatch::{policy::Session, Checker};
use tokio::{
	io::{self, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
	net::TcpListener,
	sync::watch,
	task::JoinSet,
	time::{sleep_until, Instant},
};
use tracing::{debug, warn};

/// Longest attribute line accepted, newline included.
const MAX_LINE: usize = 8192;

/// How long a client in the middle of a request gets to finish it once
/// shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

//runs as long as the client remains connected
// reads lines off the socket into the session, answers each finished request before reading the next.
pub async fn serve<S>(
	stream: S,
	checker: Arc<Checker>,
	mut rx: watch::Receiver<bool>,
) -> io::Result<()>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let mut stream = BufReader::new(stream);
	let mut session = Session::new();
	let mut line = Vec::with_capacity(256);
	// Set once shutdown has started
	let mut deadline: Option<Instant> = None;

	loop {
		// A cancelled read leaves what it got in `line`, so keep the limit relative to that
		let mut reader = (&mut stream).take(MAX_LINE.saturating_sub(line.len()) as u64);
		let grace = async move {
			match deadline {
				Some(deadline) => sleep_until(deadline).await,
				None => std::future::pending().await,
			}
		};

		tokio::select! {
			read = reader.read_until(b'\n', &mut line) => {
				read?;
			}
			Ok(()) = rx.changed(), if deadline.is_none() => {
				if !session.is_collecting() && line.is_empty() {
					return Ok(());
				}
				debug!("shutting down, waiting for the client to finish its request");
				deadline = Some(Instant::now() + SHUTDOWN_GRACE);
				continue;
			}
			_ = grace => {
				debug!("client did not finish its request before shutdown, dropping it");
				return Ok(());
			}
		};

		if line.last() != Some(&b'\n') {
			if line.len() >= MAX_LINE {
				return Err(io::Error::new(io::ErrorKind::InvalidData, "policy line too long"));
			}

			// End of stream, this connection has been closed by the client
			if session.is_collecting() || !line.is_empty() {
				debug!("client closed connection in the middle of a request");
			}
			return Ok(());
		}

		let finished = session.push_line(&String::from_utf8_lossy(&line));
		line.clear();

		if let Some(request) = finished {
			let verdict = checker.check(request).await;
			debug!(verdict = %verdict, "answering request");
			stream.write_all(verdict.as_string().as_bytes()).await?;
			stream.flush().await?;

			if deadline.is_some() {
				return Ok(());
			}
		}
	}
}

//waits for new connections, dispatches new task to handle each new inbound connection.
// Returns once shutdown is signalled and every open connection has finished.
pub async fn listen(listener: TcpListener, checker: Arc<Checker>, mut rx: watch::Receiver<bool>) {
	let mut connections = JoinSet::new();

	loop {
		let (stream, clientaddr) = tokio::select! {
			_ = rx.changed() => break,
			Some(_) = connections.join_next() => continue,
			accepted = listener.accept() => match accepted {
				Ok(accepted) => accepted,
				Err(err) => {
					warn!(error = %err, "failed to accept connection");
					continue;
				}
			},
		};

		debug!(client = %clientaddr, "client connected");

		let checker = checker.clone();
		let rx = rx.clone();
		connections.spawn(async move {
			match serve(stream, checker, rx).await {
				Ok(()) => debug!(client = %clientaddr, "client disconnected"),
				Err(err) => debug!(client = %clientaddr, error = %err, "client error"),
			}
		});
	}

	while connections.join_next().await.is_some() {}
}
