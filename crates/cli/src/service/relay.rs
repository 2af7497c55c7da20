//! Local per-session proxy relays.
//!
//! Each relay listens on a loopback port and tunnels every accepted
//! connection to one upstream proxy, injecting the upstream's
//! credentials on the way. The browser itself is only ever handed a
//! bare `127.0.0.1:port` address and never sees the credentials.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use burrow_core::{ProxyProtocol, ProxySpec, RelayInfo};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RELAY_PORT_START: u16 = 8090;
const RELAY_PORT_SCAN: u16 = 512;

const SOCKS_VERSION: u8 = 0x05;
const SOCKS_NO_AUTH: u8 = 0x00;
const SOCKS_USER_PASS: u8 = 0x02;
const SOCKS_NO_ACCEPTABLE: u8 = 0xFF;
const AUTH_VERSION: u8 = 0x01;

/// Destination used to exercise an upstream end to end when checking
/// its health.
const PROBE_HOST: &str = "httpbin.org";
const PROBE_PORT: u16 = 80;

struct RelayHandle {
	info: RelayInfo,
	task: JoinHandle<()>,
}

/// Owns all active relays and the port counter they allocate from.
pub struct RelayManager {
	relays: Mutex<HashMap<SocketAddr, RelayHandle>>,
	next_port: AtomicU16,
}

impl Default for RelayManager {
	fn default() -> Self {
		Self::new()
	}
}

impl RelayManager {
	pub fn new() -> Self {
		Self {
			relays: Mutex::new(HashMap::new()),
			next_port: AtomicU16::new(RELAY_PORT_START),
		}
	}

	/// Binds the next free loopback port and starts forwarding to
	/// `spec`. Returns the bound local address.
	pub async fn start(&self, spec: &ProxySpec) -> Result<SocketAddr> {
		let listener = self.bind_next().await?;
		let local_addr = listener.local_addr().context("relay listener has no local address")?;

		info!(target = "burrow.relay", %local_addr, upstream = %spec, "relay started");
		let task = tokio::spawn(accept_loop(listener, spec.clone()));
		self.relays.lock().await.insert(
			local_addr,
			RelayHandle {
				info: RelayInfo {
					local_addr,
					remote: spec.to_string(),
				},
				task,
			},
		);
		Ok(local_addr)
	}

	async fn bind_next(&self) -> Result<TcpListener> {
		for _ in 0..RELAY_PORT_SCAN {
			let port = self.next_port.fetch_add(1, Ordering::Relaxed);
			match TcpListener::bind(("127.0.0.1", port)).await {
				Ok(listener) => return Ok(listener),
				Err(_) => continue,
			}
		}
		bail!("no free loopback port for relay after {RELAY_PORT_SCAN} attempts")
	}

	/// Stops the relay bound at `local_addr`.
	pub async fn stop(&self, local_addr: SocketAddr) -> Result<()> {
		match self.relays.lock().await.remove(&local_addr) {
			Some(handle) => {
				handle.task.abort();
				info!(target = "burrow.relay", %local_addr, "relay stopped");
				Ok(())
			}
			None => bail!("no relay bound at {local_addr}"),
		}
	}

	pub async fn list(&self) -> Vec<RelayInfo> {
		self.relays.lock().await.values().map(|h| h.info.clone()).collect()
	}

	/// Tears down every active relay. Used at shutdown.
	pub async fn shutdown(&self) {
		let mut relays = self.relays.lock().await;
		for (addr, handle) in relays.drain() {
			handle.task.abort();
			debug!(target = "burrow.relay", %addr, "relay stopped at shutdown");
		}
	}
}

async fn accept_loop(listener: TcpListener, spec: ProxySpec) {
	loop {
		match listener.accept().await {
			Ok((client, peer)) => {
				let spec = spec.clone();
				tokio::spawn(async move {
					if let Err(err) = handle_conn(client, &spec).await {
						debug!(target = "burrow.relay", %peer, error = %err, "relay connection ended with error");
					}
				});
			}
			Err(err) => {
				warn!(target = "burrow.relay", error = %err, "relay accept failed; stopping");
				break;
			}
		}
	}
}

async fn handle_conn(client: TcpStream, spec: &ProxySpec) -> Result<()> {
	match spec.protocol {
		ProxyProtocol::Socks5 => relay_socks5(client, spec).await,
		ProxyProtocol::Http => relay_tcp(client, spec).await,
	}
}

/// Speaks no-auth SOCKS5 with the local client, then bridges it onto
/// an authenticated upstream session. Everything after the method
/// negotiation (the CONNECT request included) is copied verbatim.
async fn relay_socks5(mut client: TcpStream, spec: &ProxySpec) -> Result<()> {
	let mut header = [0u8; 2];
	client.read_exact(&mut header).await.context("client greeting")?;
	if header[0] != SOCKS_VERSION {
		bail!("client is not speaking SOCKS5 (version {})", header[0]);
	}
	let mut methods = vec![0u8; header[1] as usize];
	client.read_exact(&mut methods).await.context("client methods")?;
	if !methods.contains(&SOCKS_NO_AUTH) {
		client.write_all(&[SOCKS_VERSION, SOCKS_NO_ACCEPTABLE]).await.ok();
		bail!("client offered no acceptable auth method");
	}
	client.write_all(&[SOCKS_VERSION, SOCKS_NO_AUTH]).await.context("method reply")?;

	let mut upstream = connect_upstream_socks5(spec).await?;
	tokio::io::copy_bidirectional(&mut client, &mut upstream).await.ok();
	Ok(())
}

/// Dials the upstream and completes its greeting, including RFC 1929
/// username/password auth when the spec carries credentials. The
/// returned stream is ready for a CONNECT request.
async fn connect_upstream_socks5(spec: &ProxySpec) -> Result<TcpStream> {
	let mut upstream = TcpStream::connect(spec.authority())
		.await
		.with_context(|| format!("failed to connect upstream {}", spec))?;

	let method = if spec.auth.is_some() { SOCKS_USER_PASS } else { SOCKS_NO_AUTH };
	upstream.write_all(&[SOCKS_VERSION, 1, method]).await.context("upstream greeting")?;

	let mut reply = [0u8; 2];
	upstream.read_exact(&mut reply).await.context("upstream method reply")?;
	if reply[0] != SOCKS_VERSION {
		bail!("upstream is not speaking SOCKS5 (version {})", reply[0]);
	}
	if reply[1] != method {
		bail!("upstream refused auth method {method:#04x} (chose {:#04x})", reply[1]);
	}

	if let Some(auth) = &spec.auth {
		let mut request = Vec::with_capacity(3 + auth.user.len() + auth.pass.len());
		request.push(AUTH_VERSION);
		request.push(auth.user.len() as u8);
		request.extend_from_slice(auth.user.as_bytes());
		request.push(auth.pass.len() as u8);
		request.extend_from_slice(auth.pass.as_bytes());
		upstream.write_all(&request).await.context("upstream auth request")?;

		let mut status = [0u8; 2];
		upstream.read_exact(&mut status).await.context("upstream auth reply")?;
		if status[0] != AUTH_VERSION || status[1] != 0 {
			bail!("upstream rejected credentials (status {})", status[1]);
		}
	}

	Ok(upstream)
}

/// HTTP upstreams need no handshake; the client's own `CONNECT`/plain
/// requests pass straight through.
async fn relay_tcp(mut client: TcpStream, spec: &ProxySpec) -> Result<()> {
	let mut upstream = TcpStream::connect(spec.authority())
		.await
		.with_context(|| format!("failed to connect upstream {}", spec))?;
	tokio::io::copy_bidirectional(&mut client, &mut upstream).await.ok();
	Ok(())
}

/// Checks an upstream end to end and reports the time taken. SOCKS5
/// upstreams are exercised through a full handshake plus a CONNECT to
/// a well-known host; HTTP upstreams by a plain TCP dial.
pub async fn probe(spec: &ProxySpec) -> Result<Duration> {
	let started = Instant::now();
	match spec.protocol {
		ProxyProtocol::Socks5 => {
			let mut upstream = connect_upstream_socks5(spec).await?;

			let mut request = Vec::with_capacity(7 + PROBE_HOST.len());
			request.extend_from_slice(&[SOCKS_VERSION, 0x01, 0x00, 0x03, PROBE_HOST.len() as u8]);
			request.extend_from_slice(PROBE_HOST.as_bytes());
			request.extend_from_slice(&PROBE_PORT.to_be_bytes());
			upstream.write_all(&request).await.context("probe CONNECT request")?;

			// VER REP RSV ATYP + IPv4 BND.ADDR + BND.PORT
			let mut reply = [0u8; 10];
			upstream.read_exact(&mut reply).await.context("probe CONNECT reply")?;
			if reply[1] != 0 {
				bail!("upstream refused CONNECT to {PROBE_HOST}:{PROBE_PORT} (code {})", reply[1]);
			}
		}
		ProxyProtocol::Http => {
			TcpStream::connect(spec.authority())
				.await
				.with_context(|| format!("failed to connect upstream {}", spec))?;
		}
	}
	Ok(started.elapsed())
}

#[cfg(test)]
mod tests {
	use super::*;
	use burrow_core::ProxyAuth;

	/// Minimal SOCKS5 upstream: completes the greeting (and optional
	/// auth subnegotiation), then echoes everything it receives.
	async fn fake_upstream(expect_auth: Option<(&'static str, &'static str)>) -> SocketAddr {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			let (mut stream, _) = listener.accept().await.unwrap();

			let mut greeting = [0u8; 2];
			stream.read_exact(&mut greeting).await.unwrap();
			let mut methods = vec![0u8; greeting[1] as usize];
			stream.read_exact(&mut methods).await.unwrap();

			match expect_auth {
				Some((user, pass)) => {
					assert!(methods.contains(&SOCKS_USER_PASS));
					stream.write_all(&[SOCKS_VERSION, SOCKS_USER_PASS]).await.unwrap();

					let mut header = [0u8; 2];
					stream.read_exact(&mut header).await.unwrap();
					assert_eq!(header[0], AUTH_VERSION);
					let mut got_user = vec![0u8; header[1] as usize];
					stream.read_exact(&mut got_user).await.unwrap();
					let mut pass_len = [0u8; 1];
					stream.read_exact(&mut pass_len).await.unwrap();
					let mut got_pass = vec![0u8; pass_len[0] as usize];
					stream.read_exact(&mut got_pass).await.unwrap();
					assert_eq!(got_user, user.as_bytes());
					assert_eq!(got_pass, pass.as_bytes());
					stream.write_all(&[AUTH_VERSION, 0]).await.unwrap();
				}
				None => {
					assert!(methods.contains(&SOCKS_NO_AUTH));
					stream.write_all(&[SOCKS_VERSION, SOCKS_NO_AUTH]).await.unwrap();
				}
			}

			let mut buf = [0u8; 1024];
			loop {
				let n = stream.read(&mut buf).await.unwrap();
				if n == 0 {
					break;
				}
				stream.write_all(&buf[..n]).await.unwrap();
			}
		});
		addr
	}

	fn spec_for(addr: SocketAddr, auth: Option<ProxyAuth>) -> ProxySpec {
		ProxySpec {
			protocol: ProxyProtocol::Socks5,
			host: addr.ip().to_string(),
			port: addr.port(),
			auth,
		}
	}

	#[tokio::test]
	async fn relay_bridges_noauth_client_onto_authenticated_upstream() {
		let upstream = fake_upstream(Some(("alice", "s3cret"))).await;
		let manager = RelayManager::new();
		let spec = spec_for(
			upstream,
			Some(ProxyAuth {
				user: "alice".into(),
				pass: "s3cret".into(),
			}),
		);
		let local = manager.start(&spec).await.unwrap();

		let mut client = TcpStream::connect(local).await.unwrap();
		client.write_all(&[SOCKS_VERSION, 1, SOCKS_NO_AUTH]).await.unwrap();
		let mut reply = [0u8; 2];
		client.read_exact(&mut reply).await.unwrap();
		assert_eq!(reply, [SOCKS_VERSION, SOCKS_NO_AUTH]);

		// Past the handshakes both directions are a straight copy.
		client.write_all(b"ping").await.unwrap();
		let mut echoed = [0u8; 4];
		client.read_exact(&mut echoed).await.unwrap();
		assert_eq!(&echoed, b"ping");
	}

	#[tokio::test]
	async fn relay_rejects_client_demanding_auth() {
		let upstream = fake_upstream(None).await;
		let manager = RelayManager::new();
		let local = manager.start(&spec_for(upstream, None)).await.unwrap();

		let mut client = TcpStream::connect(local).await.unwrap();
		client.write_all(&[SOCKS_VERSION, 1, SOCKS_USER_PASS]).await.unwrap();
		let mut reply = [0u8; 2];
		client.read_exact(&mut reply).await.unwrap();
		assert_eq!(reply, [SOCKS_VERSION, SOCKS_NO_ACCEPTABLE]);
	}

	#[tokio::test]
	async fn stop_removes_exactly_one_relay() {
		let upstream = fake_upstream(None).await;
		let manager = RelayManager::new();
		let spec = spec_for(upstream, None);
		let first = manager.start(&spec).await.unwrap();
		let second = manager.start(&spec).await.unwrap();

		manager.stop(first).await.unwrap();
		let remaining = manager.list().await;
		assert_eq!(remaining.len(), 1);
		assert_eq!(remaining[0].local_addr, second);

		assert!(manager.stop(first).await.is_err());
	}
}
