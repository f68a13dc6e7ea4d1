use std::net::TcpListener;

/// Ask the OS for a free port on `host`.
///
/// The listener is dropped before returning, so another process could in
/// principle grab the port before the sidecar binds it. A sidecar that fails
/// to bind exits early and the launch is retried with a fresh port.
pub fn allocate(host: &str) -> std::io::Result<u16> {
    let listener = TcpListener::bind((host, 0))?;
    let port = listener.local_addr()?.port();
    tracing::debug!(host, port, "allocated ephemeral port");
    Ok(port)
}
