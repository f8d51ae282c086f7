// Launching a JVM under debug
//
// The target is started with the JDWP agent listening on a loopback port,
// suspended before main, with stdin/stdout piped so the caller can relay
// interactive I/O. The returned connection is already handshaken.

use crate::connection::JdwpConnection;
use crate::protocol::{JdwpError, JdwpResult};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const CONNECT_ATTEMPTS: u32 = 40;
const CONNECT_RETRY: Duration = Duration::from_millis(150);

/// A target VM spawned by [`launch`]: the OS child (whose piped stdin and
/// stdout the caller relays) plus the live JDWP connection to it.
#[derive(Debug)]
pub struct LaunchedVm {
    pub child: Child,
    pub connection: JdwpConnection,
}

/// Spawn `java` running `main_spec` (main class followed by its arguments),
/// suspended under the JDWP agent, and connect to it.
pub async fn launch(main_spec: &str) -> JdwpResult<LaunchedVm> {
    let port = free_port()?;

    let mut parts = main_spec.split_whitespace();
    let main_class = parts
        .next()
        .ok_or_else(|| JdwpError::Launch("empty main class spec".to_string()))?;

    let mut command = Command::new("java");
    command
        .arg(format!(
            "-agentlib:jdwp=transport=dt_socket,server=y,suspend=y,quiet=y,address=127.0.0.1:{}",
            port
        ))
        .arg(main_class)
        .args(parts)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true);

    info!("Launching {} under JDWP on port {}", main_class, port);
    let child = command.spawn().map_err(JdwpError::Io)?;

    // The agent needs a moment to open its listener; retry until it does.
    let mut last_err = JdwpError::Launch("never attempted".to_string());
    for attempt in 1..=CONNECT_ATTEMPTS {
        tokio::time::sleep(CONNECT_RETRY).await;

        match JdwpConnection::connect("127.0.0.1", port).await {
            Ok(mut connection) => {
                verify_id_sizes(&mut connection).await?;
                return Ok(LaunchedVm { child, connection });
            }
            Err(e) => {
                debug!("JDWP connect attempt {} failed: {}", attempt, e);
                last_err = e;
            }
        }
    }

    Err(JdwpError::Launch(format!(
        "no JDWP endpoint on port {} after {} attempts: {}",
        port, CONNECT_ATTEMPTS, last_err
    )))
}

/// All wire reads in this crate assume 8-byte IDs; refuse a VM that uses
/// anything else.
async fn verify_id_sizes(connection: &mut JdwpConnection) -> JdwpResult<()> {
    let sizes = connection.id_sizes().await?;
    let all = [
        sizes.field_id_size,
        sizes.method_id_size,
        sizes.object_id_size,
        sizes.reference_type_id_size,
        sizes.frame_id_size,
    ];

    if all.iter().any(|s| *s != 8) {
        warn!("Unsupported ID sizes reported by target: {:?}", all);
        return Err(JdwpError::Launch(format!(
            "target VM uses non-8-byte IDs: {:?}",
            all
        )));
    }

    Ok(())
}

fn free_port() -> JdwpResult<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").map_err(JdwpError::Io)?;
    let port = listener.local_addr().map_err(JdwpError::Io)?.port();
    // The listener drops here; the agent takes the port over.
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_port_is_nonzero() {
        assert_ne!(free_port().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_main_spec_rejected() {
        let err = launch("   ").await.unwrap_err();
        assert!(matches!(err, JdwpError::Launch(_)));
    }
}
