// Stdio relay
//
// Two independent byte pumps keep the traced program interactive:
// controller stdin -> target stdin, and target stdout -> controller stdout
// (optionally also into a tagged side log). The pumps share one cooperative
// stop signal and are joined before the session releases their streams.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const CHUNK: usize = 1024;

/// After the stop signal, keep reading until the source stays idle this
/// long; bytes already produced before the stop are not lost.
const DRAIN_IDLE: Duration = Duration::from_millis(50);

pub struct StdioRelay {
    stop: watch::Sender<bool>,
    pumps: Vec<JoinHandle<()>>,
}

impl StdioRelay {
    pub fn start<CI, CO, TI, TO, L>(
        controller_in: CI,
        controller_out: CO,
        target_in: TI,
        target_out: TO,
        log: Option<L>,
    ) -> Self
    where
        CI: AsyncRead + Unpin + Send + 'static,
        CO: AsyncWrite + Unpin + Send + 'static,
        TI: AsyncWrite + Unpin + Send + 'static,
        TO: AsyncRead + Unpin + Send + 'static,
        L: AsyncWrite + Unpin + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);

        let input = tokio::spawn(pump_input(controller_in, target_in, stop_rx.clone()));
        let output = tokio::spawn(pump_output(target_out, controller_out, log, stop_rx));

        Self {
            stop: stop_tx,
            pumps: vec![input, output],
        }
    }

    /// Signal both pumps and wait for them to finish. Idempotent.
    pub async fn stop(&mut self) {
        let _ = self.stop.send(true);
        for pump in self.pumps.drain(..) {
            if let Err(e) = pump.await {
                warn!("relay pump panicked: {}", e);
            }
        }
    }
}

/// Controller stdin -> target stdin. The select keeps the pump responsive
/// to the stop signal even while the controller types nothing.
async fn pump_input<R, W>(mut source: R, mut sink: W, mut stop: watch::Receiver<bool>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; CHUNK];

    loop {
        tokio::select! {
            _ = stop.changed() => {
                drain_pending(&mut source, &mut sink).await;
                break;
            }
            read = source.read(&mut buf) => match read {
                Ok(0) => break, // controller closed its stdin
                Ok(n) => {
                    if let Err(e) = forward(&mut sink, &buf[..n]).await {
                        warn!("stdin relay write failed: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    warn!("stdin relay read failed: {}", e);
                    break;
                }
            }
        }
    }

    // The target-stdin endpoint is owned here; closing it hands the child
    // an EOF. The controller's own stdin is never closed.
    let _ = sink.shutdown().await;
    debug!("stdin relay pump finished");
}

/// Target stdout -> controller stdout, with an optional tagged side log.
async fn pump_output<R, W, L>(
    mut source: R,
    mut sink: W,
    mut log: Option<L>,
    mut stop: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    L: AsyncWrite + Unpin,
{
    let mut buf = [0u8; CHUNK];

    loop {
        tokio::select! {
            _ = stop.changed() => {
                // Deliver whatever the target produced before the signal
                while let Ok(Ok(n)) = tokio::time::timeout(DRAIN_IDLE, source.read(&mut buf)).await {
                    if n == 0 || relay_chunk(&mut sink, &mut log, &buf[..n]).await.is_err() {
                        break;
                    }
                }
                break;
            }
            read = source.read(&mut buf) => match read {
                Ok(0) => break, // target closed its stdout
                Ok(n) => {
                    if let Err(e) = relay_chunk(&mut sink, &mut log, &buf[..n]).await {
                        warn!("stdout relay write failed: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    warn!("stdout relay read failed: {}", e);
                    break;
                }
            }
        }
    }

    // Controller stdout is process-wide and stays open.
    debug!("stdout relay pump finished");
}

async fn drain_pending<R, W>(source: &mut R, sink: &mut W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; CHUNK];
    while let Ok(Ok(n)) = tokio::time::timeout(DRAIN_IDLE, source.read(&mut buf)).await {
        if n == 0 || forward(sink, &buf[..n]).await.is_err() {
            break;
        }
    }
}

async fn forward<W>(sink: &mut W, chunk: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    sink.write_all(chunk).await?;
    sink.flush().await
}

async fn relay_chunk<W, L>(sink: &mut W, log: &mut Option<L>, chunk: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    L: AsyncWrite + Unpin,
{
    sink.write_all(chunk).await?;
    sink.flush().await?;

    if let Some(log) = log.as_mut() {
        log.write_all(b"out> ").await?;
        log.write_all(chunk).await?;
        log.write_all(b"\n").await?;
        log.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::sync::watch;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_input_pump_relays_in_order() {
        let (mut controller, source) = tokio::io::duplex(256);
        let (sink, mut target) = tokio::io::duplex(256);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let pump = tokio::spawn(pump_input(source, sink, stop_rx));

        controller.write_all(b"first ").await.unwrap();
        controller.write_all(b"second").await.unwrap();
        drop(controller); // EOF ends the pump

        timeout(Duration::from_secs(5), pump).await.unwrap().unwrap();

        let mut relayed = Vec::new();
        target.read_to_end(&mut relayed).await.unwrap();
        assert_eq!(relayed, b"first second");
    }

    #[tokio::test]
    async fn test_output_pump_duplicates_into_tagged_log() {
        let (mut producer, source) = tokio::io::duplex(256);
        let (sink, mut consumer) = tokio::io::duplex(256);
        let (log_sink, mut log) = tokio::io::duplex(256);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let pump = tokio::spawn(pump_output(source, sink, Some(log_sink), stop_rx));

        producer.write_all(b"done").await.unwrap();
        drop(producer);

        timeout(Duration::from_secs(5), pump).await.unwrap().unwrap();

        let mut relayed = Vec::new();
        consumer.read_to_end(&mut relayed).await.unwrap();
        assert_eq!(relayed, b"done");

        let mut logged = Vec::new();
        log.read_to_end(&mut logged).await.unwrap();
        assert_eq!(logged, b"out> done\n");
    }

    #[tokio::test]
    async fn test_stop_joins_pumps_blocked_on_idle_sources() {
        // Neither source ever produces or closes; stop must still join.
        let (_controller, source) = tokio::io::duplex(64);
        let (sink, _target) = tokio::io::duplex(64);
        let (_producer, out_source) = tokio::io::duplex(64);
        let (out_sink, _consumer) = tokio::io::duplex(64);

        let mut relay = StdioRelay::start(
            source,
            out_sink,
            sink,
            out_source,
            None::<DuplexStream>,
        );

        timeout(Duration::from_secs(5), relay.stop())
            .await
            .expect("stop must not hang on blocked pumps");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (_controller, source) = tokio::io::duplex(64);
        let (sink, _target) = tokio::io::duplex(64);
        let (_producer, out_source) = tokio::io::duplex(64);
        let (out_sink, _consumer) = tokio::io::duplex(64);

        let mut relay = StdioRelay::start(
            source,
            out_sink,
            sink,
            out_source,
            None::<DuplexStream>,
        );

        relay.stop().await;
        relay.stop().await;
    }

    #[tokio::test]
    async fn test_bytes_written_before_stop_survive_it() {
        let (mut controller, source) = tokio::io::duplex(256);
        let (sink, mut target) = tokio::io::duplex(256);
        let (out_sink, _consumer) = tokio::io::duplex(64);
        let (_producer, out_source) = tokio::io::duplex(64);

        let mut relay = StdioRelay::start(
            source,
            out_sink,
            sink,
            out_source,
            None::<DuplexStream>,
        );

        controller.write_all(b"typed before stop").await.unwrap();
        relay.stop().await;

        let mut relayed = Vec::new();
        target.read_to_end(&mut relayed).await.unwrap();
        assert_eq!(relayed, b"typed before stop");
    }
}
