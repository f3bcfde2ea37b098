use crate::diag::DiagnosticSink;
use crate::frame::{opcode_name, FrameAssembler};
use crate::tunnel::TunnelContext;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinError;
use tracing::debug;

/// One leg of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToTarget,
    TargetToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToTarget => write!(f, "client to target"),
            Direction::TargetToClient => write!(f, "target to client"),
        }
    }
}

/// Observes bytes in transit on one relay direction.
///
/// Taps see every forwarded byte, in forwarding order, with no frame
/// alignment guarantees. They must not block and cannot alter what is
/// forwarded.
pub trait InspectionTap: Send {
    fn on_data(&mut self, data: &[u8]);
}

/// Per-tunnel inspection capability: hands out a fresh tap for each
/// direction when the relay starts.
pub trait Inspect: Send + Sync {
    fn tap(&self, direction: Direction) -> Box<dyn InspectionTap>;
}

/// Inspection disabled; bytes are forwarded untouched either way.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInspect;

struct NoopTap;

impl InspectionTap for NoopTap {
    fn on_data(&mut self, _data: &[u8]) {}
}

impl Inspect for NoInspect {
    fn tap(&self, _direction: Direction) -> Box<dyn InspectionTap> {
        Box::new(NoopTap)
    }
}

/// Default inspector: reassembles WebSocket frames out of the byte stream
/// and reports them through the diagnostic sink.
pub struct FrameInspector {
    diagnostics: Arc<dyn DiagnosticSink>,
    max_buffer: usize,
}

impl FrameInspector {
    pub fn new(diagnostics: Arc<dyn DiagnosticSink>, max_buffer: usize) -> Self {
        Self {
            diagnostics,
            max_buffer,
        }
    }
}

impl Inspect for FrameInspector {
    fn tap(&self, direction: Direction) -> Box<dyn InspectionTap> {
        Box::new(FrameTap {
            direction,
            assembler: FrameAssembler::new(self.max_buffer),
            diagnostics: Arc::clone(&self.diagnostics),
        })
    }
}

struct FrameTap {
    direction: Direction,
    assembler: FrameAssembler,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl InspectionTap for FrameTap {
    fn on_data(&mut self, data: &[u8]) {
        let skipped_before = self.assembler.skipped_frames();
        for frame in self.assembler.push(data) {
            self.diagnostics.info(&format!(
                "{}: {} frame, fin={}, {} byte payload",
                self.direction,
                opcode_name(frame.opcode),
                frame.fin,
                frame.payload.len()
            ));
        }
        if self.assembler.skipped_frames() > skipped_before {
            self.diagnostics.warn(&format!(
                "{}: frame exceeds inspection buffer, decode skipped",
                self.direction
            ));
        }
    }
}

/// Bidirectional byte pump between a tunnel's two endpoints.
///
/// Each direction runs as its own task, owning the read half of its source
/// and the write half of its destination. The relay tears both directions
/// down as soon as either ends, and `run` returns only once both tasks have
/// terminated.
pub struct DuplexRelay {
    ctx: TunnelContext,
    read_buffer_size: usize,
}

impl DuplexRelay {
    pub fn new(ctx: TunnelContext) -> Self {
        Self {
            ctx,
            read_buffer_size: 8192,
        }
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(512);
        self
    }

    /// Pump bytes both ways until either side terminates.
    ///
    /// `buffered_from_target` is anything the handshake over-read from the
    /// target; it is tapped and forwarded to the client before the first
    /// target read. I/O errors here are normal stream termination, never
    /// surfaced to the caller.
    pub async fn run(self, inspector: &dyn Inspect, buffered_from_target: Bytes) {
        let TunnelContext {
            client,
            target,
            diagnostics,
        } = self.ctx;

        let uplink_tap = inspector.tap(Direction::ClientToTarget);
        let downlink_tap = inspector.tap(Direction::TargetToClient);

        let (client_read, client_write) = tokio::io::split(client);
        let (target_read, target_write) = tokio::io::split(target);

        let mut uplink = tokio::spawn(pump(
            client_read,
            target_write,
            uplink_tap,
            Bytes::new(),
            self.read_buffer_size,
        ));
        let mut downlink = tokio::spawn(pump(
            target_read,
            client_write,
            downlink_tap,
            buffered_from_target,
            self.read_buffer_size,
        ));

        // Whichever direction ends first tears the other down so its blocked
        // read cannot hang; both endpoints drop once both tasks are done.
        tokio::select! {
            result = &mut uplink => {
                downlink.abort();
                log_direction_end(Direction::ClientToTarget, result, &*diagnostics);
                let _ = downlink.await;
            }
            result = &mut downlink => {
                uplink.abort();
                log_direction_end(Direction::TargetToClient, result, &*diagnostics);
                let _ = uplink.await;
            }
        }
    }
}

async fn pump<R, W>(
    mut src: R,
    mut dst: W,
    mut tap: Box<dyn InspectionTap>,
    seed: Bytes,
    buffer_size: usize,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;

    if !seed.is_empty() {
        tap.on_data(&seed);
        dst.write_all(&seed).await?;
        total += seed.len() as u64;
    }

    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        tap.on_data(&buf[..n]);
        dst.write_all(&buf[..n]).await?;
        total += n as u64;
    }

    let _ = dst.shutdown().await;
    Ok(total)
}

fn log_direction_end(
    direction: Direction,
    result: Result<std::io::Result<u64>, JoinError>,
    diagnostics: &dyn DiagnosticSink,
) {
    match result {
        Ok(Ok(bytes)) => debug!("{} closed after {} bytes", direction, bytes),
        // Stream-level errors are how relays normally end
        Ok(Err(e)) => diagnostics.info(&format!("{} ended: {}", direction, e)),
        Err(_) => debug!("{} cancelled", direction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::TracingSink;
    use crate::frame::Frame;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::time::timeout;

    struct CollectInspector {
        frames: Arc<Mutex<Vec<(Direction, Frame)>>>,
    }

    struct CollectTap {
        direction: Direction,
        assembler: FrameAssembler,
        frames: Arc<Mutex<Vec<(Direction, Frame)>>>,
    }

    impl Inspect for CollectInspector {
        fn tap(&self, direction: Direction) -> Box<dyn InspectionTap> {
            Box::new(CollectTap {
                direction,
                assembler: FrameAssembler::new(1024 * 1024),
                frames: Arc::clone(&self.frames),
            })
        }
    }

    impl InspectionTap for CollectTap {
        fn on_data(&mut self, data: &[u8]) {
            let mut frames = self.frames.lock().unwrap();
            for frame in self.assembler.push(data) {
                frames.push((self.direction, frame));
            }
        }
    }

    fn test_context() -> (TunnelContext, tokio::io::DuplexStream, tokio::io::DuplexStream) {
        let (client_far, client) = duplex(64 * 1024);
        let (target_far, target) = duplex(64 * 1024);
        let ctx = TunnelContext {
            client: Box::new(client),
            target: Box::new(target),
            diagnostics: Arc::new(TracingSink),
        };
        (ctx, client_far, target_far)
    }

    #[tokio::test]
    async fn test_forwards_bytes_verbatim_both_ways() {
        let (ctx, mut client_far, mut target_far) = test_context();

        let relay = tokio::spawn(async move {
            DuplexRelay::new(ctx).run(&NoInspect, Bytes::new()).await;
        });

        // Masked text frame carrying "hi" plus some opaque bytes
        let upstream_bytes = [0x81u8, 0x82, 1, 2, 3, 4, b'h' ^ 1, b'i' ^ 2, 0xFF];
        client_far.write_all(&upstream_bytes).await.unwrap();
        let mut got = [0u8; 9];
        target_far.read_exact(&mut got).await.unwrap();
        assert_eq!(got, upstream_bytes);

        let downstream_bytes = [0x81u8, 0x02, b'h', b'i'];
        target_far.write_all(&downstream_bytes).await.unwrap();
        let mut got = [0u8; 4];
        client_far.read_exact(&mut got).await.unwrap();
        assert_eq!(got, downstream_bytes);

        // Target hangs up; the relay must come down on its own
        drop(target_far);
        timeout(Duration::from_secs(2), relay).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_taps_decode_frames_on_both_legs() {
        let (ctx, mut client_far, mut target_far) = test_context();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let inspector = CollectInspector {
            frames: Arc::clone(&frames),
        };

        let relay = tokio::spawn(async move {
            DuplexRelay::new(ctx).run(&inspector, Bytes::new()).await;
        });

        // Client sends a masked "hello"; target echoes it unmasked
        let key = [7u8, 7, 7, 7];
        let mut masked = b"hello".to_vec();
        crate::frame::apply_mask(&mut masked, key);
        let mut wire = vec![0x81, 0x85];
        wire.extend_from_slice(&key);
        wire.extend_from_slice(&masked);
        client_far.write_all(&wire).await.unwrap();

        let mut got = vec![0u8; wire.len()];
        target_far.read_exact(&mut got).await.unwrap();
        assert_eq!(got, wire);

        target_far.write_all(&[0x81, 0x05]).await.unwrap();
        target_far.write_all(b"hello").await.unwrap();
        let mut got = [0u8; 7];
        client_far.read_exact(&mut got).await.unwrap();

        drop(client_far);
        drop(target_far);
        timeout(Duration::from_secs(2), relay).await.unwrap().unwrap();

        let frames = frames.lock().unwrap();
        let uplink: Vec<_> = frames
            .iter()
            .filter(|(d, _)| *d == Direction::ClientToTarget)
            .collect();
        let downlink: Vec<_> = frames
            .iter()
            .filter(|(d, _)| *d == Direction::TargetToClient)
            .collect();
        assert_eq!(uplink.len(), 1);
        assert_eq!(uplink[0].1.payload, b"hello");
        assert_eq!(downlink.len(), 1);
        assert_eq!(downlink[0].1.payload, b"hello");
    }

    #[tokio::test]
    async fn test_seed_bytes_reach_client_first() {
        let (ctx, mut client_far, mut target_far) = test_context();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let inspector = CollectInspector {
            frames: Arc::clone(&frames),
        };

        let seed = Bytes::from_static(&[0x81, 0x05, b'e', b'a', b'r', b'l', b'y']);
        let relay = tokio::spawn(async move {
            DuplexRelay::new(ctx).run(&inspector, seed).await;
        });

        // The handshake remainder arrives before anything the target writes
        target_far.write_all(&[0x81, 0x04, b'n', b'e', b'x', b't']).await.unwrap();
        let mut got = [0u8; 13];
        client_far.read_exact(&mut got).await.unwrap();
        assert_eq!(&got[..7], &[0x81, 0x05, b'e', b'a', b'r', b'l', b'y']);
        assert_eq!(&got[7..], &[0x81, 0x04, b'n', b'e', b'x', b't']);

        drop(target_far);
        drop(client_far);
        timeout(Duration::from_secs(2), relay).await.unwrap().unwrap();

        let frames = frames.lock().unwrap();
        let payloads: Vec<_> = frames
            .iter()
            .filter(|(d, _)| *d == Direction::TargetToClient)
            .map(|(_, f)| f.payload.clone())
            .collect();
        assert_eq!(payloads, vec![b"early".to_vec(), b"next".to_vec()]);
    }

    #[tokio::test]
    async fn test_relay_returns_when_one_side_closes() {
        let (ctx, client_far, target_far) = test_context();

        let relay = tokio::spawn(async move {
            DuplexRelay::new(ctx).run(&NoInspect, Bytes::new()).await;
        });

        // Only the target hangs up; the client leg is still open and blocked
        // on read, so teardown has to unblock it
        drop(target_far);
        timeout(Duration::from_secs(2), relay).await.unwrap().unwrap();
        drop(client_far);
    }
}
