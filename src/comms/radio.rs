//! Framed radio link over any byte stream
//!
//! The link owns two tasks: a writer draining the outbound queue and a reader
//! feeding the frame decoder and dispatching complete packets to the handler
//! registry. Losing the stream is reported to the registered `Error` handler
//! as a locally generated [`ErrorReport`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rtt_shared::codec::{self, FrameDecoder};
use rtt_shared::{Envelope, ErrorReport, PacketKind, Payload};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use super::{CommsConnector, CommsError, DroneComms, HandlerId, HandlerRegistry, PacketHandler, Request};
use crate::config::{AckTiming, InterfaceType, RadioConfig};

/// Outbound packets queued before sends start failing
const OUTBOUND_QUEUE: usize = 64;

const READ_BUF_SIZE: usize = 4096;

/// A live link to the drone
pub struct RadioComms {
    outbound: mpsc::Sender<Envelope>,
    registry: Arc<HandlerRegistry>,
    /// Set by [`DroneComms::close`]
    closed: Arc<AtomicBool>,
    /// Set once the stream fails; the loss is reported a single time
    lost: Arc<AtomicBool>,
    next_packet_id: AtomicU32,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl RadioComms {
    /// Start the reader and writer tasks over `stream`
    pub fn spawn<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let registry = Arc::new(HandlerRegistry::new());
        let closed = Arc::new(AtomicBool::new(false));
        let lost = Arc::new(AtomicBool::new(false));
        let loss = LinkLoss {
            registry: registry.clone(),
            closed: closed.clone(),
            lost: lost.clone(),
        };

        let write_task = tokio::spawn(write_loop(writer, outbound_rx, loss.clone()));
        let read_task = tokio::spawn(read_loop(reader, loss));

        Self {
            outbound: outbound_tx,
            registry,
            closed,
            lost,
            next_packet_id: AtomicU32::new(0),
            tasks: Mutex::new(vec![write_task.abort_handle(), read_task.abort_handle()]),
        }
    }

    /// Closed locally or lost
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.lost.load(Ordering::SeqCst)
    }
}

impl DroneComms for RadioComms {
    fn send(&self, request: Request) -> Result<u32, CommsError> {
        if self.is_closed() {
            return Err(CommsError::Closed);
        }

        let kind = request.kind();
        let packet_id = self.next_packet_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let envelope = Envelope::new(packet_id, request.into_payload());

        self.outbound.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => CommsError::QueueFull,
            TrySendError::Closed(_) => CommsError::Closed,
        })?;

        debug!(%kind, packet_id, "Queued packet");
        Ok(packet_id)
    }

    fn register(&self, kind: PacketKind, handler: PacketHandler, once: bool) -> HandlerId {
        self.registry.register(kind, handler, once)
    }

    fn unregister(&self, kind: PacketKind, id: HandlerId) -> bool {
        self.registry.unregister(kind, id)
    }

    fn close(&self) {
        // A lost link still holds its stream until the tasks are aborted
        let was_closed = self.closed.swap(true, Ordering::SeqCst);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
        self.registry.clear();
        if !was_closed {
            info!("Radio link closed");
        }
    }
}

impl Drop for RadioComms {
    fn drop(&mut self) {
        self.close();
    }
}

/// Shared by the reader and writer to report a failed stream
#[derive(Clone)]
struct LinkLoss {
    registry: Arc<HandlerRegistry>,
    closed: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
}

impl LinkLoss {
    /// Deliver a link-loss report exactly once, unless the link was closed locally
    fn report(&self, reason: String) {
        if self.closed.load(Ordering::SeqCst) || self.lost.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("Radio link lost: {reason}");
        self.registry.dispatch(&Payload::Error(ErrorReport::new(reason)));
    }
}

async fn read_loop<R>(mut reader: R, loss: LinkLoss)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    let reason = 'read: loop {
        match reader.read(&mut buf).await {
            Ok(0) => break "Drone closed the link".to_string(),
            Ok(n) => {
                decoder.extend(&buf[..n]);
                loop {
                    match decoder.decode_next() {
                        Ok(Some(envelope)) => dispatch_envelope(&loss.registry, envelope),
                        Ok(None) => break,
                        Err(e) => break 'read format!("Corrupt frame: {e}"),
                    }
                }
            }
            Err(e) => break format!("Read error: {e}"),
        }
    };

    loss.report(reason);
}

fn dispatch_envelope(registry: &HandlerRegistry, envelope: Envelope) {
    let packet_id = envelope.packet_id();
    let Some(payload) = envelope.payload else {
        debug!(packet_id, "Ignoring envelope without payload");
        return;
    };

    let kind = payload.kind();
    if registry.dispatch(&payload) {
        debug!(%kind, packet_id, "Dispatched packet");
    } else {
        debug!(%kind, packet_id, "No handler for packet");
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    loss: LinkLoss,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = outbound_rx.recv().await {
        let frame = match codec::encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(packet_id = envelope.packet_id(), "Dropping unencodable packet: {e}");
                continue;
            }
        };

        if let Err(e) = writer.write_all(&frame).await {
            loss.report(format!("Write error: {e}"));
            return;
        }
    }
}

/// Opens [`RadioComms`] over TCP or a serial port
#[derive(Debug, Clone)]
pub struct RadioConnector {
    connect_timeout: Duration,
}

impl RadioConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for RadioConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl CommsConnector for RadioConnector {
    type Comms = RadioComms;

    async fn connect(
        &self,
        radio: &RadioConfig,
        timing: &AckTiming,
    ) -> Result<RadioComms, CommsError> {
        match radio.interface {
            InterfaceType::Tcp => {
                let endpoint = radio.endpoint();
                let stream = timeout(self.connect_timeout, TcpStream::connect(&endpoint))
                    .await
                    .map_err(|_| CommsError::ConnectTimeout(endpoint.clone()))?
                    .map_err(|source| CommsError::Connect {
                        endpoint: endpoint.clone(),
                        source,
                    })?;
                stream.set_nodelay(true)?;

                info!(ack_timeout = ?timing.ack_timeout(), "TCP link open to {endpoint}");
                Ok(RadioComms::spawn(stream))
            }
            InterfaceType::Serial => {
                let stream = tokio_serial::new(&radio.port, radio.baudrate)
                    .open_native_async()
                    .map_err(|source| CommsError::Serial {
                        port: radio.port.clone(),
                        source,
                    })?;

                info!(
                    ack_timeout = ?timing.ack_timeout(),
                    "Serial link open on {}",
                    radio.endpoint()
                );
                Ok(RadioComms::spawn(stream))
            }
        }
    }

    fn name(&self) -> &'static str {
        "radio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtt_shared::{StartResponse, SyncRequest};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{DuplexStream, ReadBuf};

    /// Never yields a byte and rejects every write, like an unplugged serial port
    struct DeadPort {
        dropped: Arc<AtomicBool>,
    }

    impl AsyncRead for DeadPort {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for DeadPort {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl Drop for DeadPort {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    async fn read_envelope(drone: &mut DuplexStream, decoder: &mut FrameDecoder) -> Envelope {
        let mut buf = [0u8; 512];
        loop {
            if let Some(envelope) = decoder.decode_next().expect("decode failed") {
                return envelope;
            }
            let n = drone.read(&mut buf).await.expect("read failed");
            assert!(n > 0, "link closed before a full frame arrived");
            decoder.extend(&buf[..n]);
        }
    }

    fn channel_handler() -> (PacketHandler, mpsc::UnboundedReceiver<Payload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: PacketHandler = Arc::new(move |payload: &Payload| {
            let _ = tx.send(payload.clone());
        });
        (handler, rx)
    }

    #[tokio::test]
    async fn test_request_reaches_drone_and_response_dispatches() {
        let (local, mut drone) = tokio::io::duplex(1024);
        let comms = RadioComms::spawn(local);

        let (handler, mut responses) = channel_handler();
        comms.register(PacketKind::StartResponse, handler, true);

        let packet_id = comms
            .send(Request::Sync(SyncRequest::new(2000, 5)))
            .expect("send failed");
        let mut decoder = FrameDecoder::new();
        let envelope = read_envelope(&mut drone, &mut decoder).await;
        assert_eq!(envelope.packet_id(), packet_id);
        assert!(matches!(envelope.payload, Some(Payload::SyncRequest(_))));

        let reply = Envelope::new(1, Payload::StartResponse(StartResponse { success: true }));
        drone
            .write_all(&codec::encode(&reply).expect("encode"))
            .await
            .expect("write failed");

        let payload = responses.recv().await.expect("no response dispatched");
        assert_eq!(payload.response_success(), Some(true));
    }

    #[tokio::test]
    async fn test_remote_close_reports_error() {
        let (local, drone) = tokio::io::duplex(1024);
        let comms = RadioComms::spawn(local);

        let (handler, mut errors) = channel_handler();
        comms.register(PacketKind::Error, handler, false);

        drop(drone);
        let payload = errors.recv().await.expect("no error dispatched");
        assert_eq!(payload.kind(), PacketKind::Error);
        assert!(comms.is_closed());
        assert!(matches!(comms.send(Request::Start), Err(CommsError::Closed)));
    }

    #[tokio::test]
    async fn test_local_close_is_silent() {
        let (local, _drone) = tokio::io::duplex(1024);
        let comms = RadioComms::spawn(local);

        let (handler, mut errors) = channel_handler();
        comms.register(PacketKind::Error, handler, false);

        comms.close();
        assert!(matches!(comms.send(Request::Stop), Err(CommsError::Closed)));
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_after_write_failure_releases_stream() {
        let dropped = Arc::new(AtomicBool::new(false));
        let comms = RadioComms::spawn(DeadPort {
            dropped: dropped.clone(),
        });

        let (handler, mut errors) = channel_handler();
        comms.register(PacketKind::Error, handler, false);

        comms.send(Request::Start).expect("send failed");
        let payload = errors.recv().await.expect("no error dispatched");
        assert_eq!(payload.kind(), PacketKind::Error);
        assert!(comms.is_closed());
        assert!(!dropped.load(Ordering::SeqCst));

        comms.close();
        assert!(!comms.registry.is_registered(PacketKind::Error));
        drop(comms);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(dropped.load(Ordering::SeqCst));
    }
}
