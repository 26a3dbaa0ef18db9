//! Request/response body plumbing.
//!
//! [`ProxyBody`] is the type-erased streaming body used on both sides of the
//! proxy. Nothing here buffers a whole body; [`duplicate`] splits one stream
//! into two through bounded channels.
//!
//! # Backpressure
//!
//! The fan-out task sends every chunk to both readers before pulling the next
//! one from the source. A reader that stops polling stalls the other reader
//! once its channel fills up; it does not lose or reorder bytes for it. Drop a
//! reader you do not intend to drain: dropped readers are skipped.

use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Type-erased body used for inbound requests, forwarded requests and
/// responses written to the client.
pub type ProxyBody = UnsyncBoxBody<Bytes, io::Error>;

/// An empty body.
#[must_use]
pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

/// A body holding `data` in memory.
#[must_use]
pub fn full(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into())
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

/// Erase any byte body whose error converts into a boxed error.
pub fn boxed<B>(body: B) -> ProxyBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    body.map_err(io::Error::other).boxed_unsync()
}

type Chunk = Result<Bytes, io::Error>;

/// One reader of a duplicated body.
///
/// Ends cleanly once the source has been fully replayed. If the fan-out task
/// is torn down first, the reader yields an [`io::ErrorKind::Interrupted`]
/// error instead of a clean end, so a truncated body is never mistaken for a
/// complete one.
#[derive(Debug)]
pub struct DuplicateBody {
    rx: mpsc::Receiver<Chunk>,
    completed: Arc<AtomicBool>,
    finished: bool,
}

impl Body for DuplicateBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match ready!(self.rx.poll_recv(cx)) {
            Some(Ok(data)) => Poll::Ready(Some(Ok(Frame::data(data)))),
            Some(Err(err)) => {
                self.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            None => {
                self.finished = true;
                if self.completed.load(Ordering::Acquire) {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::Interrupted,
                        "body duplication cancelled before the source ended",
                    ))))
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.finished
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

/// Split `body` into two readers that each replay every byte of it.
///
/// `capacity` is the number of chunks each reader may lag behind the source
/// (at least one). The returned handle belongs to the background fan-out
/// task; aborting it cancels both readers.
pub fn duplicate(
    body: ProxyBody,
    capacity: usize,
) -> (DuplicateBody, DuplicateBody, JoinHandle<()>) {
    let capacity = capacity.max(1);
    let (first_tx, first_rx) = mpsc::channel(capacity);
    let (second_tx, second_rx) = mpsc::channel(capacity);
    let completed = Arc::new(AtomicBool::new(false));

    let task = tokio::spawn(fan_out(body, first_tx, second_tx, Arc::clone(&completed)));

    let reader = |rx| DuplicateBody {
        rx,
        completed: Arc::clone(&completed),
        finished: false,
    };
    (reader(first_rx), reader(second_rx), task)
}

async fn fan_out(
    mut source: ProxyBody,
    first: mpsc::Sender<Chunk>,
    second: mpsc::Sender<Chunk>,
    completed: Arc<AtomicBool>,
) {
    let mut first = Some(first);
    let mut second = Some(second);

    while first.is_some() || second.is_some() {
        let Some(frame) = source.frame().await else {
            break;
        };

        match frame {
            Ok(frame) => {
                // Trailers are not replayed.
                let Ok(data) = frame.into_data() else {
                    continue;
                };
                let (first_open, second_open) = tokio::join!(
                    deliver(first.as_ref(), Ok(data.clone())),
                    deliver(second.as_ref(), Ok(data)),
                );
                if !first_open {
                    first = None;
                }
                if !second_open {
                    second = None;
                }
            }
            Err(err) => {
                let copy = io::Error::new(err.kind(), err.to_string());
                tokio::join!(
                    deliver(first.as_ref(), Err(err)),
                    deliver(second.as_ref(), Err(copy)),
                );
                break;
            }
        }
    }

    // Must be visible before the senders drop so readers report a clean end.
    completed.store(true, Ordering::Release);
}

/// Send to a reader that may already be gone. Returns whether it is still open.
async fn deliver(tx: Option<&mpsc::Sender<Chunk>>, chunk: Chunk) -> bool {
    match tx {
        Some(tx) => tx.send(chunk).await.is_ok(),
        None => false,
    }
}
