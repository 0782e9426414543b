use crate::error::Error;
use bytes::{Buf, Bytes};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::DropGuard;

/// The merged log stream.
///
/// Bytes come from the header applier, errors come straight from the producers. An error is
/// written into the stream as text so that it shows up where it happened, and it is also
/// remembered: once every producer is done the reader fails with the first error it saw instead
/// of ending cleanly.
///
/// Dropping the reader stops every task feeding it.
pub struct LogReader {
    /// Bytes received but not yet handed to the caller.
    overflow: Bytes,
    bytes: Receiver<Bytes>,
    errors: Receiver<Error>,
    bytes_closed: bool,
    errors_closed: bool,
    terminal: Option<String>,
    _cancel_on_drop: Option<DropGuard>,
}

impl LogReader {
    pub(crate) fn from_channels(bytes: Receiver<Bytes>, errors: Receiver<Error>) -> Self {
        Self {
            overflow: Bytes::new(),
            bytes,
            errors,
            bytes_closed: false,
            errors_closed: false,
            terminal: None,
            _cancel_on_drop: None,
        }
    }

    pub(crate) fn with_drop_guard(mut self, guard: DropGuard) -> Self {
        self._cancel_on_drop = Some(guard);
        self
    }

    fn record_error(&mut self, error: Error) {
        let text = error.to_string();
        self.overflow = Bytes::from(format!("{}\n", text));
        if self.terminal.is_none() {
            self.terminal = Some(text);
        }
    }
}

impl AsyncRead for LogReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            if this.overflow.has_remaining() {
                let n = buf.remaining().min(this.overflow.len());
                buf.put_slice(&this.overflow.split_to(n));
                return Poll::Ready(Ok(()));
            }

            if !this.errors_closed {
                match this.errors.poll_recv(cx) {
                    Poll::Ready(Some(error)) => {
                        this.record_error(error);
                        continue;
                    }
                    Poll::Ready(None) => this.errors_closed = true,
                    Poll::Pending => {}
                }
            }

            if !this.bytes_closed {
                match this.bytes.poll_recv(cx) {
                    Poll::Ready(Some(chunk)) => {
                        this.overflow = chunk;
                        continue;
                    }
                    Poll::Ready(None) => this.bytes_closed = true,
                    Poll::Pending => {}
                }
            }

            if this.bytes_closed && this.errors_closed {
                return Poll::Ready(match &this.terminal {
                    Some(message) => Err(io::Error::new(io::ErrorKind::Other, message.clone())),
                    None => Ok(()),
                });
            }
            return Poll::Pending;
        }
    }
}
