//! Paced large-file response body.
//!
//! Streams a file the cache refused to hold: reads up to 40 KiB at a
//! time, bounded by the remaining entity length. With a positive rate
//! limit each read waits for an interval tick, so the send cadence is
//! `buf / interval`; without one the connection's own backpressure paces
//! the reads.

use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use ferry_http::protocol::{HttpError, SendError};
use http_body::{Body, Frame, SizeHint};
use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::Interval;

const BUF_SIZE: usize = 40960;

/// Interval for one buffer-sized send at `limit_rate` KiB/s, floored to
/// 1 ms.
pub(crate) fn pacing_interval(limit_rate: i64) -> Option<Duration> {
    if limit_rate <= 0 {
        return None;
    }
    let interval_ms = (BUF_SIZE as i64) * 1000 / 1024 / limit_rate;
    Some(Duration::from_millis(interval_ms.max(1) as u64))
}

pub(crate) struct FileBody {
    file: File,
    remaining: u64,
    interval: Option<Interval>,
    ticked: bool,
}

impl FileBody {
    /// `file` must already be positioned at the first byte to send;
    /// `remaining` bounds how many bytes go out.
    pub(crate) fn new(file: File, remaining: u64, limit_rate: i64) -> Self {
        let interval = pacing_interval(limit_rate).map(|period| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker
        });
        Self { file, remaining, interval, ticked: false }
    }
}

impl Body for FileBody {
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if this.remaining == 0 {
            return Poll::Ready(None);
        }

        if let Some(interval) = &mut this.interval {
            if !this.ticked {
                ready!(interval.poll_tick(cx));
                this.ticked = true;
            }
        }

        let want = std::cmp::min(this.remaining, BUF_SIZE as u64) as usize;
        let mut buf = BytesMut::zeroed(want);

        let n = {
            let mut read_buf = ReadBuf::new(&mut buf[..]);
            match ready!(Pin::new(&mut this.file).poll_read(cx, &mut read_buf)) {
                Ok(()) => read_buf.filled().len(),
                Err(e) => {
                    this.remaining = 0;
                    return Poll::Ready(Some(Err(SendError::read_file(e).into())));
                }
            }
        };

        if n == 0 {
            // the file shrank under us
            this.remaining = 0;
            return Poll::Ready(Some(Err(SendError::read_file("file truncated while streaming").into())));
        }

        this.remaining -= n as u64;
        this.ticked = false;
        buf.truncate(n);
        Poll::Ready(Some(Ok(Frame::data(buf.freeze()))))
    }

    fn is_end_stream(&self) -> bool {
        self.remaining == 0
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }
}
