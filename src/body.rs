use std::future::Future;
use std::task::{Context, Poll, ready};
use std::{pin::Pin, time::Duration};

use bytes::Bytes;
use http_body::Body as HttpBody;
use http_body::Frame;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use pin_project_lite::pin_project;
use tokio::time::{Instant, Sleep};

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The body of a [`Response`](crate::response::Response).
pub type ResponseBody = BoxBody<Bytes, BoxError>;

pin_project! {
    ///  A body with a total timeout
    ///
    /// The timeout does not reset upon each chunk, but rather requires the whole
    /// body be streamed before the deadline is reached.
    pub(crate) struct TotalTimeoutBody<B> {
        #[pin]
        inner: B,
        timeout: Pin<Box<Sleep>>
    }
}

pin_project! {
    /// A body whose chunks must each arrive within `timeout` of the previous one.
    pub(crate) struct ReadTimeoutBody<B> {
        #[pin]
        inner: B,
        #[pin]
        sleep: Option<Sleep>,
        timeout: Duration
    }
}

/// Box a hyper body, layering the optional timeouts on top.
///
/// `deadline` is absolute so that time spent connecting counts against the
/// total timeout.
pub(crate) fn boxed<B>(
    body: B,
    deadline: Option<Instant>,
    read_timeout: Option<Duration>,
) -> ResponseBody
where
    B: HttpBody<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let body: ResponseBody = body.map_err(Into::into).boxed();
    let body = match read_timeout {
        Some(timeout) => ReadTimeoutBody::new(body, timeout).boxed(),
        None => body,
    };
    match deadline {
        Some(deadline) => TotalTimeoutBody::new(body, deadline).boxed(),
        None => body,
    }
}

fn timeout_error() -> BoxError {
    Box::new(crate::Error::BodyTimeout)
}

// ======= impl TotalTimeoutBody ========
impl<B> TotalTimeoutBody<B> {
    pub(crate) fn new(inner: B, deadline: Instant) -> Self {
        TotalTimeoutBody {
            inner,
            timeout: Box::pin(tokio::time::sleep_until(deadline)),
        }
    }
}

impl<B> HttpBody for TotalTimeoutBody<B>
where
    B: HttpBody,
    B::Error: Into<BoxError>,
{
    type Data = B::Data;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        if let Poll::Ready(()) = this.timeout.as_mut().poll(cx) {
            return Poll::Ready(Some(Err(timeout_error())));
        }
        Poll::Ready(ready!(this.inner.poll_frame(cx)).map(|res| res.map_err(Into::into)))
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.size_hint()
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }
}

// ======= impl ReadTimeoutBody ========
impl<B> ReadTimeoutBody<B> {
    pub(crate) fn new(inner: B, timeout: Duration) -> Self {
        ReadTimeoutBody {
            inner,
            sleep: None,
            timeout,
        }
    }
}

impl<B> HttpBody for ReadTimeoutBody<B>
where
    B: HttpBody,
    B::Error: Into<BoxError>,
{
    type Data = B::Data;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        // Arm the timer lazily, on the first poll after each frame.
        if this.sleep.is_none() {
            this.sleep.set(Some(tokio::time::sleep(*this.timeout)));
        }
        if let Some(sleep) = this.sleep.as_mut().as_pin_mut() {
            if let Poll::Ready(()) = sleep.poll(cx) {
                return Poll::Ready(Some(Err(timeout_error())));
            }
        }

        let item = ready!(this.inner.poll_frame(cx)).map(|res| res.map_err(Into::into));
        this.sleep.set(None);
        Poll::Ready(item)
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.size_hint()
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }
}
