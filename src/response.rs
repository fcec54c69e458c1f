use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Response as HttpResponse, StatusCode, Uri, Version};
use mime::Mime;
use tracing::warn;

use crate::body::ResponseBody;
use crate::ipc::{ARROW_STREAM_MIME, ArrowBatchReader, ColumnarTable};
use crate::stats::Recorder;

pub struct Response {
    res: HttpResponse<ResponseBody>,
    uri: Uri,
    recorder: Option<Arc<dyn Recorder>>,
    body_done: bool,
}

impl Response {
    pub(super) fn new(
        res: HttpResponse<ResponseBody>,
        uri: Uri,
        recorder: Option<Arc<dyn Recorder>>,
    ) -> Self {
        Self {
            res,
            uri,
            recorder,
            body_done: false,
        }
    }

    /// Get the `StatusCode` of this `Response`.
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.res.status()
    }

    /// Get the HTTP `Version` of this `Response`.
    #[inline]
    pub fn version(&self) -> Version {
        self.res.version()
    }

    /// Get the `Uri` this response was fetched from.
    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Get the `Headers` of this `Response`.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        self.res.headers()
    }

    /// Get a mutable reference to the `Headers` of this `Response`.
    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.res.headers_mut()
    }

    /// Get the content length of the response, if it is known.
    ///
    /// This value does not directly represents the value of the `Content-Length`
    /// header, but rather the size of the response's body. To read the header's
    /// value, please use the [`Response::headers`] method instead.
    pub fn content_length(&self) -> Option<u64> {
        use http_body::Body;

        Body::size_hint(self.res.body()).exact()
    }

    pub fn extensions(&self) -> &http::Extensions {
        self.res.extensions()
    }

    /// Turn a non-2xx status into an error.
    pub fn error_for_status(self) -> crate::Result<Self> {
        let status = self.status();
        if status.is_success() {
            Ok(self)
        } else {
            Err(crate::Error::Status(status))
        }
    }

    /// Whether the `Content-Type` header names the Arrow stream format.
    ///
    /// `None` when the header is missing or unparsable.
    pub fn is_arrow_stream(&self) -> Option<bool> {
        let content_type = self
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Mime>().ok())?;
        Some(content_type.essence_str() == ARROW_STREAM_MIME)
    }

    pub async fn bytes(mut self) -> crate::Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        use http_body_util::BodyExt;

        // loop to ignore unrecognized frames
        loop {
            if let Some(res) = self.res.body_mut().frame().await {
                let frame = res.map_err(crate::Error::from_body)?;
                if let Ok(buf) = frame.into_data() {
                    if let Some(recorder) = &self.recorder {
                        recorder.on_body_chunk(buf.len());
                    }
                    return Ok(Some(buf));
                }
                // else continue
            } else {
                if !self.body_done {
                    self.body_done = true;
                    if let Some(recorder) = &self.recorder {
                        recorder.on_body_done();
                    }
                }
                return Ok(None);
            }
        }
    }

    /// Decode the body as an Arrow IPC stream, batch by batch.
    pub fn arrow_batches(self) -> ArrowBatchReader {
        if self.is_arrow_stream() == Some(false) {
            warn!(
                uri = %self.uri,
                content_type = ?self.headers().get(http::header::CONTENT_TYPE),
                "response is not labelled as an arrow stream, decoding anyway"
            );
        }
        ArrowBatchReader::new(self)
    }

    /// Decode the whole body as an Arrow IPC stream.
    pub async fn arrow_table(self) -> crate::Result<ColumnarTable> {
        self.arrow_batches().collect().await
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::{BodyExt, Full};

    use super::*;

    fn response(content_type: Option<&str>, status: StatusCode) -> Response {
        let mut builder = HttpResponse::builder().status(status);
        if let Some(ct) = content_type {
            builder = builder.header(http::header::CONTENT_TYPE, ct);
        }
        let body: ResponseBody = Full::new(Bytes::from_static(b"payload"))
            .map_err(|never| match never {})
            .boxed();
        Response::new(
            builder.body(body).unwrap(),
            Uri::from_static("http://localhost:8000"),
            None,
        )
    }

    #[test]
    fn detects_arrow_content_type() {
        let res = response(Some(ARROW_STREAM_MIME), StatusCode::OK);
        assert_eq!(res.is_arrow_stream(), Some(true));

        let res = response(Some("application/json"), StatusCode::OK);
        assert_eq!(res.is_arrow_stream(), Some(false));

        let res = response(None, StatusCode::OK);
        assert_eq!(res.is_arrow_stream(), None);
    }

    #[test]
    fn error_for_status_rejects_failures() {
        let err = response(None, StatusCode::NOT_FOUND)
            .error_for_status()
            .err()
            .unwrap();
        assert!(matches!(err, crate::Error::Status(s) if s == StatusCode::NOT_FOUND));
        assert!(response(None, StatusCode::OK).error_for_status().is_ok());
    }

    #[tokio::test]
    async fn bytes_reads_the_whole_body() {
        let res = response(None, StatusCode::OK);
        assert_eq!(res.content_length(), Some(7));
        assert_eq!(&res.bytes().await.unwrap()[..], b"payload");
    }
}
