//! Streaming blob bodies with byte range support

use crate::blob_store::BlobReader;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, BufReader};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

const STREAM_CHUNK_SIZE: usize = 4096 * 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start_inclusive: Option<u64>,
    end_inclusive: Option<u64>,
}

impl ByteRange {
    pub fn new(start_inclusive: Option<u64>, end_inclusive: Option<u64>) -> ByteRange {
        ByteRange {
            start_inclusive,
            end_inclusive,
        }
    }

    pub fn parse<S: AsRef<str>>(s: S) -> Option<ByteRange> {
        let v = s.as_ref().trim();
        let v = v.strip_prefix("bytes=")?;

        let parts: Vec<&str> = v.split('-').collect();
        if parts.len() != 2 {
            return None;
        }

        Some(ByteRange {
            start_inclusive: parts[0].trim().parse::<u64>().ok(),
            end_inclusive: parts[1].trim().parse::<u64>().ok(),
        })
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<ByteRange> {
        headers
            .get(header::RANGE)
            .and_then(|x| x.to_str().ok())
            .and_then(ByteRange::parse)
    }

    /// Resolves the range against a body of `length` bytes.
    ///
    /// `Ok(None)` means the whole body, `Err(())` means the range cannot be satisfied.
    pub fn resolve(&self, length: u64) -> Result<Option<(u64, u64)>, ()> {
        match (self.start_inclusive, self.end_inclusive) {
            (None, None) => Ok(None),
            (Some(start), end) => {
                if start >= length {
                    return Err(());
                }
                let end = end.map_or(length - 1, |end| end.min(length - 1));
                if end < start {
                    return Err(());
                }
                Ok(Some((start, end)))
            }
            // Suffix form: the last `n` bytes
            (None, Some(suffix)) => {
                if suffix == 0 || length == 0 {
                    return Err(());
                }
                Ok(Some((length.saturating_sub(suffix), length - 1)))
            }
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => debug!("Dropping unrepresentable {} header value", name),
    }
}

pub fn http_date(at: &DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Headers describing a blob, shared by GET and HEAD responses.
pub fn describe_blob(headers: &mut HeaderMap, content_type: &str, length: u64, modified_at: &DateTime<Utc>) {
    insert_header(headers, header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    insert_header(headers, header::LAST_MODIFIED, &http_date(modified_at));
}

/// Streams `blob`, honouring `range`. `headers` carry any extra response headers.
pub async fn serve_reader(
    blob: BlobReader,
    range: Option<ByteRange>,
    mut headers: HeaderMap,
) -> Response {
    let BlobReader {
        attributes,
        mut reader,
    } = blob;
    let length = attributes.size;
    describe_blob(&mut headers, &attributes.content_type, length, &attributes.modified_at);

    let resolved = match range.map(|range| range.resolve(length)) {
        None | Some(Ok(None)) => None,
        Some(Ok(Some(span))) => Some(span),
        Some(Err(())) => {
            insert_header(
                &mut headers,
                header::CONTENT_RANGE,
                &format!("bytes */{}", length),
            );
            headers.remove(header::CONTENT_LENGTH);
            return (StatusCode::RANGE_NOT_SATISFIABLE, headers).into_response();
        }
    };

    let (status, start, served) = match resolved {
        None => (StatusCode::OK, 0, length),
        Some((start, end)) => {
            insert_header(
                &mut headers,
                header::CONTENT_RANGE,
                &format!("bytes {}-{}/{}", start, end, length),
            );
            (StatusCode::PARTIAL_CONTENT, start, end - start + 1)
        }
    };
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(served));

    if start > 0 {
        if let Err(e) = reader.seek(SeekFrom::Start(start)).await {
            error!("Failed to seek blob to {}: {}", start, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let reader = BufReader::with_capacity(STREAM_CHUNK_SIZE, reader.take(served));
    let stream = ReaderStream::with_capacity(reader, STREAM_CHUNK_SIZE);

    (status, headers, Body::from_stream(stream)).into_response()
}
