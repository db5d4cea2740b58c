//! XML bodies exchanged with the store
//!
//! Parsing matches tags on byte slices and moves text out of a reused buffer
//! with `std::mem::take`, so a page of 1000 keys costs one allocation per field.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt::Write as FmtWrite;

use crate::s3::store::{Result, S3Error};
use crate::s3::types::{
    CompleteMultipartUploadResponse, CompletedPart, CreateMultipartUploadResponse,
    ListObjectsPage, S3Object,
};

/// `<Error>` body returned by the store on failure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

fn reader(xml: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;
    reader
}

/// Parse a ListObjectsV2 response page.
///
/// Text is not trimmed: keys are opaque and may start or end with spaces.
/// Whitespace between elements is discarded when the next element starts.
pub fn parse_list_page(xml: &[u8]) -> Result<ListObjectsPage> {
    let mut reader = Reader::from_reader(xml);
    let mut page = ListObjectsPage::new();
    let mut current: Option<S3Object> = None;
    let mut text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                text.clear();
                if e.local_name().as_ref() == b"Contents" {
                    current = Some(S3Object::new(String::new(), 0));
                }
            }
            Ok(Event::Text(e)) => {
                text.push_str(&e.unescape()?);
            }
            Ok(Event::CData(e)) => {
                text.push_str(&String::from_utf8_lossy(&e));
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Key" => {
                        if let Some(ref mut obj) = current {
                            obj.key = std::mem::take(&mut text);
                        }
                    }
                    b"Size" => {
                        if let Some(ref mut obj) = current {
                            obj.size = text.parse().map_err(|_| {
                                S3Error::InvalidResponse(format!("bad object size: {:?}", text))
                            })?;
                        }
                    }
                    b"LastModified" => {
                        if let Some(ref mut obj) = current {
                            obj.last_modified = Some(std::mem::take(&mut text));
                        }
                    }
                    b"ETag" => {
                        if let Some(ref mut obj) = current {
                            obj.etag = Some(text.trim_matches('"').to_string());
                        }
                    }
                    b"Contents" => {
                        if let Some(obj) = current.take() {
                            page.contents.push(obj);
                        }
                    }
                    b"IsTruncated" => page.is_truncated = text == "true",
                    b"NextContinuationToken" => {
                        page.next_continuation_token = Some(std::mem::take(&mut text));
                    }
                    b"KeyCount" => page.key_count = text.parse().ok(),
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(page)
}

/// Parse an InitiateMultipartUploadResult
pub fn parse_create_multipart(xml: &[u8]) -> Result<CreateMultipartUploadResponse> {
    let mut reader = reader(xml);
    let mut bucket = String::new();
    let mut key = String::new();
    let mut upload_id = String::new();
    let mut text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                text.clear();
                text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Bucket" => bucket = std::mem::take(&mut text),
                    b"Key" => key = std::mem::take(&mut text),
                    b"UploadId" => upload_id = std::mem::take(&mut text),
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    if upload_id.is_empty() {
        return Err(S3Error::InvalidResponse(
            "missing UploadId in CreateMultipartUpload response".to_string(),
        ));
    }

    Ok(CreateMultipartUploadResponse::new(bucket, key, upload_id))
}

/// Parse a CompleteMultipartUploadResult.
///
/// The store may answer 200 OK and still report failure in an `<Error>` body,
/// so the root element is checked before reading fields.
pub fn parse_complete_multipart(xml: &[u8]) -> Result<CompleteMultipartUploadResponse> {
    let mut reader = reader(xml);
    let mut location = None;
    let mut bucket = String::new();
    let mut key = String::new();
    let mut etag = String::new();
    let mut text = String::with_capacity(128);
    let mut seen_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if !seen_root {
                    seen_root = true;
                    if e.local_name().as_ref() == b"Error" {
                        let body = parse_error(xml);
                        return Err(S3Error::S3Response {
                            status: hyper::StatusCode::OK,
                            code: body.code,
                            message: body.message,
                        });
                    }
                }
            }
            Ok(Event::Text(e)) => {
                text.clear();
                text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Location" => location = Some(std::mem::take(&mut text)),
                    b"Bucket" => bucket = std::mem::take(&mut text),
                    b"Key" => key = std::mem::take(&mut text),
                    b"ETag" => etag = text.trim_matches('"').to_string(),
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(e.to_string())),
            _ => {}
        }
    }

    let mut response = CompleteMultipartUploadResponse::new(bucket, key, etag);
    response.location = location;
    Ok(response)
}

/// Best-effort parse of an `<Error>` body; malformed or empty bodies yield
/// empty fields.
pub fn parse_error(xml: &[u8]) -> ErrorBody {
    let mut reader = reader(xml);
    let mut body = ErrorBody::default();
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                text.clear();
                if let Ok(t) = e.unescape() {
                    text.push_str(&t);
                }
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Code" => body.code = std::mem::take(&mut text),
                    b"Message" => body.message = std::mem::take(&mut text),
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    body
}

/// Build the CompleteMultipartUpload request body
pub fn complete_multipart_body(parts: &[CompletedPart]) -> String {
    let mut xml = String::with_capacity(parts.len() * 100 + 100);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    xml.push_str("<CompleteMultipartUpload>");
    for part in parts {
        xml.push_str("<Part><PartNumber>");
        let _ = write!(xml, "{}", part.part_number);
        xml.push_str("</PartNumber><ETag>\"");
        escape_into(&mut xml, part.etag.trim_matches('"'));
        xml.push_str("\"</ETag></Part>");
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

fn escape_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' => buf.push_str("&quot;"),
            '\'' => buf.push_str("&apos;"),
            _ => buf.push(ch),
        }
    }
}
