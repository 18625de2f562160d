//! `multipart/form-data` splitting for pushed alarms.
//!
//! The camera bundles the alarm XML as a file part (e.g. `alarm.xml`) and may
//! attach snapshot images as further file parts.

use crate::error::{DecodeError, DecodeResult};
use bytes::Bytes;
use futures::stream;

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    /// A part with a filename
    File {
        name: Option<String>,
        file_name: String,
        content_type: Option<String>,
        data: Bytes,
    },
    /// A named form field without a filename
    Field { name: String, value: String },
}

impl FormPart {
    /// True for file parts whose filename ends in `.xml`, in any casing.
    pub fn is_xml_file(&self) -> bool {
        match self {
            FormPart::File { file_name, .. } => file_name.to_ascii_lowercase().ends_with(".xml"),
            FormPart::Field { .. } => false,
        }
    }
}

/// Split an already buffered multipart body into its parts, in order.
pub async fn read_parts(content_type: &str, body: Bytes) -> DecodeResult<Vec<FormPart>> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| DecodeError::MultipartParse(e.to_string()))?;

    let body_stream = stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(body_stream, boundary);

    let mut parts = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DecodeError::MultipartParse(e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(|mime| mime.to_string());

        let data = field
            .bytes()
            .await
            .map_err(|e| DecodeError::MultipartParse(e.to_string()))?;

        let part = match file_name {
            Some(file_name) => FormPart::File {
                name,
                file_name,
                content_type,
                data,
            },
            None => FormPart::Field {
                name: name.unwrap_or_default(),
                value: String::from_utf8_lossy(&data).into_owned(),
            },
        };
        parts.push(part);
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "MIME_boundary";

    fn content_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    fn body(parts: &[(&str, Option<&str>, &[u8])]) -> Bytes {
        let mut out = Vec::new();
        for (name, file_name, data) in parts {
            out.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file_name {
                Some(file_name) => out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Bytes::from(out)
    }

    #[tokio::test]
    async fn test_read_parts_keeps_order_and_kinds() {
        let payload = body(&[
            ("note", None, &b"hello"[..]),
            ("alarm", Some("Alarm.XML"), &b"<a/>"[..]),
            ("picture", Some("snap.jpg"), &[0xffu8, 0xd8, 0x00, 0x0d, 0x0a][..]),
        ]);

        let parts = read_parts(&content_type(), payload).await.unwrap();
        assert_eq!(parts.len(), 3);

        assert_eq!(
            parts[0],
            FormPart::Field {
                name: "note".to_string(),
                value: "hello".to_string()
            }
        );
        assert!(parts[1].is_xml_file());
        match &parts[2] {
            FormPart::File { file_name, data, content_type, .. } => {
                assert_eq!(file_name, "snap.jpg");
                assert_eq!(&data[..], &[0xffu8, 0xd8, 0x00, 0x0d, 0x0a][..]);
                assert_eq!(content_type.as_deref(), Some("application/octet-stream"));
            }
            other => panic!("expected file part, got {other:?}"),
        }
        assert!(!parts[2].is_xml_file());
    }

    #[tokio::test]
    async fn test_missing_boundary_is_an_error() {
        let result = read_parts("multipart/form-data", Bytes::from_static(b"whatever")).await;
        assert!(matches!(result, Err(DecodeError::MultipartParse(_))));
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let payload = Bytes::from(format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"a\"; filename=\"a.xml\"\r\n\r\n<a/>"
        ));
        let result = read_parts(&content_type(), payload).await;
        assert!(matches!(result, Err(DecodeError::MultipartParse(_))));
    }
}
