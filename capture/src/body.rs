//! Request body variants and their decode rules.
//!
//! The host describes an outgoing body in one of several shapes (parsed form
//! fields, raw upload chunks, or nothing). [`BodyDescriptor::resolve`] turns
//! that description into a [`RequestBody`] exactly once, at capture time.
//! Replayed records always carry [`RequestBody::Text`].

use serde::{Deserialize, Serialize};

/// One form field and all of its values, in submission order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    /// Field name
    pub name: String,
    /// Values, repeated fields keep every value
    pub values: Vec<String>,
}

impl FormField {
    /// Create a field with the given values
    pub fn new<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Resolved request body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum RequestBody {
    /// Raw bytes of the upload
    Raw(Vec<u8>),
    /// Parsed form fields
    Form(Vec<FormField>),
    /// Plain text (user-entered replay bodies)
    Text(String),
}

impl RequestBody {
    /// Render the body as editable text.
    ///
    /// - form fields are url-encoded as `name=value&...`, keeping field order
    ///   and repeated values
    /// - raw bytes are decoded as UTF-8, invalid sequences become U+FFFD
    /// - text is returned as is
    #[must_use]
    pub fn to_editable_text(&self) -> String {
        match self {
            Self::Raw(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Self::Form(fields) => {
                let pairs: Vec<(&str, &str)> = fields
                    .iter()
                    .flat_map(|field| {
                        field
                            .values
                            .iter()
                            .map(move |value| (field.name.as_str(), value.as_str()))
                    })
                    .collect();
                serde_urlencoded::to_string(pairs).unwrap_or_default()
            },
            Self::Text(text) => text.clone(),
        }
    }
}

/// Editable text of an optional body; absent bodies are empty.
#[must_use]
pub fn editable_text(body: Option<&RequestBody>) -> String {
    body.map(RequestBody::to_editable_text).unwrap_or_default()
}

/// One chunk of a raw upload as reported by the host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadChunk {
    /// In-memory bytes of the chunk
    #[serde(default)]
    pub bytes: Option<Vec<u8>>,
    /// Path of a file-backed chunk; its bytes are never available
    #[serde(default)]
    pub file: Option<String>,
}

/// Request body as described by the host on initiation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyDescriptor {
    /// Parsed form fields, when the host recognised a form encoding
    #[serde(default)]
    pub form_data: Option<Vec<FormField>>,
    /// Raw upload chunks
    #[serde(default)]
    pub raw: Option<Vec<UploadChunk>>,
    /// Host-side failure to read the body
    #[serde(default)]
    pub error: Option<String>,
}

impl BodyDescriptor {
    /// Resolve the descriptor into a body variant.
    ///
    /// Form data wins over raw chunks. In-memory chunks are concatenated in
    /// order; file-backed chunks contribute nothing. A descriptor carrying
    /// only an error, or raw chunks without any in-memory bytes, resolves to
    /// `None`.
    #[must_use]
    pub fn resolve(self) -> Option<RequestBody> {
        if let Some(fields) = self.form_data {
            return Some(RequestBody::Form(fields));
        }

        let chunks = self.raw?;
        let mut bytes = Vec::new();
        let mut any = false;
        for chunk in chunks {
            if let Some(data) = chunk.bytes {
                any = true;
                bytes.extend_from_slice(&data);
            }
        }

        if any {
            Some(RequestBody::Raw(bytes))
        } else {
            if let Some(error) = self.error {
                tracing::debug!(error = %error, "Host could not read request body");
            }
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code
mod tests {
    use super::*;

    #[test]
    fn form_fields_encode_in_order_with_repeats() {
        let body = RequestBody::Form(vec![
            FormField::new("b", ["2"]),
            FormField::new("a", ["1", "one more"]),
        ]);
        assert_eq!(body.to_editable_text(), "b=2&a=1&a=one+more");
    }

    #[test]
    fn raw_bytes_decode_lossily() {
        assert_eq!(
            RequestBody::Raw(b"{\"k\":1}".to_vec()).to_editable_text(),
            "{\"k\":1}"
        );
        assert_eq!(
            RequestBody::Raw(vec![b'a', 0xff, b'b']).to_editable_text(),
            "a\u{fffd}b"
        );
    }

    #[test]
    fn absent_body_is_empty_text() {
        assert_eq!(editable_text(None), "");
        assert_eq!(
            editable_text(Some(&RequestBody::Text("hello".into()))),
            "hello"
        );
    }

    #[test]
    fn form_data_takes_precedence_over_raw() {
        let descriptor = BodyDescriptor {
            form_data: Some(vec![FormField::new("q", ["x"])]),
            raw: Some(vec![UploadChunk {
                bytes: Some(b"ignored".to_vec()),
                file: None,
            }]),
            error: None,
        };
        assert!(matches!(descriptor.resolve(), Some(RequestBody::Form(_))));
    }

    #[test]
    fn raw_chunks_concatenate_and_skip_files() {
        let descriptor = BodyDescriptor {
            form_data: None,
            raw: Some(vec![
                UploadChunk {
                    bytes: Some(b"ab".to_vec()),
                    file: None,
                },
                UploadChunk {
                    bytes: None,
                    file: Some("/tmp/upload.bin".into()),
                },
                UploadChunk {
                    bytes: Some(b"cd".to_vec()),
                    file: None,
                },
            ]),
            error: None,
        };
        assert_eq!(descriptor.resolve(), Some(RequestBody::Raw(b"abcd".to_vec())));
    }

    #[test]
    fn file_only_or_error_resolves_to_none() {
        let file_only = BodyDescriptor {
            raw: Some(vec![UploadChunk {
                bytes: None,
                file: Some("/tmp/a".into()),
            }]),
            ..BodyDescriptor::default()
        };
        assert_eq!(file_only.resolve(), None);

        let failed = BodyDescriptor {
            error: Some("stream closed".into()),
            ..BodyDescriptor::default()
        };
        assert_eq!(failed.resolve(), None);
    }

    #[test]
    fn descriptor_deserializes_host_shape() {
        let descriptor: BodyDescriptor = serde_json::from_str(
            r#"{"formData":[{"name":"user","values":["ann"]}]}"#,
        )
        .unwrap_or_default();
        assert_eq!(
            descriptor.resolve(),
            Some(RequestBody::Form(vec![FormField::new("user", ["ann"])]))
        );
    }
}
