use std::collections::HashMap;

use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use bytes::Bytes;

use udagram_storage::UploadRequest;

use crate::error::{ApiError, ApiResult};

/// 10 MB limit for images
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

const FILE_FIELD: &str = "file";

/// A multipart form with text fields and at most one `file` part.
pub struct ImageForm {
    pub fields: HashMap<String, String>,
    pub file: Option<ImagePart>,
}

pub struct ImagePart {
    pub bytes: Bytes,
    pub file_name: String,
    pub mime_type: String,
}

impl ImagePart {
    pub fn into_upload(self, folder: &str) -> UploadRequest {
        UploadRequest {
            file: self.bytes,
            file_name: self.file_name,
            mime_type: self.mime_type,
            folder: folder.to_string(),
        }
    }
}

pub async fn read_image_form(mut multipart: Multipart) -> ApiResult<ImageForm> {
    let mut fields = HashMap::new();
    let mut file = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == FILE_FIELD {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let mime_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            if !mime_type.starts_with("image/") {
                return Err(ApiError::Validation(format!(
                    "Unsupported file type {}; only images are accepted",
                    mime_type
                )));
            }

            let bytes = field.bytes().await.map_err(multipart_error)?;
            if bytes.is_empty() {
                return Err(ApiError::Validation("Uploaded file is empty".into()));
            }
            if bytes.len() > MAX_IMAGE_SIZE {
                return Err(ApiError::PayloadTooLarge(MAX_IMAGE_SIZE));
            }

            file = Some(ImagePart {
                bytes,
                file_name,
                mime_type,
            });
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            fields.insert(name, value);
        }
    }

    Ok(ImageForm { fields, file })
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(MAX_IMAGE_SIZE)
    } else {
        ApiError::Validation(format!("Malformed multipart body: {}", err.body_text()))
    }
}
