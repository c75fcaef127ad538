//! Uploaded image files

use image::ImageFormat;
use std::path::Path;

use crate::error::InferenceError;

/// Image containers accepted by the upload widget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    /// File extensions offered in the upload dialog
    pub const EXTENSIONS: [&'static str; 3] = ["jpg", "jpeg", "png"];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            _ => None,
        }
    }

    pub fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            ImageFormat::Png => Some(ImageKind::Png),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
        }
    }
}

impl From<ImageKind> for ImageFormat {
    fn from(kind: ImageKind) -> Self {
        match kind {
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Png => ImageFormat::Png,
        }
    }
}

/// An image file received from the client
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            file_name: None,
            content_type: None,
            bytes,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Classify the upload as JPEG or PNG.
    ///
    /// An unsupported extension or content type is rejected outright. When
    /// the magic bytes are recognized they decide the kind, so a GIF renamed
    /// to `.png` is still refused. Unrecognized bytes fall back to the
    /// declared kind and fail later in the decoder.
    pub fn kind(&self) -> Result<ImageKind, InferenceError> {
        if self.bytes.is_empty() {
            return Err(InferenceError::EmptyUpload);
        }

        let declared = self.declared_kind()?;

        match image::guess_format(&self.bytes) {
            Ok(format) => ImageKind::from_format(format)
                .ok_or_else(|| InferenceError::UnsupportedFormat(format!("{format:?}"))),
            Err(_) => declared
                .ok_or_else(|| InferenceError::UnsupportedFormat("unknown".to_string())),
        }
    }

    /// Kind claimed by the file extension, else by the content type
    fn declared_kind(&self) -> Result<Option<ImageKind>, InferenceError> {
        if let Some(ext) = self
            .file_name
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
        {
            return ImageKind::from_extension(ext)
                .map(Some)
                .ok_or_else(|| InferenceError::UnsupportedFormat(ext.to_string()));
        }

        match self
            .content_type
            .as_deref()
            .filter(|mime| *mime != "application/octet-stream")
        {
            Some(mime) => ImageKind::from_mime(mime)
                .map(Some)
                .ok_or_else(|| InferenceError::UnsupportedFormat(mime.to_string())),
            None => Ok(None),
        }
    }

    /// Name to show next to the image
    pub fn display_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or("Uploaded Image")
    }
}
