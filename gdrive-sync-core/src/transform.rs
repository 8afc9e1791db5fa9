//! Body fixups applied to every exported document.
//!
//! Passes run in order: embedded PNG recompression, blockquote unescaping,
//! shortcode unescaping. A failing pass leaves the body as the previous pass
//! produced it and contributes one message to the artifact's
//! `conversion_error`.

use std::sync::Arc;

use base64::prelude::*;
use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use crate::contract::ImageCodec;

/// `[image1]: <data:image/png;base64,...>` on a line of its own.
const REFERENCE_IMAGE_PATTERN: &str = r"(?m)^(\[image[0-9]+\]: <)(data:image/png;base64,[^>]+)(>)$";
/// `![alt](data:image/png;base64,...)`.
const INLINE_IMAGE_PATTERN: &str = r"(!\[.*?\]\()(data:image/png;base64,[^\)]+)(\))";
const ESCAPED_BLOCKQUOTE_PATTERN: &str = r"(?m)^\\> ";
/// A Hugo shortcode wrapped in backticks by the editor: `` `{{< ref "x" >}}` ``.
const ESCAPED_SHORTCODE_PATTERN: &str = r"`(\{\{[<%].*?[%>]\}\})`";

const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Embedded image counters for one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageStats {
    pub found: usize,
    pub converted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutput {
    pub body: String,
    pub images: ImageStats,
    /// One entry per failed pass.
    pub errors: Vec<String>,
}

impl TransformOutput {
    /// The `conversion_error` value for this output, if any pass failed.
    pub fn conversion_error(&self) -> Option<String> {
        (!self.errors.is_empty()).then(|| self.errors.join("; "))
    }
}

#[derive(Clone)]
pub struct ContentTransform {
    codec: Arc<dyn ImageCodec>,
}

impl std::fmt::Debug for ContentTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentTransform").finish_non_exhaustive()
    }
}

impl ContentTransform {
    pub fn new(codec: Arc<dyn ImageCodec>) -> Self {
        Self { codec }
    }

    pub fn apply(&self, file_id: &str, body: &str) -> TransformOutput {
        let mut out = TransformOutput {
            body: body.to_string(),
            ..TransformOutput::default()
        };

        match self.process_images(file_id, &out.body) {
            Ok((body, stats)) => {
                out.body = body;
                out.images = stats;
            }
            Err(e) => {
                warn!(file_id, error = %e, "[TRANSFORM] Image processing failed");
                out.errors.push(format!("Image processing error: {e}"));
            }
        }

        match replace_all(ESCAPED_BLOCKQUOTE_PATTERN, &out.body, "> ") {
            Ok(body) => out.body = body,
            Err(e) => {
                warn!(file_id, error = %e, "[TRANSFORM] Blockquote unescaping failed");
                out.errors.push(format!("Blockquote unescaping error: {e}"));
            }
        }

        match replace_all(ESCAPED_SHORTCODE_PATTERN, &out.body, "$1") {
            Ok(body) => out.body = body,
            Err(e) => {
                warn!(file_id, error = %e, "[TRANSFORM] Shortcode unescaping failed");
                out.errors.push(format!("Shortcode unescaping error: {e}"));
            }
        }

        out
    }

    fn process_images(
        &self,
        file_id: &str,
        body: &str,
    ) -> Result<(String, ImageStats), regex::Error> {
        let mut stats = ImageStats::default();
        let mut body = body.to_string();

        for pattern in [REFERENCE_IMAGE_PATTERN, INLINE_IMAGE_PATTERN] {
            let re = Regex::new(pattern)?;
            body = re
                .replace_all(&body, |caps: &Captures<'_>| {
                    stats.found += 1;
                    let data_uri = &caps[2];
                    let replacement = match self.convert(file_id, data_uri) {
                        Some(converted) => {
                            stats.converted += 1;
                            converted
                        }
                        None => data_uri.to_string(),
                    };
                    format!("{}{}{}", &caps[1], replacement, &caps[3])
                })
                .into_owned();
        }

        if stats.found > 0 {
            info!(
                file_id,
                found = stats.found,
                converted = stats.converted,
                "[TRANSFORM] Processed embedded PNG images"
            );
        }
        Ok((body, stats))
    }

    /// New data URI for one PNG data URI, or `None` to keep the original.
    fn convert(&self, file_id: &str, data_uri: &str) -> Option<String> {
        let payload = data_uri.strip_prefix(PNG_DATA_URI_PREFIX)?;
        let raw = match BASE64_STANDARD.decode(payload.trim()) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(file_id, error = %e, "[TRANSFORM] Invalid base64 image payload, leaving unchanged");
                return None;
            }
        };
        match self.codec.recompress(&raw) {
            Ok(encoded) => {
                debug!(file_id, mime_type = %encoded.mime_type, "[TRANSFORM] Image re-encoded");
                Some(format!(
                    "data:{};base64,{}",
                    encoded.mime_type,
                    BASE64_STANDARD.encode(&encoded.bytes)
                ))
            }
            Err(e) => {
                warn!(file_id, error = %e, "[TRANSFORM] Image conversion failed, leaving unchanged");
                None
            }
        }
    }
}

fn replace_all(pattern: &str, text: &str, replacement: &str) -> Result<String, regex::Error> {
    Ok(Regex::new(pattern)?.replace_all(text, replacement).into_owned())
}
