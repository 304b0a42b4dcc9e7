use bytes::Bytes;
use reqwest::multipart::{Form, Part};

use crate::error::GatewayError;
use crate::multipart::FormPart;

pub const MAX_AUDIO_FILE_BYTES: usize = 25 * 1024 * 1024;

const SUPPORTED_AUDIO_EXTENSIONS: &[&str] = &["mp3", "mp4", "mpeg", "mpga", "m4a", "wav", "webm"];

/// The two upstream audio endpoints and the model set each accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioEndpoint {
    Transcriptions,
    Translations,
}

impl AudioEndpoint {
    pub fn upstream_path(self) -> &'static str {
        match self {
            Self::Transcriptions => "/v1/audio/transcriptions",
            Self::Translations => "/v1/audio/translations",
        }
    }

    fn supports_model(self, model: &str) -> bool {
        match self {
            Self::Transcriptions => {
                matches!(model, "whisper-1" | "gpt-4o-transcribe" | "gpt-4o-mini-transcribe")
            }
            Self::Translations => model == "whisper-1",
        }
    }
}

fn allowed_response_formats(model: &str) -> &'static [&'static str] {
    match model {
        "whisper-1" => &["json", "text", "srt", "verbose_json", "vtt"],
        "gpt-4o-transcribe" | "gpt-4o-mini-transcribe" => &["json", "text"],
        _ => &[],
    }
}

/// A validated audio request, ready to be rebuilt as a fresh outbound form.
/// Text fields are copied by value; nothing references the inbound parts.
#[derive(Debug)]
pub struct AudioForm {
    file_name: String,
    file_content_type: Option<String>,
    file_data: Bytes,
    text_fields: Vec<(String, String)>,
}

impl AudioForm {
    pub fn into_multipart(self) -> Result<Form, GatewayError> {
        let mut part = Part::stream(reqwest::Body::from(self.file_data)).file_name(self.file_name);
        if let Some(content_type) = self.file_content_type {
            part = part
                .mime_str(&content_type)
                .map_err(|_| GatewayError::bad_request("invalid_multipart_body"))?;
        }
        let mut form = Form::new().part("file", part);
        for (name, value) in self.text_fields {
            form = form.text(name, value);
        }
        Ok(form)
    }
}

/// Checks the decoded parts in a fixed order so the first violated rule
/// decides the rejection reason, then copies everything into a new form.
pub fn validate_parts(parts: Vec<FormPart>, endpoint: AudioEndpoint) -> Result<AudioForm, GatewayError> {
    if parts.iter().any(|part| part.is_file() && part.name != "file") {
        return Err(GatewayError::bad_request("unexpected_file_part"));
    }

    let file_parts: Vec<&FormPart> = parts.iter().filter(|part| part.name == "file").collect();
    let file = match file_parts.as_slice() {
        [] => return Err(GatewayError::bad_request("file_is_required")),
        [single] => {
            if !single.is_file() {
                return Err(GatewayError::bad_request("file_must_be_file_part"));
            }
            *single
        }
        _ => return Err(GatewayError::bad_request("file_must_be_single")),
    };

    let model = required_text_field(&parts, "model")?;
    if !endpoint.supports_model(&model) {
        return Err(GatewayError::bad_request("unsupported_model"));
    }

    if let Some(response_format) = optional_text_field(&parts, "response_format")? {
        if response_format.is_empty()
            || !allowed_response_formats(&model).contains(&response_format.as_str())
        {
            return Err(GatewayError::bad_request(
                "unsupported_response_format_for_model",
            ));
        }
    }

    // Prompt is pass-through only, but a duplicated field is still malformed.
    optional_text_field(&parts, "prompt")?;

    let filename = file.filename.as_deref().unwrap_or_default();
    let extension = file_extension(filename);
    if !extension
        .as_deref()
        .is_some_and(|ext| SUPPORTED_AUDIO_EXTENSIONS.contains(&ext))
    {
        return Err(GatewayError::bad_request("unsupported_file_format"));
    }

    if file.data.len() > MAX_AUDIO_FILE_BYTES {
        return Err(GatewayError::PayloadTooLarge);
    }

    let text_fields = parts
        .iter()
        .filter(|part| !part.is_file())
        .map(|part| (part.name.clone(), part.text_value()))
        .collect();

    Ok(AudioForm {
        file_name: filename.to_string(),
        file_content_type: file.content_type.clone(),
        file_data: file.data.clone(),
        text_fields,
    })
}

fn required_text_field(parts: &[FormPart], name: &str) -> Result<String, GatewayError> {
    let candidates: Vec<&FormPart> = parts.iter().filter(|part| part.name == name).collect();
    match candidates.as_slice() {
        [] => Err(GatewayError::bad_request(format!("{name}_is_required"))),
        [single] if !single.is_file() => {
            let value = single.text_value().trim().to_string();
            if value.is_empty() {
                return Err(GatewayError::bad_request(format!("{name}_is_required")));
            }
            Ok(value)
        }
        _ => Err(GatewayError::bad_request(format!(
            "{name}_must_be_single_text_field"
        ))),
    }
}

fn optional_text_field(parts: &[FormPart], name: &str) -> Result<Option<String>, GatewayError> {
    let candidates: Vec<&FormPart> = parts.iter().filter(|part| part.name == name).collect();
    match candidates.as_slice() {
        [] => Ok(None),
        [single] if !single.is_file() => Ok(Some(single.text_value().trim().to_string())),
        _ => Err(GatewayError::bad_request(format!(
            "{name}_must_be_single_text_field_when_present"
        ))),
    }
}

/// Text after the final dot, lowercased. A leading or lone trailing dot
/// yields no extension.
fn file_extension(filename: &str) -> Option<String> {
    let trimmed = filename.trim();
    let dot = trimmed.rfind('.')?;
    if dot == 0 || dot == trimmed.len() - 1 {
        return None;
    }
    Some(trimmed[dot + 1..].to_lowercase())
}
