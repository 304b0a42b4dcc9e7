use bytes::Bytes;

/// One decoded part of a `multipart/form-data` body. A part with a filename
/// is a file part; everything else is a text field.
#[derive(Debug, Clone)]
pub struct FormPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl FormPart {
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }

    pub fn text_value(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    for parameter in content_type.split(';').map(str::trim) {
        let lowered = parameter.to_ascii_lowercase();
        if !lowered.starts_with("boundary=") {
            continue;
        }
        let value = parameter["boundary=".len()..].trim();
        let unquoted = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        if !unquoted.trim().is_empty() {
            return Some(unquoted.to_string());
        }
    }
    None
}

/// Decodes a fully buffered multipart body. Tolerates both CRLF and bare LF
/// separators; any structural problem is reported as an error string since
/// the caller collapses all of them into one rejection reason.
pub fn parse_form(content_type: &str, body: &Bytes) -> Result<Vec<FormPart>, String> {
    let boundary =
        boundary_from_content_type(content_type).ok_or("multipart boundary is missing")?;
    let opening = format!("--{boundary}");
    let delimiter = format!("\r\n--{boundary}");

    let bytes = body.as_ref();
    let mut cursor = find_subslice(bytes, opening.as_bytes(), 0)
        .ok_or("multipart body missing boundary marker")?
        + opening.len();

    let mut parts = Vec::new();
    loop {
        if bytes.get(cursor..cursor + 2) == Some(b"--") {
            break;
        }
        cursor += line_break_len(bytes, cursor);

        let (headers_end, separator_len) = if let Some(idx) =
            find_subslice(bytes, b"\r\n\r\n", cursor)
        {
            (idx, 4)
        } else if let Some(idx) = find_subslice(bytes, b"\n\n", cursor) {
            (idx, 2)
        } else {
            return Err("multipart part missing header separator".to_string());
        };

        let header = parse_part_headers(&bytes[cursor..headers_end])?;
        let data_start = headers_end + separator_len;
        let data_end = find_subslice(bytes, delimiter.as_bytes(), data_start)
            .ok_or("multipart part missing trailing boundary")?;

        parts.push(FormPart {
            name: header.name,
            filename: header.filename,
            content_type: header.content_type,
            data: body.slice(data_start..data_end),
        });

        cursor = data_end + delimiter.len();
        if bytes.get(cursor..cursor + 2) == Some(b"--") {
            break;
        }
        cursor += line_break_len(bytes, cursor);
    }

    Ok(parts)
}

struct PartHeader {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
}

fn parse_part_headers(raw: &[u8]) -> Result<PartHeader, String> {
    let text = String::from_utf8_lossy(raw);
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            for item in value.split(';').map(str::trim) {
                if let Some(rest) = item.strip_prefix("name=") {
                    name = Some(unquote(rest).to_string());
                } else if let Some(rest) = item.strip_prefix("filename=") {
                    filename = Some(unquote(rest).to_string());
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") && !value.is_empty() {
            content_type = Some(value.to_string());
        }
    }

    let name = name.ok_or("multipart part missing content-disposition name")?;
    Ok(PartHeader {
        name,
        filename,
        content_type,
    })
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn line_break_len(bytes: &[u8], at: usize) -> usize {
    if bytes.get(at..at + 2) == Some(b"\r\n") {
        2
    } else if bytes.get(at..at + 1) == Some(b"\n") {
        1
    } else {
        0
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(start);
    }
    if start >= haystack.len() {
        return None;
    }
    let first = needle[0];
    let mut pos = start;
    while pos + needle.len() <= haystack.len() {
        let rel = haystack[pos..].iter().position(|&b| b == first)?;
        pos += rel;
        if pos + needle.len() > haystack.len() {
            return None;
        }
        if &haystack[pos..pos + needle.len()] == needle {
            return Some(pos);
        }
        pos += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_with(parts: &[(&str, Option<&str>, Option<&str>, &str)]) -> (String, Bytes) {
        let boundary = "xyzboundary";
        let mut out = Vec::new();
        for (name, filename, content_type, data) in parts {
            out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match filename {
                Some(filename) => out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
                    )
                    .as_bytes(),
                ),
                None => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n").as_bytes(),
                ),
            }
            if let Some(content_type) = content_type {
                out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(data.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        (
            format!("multipart/form-data; boundary={boundary}"),
            Bytes::from(out),
        )
    }

    #[test]
    fn parses_file_and_text_parts() {
        let (content_type, body) = body_with(&[
            ("file", Some("clip.mp3"), Some("audio/mpeg"), "MP3DATA"),
            ("model", None, None, "whisper-1"),
        ]);
        let parts = parse_form(&content_type, &body).expect("parse");
        assert_eq!(parts.len(), 2);
        assert!(parts[0].is_file());
        assert_eq!(parts[0].filename.as_deref(), Some("clip.mp3"));
        assert_eq!(parts[0].content_type.as_deref(), Some("audio/mpeg"));
        assert_eq!(parts[0].data.as_ref(), b"MP3DATA");
        assert!(!parts[1].is_file());
        assert_eq!(parts[1].text_value(), "whisper-1");
    }

    #[test]
    fn quoted_boundary_is_accepted() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=\"abc\""),
            Some("abc".to_string())
        );
    }

    #[test]
    fn missing_boundary_is_an_error() {
        let err = parse_form("multipart/form-data", &Bytes::from_static(b"x"))
            .expect_err("no boundary");
        assert!(err.contains("boundary"));
    }

    #[test]
    fn truncated_body_is_an_error() {
        let (content_type, body) = body_with(&[("model", None, None, "whisper-1")]);
        let truncated = body.slice(0..body.len() - 8);
        assert!(parse_form(&content_type, &truncated).is_err());
    }
}
