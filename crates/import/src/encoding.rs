use serde::Serialize;
use std::fmt;

use crate::error::ValidationError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Highest share of U+FFFD tolerated before UTF-8 is ruled out.
const MAX_REPLACEMENT_RATIO: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextEncoding {
    Utf8,
    Latin1,
    Windows1252,
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextEncoding::Utf8 => write!(f, "UTF-8"),
            TextEncoding::Latin1 => write!(f, "ISO-8859-1"),
            TextEncoding::Windows1252 => write!(f, "windows-1252"),
        }
    }
}

/// Decodes an export, trying UTF-8, Latin-1 then Windows-1252. Strips a BOM.
pub fn decode(data: &[u8]) -> Result<(String, TextEncoding), ValidationError> {
    if data.contains(&0) {
        return Err(ValidationError::UnreadableEncoding {
            detail: "content contains NUL bytes (UTF-16 or binary?)".to_string(),
        });
    }

    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);

    if let Ok(text) = std::str::from_utf8(data) {
        return Ok((text.to_string(), TextEncoding::Utf8));
    }
    let lossy = String::from_utf8_lossy(data);
    let total = lossy.chars().count().max(1);
    let replaced = lossy.chars().filter(|&c| c == char::REPLACEMENT_CHARACTER).count();
    if (replaced as f64 / total as f64) <= MAX_REPLACEMENT_RATIO {
        tracing::debug!(replaced, "accepting UTF-8 with a few invalid sequences");
        return Ok((lossy.into_owned(), TextEncoding::Utf8));
    }

    // Bytes 0x80–0x9F are C1 controls in Latin-1 but printable in Windows-1252.
    if !data.iter().any(|b| (0x80..=0x9F).contains(b)) {
        let text: String = data.iter().map(|&b| b as char).collect();
        return Ok((text, TextEncoding::Latin1));
    }

    let (text, had_errors) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(data);
    if had_errors {
        return Err(ValidationError::UnreadableEncoding {
            detail: "not valid UTF-8, ISO-8859-1 or windows-1252".to_string(),
        });
    }
    Ok((text.into_owned(), TextEncoding::Windows1252))
}
