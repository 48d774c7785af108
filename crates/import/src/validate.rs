use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::csv::Table;
use crate::error::SecurityRejection;

pub const MAX_FILENAME_CHARS: usize = 255;
pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const OLE2_MAGIC: &[u8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// How many leading bytes are inspected for sniffing.
const SNIFF_LEN: usize = 8192;

const ALLOWED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls"];

/// Header words that mark a bank export even without a delimiter.
const HEADER_TOKENS: &[&str] = &[
    "date", "libelle", "label", "montant", "amount", "description", "compte", "account",
    "debit", "credit", "operation", "valeur",
];

const FORBIDDEN_PATTERNS: &[&str] = &["<script", "<?php", "exec(", "eval("];

/// Content kind detected from magic bytes, with a text fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mime {
    Csv,
    PlainText,
    LegacySpreadsheet,
    OoxmlSpreadsheet,
    Zip,
    Pdf,
    Image,
    Executable,
    Html,
    Binary,
}

impl Mime {
    pub fn is_allowed(self) -> bool {
        matches!(
            self,
            Mime::Csv
                | Mime::PlainText
                | Mime::LegacySpreadsheet
                | Mime::OoxmlSpreadsheet
                | Mime::Zip
        )
    }

    pub fn is_text(self) -> bool {
        matches!(self, Mime::Csv | Mime::PlainText)
    }

    pub fn is_spreadsheet(self) -> bool {
        matches!(
            self,
            Mime::LegacySpreadsheet | Mime::OoxmlSpreadsheet | Mime::Zip
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mime::Csv => "text/csv",
            Mime::PlainText => "text/plain",
            Mime::LegacySpreadsheet => "application/vnd.ms-excel",
            Mime::OoxmlSpreadsheet => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            Mime::Zip => "application/zip",
            Mime::Pdf => "application/pdf",
            Mime::Image => "image/*",
            Mime::Executable => "application/x-executable",
            Mime::Html => "text/html",
            Mime::Binary => "application/octet-stream",
        }
    }
}

impl fmt::Display for Mime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sniffs the content type from the leading bytes.
pub fn detect_mime(data: &[u8]) -> Mime {
    let head = &data[..data.len().min(SNIFF_LEN)];

    if head.starts_with(OLE2_MAGIC) {
        return Mime::LegacySpreadsheet;
    }
    if head.starts_with(ZIP_MAGIC) {
        // OOXML workbooks store their parts under `xl/`.
        return if contains_bytes(data, b"xl/") {
            Mime::OoxmlSpreadsheet
        } else {
            Mime::Zip
        };
    }
    if head.starts_with(b"%PDF") {
        return Mime::Pdf;
    }
    if head.starts_with(b"\x89PNG")
        || head.starts_with(b"\xFF\xD8\xFF")
        || head.starts_with(b"GIF8")
    {
        return Mime::Image;
    }
    if head.starts_with(b"MZ") || head.starts_with(b"\x7FELF") {
        return Mime::Executable;
    }
    if head.contains(&0) {
        return Mime::Binary;
    }

    let body = head.strip_prefix(UTF8_BOM).unwrap_or(head);
    let text = String::from_utf8_lossy(body).to_ascii_lowercase();
    let trimmed = text.trim_start();
    if trimmed.starts_with("<!doctype html") || trimmed.starts_with("<html") {
        return Mime::Html;
    }
    if looks_delimited(first_line(&text)) {
        Mime::Csv
    } else {
        Mime::PlainText
    }
}

/// What the validator learned about an accepted upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedFormat {
    pub mime: Mime,
    pub has_bom: bool,
}

/// Gatekeeper for uploads; pure, no I/O.
#[derive(Debug, Clone)]
pub struct FileValidator {
    pub max_bytes: usize,
}

impl Default for FileValidator {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl FileValidator {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Fails closed: any doubt is a `false`.
    pub fn validate(&self, filename: &str, data: &[u8]) -> bool {
        self.inspect(filename, data).is_ok()
    }

    pub fn inspect(
        &self,
        filename: &str,
        data: &[u8],
    ) -> Result<DetectedFormat, SecurityRejection> {
        let result = self.check(filename, data);
        if let Err(reason) = &result {
            tracing::warn!(filename, %reason, "upload rejected");
        }
        result
    }

    fn check(&self, filename: &str, data: &[u8]) -> Result<DetectedFormat, SecurityRejection> {
        let extension = check_filename(filename)?;

        if data.is_empty() {
            return Err(SecurityRejection::EmptyContent);
        }
        if data.len() > self.max_bytes {
            return Err(SecurityRejection::TooLarge {
                size: data.len(),
                max: self.max_bytes,
            });
        }

        let mime = detect_mime(data);
        if !mime.is_allowed() {
            return Err(SecurityRejection::DisallowedMime { mime });
        }
        if !has_known_signature(data, mime) {
            return Err(SecurityRejection::UnrecognizedSignature);
        }
        let consistent = match extension.as_str() {
            "csv" => mime.is_text(),
            "xlsx" => matches!(mime, Mime::OoxmlSpreadsheet | Mime::Zip),
            // Many banks ship tab-separated text under an .xls name.
            "xls" => mime == Mime::LegacySpreadsheet || mime.is_text(),
            _ => false,
        };
        if !consistent {
            return Err(SecurityRejection::ExtensionMismatch { extension, mime });
        }

        // Run regardless of how well-formed the file otherwise looks.
        scan_for_active_content(data)?;

        Ok(DetectedFormat {
            mime,
            has_bom: data.starts_with(UTF8_BOM),
        })
    }
}

fn check_filename(filename: &str) -> Result<String, SecurityRejection> {
    let name = filename.trim();
    if name.is_empty() {
        return Err(SecurityRejection::EmptyFilename);
    }
    let length = name.chars().count();
    if length > MAX_FILENAME_CHARS {
        return Err(SecurityRejection::FilenameTooLong { length });
    }
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(SecurityRejection::UnsupportedExtension { extension });
    }
    Ok(extension)
}

fn has_known_signature(data: &[u8], mime: Mime) -> bool {
    if data.starts_with(UTF8_BOM) || data.starts_with(OLE2_MAGIC) || data.starts_with(ZIP_MAGIC)
    {
        return true;
    }
    if !mime.is_text() {
        return false;
    }
    let head = &data[..data.len().min(SNIFF_LEN)];
    let text = String::from_utf8_lossy(head).to_lowercase();
    let line = first_line(&text);
    looks_delimited(line) || {
        let folded = crate::columns::fold_accents(line);
        HEADER_TOKENS.iter().any(|t| folded.contains(t))
    }
}

fn scan_for_active_content(data: &[u8]) -> Result<(), SecurityRejection> {
    scan_text(&String::from_utf8_lossy(data))
}

fn scan_text(text: &str) -> Result<(), SecurityRejection> {
    let text = text.to_lowercase();

    if let Some(pattern) = FORBIDDEN_PATTERNS.iter().find(|p| text.contains(**p)) {
        return Err(SecurityRejection::SuspiciousContent {
            pattern: pattern.to_string(),
        });
    }

    let body = text.strip_prefix('\u{feff}').unwrap_or(&text);
    if body.lines().any(|l| l.trim_start().starts_with("#!")) {
        return Err(SecurityRejection::SuspiciousContent {
            pattern: "#!".to_string(),
        });
    }
    Ok(())
}

/// Scans every decoded header and cell. Workbook bytes are compressed, so
/// the upload-level scan cannot see what their cells hold.
pub fn scan_table(table: &Table) -> Result<(), SecurityRejection> {
    let cells = table
        .rows
        .iter()
        .flat_map(|row| row.iter().map(|(_, value)| value));
    for text in table.headers.iter().map(String::as_str).chain(cells) {
        scan_text(text)?;
    }
    Ok(())
}

fn first_line(text: &str) -> &str {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    text.lines().find(|l| !l.trim().is_empty()).unwrap_or("")
}

fn looks_delimited(line: &str) -> bool {
    crate::csv::DELIMITERS
        .iter()
        .any(|&d| crate::csv::count_fields(line, d) > 1)
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &[u8] = b"Date,Description,Montant\n15/01/2024,CB POKAWA,-12.50\n";

    fn validator() -> FileValidator {
        FileValidator::default()
    }

    #[test]
    fn accepts_plain_csv() {
        let format = validator().inspect("releve.csv", CSV).unwrap();
        assert_eq!(format.mime, Mime::Csv);
        assert!(!format.has_bom);
    }

    #[test]
    fn accepts_csv_with_bom() {
        let mut data = UTF8_BOM.to_vec();
        data.extend_from_slice(CSV);
        let format = validator().inspect("releve.CSV", &data).unwrap();
        assert!(format.has_bom);
    }

    #[test]
    fn rejects_bad_filenames() {
        let v = validator();
        assert_eq!(v.inspect("", CSV), Err(SecurityRejection::EmptyFilename));
        let long = format!("{}.csv", "a".repeat(300));
        assert!(matches!(
            v.inspect(&long, CSV),
            Err(SecurityRejection::FilenameTooLong { length: 304 })
        ));
        assert!(matches!(
            v.inspect("releve.exe", CSV),
            Err(SecurityRejection::UnsupportedExtension { .. })
        ));
        assert!(matches!(
            v.inspect("releve", CSV),
            Err(SecurityRejection::UnsupportedExtension { .. })
        ));
    }

    #[test]
    fn rejects_oversized_and_empty() {
        let v = FileValidator::new(16);
        assert!(matches!(
            v.inspect("releve.csv", CSV),
            Err(SecurityRejection::TooLarge { max: 16, .. })
        ));
        assert_eq!(
            validator().inspect("releve.csv", b""),
            Err(SecurityRejection::EmptyContent)
        );
    }

    #[test]
    fn rejects_script_even_in_valid_csv() {
        let data = b"Date,Description,Montant\n15/01/2024,<script>alert(1)</script>,-1\n";
        assert!(!validator().validate("releve.csv", data));
        assert!(matches!(
            validator().inspect("releve.csv", data),
            Err(SecurityRejection::SuspiciousContent { .. })
        ));
    }

    #[test]
    fn rejects_other_active_content() {
        for body in [
            &b"Date,Label\n01/01/2024,<?php system('x'); ?>\n"[..],
            &b"Date,Label\n01/01/2024,=EXEC(\"calc\")\n"[..],
            &b"Date,Label\n01/01/2024,eval(payload)\n"[..],
            &b"#!/bin/sh\nDate,Label\n"[..],
        ] {
            assert!(!validator().validate("x.csv", body), "{:?}", body);
        }
    }

    #[test]
    fn rejects_non_allowed_binaries() {
        assert!(matches!(
            validator().inspect("x.csv", b"%PDF-1.7 blah"),
            Err(SecurityRejection::DisallowedMime { mime: Mime::Pdf })
        ));
        assert!(matches!(
            validator().inspect("x.xls", b"MZ\x90\x00\x03"),
            Err(SecurityRejection::DisallowedMime {
                mime: Mime::Executable
            })
        ));
        assert!(matches!(
            validator().inspect("x.csv", b"<html><body>hi</body></html>"),
            Err(SecurityRejection::DisallowedMime { mime: Mime::Html })
        ));
    }

    #[test]
    fn rejects_text_without_signature() {
        assert_eq!(
            validator().inspect("x.csv", b"hello world\nnothing here\n"),
            Err(SecurityRejection::UnrecognizedSignature)
        );
    }

    #[test]
    fn accepts_header_token_without_delimiter() {
        assert!(validator().validate("x.csv", b"Libell\xc3\xa9\nCB POKAWA\n"));
    }

    #[test]
    fn spreadsheet_magic_numbers() {
        let mut ole = OLE2_MAGIC.to_vec();
        ole.extend_from_slice(&[0u8; 32]);
        assert_eq!(detect_mime(&ole), Mime::LegacySpreadsheet);
        assert!(validator().validate("export.xls", &ole));

        let mut xlsx = ZIP_MAGIC.to_vec();
        xlsx.extend_from_slice(b"\x14\x00\x00\x00xl/workbook.xml");
        assert_eq!(detect_mime(&xlsx), Mime::OoxmlSpreadsheet);
        assert!(validator().validate("export.xlsx", &xlsx));
    }

    #[test]
    fn rejects_extension_mismatch() {
        let mut xlsx = ZIP_MAGIC.to_vec();
        xlsx.extend_from_slice(b"\x14\x00xl/workbook.xml");
        assert!(matches!(
            validator().inspect("export.csv", &xlsx),
            Err(SecurityRejection::ExtensionMismatch { .. })
        ));
        assert!(matches!(
            validator().inspect("export.xlsx", CSV),
            Err(SecurityRejection::ExtensionMismatch { .. })
        ));
    }

    #[test]
    fn xls_named_tab_separated_text_is_accepted() {
        assert!(validator().validate("export.xls", b"Date\tLibelle\tMontant\n"));
    }

    #[test]
    fn sniffs_semicolon_csv_and_plain_text() {
        assert_eq!(detect_mime(b"Date;Libelle;Montant\n"), Mime::Csv);
        assert_eq!(detect_mime(b"just words"), Mime::PlainText);
        assert_eq!(detect_mime(b"a\x00b"), Mime::Binary);
    }

    #[test]
    fn decoded_cells_are_scanned() {
        let clean_row: releve_core::RawRow =
            [("Libellé".to_string(), "CB POKAWA".to_string())].into_iter().collect();
        let mut table = Table {
            headers: vec!["Libellé".to_string()],
            rows: vec![clean_row],
            encoding: "spreadsheet".to_string(),
            delimiter: None,
            lines: vec![2],
        };
        assert!(scan_table(&table).is_ok());

        table.rows[0].push("Note", "#!/bin/sh");
        assert!(matches!(
            scan_table(&table),
            Err(SecurityRejection::SuspiciousContent { pattern }) if pattern == "#!"
        ));
    }
}
