use releve_core::RawRow;

use crate::encoding::{self, TextEncoding};
use crate::error::ValidationError;
use crate::spreadsheet;
use crate::validate::{detect_mime, Mime};

/// Candidate field delimiters, in tie-break order.
pub const DELIMITERS: &[u8] = b",;\t|";

/// A decoded upload: headers plus rows, in file order.
#[derive(Debug, Clone)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    pub encoding: String,
    /// `None` for spreadsheets.
    pub delimiter: Option<char>,
    /// 1-based source line (or sheet row) where each of `rows` starts.
    pub lines: Vec<usize>,
}

/// Counts fields in one line, ignoring delimiters inside double quotes.
pub fn count_fields(line: &str, delimiter: u8) -> usize {
    let delimiter = delimiter as char;
    let mut in_quotes = false;
    let mut fields = 1;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => fields += 1,
            _ => {}
        }
    }
    fields
}

/// Picks the candidate that splits the header line into the most (> 1) fields.
pub fn detect_delimiter(header_line: &str) -> u8 {
    let mut best = (b',', 1);
    for &d in DELIMITERS {
        let n = count_fields(header_line, d);
        if n > best.1 {
            best = (d, n);
        }
    }
    best.0
}

/// Reads an upload into a `Table`, dispatching on content type.
pub fn read_table(data: &[u8]) -> Result<Table, ValidationError> {
    match detect_mime(data) {
        Mime::LegacySpreadsheet | Mime::OoxmlSpreadsheet | Mime::Zip => {
            spreadsheet::read_workbook(data)
        }
        _ => read_delimited(data),
    }
}

pub fn read_delimited(data: &[u8]) -> Result<Table, ValidationError> {
    let (text, encoding) = encoding::decode(data)?;
    read_text(&text, encoding)
}

fn read_text(text: &str, encoding: TextEncoding) -> Result<Table, ValidationError> {
    let text = text.trim_start_matches('\u{feff}');
    let header_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if header_line.is_empty() {
        return Err(ValidationError::NoDataRows);
    }
    let delimiter = detect_delimiter(header_line);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(malformed)?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    let mut lines = Vec::new();
    for result in reader.records() {
        let record = result.map_err(malformed)?;
        let row: RawRow = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), record.get(i).unwrap_or_default().to_string()))
            .collect();
        if row.is_blank() {
            continue;
        }
        lines.push(record.position().map_or(rows.len() + 2, |p| p.line() as usize));
        rows.push(row);
    }

    tracing::debug!(
        %encoding,
        delimiter = %(delimiter as char).escape_default(),
        columns = headers.len(),
        rows = rows.len(),
        "read delimited table"
    );

    Ok(Table {
        headers,
        rows,
        encoding: encoding.to_string(),
        delimiter: Some(delimiter as char),
        lines,
    })
}

fn malformed(e: csv::Error) -> ValidationError {
    ValidationError::MalformedTable {
        line: e.position().map(|p| p.line()),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_fields_respects_quotes() {
        assert_eq!(count_fields("a,b,c", b','), 3);
        assert_eq!(count_fields("\"a,b\",c", b','), 2);
        assert_eq!(count_fields("abc", b';'), 1);
    }

    #[test]
    fn detect_delimiter_candidates() {
        assert_eq!(detect_delimiter("Date,Description,Montant"), b',');
        assert_eq!(detect_delimiter("dateOp;dateVal;label;amount"), b';');
        assert_eq!(detect_delimiter("Date\tLibelle\tMontant"), b'\t');
        assert_eq!(detect_delimiter("Date|Libelle|Montant"), b'|');
        // Semicolon wins when commas only appear inside quotes.
        assert_eq!(detect_delimiter("\"Date, op\";Libelle;Montant"), b';');
        assert_eq!(detect_delimiter("Date"), b',');
    }

    #[test]
    fn reads_semicolon_latin1_table() {
        let data = b"Date op\xE9ration;Libell\xE9;Montant\n15/01/2024;CB POKAWA;-12,50\n\n;;\n";
        let table = read_table(data).unwrap();
        assert_eq!(table.headers, vec!["Date opération", "Libellé", "Montant"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].get("Libellé"), Some("CB POKAWA"));
        assert_eq!(table.encoding, "ISO-8859-1");
        assert_eq!(table.delimiter, Some(';'));
    }

    #[test]
    fn short_rows_are_padded_with_blanks() {
        let data = b"Date,Label,Amount,Account\n2024-01-01,EDF,-40\n";
        let table = read_table(data).unwrap();
        assert_eq!(table.rows[0].get("Account"), Some(""));
        assert_eq!(table.rows[0].get("Amount"), Some("-40"));
    }

    #[test]
    fn bom_and_quoted_fields() {
        let data = "\u{feff}Date,Description,Montant\n2024-01-02,\"SNCF, PARIS\",\"-1 234,00\"\n";
        let table = read_table(data.as_bytes()).unwrap();
        assert_eq!(table.headers[0], "Date");
        assert_eq!(table.rows[0].get("Description"), Some("SNCF, PARIS"));
        assert_eq!(table.rows[0].get("Montant"), Some("-1 234,00"));
    }

    #[test]
    fn empty_text_has_no_rows() {
        assert!(matches!(
            read_table(b"\n\n"),
            Err(ValidationError::NoDataRows)
        ));
    }

    #[test]
    fn line_numbers_follow_the_source() {
        let data = "Date,Description,Montant\n,,\n2024-01-02,\"SNCF\nPARIS\",-1\n2024-01-03,EDF,-40\n";
        let table = read_table(data.as_bytes()).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get("Description"), Some("SNCF\nPARIS"));
        assert_eq!(table.lines, vec![3, 5]);
    }
}
