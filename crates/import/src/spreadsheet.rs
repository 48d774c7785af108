use std::io::Cursor;

use calamine::{Data, Reader};
use chrono::{Days, NaiveDate};
use releve_core::RawRow;

use crate::csv::Table;
use crate::error::ValidationError;

/// Reads the first worksheet of an XLSX/XLS workbook; row one is the header.
pub fn read_workbook(data: &[u8]) -> Result<Table, ValidationError> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(data.to_vec()))
        .map_err(|e| ValidationError::Spreadsheet {
            message: e.to_string(),
        })?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ValidationError::Spreadsheet {
            message: "workbook has no worksheet".to_string(),
        })?
        .map_err(|e| ValidationError::Spreadsheet {
            message: e.to_string(),
        })?;

    // Sheet rows are reported 1-based, as a spreadsheet shows them.
    let first_row = range.start().map_or(0, |(row, _)| row as usize);
    let mut rows_iter = range
        .rows()
        .enumerate()
        .map(|(i, cells)| (first_row + i + 1, cells.iter().map(cell_text).collect::<Vec<_>>()))
        .skip_while(|(_, cells)| cells.iter().all(|c| c.is_empty()));

    let (_, headers) = rows_iter.next().ok_or(ValidationError::NoDataRows)?;

    let (lines, rows): (Vec<usize>, Vec<RawRow>) = rows_iter
        .map(|(line, cells)| {
            let row = headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.clone(), cells.get(i).cloned().unwrap_or_default()))
                .collect::<RawRow>();
            (line, row)
        })
        .filter(|(_, row)| !row.is_blank())
        .unzip();

    tracing::debug!(columns = headers.len(), rows = rows.len(), "read workbook");

    Ok(Table {
        headers,
        rows,
        encoding: "spreadsheet".to_string(),
        delimiter: None,
        lines,
    })
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        _ => String::new(),
    }
}

/// Excel serial day number (1900 system) to a calendar date.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..3_000_000.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_days(Days::new(serial.trunc() as u64))
}
