//! Spreadsheet-friendly export of a computed report.
//!
//! Layout: a title row, a blank row, the column names, the column dates, then
//! one row per KPI. Numeric values are written raw so spreadsheets can compute
//! with them (percentages scaled to percent); everything else is written as
//! rendered.

use crate::error::Result;
use crate::report::{GridCell, ReportGrid};
use crate::value::Value;
use std::io::Write;

pub fn write_csv<W: Write>(grid: &ReportGrid, title: &str, writer: W) -> Result<()> {
    let mut csv = csv::WriterBuilder::new().flexible(true).from_writer(writer);

    csv.write_record([title])?;
    csv.write_record([""])?;

    let columns = grid.columns();
    csv.write_record(std::iter::once("").chain(columns.iter().map(|c| c.name.as_str())))?;
    csv.write_record(std::iter::once("").chain(columns.iter().map(|c| c.date.as_str())))?;

    for row in &grid.content {
        let mut record = Vec::with_capacity(row.cols.len() + 1);
        record.push(row.kpi_name.clone());
        record.extend(row.cols.iter().map(cell_text));
        csv.write_record(&record)?;
    }

    csv.flush()?;
    Ok(())
}

pub fn to_csv_string(grid: &ReportGrid, title: &str) -> Result<String> {
    let mut buffer = Vec::new();
    write_csv(grid, title, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn cell_text(cell: &GridCell) -> String {
    match cell {
        GridCell::Value(value) => match value.val {
            Value::Number(n) if n != 0.0 => {
                let raw = if value.is_percentage { n * 100.0 } else { n };
                Value::Number(raw).to_string()
            }
            _ => value.val_r.clone(),
        },
        GridCell::Comparison { val_r } => val_r.clone(),
    }
}
