use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::core::ResultsTable;

const HEADER: &str =
    "path,year,age,start_balance,end_balance,market_return,inflation,withdrawal,depleted";

/// One line per (path, year), path-major. A missing age is an empty cell.
pub fn write_csv<W: Write>(table: &ResultsTable, mut out: W) -> io::Result<()> {
    writeln!(out, "{HEADER}")?;
    for row in table.rows() {
        let s = row.state;
        let age = s.age.map(|a| a.to_string()).unwrap_or_default();
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            row.path,
            s.year,
            age,
            s.start_balance,
            s.end_balance,
            s.market_return,
            s.inflation,
            s.withdrawal,
            s.depleted
        )?;
    }
    out.flush()
}

pub fn export_csv(table: &ResultsTable, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_csv(table, BufWriter::new(file))?;
    info!(path = %path.display(), rows = table.len(), "wrote results table");
    Ok(())
}
