//! CSV-file ledger.
//!
//! Layout: a header line followed by one record per line,
//! `timestamp,side,base_amount,quote_amount,average_price,status`. The same
//! file is read by external dashboards and report tools.
//!
//! Writes go through a single `O_APPEND` `write_all` per record, so records
//! from concurrent writers never interleave. Readers only parse up to the last
//! newline: a record still being written is invisible until complete.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use super::{check_append, LedgerError, TradeLedger, Trades};
use crate::domain::Trade;

/// Header row of every ledger file.
pub const LEDGER_HEADER: &str = "timestamp,side,base_amount,quote_amount,average_price,status";

/// Ledger backed by a CSV file.
#[derive(Debug)]
pub struct CsvLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvLedger {
    /// Ledger at `path`. Nothing is touched until the first read or append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_for_append(&self) -> Result<File, LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
            }
        }
        OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| LedgerError::io(&self.path, e))
    }
}

impl TradeLedger for CsvLedger {
    fn append(&self, trade: &Trade) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let last = self.last()?;
        check_append(last.as_ref(), trade)?;

        let mut file = self.open_for_append()?;
        let len = file
            .metadata()
            .map_err(|e| LedgerError::io(&self.path, e))?
            .len();

        let mut buf = Vec::new();
        // A crashed writer can leave an unterminated line; close it off so the
        // new record starts on its own line.
        if len > 0 && !ends_with_newline(&mut file, len).map_err(|e| LedgerError::io(&self.path, e))? {
            warn!(path = %self.path.display(), "ledger ends with a partial record; terminating it");
            buf.push(b'\n');
        }
        buf.extend(encode_record(trade, len == 0)?);

        file.write_all(&buf)
            .and_then(|()| file.sync_data())
            .map_err(|e| LedgerError::io(&self.path, e))?;

        debug!(
            path = %self.path.display(),
            side = %trade.side,
            base_amount = trade.base_amount,
            average_price = trade.average_price,
            "trade appended"
        );
        Ok(())
    }

    fn all(&self) -> Result<Trades<'_>, LedgerError> {
        Ok(Box::new(CsvTrades::open(&self.path)?))
    }
}

/// Iterator over the complete records of a ledger file.
pub struct CsvTrades {
    path: PathBuf,
    rows: Option<csv::DeserializeRecordsIntoIter<io::Take<File>, Trade>>,
}

impl CsvTrades {
    /// Open `path` for reading. A missing file yields an empty iterator.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self {
                    path: path.to_path_buf(),
                    rows: None,
                })
            }
            Err(e) => return Err(LedgerError::io(path, e)),
        };
        let is_dir = file
            .metadata()
            .map_err(|e| LedgerError::io(path, e))?
            .is_dir();
        if is_dir {
            let source = io::Error::new(io::ErrorKind::Other, "ledger path is a directory");
            return Err(LedgerError::io(path, source));
        }

        let complete = complete_len(&mut file).map_err(|e| LedgerError::io(path, e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| LedgerError::io(path, e))?;

        let rows = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file.take(complete))
            .into_deserialize();

        Ok(Self {
            path: path.to_path_buf(),
            rows: Some(rows),
        })
    }
}

impl Iterator for CsvTrades {
    type Item = Result<Trade, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rows = self.rows.as_mut()?;
        loop {
            match rows.next()? {
                Ok(trade) if trade.is_well_formed() => return Some(Ok(trade)),
                Ok(trade) => {
                    warn!(
                        path = %self.path.display(),
                        timestamp = %trade.timestamp,
                        "skipping ledger row with invalid amounts"
                    );
                }
                Err(err) if err.is_io_error() => {
                    let source = match err.into_kind() {
                        csv::ErrorKind::Io(source) => source,
                        other => io::Error::new(io::ErrorKind::Other, format!("{other:?}")),
                    };
                    self.rows = None;
                    return Some(Err(LedgerError::io(&self.path, source)));
                }
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        line = err.position().map(|p| p.line()),
                        error = %err,
                        "skipping malformed ledger row"
                    );
                }
            }
        }
    }
}

fn encode_record(trade: &Trade, with_header: bool) -> Result<Vec<u8>, LedgerError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(with_header)
        .from_writer(vec![]);
    wtr.serialize(trade)
        .map_err(|e| LedgerError::Encode(e.to_string()))?;
    wtr.into_inner()
        .map_err(|e| LedgerError::Encode(e.to_string()))
}

fn ends_with_newline(file: &mut File, len: u64) -> io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Length of the prefix that ends at the last newline.
fn complete_len(file: &mut File) -> io::Result<u64> {
    let mut end = file.metadata()?.len();
    let mut buf = [0u8; 4096];
    while end > 0 {
        let start = end.saturating_sub(buf.len() as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(i) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(start + i as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Side, TradeStatus};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 3, 9, 30, 0).unwrap()
    }

    fn trade(minutes: i64, side: Side) -> Trade {
        Trade::filled(t0() + Duration::minutes(minutes), side, 1.5, 0.0512)
    }

    #[test]
    fn writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.csv");
        let ledger = CsvLedger::new(&path);
        ledger.append(&trade(0, Side::Buy)).unwrap();
        ledger.append(&trade(5, Side::Sell)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], LEDGER_HEADER);
        assert!(lines[1].starts_with("2025-02-03T09:30:00Z,buy,1.5,"));
        assert!(lines[2].ends_with(",0.0512,filled"));
    }

    #[test]
    fn missing_file_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CsvLedger::new(dir.path().join("absent.csv"));
        assert!(ledger.last().unwrap().is_none());
        assert!(ledger.is_empty().unwrap());
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CsvLedger::new(dir.path().join("nested/data/ops.csv"));
        ledger.append(&trade(0, Side::Sell)).unwrap();
        assert_eq!(ledger.last().unwrap(), Some(trade(0, Side::Sell)));
    }

    #[test]
    fn unreadable_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be cannot be read as a ledger.
        let ledger = CsvLedger::new(dir.path());
        assert!(matches!(ledger.last(), Err(LedgerError::Io { .. })));
        assert!(matches!(ledger.append(&trade(0, Side::Buy)), Err(LedgerError::Io { .. })));
    }

    #[test]
    fn skips_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.csv");
        fs::write(
            &path,
            format!(
                "{LEDGER_HEADER}\n\
                 2025-02-03T09:30:00Z,buy,1.5,0.0768,0.0512,filled\n\
                 not-a-date,buy,1.5,0.0768,0.0512,filled\n\
                 2025-02-03T09:40:00Z,hodl,1.5,0.0768,0.0512,filled\n\
                 2025-02-03T09:45:00Z,sell,1.5\n\
                 2025-02-03T09:50:00Z,sell,-1.0,0.0768,0.0512,filled\n\
                 2025-02-03T10:00:00Z,sell,1.5,0.0768,0.0512,filled\n"
            ),
        )
        .unwrap();

        let trades: Vec<Trade> = CsvLedger::new(&path)
            .all()
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[1].side, Side::Sell);
    }

    #[test]
    fn partial_trailing_record_is_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.csv");
        let ledger = CsvLedger::new(&path);
        ledger.append(&trade(0, Side::Buy)).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"2025-02-03T10:00:00Z,sell,1.5,0.07").unwrap();

        assert_eq!(ledger.last().unwrap(), Some(trade(0, Side::Buy)));
    }

    #[test]
    fn append_after_partial_record_starts_a_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.csv");
        let ledger = CsvLedger::new(&path);
        ledger.append(&trade(0, Side::Buy)).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"2025-02-03T10:00:00Z,sell,1.5,0.07").unwrap();

        ledger.append(&trade(10, Side::Sell)).unwrap();

        let trades: Vec<Trade> = ledger.all().unwrap().map(Result::unwrap).collect();
        assert_eq!(trades, vec![trade(0, Side::Buy), trade(10, Side::Sell)]);
    }

    #[test]
    fn rejects_out_of_order_trade() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CsvLedger::new(dir.path().join("ops.csv"));
        ledger.append(&trade(10, Side::Buy)).unwrap();
        let err = ledger.append(&trade(5, Side::Sell)).unwrap_err();
        assert!(matches!(err, LedgerError::NonMonotonic { .. }));
        assert_eq!(ledger.all().unwrap().count(), 1);
    }

    #[test]
    fn rejects_malformed_trade() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CsvLedger::new(dir.path().join("ops.csv"));
        let mut bad = trade(0, Side::Buy);
        bad.average_price = 0.0;
        assert!(matches!(ledger.append(&bad), Err(LedgerError::InvalidTrade(_))));
    }

    #[test]
    fn last_filled_skips_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CsvLedger::new(dir.path().join("ops.csv"));
        let anchor = trade(0, Side::Sell);
        let mut rejected = trade(5, Side::Buy);
        rejected.status = TradeStatus::Rejected;
        ledger.append(&anchor).unwrap();
        ledger.append(&rejected).unwrap();

        assert_eq!(ledger.last().unwrap(), Some(rejected));
        assert_eq!(ledger.last_filled().unwrap(), Some(anchor));
    }

    #[test]
    fn all_is_restartable() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CsvLedger::new(dir.path().join("ops.csv"));
        for i in 0..4 {
            let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
            ledger.append(&trade(i, side)).unwrap();
        }
        let first: Vec<Trade> = ledger.all().unwrap().map(Result::unwrap).collect();
        let second: Vec<Trade> = ledger.all().unwrap().map(Result::unwrap).collect();
        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
    }
}
