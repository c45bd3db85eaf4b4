use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Number, Value};
use tracing::{debug, info};

use crate::error::{FraudError, Result};
use crate::transaction::{LabeledTransaction, RawLocation, RawTransaction};

// Flattened corpus row for CSV files, where the location object becomes two columns.
#[derive(Debug, Deserialize)]
struct CsvRow {
    user: Option<String>,
    amount: Option<String>,
    date: Option<String>,
    #[serde(rename = "ref")]
    merchant_reference: Option<String>,
    city: Option<String>,
    province: Option<String>,
    event_label: Option<String>,
}

impl From<CsvRow> for RawTransaction {
    fn from(row: CsvRow) -> Self {
        let location = match (row.city, row.province) {
            (None, None) => None,
            (city, province) => Some(RawLocation { city, province }),
        };
        RawTransaction {
            user: row.user,
            amount: row.amount.map(|text| csv_number(&text)),
            date: row.date,
            merchant_reference: row.merchant_reference,
            location,
            event_label: row.event_label.map(|text| csv_number(&text)),
        }
    }
}

// CSV cells are text; a cell that does not read as a finite number stays text
// so validation rejects it by name.
fn csv_number(text: &str) -> Value {
    text.trim()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}

/// Reads every row of a corpus file. `.csv` files are read as CSV, anything
/// else as a JSON array of transaction objects.
pub fn read_transactions(file_path: &Path) -> Result<Vec<RawTransaction>> {
    let file = File::open(file_path)?;
    let is_csv = file_path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    let transactions: Vec<RawTransaction> = if is_csv {
        let mut rdr = csv::Reader::from_reader(file);
        rdr.deserialize::<CsvRow>()
            .map(|row| row.map(RawTransaction::from))
            .collect::<std::result::Result<Vec<_>, csv::Error>>()?
    } else {
        serde_json::from_reader(BufReader::new(file))?
    };

    debug!(path = %file_path.display(), rows = transactions.len(), "corpus read");
    Ok(transactions)
}

/// Keeps the rows belonging to `user` and validates each of them. Rows of other
/// users are dropped unvalidated; the first invalid kept row aborts.
pub fn select_user(rows: &[RawTransaction], user: &str) -> Result<Vec<LabeledTransaction>> {
    let mut selected = Vec::new();
    for (index, raw) in rows.iter().enumerate() {
        if raw.user.as_deref() != Some(user) {
            continue;
        }
        let labeled = LabeledTransaction::try_from(raw).map_err(|e| match e {
            FraudError::Data(msg) => FraudError::data(format!("corpus row {index}: {msg}")),
            other => other,
        })?;
        selected.push(labeled);
    }

    if selected.is_empty() {
        return Err(FraudError::data(format!(
            "corpus has no transactions for user {user:?}"
        )));
    }

    info!(
        user,
        kept = selected.len(),
        total = rows.len(),
        fraud = selected.iter().filter(|t| t.is_fraud).count(),
        "corpus filtered to user"
    );
    Ok(selected)
}

pub fn load_corpus(file_path: &Path, user: &str) -> Result<Vec<LabeledTransaction>> {
    let rows = read_transactions(file_path)?;
    select_user(&rows, user)
}
