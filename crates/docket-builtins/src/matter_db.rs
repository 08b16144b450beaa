use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the matters database.
#[derive(Debug, Error)]
pub enum MatterDbError {
    /// The statement would modify the database.
    #[error("only read-only SELECT statements are allowed: {0}")]
    NotReadOnly(String),

    /// SQLite rejected the statement.
    #[error("SQL error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The matters file could not be read or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The matters file has no header for a table column.
    #[error("matters file has no `{0}` column")]
    MissingColumn(&'static str),
}

const CREATE_MATTERS: &str = "CREATE TABLE IF NOT EXISTS matters (
    Id TEXT PRIMARY KEY,
    Display_Name TEXT,
    Client_Name TEXT,
    Client_Full_Name TEXT,
    Record_Type TEXT,
    Record_Type_Name TEXT,
    Case_Type TEXT,
    Status TEXT,
    Case_Stage TEXT,
    Case_Sub_Stage TEXT,
    Open_Date TEXT,
    Closed_Date TEXT,
    Primary_Legal_Assistant TEXT,
    Attorney_Name TEXT,
    Assistant_Name TEXT
)";

/// Column names of the `matters` table, in declaration order.
pub const MATTER_COLUMNS: [&str; 15] = [
    "Id",
    "Display_Name",
    "Client_Name",
    "Client_Full_Name",
    "Record_Type",
    "Record_Type_Name",
    "Case_Type",
    "Status",
    "Case_Stage",
    "Case_Sub_Stage",
    "Open_Date",
    "Closed_Date",
    "Primary_Legal_Assistant",
    "Attorney_Name",
    "Assistant_Name",
];

/// Headers of a Litify matter export, aligned with [`MATTER_COLUMNS`].
pub const LITIFY_HEADERS: [&str; 15] = [
    "Id",
    "litify_pm__Display_Name__c",
    "litify_pm__Client__r",
    "litify_pm__Client__r.bis_Full_Formatted_Name__c",
    "RecordType",
    "RecordType.Name",
    "bis_Case_Type__c",
    "litify_pm__Status__c",
    "Case_Stage__c",
    "Case_Sub_Stage__c",
    "litify_pm__Open_Date__c",
    "litify_pm__Closed_Date__c",
    "Primary_Legal_Assistant__r",
    "bis_Attorney_Name__c",
    "Primary_Legal_Assistant__r.Name",
];

// Empty fields are stored as NULL.
const SAMPLE_MATTERS: [[&str; 15]; 10] = [
    ["2ed7148386a56d1db9", "Morgan Brown", "[Account]", "Morgan Taylor", "[RecordType]", "Billable Matter", "WC WC-IN-HOUSE", "Closed", "Active", "", "7/21/23", "8/31/23", "", "Taylor Miller", "Riley Lee"],
    ["77934fca56ba4bd509", "Avery Taylor", "[Account]", "Jordan Johnson", "[RecordType]", "Personal Injury", "PI AUTO-IN-HOUSE MINOR", "Closed", "Closed", "", "7/21/23", "9/22/23", "", "Riley Wilson", "Morgan Brown"],
    ["34a706be1613efd297", "Avery Wilson", "[Account]", "Avery Wilson", "[RecordType]", "Personal Injury", "PI AUTO-IN-HOUSE", "Closed", "Pre-Lit Settlement", "", "7/25/23", "3/6/24", "", "Morgan Taylor", "Riley Brown"],
    ["366b94b5409a51fb68", "Morgan Davis", "[Account]", "Jordan Johnson", "[RecordType]", "Personal Injury", "PI AUTO-IN-HOUSE", "Closed", "Closed", "", "7/22/23", "9/8/23", "", "Taylor Davis", "Morgan Miller"],
    ["e804667b98067fa9ea", "Morgan Smith", "[Account]", "Alex Lee", "[RecordType]", "Personal Injury", "PI AUTO-IN-HOUSE", "Closed", "Closed", "", "7/22/23", "8/31/23", "", "Jordan Davis", "Avery Smith"],
    ["ef911165c148f2a077", "Riley Davis", "[Account]", "Casey Miller", "[RecordType]", "Personal Injury", "PI AUTO-IN-HOUSE", "Closed", "Closed", "", "7/24/23", "12/7/23", "", "Jamie Smith", "Taylor Taylor"],
    ["1183a7eb188081cec9", "Taylor Wilson", "[Account]", "Taylor Miller", "[RecordType]", "Personal Injury", "PI AUTO-IN-HOUSE", "Closed", "Closed", "", "7/22/23", "9/8/23", "", "Riley Miller", "Alex Davis"],
    ["5751485a59c7062197", "Alex Davis", "[Account]", "Taylor Lee", "[RecordType]", "Personal Injury", "PI AUTO-IN-HOUSE", "Closed", "Pre-Lit Settlement", "", "7/22/23", "1/22/24", "", "Riley Lee", "Alex Taylor"],
    ["e94b89a4e1ce6e8626", "Morgan Smith", "[Account]", "Morgan Davis", "[RecordType]", "Personal Injury", "PI AUTO-IN-HOUSE", "Closed", "Closed", "", "7/23/23", "4/3/24", "", "Riley Wilson", "Taylor Johnson"],
    ["0ab59367dd16c0a1e9", "Alex Lee", "[Account]", "Riley Miller", "[RecordType]", "Personal Injury", "PI AUTO-IN-HOUSE", "Closed", "Pre-Lit Settlement", "", "7/24/23", "6/7/24", "", "Casey Johnson", "Jamie Smith"],
];

/// In-memory SQLite database of legal matters.
///
/// The connection is guarded by a mutex; callers on the async runtime should
/// go through `spawn_blocking`.
pub struct MatterDatabase {
    conn: Mutex<Connection>,
}

impl MatterDatabase {
    /// Creates an empty `matters` table.
    pub fn open_in_memory() -> Result<Self, MatterDbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute(CREATE_MATTERS, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates the table and loads the ten sample matters.
    pub fn with_sample_data() -> Result<Self, MatterDbError> {
        let db = Self::open_in_memory()?;
        for row in &SAMPLE_MATTERS {
            db.insert(row)?;
        }
        info!(records = SAMPLE_MATTERS.len(), "Matter database seeded");
        Ok(db)
    }

    /// Creates the table and loads every matter in a CSV file.
    ///
    /// Each column is found by its table name or its Litify export header;
    /// other columns are ignored. Rows with a repeated `Id` replace earlier ones.
    pub fn load_csv(path: &Path) -> Result<Self, MatterDbError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let mut positions = [0usize; 15];
        for (idx, slot) in positions.iter_mut().enumerate() {
            *slot = headers
                .iter()
                .position(|h| {
                    let h = h.trim();
                    h == MATTER_COLUMNS[idx] || h == LITIFY_HEADERS[idx]
                })
                .ok_or(MatterDbError::MissingColumn(MATTER_COLUMNS[idx]))?;
        }

        let db = Self::open_in_memory()?;
        let mut loaded = 0;
        for record in reader.records() {
            let record = record?;
            let row: [&str; 15] = positions.map(|pos| record.get(pos).unwrap_or_default().trim());
            db.insert(&row)?;
            loaded += 1;
        }
        info!(path = %path.display(), records = loaded, "Matter database loaded from CSV");
        Ok(db)
    }

    /// Writes the ten sample matters as a Litify export.
    pub fn write_sample_csv(path: &Path) -> Result<(), MatterDbError> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(LITIFY_HEADERS)?;
        for row in &SAMPLE_MATTERS {
            writer.write_record(row)?;
        }
        writer.flush().map_err(csv::Error::from)?;
        info!(path = %path.display(), "Sample matters file written");
        Ok(())
    }

    /// Inserts or replaces one matter. Empty strings become NULL.
    pub fn insert(&self, row: &[&str; 15]) -> Result<(), MatterDbError> {
        let v: Vec<Option<&str>> = row
            .iter()
            .map(|field| (!field.is_empty()).then_some(*field))
            .collect();
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO matters VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8], v[9], v[10], v[11], v[12], v[13], v[14]],
        )?;
        Ok(())
    }

    /// Runs a read-only query and returns one JSON object per row, keyed by
    /// column name in result order. NULL becomes `""`.
    pub fn query(&self, sql: &str) -> Result<Vec<Value>, MatterDbError> {
        let keyword = sql
            .trim_start()
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if keyword != "select" && keyword != "with" {
            return Err(MatterDbError::NotReadOnly(sql.trim().to_string()));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(MatterDbError::NotReadOnly(sql.trim().to_string()));
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Map::new();
            for (idx, name) in columns.iter().enumerate() {
                record.insert(name.clone(), to_json(row.get_ref(idx)?));
            }
            records.push(Value::Object(record));
        }

        debug!(rows = records.len(), "Matter query executed");
        Ok(records)
    }

    /// Number of matters stored.
    pub fn count(&self) -> Result<usize, MatterDbError> {
        let n: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM matters", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::String(String::new()),
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_data_loaded() {
        let db = MatterDatabase::with_sample_data().unwrap();
        assert_eq!(db.count().unwrap(), 10);
    }

    #[test]
    fn test_count_personal_injury() {
        let db = MatterDatabase::with_sample_data().unwrap();
        let rows = db
            .query("SELECT COUNT(*) AS total FROM matters WHERE Record_Type_Name = 'Personal Injury'")
            .unwrap();
        assert_eq!(rows, vec![serde_json::json!({"total": 9})]);
    }

    #[test]
    fn test_null_becomes_empty_string() {
        let db = MatterDatabase::with_sample_data().unwrap();
        let rows = db
            .query("SELECT Case_Sub_Stage FROM matters WHERE Id = '2ed7148386a56d1db9'")
            .unwrap();
        assert_eq!(rows[0]["Case_Sub_Stage"], "");
    }

    #[test]
    fn test_columns_keep_result_order() {
        let db = MatterDatabase::with_sample_data().unwrap();
        let rows = db
            .query("SELECT Status, Attorney_Name, Id FROM matters LIMIT 1")
            .unwrap();
        let keys: Vec<&String> = rows[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["Status", "Attorney_Name", "Id"]);
    }

    #[test]
    fn test_group_by_stage() {
        let db = MatterDatabase::with_sample_data().unwrap();
        let rows = db
            .query(
                "SELECT Case_Stage, COUNT(*) AS n FROM matters \
                 GROUP BY Case_Stage ORDER BY n DESC, Case_Stage",
            )
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["Case_Stage"], "Closed");
        assert_eq!(rows[0]["n"], 6);
        assert_eq!(rows[1]["Case_Stage"], "Pre-Lit Settlement");
        assert_eq!(rows[1]["n"], 3);
    }

    #[test]
    fn test_rejects_writes() {
        let db = MatterDatabase::with_sample_data().unwrap();
        assert!(matches!(
            db.query("DELETE FROM matters"),
            Err(MatterDbError::NotReadOnly(_))
        ));
        assert!(matches!(
            db.query("  drop table matters"),
            Err(MatterDbError::NotReadOnly(_))
        ));
        assert_eq!(db.count().unwrap(), 10);
    }

    #[test]
    fn test_load_sample_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matters.csv");
        MatterDatabase::write_sample_csv(&path).unwrap();

        let db = MatterDatabase::load_csv(&path).unwrap();
        assert_eq!(db.count().unwrap(), 10);
        let rows = db
            .query("SELECT Attorney_Name, Case_Sub_Stage FROM matters WHERE Id = '2ed7148386a56d1db9'")
            .unwrap();
        assert_eq!(rows[0]["Attorney_Name"], "Taylor Miller");
        assert_eq!(rows[0]["Case_Sub_Stage"], "");
    }

    #[test]
    fn test_load_csv_with_table_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matters.csv");
        let mut raw = MATTER_COLUMNS.join(",");
        raw.push_str(",Notes\n");
        raw.push_str("m1,Jamie Lee,[Account],Jamie Lee,[RecordType],Personal Injury,PI AUTO,Open,Active,,1/2/24,,,Casey Johnson,Riley Lee,call back\n");
        std::fs::write(&path, raw).unwrap();

        let db = MatterDatabase::load_csv(&path).unwrap();
        let rows = db.query("SELECT Status, Attorney_Name FROM matters").unwrap();
        assert_eq!(rows, vec![serde_json::json!({"Status": "Open", "Attorney_Name": "Casey Johnson"})]);
    }

    #[test]
    fn test_load_csv_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matters.csv");
        std::fs::write(&path, "Id,Status\nm1,Open\n").unwrap();
        assert!(matches!(
            MatterDatabase::load_csv(&path),
            Err(MatterDbError::MissingColumn("Display_Name"))
        ));
    }

    #[test]
    fn test_syntax_error_surfaces() {
        let db = MatterDatabase::with_sample_data().unwrap();
        assert!(matches!(
            db.query("SELECT FROM WHERE"),
            Err(MatterDbError::Sqlite(_))
        ));
    }
}
