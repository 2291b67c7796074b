//! Trained influence weights.
//!
//! A weight table has one row per event `<feature>:<label>` and four weight columns
//! `{c}_x={x}`, for target context `c` and feature indicator `x`. Only the `x=1` columns enter
//! the potentials, the `x=0` columns are kept for completeness.
//!
//! Tables are read from Excel workbooks (first worksheet) or from delimited text.

use std::io::Read;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{Result, RiskError};

/// Extensions of the weight table files, in lookup order.
pub const WEIGHT_EXTENSIONS: [&str; 3] = ["xlsx", "csv", "tsv"];

const EVENT_COLUMN: &str = "event";
/// Weight columns, ordered as `[c0_x0, c0_x1, c1_x0, c1_x1]`.
const WEIGHT_COLUMNS: [&str; 4] = ["0_x=0", "0_x=1", "1_x=0", "1_x=1"];

#[derive(Debug, Deserialize)]
struct WeightRow {
    event: String,
    #[serde(rename = "0_x=0")]
    c0_x0: f64,
    #[serde(rename = "0_x=1")]
    c0_x1: f64,
    #[serde(rename = "1_x=0")]
    c1_x0: f64,
    #[serde(rename = "1_x=1")]
    c1_x1: f64,
}

/// Weights of one (feature, label) event: `context[t] = [w_x0, w_x1]` for target context `t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightEntry {
    pub context: [[f64; 2]; 2],
}

impl WeightEntry {
    /// Weight wired into the model for target context `t`.
    pub fn x1(&self, t: usize) -> f64 {
        self.context[t][1]
    }
}

#[derive(Debug, Clone, Default)]
pub struct WeightTable {
    // Feature and label order is the order of first appearance in the source.
    features: IndexMap<String, IndexMap<String, WeightEntry>>,
}

impl WeightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the weights of one event. Each (feature, label) pair may appear only once.
    pub fn insert(&mut self, feature: &str, label: &str, entry: WeightEntry) -> Result<()> {
        if entry.context.iter().flatten().any(|w| !w.is_finite()) {
            return Err(RiskError::ModelLoad(format!(
                "non-finite weight for event {}:{}",
                feature, label
            )));
        }
        let labels = self.features.entry(feature.to_owned()).or_default();
        if labels.insert(label.to_owned(), entry).is_some() {
            return Err(RiskError::ModelLoad(format!(
                "event {}:{} appears more than once",
                feature, label
            )));
        }
        Ok(())
    }

    /// Parses a delimited weight table with a header row.
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut table = Self::new();
        for row in rdr.deserialize() {
            let row: WeightRow = row?;
            table.insert_event(
                &row.event,
                [[row.c0_x0, row.c0_x1], [row.c1_x0, row.c1_x1]],
            )?;
        }
        table.check_not_empty()
    }

    /// Parses the first worksheet of a workbook (xlsx, xls or ods). The header row must
    /// contain the `event` and `{c}_x={x}` columns, in any order. Empty rows are skipped.
    pub fn from_workbook(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut workbook = open_workbook_auto(path).map_err(|e| {
            RiskError::ModelLoad(format!("cannot open {}: {}", path.display(), e))
        })?;
        let range = workbook.worksheet_range_at(0).ok_or_else(|| {
            RiskError::ModelLoad(format!("{} has no worksheet", path.display()))
        })??;
        let mut rows = range.rows();
        let header = rows
            .next()
            .ok_or_else(|| RiskError::ModelLoad("the weight table is empty".to_owned()))?;
        let column = |name: &str| {
            header
                .iter()
                .position(|c| matches!(c, Data::String(s) if s.trim() == name))
                .ok_or_else(|| RiskError::ModelLoad(format!("missing column {:?}", name)))
        };
        let event_col = column(EVENT_COLUMN)?;
        let weight_cols = [
            column(WEIGHT_COLUMNS[0])?,
            column(WEIGHT_COLUMNS[1])?,
            column(WEIGHT_COLUMNS[2])?,
            column(WEIGHT_COLUMNS[3])?,
        ];
        let mut table = Self::new();
        // Row numbers as displayed by spreadsheet software (header is row 1).
        for (row_nb, row) in rows.enumerate().map(|(i, r)| (i + 2, r)) {
            if row.iter().all(|c| matches!(c, Data::Empty)) {
                continue;
            }
            let event = match row.get(event_col) {
                Some(Data::String(s)) => s.trim(),
                _ => {
                    return Err(RiskError::ModelLoad(format!(
                        "row {}: missing event",
                        row_nb
                    )))
                }
            };
            let mut w = [0.0; 4];
            for (k, col) in weight_cols.iter().enumerate() {
                w[k] = row.get(*col).and_then(cell_value).ok_or_else(|| {
                    RiskError::ModelLoad(format!(
                        "row {}: {} of {} is not a number",
                        row_nb, WEIGHT_COLUMNS[k], event
                    ))
                })?;
            }
            table.insert_event(event, [[w[0], w[1]], [w[2], w[3]]])?;
        }
        table.check_not_empty()
    }

    /// Reads a weight table file: a workbook for `.xlsx`, `.xls` and `.ods` files,
    /// tab-separated text for `.tsv` files and comma-separated text otherwise.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let table = match path.extension().and_then(|e| e.to_str()) {
            Some("xlsx" | "xls" | "ods") => Self::from_workbook(path)?,
            ext => {
                let delimiter = if ext == Some("tsv") { b'\t' } else { b',' };
                let file = std::fs::File::open(path).map_err(|e| {
                    RiskError::ModelLoad(format!("cannot open {}: {}", path.display(), e))
                })?;
                Self::from_reader(file, delimiter)?
            }
        };
        log::info!(
            "Loaded {} features ({} events) from {}",
            table.n_features(),
            table.n_events(),
            path.display()
        );
        Ok(table)
    }

    /// Loads the table trained for `cutoff` from a results directory, trying each of
    /// [`WEIGHT_EXTENSIONS`] in turn.
    pub fn load(dir: impl AsRef<Path>, cutoff: Cutoff, fixed_state: u8) -> Result<Self> {
        let dir = dir.as_ref();
        let path = WEIGHT_EXTENSIONS
            .iter()
            .map(|ext| dir.join(cutoff.file_name(fixed_state, ext)))
            .find(|p| p.is_file())
            .ok_or_else(|| {
                RiskError::ModelLoad(format!(
                    "no weight table {}.{{{}}} in {}",
                    cutoff.file_stem(fixed_state),
                    WEIGHT_EXTENSIONS.join(","),
                    dir.display()
                ))
            })?;
        Self::from_path(path)
    }

    /// Adds the weights of an event `<feature>:<label>`, `w` being `[[c0_x0, c0_x1], [c1_x0,
    /// c1_x1]]`.
    fn insert_event(&mut self, event: &str, w: [[f64; 2]; 2]) -> Result<()> {
        let (feature, label) = event.split_once(':').ok_or_else(|| {
            RiskError::ModelLoad(format!("event {:?} has no ':' separator", event))
        })?;
        self.insert(feature, label, WeightEntry { context: w })
    }

    fn check_not_empty(self) -> Result<Self> {
        if self.features.is_empty() {
            return Err(RiskError::ModelLoad("the weight table is empty".to_owned()));
        }
        Ok(self)
    }

    pub fn n_features(&self) -> usize {
        self.features.len()
    }
    pub fn n_events(&self) -> usize {
        self.features.values().map(IndexMap::len).sum()
    }
    /// Features with their number of states (number of distinct labels).
    pub fn features(&self) -> impl Iterator<Item = (&str, usize)> {
        self.features.iter().map(|(f, l)| (f.as_str(), l.len()))
    }
    pub fn labels(&self, feature: &str) -> Option<impl Iterator<Item = &str>> {
        self.features
            .get(feature)
            .map(|l| l.keys().map(String::as_str))
    }
    pub fn get(&self, feature: &str, label: &str) -> Option<&WeightEntry> {
        self.features.get(feature)?.get(label)
    }
}

/// Outcome severity threshold a weight table was trained for.
///
/// The risk is the probability of transitioning to one of the stages above the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Cutoff {
    /// Stages 1 to 4.
    Stage1,
    /// Stages 2 to 4.
    Stage2,
    /// Stages 3 to 4.
    Stage3,
    /// Stage 4 only.
    Stage4,
}

impl Cutoff {
    pub const ALL: [Cutoff; 4] = [Self::Stage1, Self::Stage2, Self::Stage3, Self::Stage4];

    pub fn index(self) -> u8 {
        match self {
            Self::Stage1 => 0,
            Self::Stage2 => 1,
            Self::Stage3 => 2,
            Self::Stage4 => 3,
        }
    }
    /// Stages covered by the outcome.
    pub fn stages(self) -> &'static str {
        match self {
            Self::Stage1 => "1-4",
            Self::Stage2 => "2-4",
            Self::Stage3 => "3-4",
            Self::Stage4 => "4",
        }
    }
    /// Name of the weight file trained for this cutoff, without extension.
    pub fn file_stem(self, fixed_state: u8) -> String {
        format!(
            "InfluenceScores_fixedSate{}_AMD_cutoff{}",
            fixed_state,
            self.index()
        )
    }
    pub fn file_name(self, fixed_state: u8, extension: &str) -> String {
        format!("{}.{}", self.file_stem(fixed_state), extension)
    }
}

/// Numeric value of a worksheet cell, numbers stored as text included.
fn cell_value(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(v) => Some(*v),
        Data::Int(v) => Some(*v as f64),
        Data::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl TryFrom<u8> for Cutoff {
    type Error = RiskError;
    fn try_from(value: u8) -> Result<Self> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| RiskError::ModelLoad(format!("no weight table for cutoff {}", value)))
    }
}

impl std::fmt::Display for Cutoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stages())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"event,0_x=0,0_x=1,1_x=0,1_x=1
smoker:Non-smoker,0.9,0.1,0.7,0.3
smoker:Smoker,0.8,0.2,0.4,0.6
"age:[54,70[",0.5,0.5,0.5,0.5
"#;

    #[test]
    fn parse_table() {
        let table = WeightTable::from_reader(TABLE.as_bytes(), b',').unwrap();
        assert_eq!(table.n_features(), 2);
        assert_eq!(table.n_events(), 3);
        assert_eq!(
            table.features().collect::<Vec<_>>(),
            vec![("smoker", 2), ("age", 1)]
        );
        let e = table.get("smoker", "Smoker").unwrap();
        assert_eq!(e.context, [[0.8, 0.2], [0.4, 0.6]]);
        assert_eq!(e.x1(0), 0.2);
        assert_eq!(e.x1(1), 0.6);
        assert!(table.get("age", "[54,70[").is_some());
        assert!(table.get("smoker", "Unknown").is_none());
    }

    #[test]
    fn tab_separated() {
        let tsv = TABLE.replace(',', "\t").replace("[54\t70[", "[54,70[");
        let table = WeightTable::from_reader(tsv.as_bytes(), b'\t').unwrap();
        assert_eq!(table.n_events(), 3);
    }

    #[test]
    fn malformed_tables() {
        let no_sep = "event,0_x=0,0_x=1,1_x=0,1_x=1\nsmoker,1,1,1,1\n";
        assert!(matches!(
            WeightTable::from_reader(no_sep.as_bytes(), b','),
            Err(RiskError::ModelLoad(_))
        ));
        let missing_col = "event,0_x=0,0_x=1,1_x=0\nsmoker:a,1,1,1\n";
        assert!(matches!(
            WeightTable::from_reader(missing_col.as_bytes(), b','),
            Err(RiskError::Csv(_))
        ));
        let not_a_number = "event,0_x=0,0_x=1,1_x=0,1_x=1\nsmoker:a,1,x,1,1\n";
        assert!(matches!(
            WeightTable::from_reader(not_a_number.as_bytes(), b','),
            Err(RiskError::Csv(_))
        ));
        let duplicated = "event,0_x=0,0_x=1,1_x=0,1_x=1\ns:a,1,1,1,1\ns:a,1,1,1,1\n";
        assert!(matches!(
            WeightTable::from_reader(duplicated.as_bytes(), b','),
            Err(RiskError::ModelLoad(_))
        ));
        let empty = "event,0_x=0,0_x=1,1_x=0,1_x=1\n";
        assert!(matches!(
            WeightTable::from_reader(empty.as_bytes(), b','),
            Err(RiskError::ModelLoad(_))
        ));
        assert!(matches!(
            WeightTable::from_path("/nonexistent/weights.csv"),
            Err(RiskError::ModelLoad(_))
        ));
    }

    #[test]
    fn cutoffs() {
        assert_eq!(Cutoff::try_from(2).unwrap(), Cutoff::Stage3);
        assert!(Cutoff::try_from(4).is_err());
        assert_eq!(Cutoff::Stage4.stages(), "4");
        assert_eq!(Cutoff::Stage1.to_string(), "1-4");
        assert_eq!(
            Cutoff::Stage2.file_name(1, "xlsx"),
            "InfluenceScores_fixedSate1_AMD_cutoff1.xlsx"
        );
    }

    const WORKBOOK: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/weights.xlsx");

    #[test]
    fn parse_workbook() {
        let table = WeightTable::from_path(WORKBOOK).unwrap();
        assert_eq!(
            table.features().collect::<Vec<_>>(),
            vec![("smoker", 2), ("age", 2)]
        );
        assert_eq!(
            table.get("smoker", "Smoker").unwrap().context,
            [[0.8, 0.2], [0.4, 0.6]]
        );
        assert_eq!(table.get("age", "[54,70[").unwrap().x1(1), 0.75);
    }

    #[test]
    fn load_finds_any_extension() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            WeightTable::load(dir.path(), Cutoff::Stage1, 1),
            Err(RiskError::ModelLoad(_))
        ));
        std::fs::copy(WORKBOOK, dir.path().join(Cutoff::Stage1.file_name(1, "xlsx"))).unwrap();
        std::fs::write(dir.path().join(Cutoff::Stage2.file_name(1, "csv")), TABLE).unwrap();
        let xlsx = WeightTable::load(dir.path(), Cutoff::Stage1, 1).unwrap();
        assert_eq!(xlsx.n_events(), 4);
        let csv = WeightTable::load(dir.path(), Cutoff::Stage2, 1).unwrap();
        assert_eq!(csv.n_events(), 3);
        assert!(WeightTable::load(dir.path(), Cutoff::Stage1, 0).is_err());
    }

    #[test]
    fn malformed_workbooks() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("weights.xlsx");
        std::fs::write(&fake, TABLE).unwrap();
        assert!(matches!(
            WeightTable::from_path(&fake),
            Err(RiskError::ModelLoad(_))
        ));
    }
}
