use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::SheetError;
use crate::model::{Category, SubTask, Task, TaskOrigin};
use crate::store::TEMPLATE_ORDER_CEILING;

/// Sub-task columns available per template row.
pub const MAX_SUB_TASKS: usize = 10;

/// Namespace for deterministic template ids, so expand/hide state survives
/// a refetch of the same sheet.
const TEMPLATE_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_42d3_9a0e_4c57_8e21_3d5a_f0c4_7b19);

/// A sub-task cell of a template row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawSheetSubTask")]
pub struct SheetSubTask {
    pub name: String,
    pub completed: bool,
}

/// The endpoint sends either bare names or `{ name, completed }` objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSheetSubTask {
    Name(String),
    Item {
        name: String,
        #[serde(default)]
        completed: bool,
    },
}

impl From<RawSheetSubTask> for SheetSubTask {
    fn from(raw: RawSheetSubTask) -> Self {
        match raw {
            RawSheetSubTask::Name(name) => Self {
                name,
                completed: false,
            },
            RawSheetSubTask::Item { name, completed } => Self { name, completed },
        }
    }
}

fn default_period() -> i64 {
    1
}

/// One template row as read from the sheet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetTask {
    pub category: String,
    #[serde(default)]
    pub display_order: Option<i64>,
    pub main_task: String,
    #[serde(default)]
    pub sub_tasks: Vec<SheetSubTask>,
    /// Duration in days.
    #[serde(default = "default_period")]
    pub period: i64,
    /// Days before the open date the task starts.
    #[serde(default)]
    pub from_open: i64,
}

/// Somewhere template rows can be loaded from.
pub trait TemplateSource: Send + Sync {
    fn fetch(&self) -> Result<Vec<SheetTask>, SheetError>;

    /// Short description for the status bar and logs.
    fn describe(&self) -> String;
}

/// Used when neither an endpoint nor a CSV file is configured.
pub struct UnconfiguredSource;

impl TemplateSource for UnconfiguredSource {
    fn fetch(&self) -> Result<Vec<SheetTask>, SheetError> {
        Err(SheetError::NotConfigured)
    }

    fn describe(&self) -> String {
        "no template source".to_string()
    }
}

/// The read-only template endpoint returning `{ "tasks": [...] }`.
pub struct HttpTemplateSource {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpTemplateSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SheetError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl TemplateSource for HttpTemplateSource {
    fn fetch(&self) -> Result<Vec<SheetTask>, SheetError> {
        let response = self.client.get(&self.url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SheetError::Status(status.as_u16()));
        }
        let body = response.text()?;
        parse_payload(&body)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// A CSV export of the template sheet.
///
/// Columns: category ; display order ; task name ; up to ten sub-task
/// names ; period ; days before open. The first line is a header.
pub struct CsvTemplateSource {
    path: PathBuf,
}

impl CsvTemplateSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TemplateSource for CsvTemplateSource {
    fn fetch(&self) -> Result<Vec<SheetTask>, SheetError> {
        let file = std::fs::File::open(&self.path)?;
        parse_csv_rows(file)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Deserialize)]
struct TemplatePayload {
    tasks: Vec<serde_json::Value>,
}

/// Decode an endpoint body. Rows that do not decode are skipped.
pub fn parse_payload(body: &str) -> Result<Vec<SheetTask>, SheetError> {
    let payload: TemplatePayload =
        serde_json::from_str(body).map_err(|e| SheetError::Malformed(e.to_string()))?;

    let mut rows = Vec::with_capacity(payload.tasks.len());
    for (i, value) in payload.tasks.into_iter().enumerate() {
        match serde_json::from_value::<SheetTask>(value) {
            Ok(row) => rows.push(row),
            Err(e) => tracing::warn!(row = i, error = %e, "skipping malformed template row"),
        }
    }
    Ok(rows)
}

/// Read template rows from CSV, auto-detecting the delimiter from the header.
pub fn parse_csv_rows<R: Read>(mut reader: R) -> Result<Vec<SheetTask>, SheetError> {
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    let first_line = content.lines().next().unwrap_or("");
    let delimiter = detect_delimiter(first_line);

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for (i, result) in csv_reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(line = i + 2, error = %e, "skipping unreadable template row");
                continue;
            }
        };
        if record.len() < 3 {
            tracing::warn!(line = i + 2, fields = record.len(), "skipping short template row");
            continue;
        }

        let field = |idx: usize| record.get(idx).unwrap_or("").trim();
        let sub_tasks = (3..3 + MAX_SUB_TASKS)
            .map(field)
            .filter(|name| !name.is_empty())
            .map(|name| SheetSubTask {
                name: name.to_string(),
                completed: false,
            })
            .collect();

        rows.push(SheetTask {
            category: field(0).to_string(),
            display_order: field(1).parse().ok(),
            main_task: field(2).to_string(),
            sub_tasks,
            period: field(3 + MAX_SUB_TASKS).parse().unwrap_or(1),
            from_open: field(4 + MAX_SUB_TASKS).parse().unwrap_or(0),
        });
    }
    Ok(rows)
}

/// Detect delimiter by checking the first line for common separators.
fn detect_delimiter(first_line: &str) -> u8 {
    let semicolons = first_line.matches(';').count();
    let commas = first_line.matches(',').count();
    let tabs = first_line.matches('\t').count();

    if commas >= semicolons && commas >= tabs {
        b','
    } else if tabs >= semicolons {
        b'\t'
    } else {
        b';'
    }
}

/// Template tasks for one open date, grouped by category.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    by_category: HashMap<Category, Vec<Task>>,
    /// Rows dropped or flagged while building, for display.
    pub warnings: Vec<String>,
}

impl TemplateSet {
    pub fn tasks_for(&self, category: Category) -> &[Task] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_category.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turn template rows into tasks scheduled back from `open_date`.
///
/// A row starts `from_open` days before opening and lasts `period` days,
/// both ends included.
pub fn build_template_set(rows: &[SheetTask], open_date: NaiveDate) -> TemplateSet {
    let mut set = TemplateSet::default();

    for (position, row) in rows.iter().enumerate() {
        let name = row.main_task.trim();
        if name.is_empty() {
            continue;
        }
        let Some(category) = Category::parse(row.category.trim()) else {
            tracing::warn!(row = position, category = %row.category, task = name, "dropping template row with unknown category");
            set.warnings.push(format!(
                "Unknown category '{}' for '{}'",
                row.category, name
            ));
            continue;
        };

        let period = row.period.max(1) as u64;
        let from_open = row.from_open.max(0) as u64;
        let schedule = open_date
            .checked_sub_days(Days::new(from_open))
            .and_then(|start| Some((start, start.checked_add_days(Days::new(period - 1))?)));
        let Some((start, end)) = schedule else {
            tracing::warn!(row = position, task = name, period, from_open, "dropping template row with dates out of range");
            set.warnings.push(format!(
                "Dates out of range for '{}' (period {}, {} days before open)",
                name, row.period, row.from_open
            ));
            continue;
        };

        let order_index = row.display_order.unwrap_or(position as i64);
        if order_index >= TEMPLATE_ORDER_CEILING {
            tracing::warn!(row = position, task = name, order_index, "template display order reaches the range used for added tasks");
            set.warnings.push(format!(
                "Display order {} of '{}' is {} or more; added tasks may sort before it",
                order_index, name, TEMPLATE_ORDER_CEILING
            ));
        }

        let id = Uuid::new_v5(
            &TEMPLATE_NAMESPACE,
            format!("{}/{}/{}", category.label(), position, name).as_bytes(),
        );
        let sub_tasks = row
            .sub_tasks
            .iter()
            .filter(|s| !s.name.trim().is_empty())
            .take(MAX_SUB_TASKS)
            .enumerate()
            .map(|(i, s)| SubTask {
                id: Uuid::new_v5(&id, format!("{}/{}", i, s.name.trim()).as_bytes()),
                name: s.name.trim().to_string(),
                completed: s.completed,
            })
            .collect();

        let task = Task::new(name, start, end, category, TaskOrigin::Template)
            .with_id(id)
            .with_order_index(Some(order_index))
            .with_sub_tasks(sub_tasks);

        set.by_category.entry(category).or_default().push(task);
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn row(category: &str, name: &str, order: Option<i64>, period: i64, from_open: i64) -> SheetTask {
        SheetTask {
            category: category.to_string(),
            display_order: order,
            main_task: name.to_string(),
            sub_tasks: Vec::new(),
            period,
            from_open,
        }
    }

    #[test]
    fn schedules_back_from_open_date() {
        let rows = vec![row("連絡系", "契約手続き", Some(1), 5, 30)];
        let set = build_template_set(&rows, d(2024, 10, 1));
        let tasks = set.tasks_for(Category::Communication);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].start, d(2024, 9, 1));
        assert_eq!(tasks[0].end, d(2024, 9, 5));
        assert_eq!(tasks[0].order_index, Some(1));
        assert_eq!(tasks[0].origin, TaskOrigin::Template);
        assert_eq!(tasks[0].progress(), 0);
    }

    #[test]
    fn skips_blank_names_and_unknown_categories() {
        let rows = vec![
            row("連絡系", "  ", Some(1), 1, 0),
            row("謎系", "ghost", Some(2), 1, 0),
            row("研修系", "研修", None, 3, 10),
        ];
        let set = build_template_set(&rows, d(2024, 10, 1));
        assert_eq!(set.len(), 1);
        assert_eq!(set.warnings.len(), 1);
        let training = set.tasks_for(Category::Training);
        assert_eq!(training[0].order_index, Some(2));
        assert!(set.tasks_for(Category::Communication).is_empty());
    }

    #[test]
    fn sub_tasks_carry_completion_into_progress() {
        let mut r = row("通信系", "回線手配", Some(3), 2, 14);
        r.sub_tasks = vec![
            SheetSubTask { name: "申込".into(), completed: true },
            SheetSubTask { name: "".into(), completed: false },
            SheetSubTask { name: "工事".into(), completed: false },
        ];
        let set = build_template_set(&[r], d(2024, 10, 1));
        let task = &set.tasks_for(Category::Network)[0];
        assert_eq!(task.sub_tasks().len(), 2);
        assert_eq!(task.progress(), 50);
    }

    #[test]
    fn template_ids_are_stable_across_open_dates() {
        let rows = vec![row("その他", "備品", Some(1), 1, 5)];
        let a = build_template_set(&rows, d(2024, 10, 1));
        let b = build_template_set(&rows, d(2025, 1, 1));
        assert_eq!(
            a.tasks_for(Category::Other)[0].id,
            b.tasks_for(Category::Other)[0].id
        );
    }

    #[test]
    fn degenerate_period_and_offset_are_clamped() {
        let rows = vec![row("その他", "x", Some(1), 0, -3)];
        let set = build_template_set(&rows, d(2024, 10, 1));
        let task = &set.tasks_for(Category::Other)[0];
        assert_eq!(task.start, d(2024, 10, 1));
        assert_eq!(task.end, d(2024, 10, 1));
    }

    #[test]
    fn out_of_range_offset_skips_only_that_row() {
        let body = r#"{"tasks": [
            {"category": "連絡系", "displayOrder": 1, "mainTask": "A", "period": 2, "fromOpen": 3},
            {"category": "連絡系", "displayOrder": 2, "mainTask": "B", "period": 2, "fromOpen": 100000000}
        ]}"#;
        let rows = parse_payload(body).unwrap();
        assert_eq!(rows.len(), 2);

        let set = build_template_set(&rows, d(2024, 10, 1));
        let tasks = set.tasks_for(Category::Communication);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "A");
        assert_eq!(tasks[0].start, d(2024, 9, 28));
        assert_eq!(set.warnings.len(), 1);
    }

    #[test]
    fn out_of_range_period_is_skipped() {
        let rows = vec![
            row("研修系", "long", Some(1), i64::MAX, 0),
            row("研修系", "short", Some(2), 1, 0),
        ];
        let set = build_template_set(&rows, d(2024, 10, 1));
        let tasks = set.tasks_for(Category::Training);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "short");
    }

    #[test]
    fn display_order_at_ceiling_is_flagged() {
        let rows = vec![
            row("その他", "early", Some(5), 1, 0),
            row("その他", "late", Some(TEMPLATE_ORDER_CEILING), 1, 0),
        ];
        let set = build_template_set(&rows, d(2024, 10, 1));
        assert_eq!(set.tasks_for(Category::Other).len(), 2);
        assert_eq!(set.warnings.len(), 1);
        assert!(set.warnings[0].contains("late"));
    }

    #[test]
    fn payload_skips_bad_rows() {
        let body = r#"{
            "success": true,
            "tasks": [
                {"category": "連絡系", "displayOrder": 1, "mainTask": "A",
                 "subTasks": [{"id": "A-sub-1", "name": "a1", "completed": false}, "a2"],
                 "period": 2, "fromOpen": 7},
                {"category": "連絡系", "mainTask": 42},
                {"category": "研修系", "mainTask": "B"}
            ]
        }"#;
        let rows = parse_payload(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sub_tasks.len(), 2);
        assert_eq!(rows[0].sub_tasks[1].name, "a2");
        assert_eq!(rows[1].period, 1);
        assert_eq!(rows[1].from_open, 0);
        assert_eq!(rows[1].display_order, None);
    }

    #[test]
    fn payload_without_tasks_is_malformed() {
        assert!(matches!(
            parse_payload(r#"{"error": "Authentication failed"}"#),
            Err(SheetError::Malformed(_))
        ));
        assert!(matches!(parse_payload("<html>"), Err(SheetError::Malformed(_))));
    }

    #[test]
    fn csv_rows_follow_sheet_columns() {
        let csv = "category,order,main_task,s1,s2,s3,s4,s5,s6,s7,s8,s9,s10,period,from_open\n\
                   連絡系,1,契約手続き,書類準備,,押印,,,,,,,,5,30\n\
                   研修系,,研修,,,,,,,,,,,abc,\n\
                   short,row\n";
        let rows = parse_csv_rows(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].display_order, Some(1));
        assert_eq!(
            rows[0].sub_tasks.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["書類準備", "押印"]
        );
        assert_eq!((rows[0].period, rows[0].from_open), (5, 30));
        assert_eq!((rows[1].period, rows[1].from_open), (1, 0));
        assert_eq!(rows[1].display_order, None);
    }

    #[test]
    fn non_utf8_export_is_an_io_error() {
        let bytes: &[u8] = &[0x63, 0x61, 0xff, 0xfe, 0x0a];
        assert!(matches!(parse_csv_rows(bytes), Err(SheetError::Io(_))));
    }

    #[test]
    fn unconfigured_source_reports_typed_error() {
        assert!(matches!(
            UnconfiguredSource.fetch(),
            Err(SheetError::NotConfigured)
        ));
    }
}
