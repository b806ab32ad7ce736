use crate::model::{Task, TaskOrigin};
use std::path::Path;

fn origin_label(origin: TaskOrigin) -> &'static str {
    match origin {
        TaskOrigin::Template => "template",
        TaskOrigin::Live => "live",
    }
}

/// Export a category schedule to a semicolon-delimited CSV file.
///
/// Columns: Task ; Start ; End ; Progress ; Assignee ; Source
/// Dates are formatted as YYYY-MM-DD.
/// Returns the number of tasks written.
pub fn export_csv(tasks: &[Task], path: &Path) -> Result<usize, csv::Error> {
    let file = std::fs::File::create(path)?;
    write_csv(tasks, file)
}

pub fn write_csv<W: std::io::Write>(tasks: &[Task], writer: W) -> Result<usize, csv::Error> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_writer(writer);

    wtr.write_record(["Task", "Start", "End", "Progress", "Assignee", "Source"])?;

    for task in tasks {
        let assignee = task
            .assigned_person
            .as_ref()
            .map(|p| p.display_name())
            .unwrap_or_default();
        let start = task.start.format("%Y-%m-%d").to_string();
        let end = task.end.format("%Y-%m-%d").to_string();
        let progress = format!("{}%", task.progress());
        wtr.write_record([
            task.name.as_str(),
            start.as_str(),
            end.as_str(),
            progress.as_str(),
            assignee.as_str(),
            origin_label(task.origin),
        ])?;
    }

    wtr.flush()?;
    Ok(tasks.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, Person, PersonColor, SubTask};
    use chrono::NaiveDate;
    use uuid::Uuid;

    #[test]
    fn writes_header_and_rows() {
        let day = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
        let person = Person {
            id: Uuid::new_v4(),
            first_name: "花子".into(),
            last_name: "佐藤".into(),
            display_color: PersonColor::Blue,
        };
        let mut done = SubTask::new("a");
        done.completed = true;
        let tasks = vec![
            Task::new("契約手続き", day, day + chrono::Duration::days(4), Category::Communication, TaskOrigin::Live)
                .with_assignee(Some(person))
                .with_sub_tasks(vec![done, SubTask::new("b")]),
            Task::new("研修", day, day, Category::Training, TaskOrigin::Template),
        ];

        let mut out = Vec::new();
        assert_eq!(write_csv(&tasks, &mut out).unwrap(), 2);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Task;Start;End;Progress;Assignee;Source");
        assert_eq!(lines[1], "契約手続き;2024-09-01;2024-09-05;50%;佐藤 花子;live");
        assert_eq!(lines[2], "研修;2024-09-01;2024-09-01;0%;;template");
    }
}
