use std::collections::HashMap;

use egui::{Align, Color32, Layout, RichText, Sense, Ui, UiBuilder};
use egui_phosphor::regular as icons;
use uuid::Uuid;

use crate::model::{GanttViewState, Row, Task};
use crate::ui::theme;

/// Width reserved on the right of a main row for assignee, progress and buttons.
const ROW_CONTROLS_WIDTH: f32 = 150.0;
const SUB_INDENT: f32 = 30.0;

/// Actions that the task table can request.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskTableAction {
    None,
    ToggleExpand(Uuid),
    ToggleSubTask { task_id: Uuid, sub_task_id: Uuid },
    AddSubTask { task_id: Uuid, name: String },
    DeleteSubTask(Uuid),
    Hide(Uuid),
    Assign(Uuid),
    Rename(Uuid),
    Delete(Uuid),
}

/// Render the task table, one line per chart row so both stay aligned.
pub fn show_task_table(
    rows: &[Row<'_>],
    view: &GanttViewState,
    drafts: &mut HashMap<Uuid, String>,
    ui: &mut Ui,
) -> TaskTableAction {
    let mut action = TaskTableAction::None;
    let width = ui.available_width();

    // Column headers, same height as the timeline header
    let (header_rect, _) =
        ui.allocate_exact_size(egui::vec2(width, theme::HEADER_HEIGHT), Sense::hover());
    let painter = ui.painter();
    painter.rect_filled(header_rect, 0.0, theme::BG_HEADER);
    painter.line_segment(
        [header_rect.left_bottom(), header_rect.right_bottom()],
        egui::Stroke::new(1.0, theme::BORDER_SUBTLE),
    );
    let label_y = header_rect.bottom() - 12.0;
    for (text, x) in [
        ("TASK", header_rect.left() + 30.0),
        ("WHO", header_rect.right() - ROW_CONTROLS_WIDTH + 4.0),
        ("DONE", header_rect.right() - ROW_CONTROLS_WIDTH + 40.0),
    ] {
        painter.text(
            egui::pos2(x, label_y),
            egui::Align2::LEFT_CENTER,
            text,
            theme::font_small(),
            theme::TEXT_DIM,
        );
    }

    for (i, row) in rows.iter().enumerate() {
        let (rect, _) = ui.allocate_exact_size(
            egui::vec2(width, theme::ROW_HEIGHT + theme::ROW_GAP),
            Sense::hover(),
        );
        let bg = match row {
            Row::Main(_) if i % 2 == 0 => theme::BG_PANEL,
            Row::Main(_) => theme::BG_DARK,
            _ => theme::BG_SUB_ROW,
        };
        ui.painter().rect_filled(rect, 0.0, bg);
        ui.painter().line_segment(
            [rect.left_bottom(), rect.right_bottom()],
            egui::Stroke::new(0.5, theme::BORDER_SUBTLE),
        );

        let mut row_ui = ui.new_child(
            UiBuilder::new()
                .max_rect(rect.shrink2(egui::vec2(6.0, 0.0)))
                .layout(Layout::left_to_right(Align::Center))
                .id_salt(("task-row", i)),
        );
        row_ui.spacing_mut().item_spacing.x = 6.0;

        let row_action = match *row {
            Row::Main(task) => main_row(task, view.is_expanded(task.id), &mut row_ui),
            Row::Sub(task, sub) => {
                row_ui.add_space(SUB_INDENT);
                let mut checked = sub.completed;
                let text = RichText::new(&sub.name).size(11.5).color(if sub.completed {
                    theme::TEXT_DIM
                } else {
                    theme::TEXT_SECONDARY
                });
                let mut row_action = TaskTableAction::None;
                if row_ui.checkbox(&mut checked, text).changed() {
                    row_action = TaskTableAction::ToggleSubTask {
                        task_id: task.id,
                        sub_task_id: sub.id,
                    };
                }
                if !task.is_template() {
                    row_ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                        if icon_button(ui, icons::X, "Delete sub-task").clicked() {
                            row_action = TaskTableAction::DeleteSubTask(sub.id);
                        }
                    });
                }
                row_action
            }
            Row::AddSub(task) => {
                row_ui.add_space(SUB_INDENT);
                let edit_width = row_ui.available_width() - 40.0;
                let draft = drafts.entry(task.id).or_default();
                let edit = row_ui.add(
                    egui::TextEdit::singleline(draft)
                        .hint_text("New sub-task…")
                        .desired_width(edit_width),
                );
                let submitted = edit.lost_focus() && row_ui.input(|i| i.key_pressed(egui::Key::Enter));
                let clicked = icon_button(&mut row_ui, icons::PLUS, "Add sub-task").clicked();
                if (submitted || clicked) && !draft.trim().is_empty() {
                    TaskTableAction::AddSubTask {
                        task_id: task.id,
                        name: draft.trim().to_string(),
                    }
                } else {
                    TaskTableAction::None
                }
            }
        };
        if row_action != TaskTableAction::None {
            action = row_action;
        }
    }

    action
}

fn main_row(task: &Task, expanded: bool, ui: &mut Ui) -> TaskTableAction {
    let mut action = TaskTableAction::None;

    // Expand caret; live tasks can always expand to add sub-tasks
    let expandable = !task.sub_tasks().is_empty() || !task.is_template();
    if expandable {
        let caret = if expanded { icons::CARET_DOWN } else { icons::CARET_RIGHT };
        if icon_button(ui, caret, "Show sub-tasks").clicked() {
            action = TaskTableAction::ToggleExpand(task.id);
        }
    } else {
        ui.add_space(18.0);
    }

    let name_width = (ui.available_width() - ROW_CONTROLS_WIDTH).max(40.0);
    let name_color = if task.is_template() {
        theme::TEXT_SECONDARY
    } else {
        theme::TEXT_PRIMARY
    };
    ui.allocate_ui_with_layout(
        egui::vec2(name_width, theme::ROW_HEIGHT),
        Layout::left_to_right(Align::Center),
        |ui| {
            ui.set_width(name_width);
            let name = ui
                .add(
                    egui::Label::new(RichText::new(&task.name).size(12.0).color(name_color))
                        .truncate()
                        .sense(Sense::click()),
                )
                .on_hover_text(format!(
                    "{}\n{} → {} ({} days){}",
                    task.name,
                    task.start.format("%Y-%m-%d"),
                    task.end.format("%Y-%m-%d"),
                    task.span_days(),
                    if task.is_template() { "\nFrom the template sheet" } else { "" },
                ));
            if name.double_clicked() && !task.is_template() {
                action = TaskTableAction::Rename(task.id);
            }
        },
    );

    ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
        ui.spacing_mut().item_spacing.x = 4.0;

        if !task.is_template() && icon_button(ui, icons::TRASH, "Delete task").clicked() {
            action = TaskTableAction::Delete(task.id);
        }
        if icon_button(ui, icons::EYE_SLASH, "Hide for this session").clicked() {
            action = TaskTableAction::Hide(task.id);
        }

        ui.label(
            RichText::new(format!("{:>3}%", task.progress()))
                .size(11.0)
                .color(theme::progress_color(task.progress())),
        );

        let assignee = match &task.assigned_person {
            Some(person) => egui::Button::new(
                RichText::new(person.initial()).size(11.0).color(Color32::WHITE),
            )
            .fill(theme::person_color(person.display_color))
            .rounding(egui::Rounding::same(10.0)),
            None => egui::Button::new(RichText::new(icons::USER).color(theme::TEXT_DIM)).frame(false),
        };
        let hover = task
            .assigned_person
            .as_ref()
            .map(|p| p.display_name())
            .unwrap_or_else(|| "Assign a person".to_string());
        if ui.add_sized([22.0, 22.0], assignee).on_hover_text(hover).clicked() {
            action = TaskTableAction::Assign(task.id);
        }
    });

    action
}

fn icon_button(ui: &mut Ui, icon: &str, hover: &str) -> egui::Response {
    ui.add(egui::Button::new(RichText::new(icon).size(12.0).color(theme::TEXT_DIM)).frame(false))
        .on_hover_text(hover)
}
