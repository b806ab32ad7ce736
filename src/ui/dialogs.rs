use chrono::NaiveDate;
use egui::{Color32, Context, RichText, Window};
use egui_phosphor::regular as icons;
use uuid::Uuid;

use crate::app::SpchartApp;
use crate::config::AppSettings;
use crate::ui::theme;

/// Which dialogs are open, with the draft each one edits.
#[derive(Debug, Default)]
pub struct DialogState {
    pub add_project: Option<String>,
    pub delete_project: Option<Uuid>,
    pub add_task: Option<TaskForm>,
    pub rename_task: Option<(Uuid, String)>,
    pub delete_task: Option<Uuid>,
    /// Task whose assignee is being picked.
    pub assign: Option<Uuid>,
    pub people: bool,
    pub person_form: Option<PersonForm>,
    pub hidden: bool,
    pub settings: Option<SettingsForm>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskForm {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub assignee: Option<Uuid>,
}

impl TaskForm {
    pub fn starting(date: NaiveDate) -> Self {
        Self {
            name: String::new(),
            start: date,
            end: date,
            assignee: None,
        }
    }

    /// Why the form cannot be submitted yet.
    pub fn problem(&self) -> Option<&'static str> {
        if self.name.trim().is_empty() {
            Some("Enter a task name")
        } else if self.start > self.end {
            Some("The end date is before the start date")
        } else {
            None
        }
    }
}

/// A person being added (`id` is `None`) or edited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonForm {
    pub id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettingsForm {
    pub template_url: String,
    pub template_csv: String,
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl From<&AppSettings> for SettingsForm {
    fn from(settings: &AppSettings) -> Self {
        Self {
            template_url: settings.template_url.clone().unwrap_or_default(),
            template_csv: settings
                .template_csv
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            refresh_interval_secs: settings.refresh_interval_secs,
            request_timeout_secs: settings.request_timeout_secs,
        }
    }
}

/// Render every open dialog.
pub fn show_dialogs(app: &mut SpchartApp, ctx: &Context) {
    let escape = ctx.input(|i| i.key_pressed(egui::Key::Escape));

    show_add_project_dialog(app, ctx, escape);
    show_delete_project_dialog(app, ctx, escape);
    show_add_task_dialog(app, ctx, escape);
    show_rename_task_dialog(app, ctx, escape);
    show_delete_task_dialog(app, ctx, escape);
    show_assign_dialog(app, ctx, escape);
    show_people_dialog(app, ctx, escape);
    show_hidden_dialog(app, ctx, escape);
    show_settings_dialog(app, ctx, escape);
}

fn dialog(title: &str) -> Window<'static> {
    Window::new(RichText::new(title).strong().size(14.0))
        .resizable(false)
        .collapsible(false)
        .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
        .fixed_size([theme::DIALOG_WIDTH, 0.0])
}

/// Confirm and cancel buttons. Returns `(confirmed, cancelled)`.
fn dialog_buttons(ui: &mut egui::Ui, confirm: &str, enabled: bool, danger: bool) -> (bool, bool) {
    ui.add_space(6.0);
    ui.separator();
    ui.add_space(4.0);
    let mut result = (false, false);
    ui.horizontal(|ui| {
        let fill = if danger { theme::DANGER } else { theme::ACCENT };
        let confirm_btn = egui::Button::new(RichText::new(confirm).color(Color32::WHITE))
            .fill(fill)
            .rounding(egui::Rounding::same(4.0));
        if ui.add_enabled(enabled, confirm_btn).clicked() {
            result.0 = true;
        }
        if ui.add_sized([80.0, 24.0], egui::Button::new("Cancel")).clicked() {
            result.1 = true;
        }
    });
    ui.add_space(2.0);
    result
}

fn enter_pressed(ui: &egui::Ui, response: &egui::Response) -> bool {
    response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter))
}

fn show_add_project_dialog(app: &mut SpchartApp, ctx: &Context, escape: bool) {
    let Some(mut name) = app.dialogs.add_project.take() else {
        return;
    };
    let mut submit = false;
    let mut cancel = escape;
    dialog("New Project").show(ctx, |ui| {
        ui.label(RichText::new("Name").color(theme::TEXT_SECONDARY));
        let edit = ui.add(
            egui::TextEdit::singleline(&mut name)
                .hint_text("Store name…")
                .desired_width(f32::INFINITY),
        );
        edit.request_focus();
        submit |= enter_pressed(ui, &edit);
        let (ok, no) = dialog_buttons(ui, "Create", !name.trim().is_empty(), false);
        submit |= ok;
        cancel |= no;
    });
    if submit && !name.trim().is_empty() && app.add_project(name.trim()) {
        return;
    }
    if !cancel {
        app.dialogs.add_project = Some(name);
    }
}

fn show_delete_project_dialog(app: &mut SpchartApp, ctx: &Context, escape: bool) {
    let Some(id) = app.dialogs.delete_project.take() else {
        return;
    };
    let Some(name) = app.projects.iter().find(|p| p.id == id).map(|p| p.name.clone()) else {
        return;
    };
    let mut confirm = false;
    let mut cancel = escape;
    dialog("Delete Project").show(ctx, |ui| {
        ui.label(format!("Delete '{}' and all of its tasks?", name));
        ui.label(
            RichText::new("Template tasks are not affected.")
                .small()
                .color(theme::TEXT_DIM),
        );
        let (ok, no) = dialog_buttons(ui, "Delete", true, true);
        confirm = ok;
        cancel |= no;
    });
    if confirm {
        app.delete_project(id);
    } else if !cancel {
        app.dialogs.delete_project = Some(id);
    }
}

fn show_add_task_dialog(app: &mut SpchartApp, ctx: &Context, escape: bool) {
    let Some(mut form) = app.dialogs.add_task.take() else {
        return;
    };
    let mut submit = false;
    let mut cancel = escape;
    let people = app.people.clone();
    dialog(&format!("Add Task · {}", app.category.label())).show(ctx, |ui| {
        ui.visuals_mut().extreme_bg_color = theme::BG_FIELD;
        ui.add_space(4.0);

        egui::Grid::new("add_task_grid")
            .num_columns(2)
            .striped(false)
            .spacing([12.0, 8.0])
            .show(ui, |ui| {
                ui.label(RichText::new("Name").color(theme::TEXT_SECONDARY));
                ui.add_sized(
                    [220.0, 24.0],
                    egui::TextEdit::singleline(&mut form.name).hint_text("Task name…"),
                );
                ui.end_row();

                ui.label(RichText::new("Start").color(theme::TEXT_SECONDARY));
                ui.add(egui_extras::DatePickerButton::new(&mut form.start).id_salt("dlg_dp_start"));
                ui.end_row();

                ui.label(RichText::new("End").color(theme::TEXT_SECONDARY));
                ui.add(egui_extras::DatePickerButton::new(&mut form.end).id_salt("dlg_dp_end"));
                ui.end_row();

                ui.label(RichText::new("Assignee").color(theme::TEXT_SECONDARY));
                let selected = form
                    .assignee
                    .and_then(|id| people.iter().find(|p| p.id == id))
                    .map(|p| p.display_name())
                    .unwrap_or_else(|| "Unassigned".to_string());
                egui::ComboBox::from_id_salt("dlg_assignee")
                    .selected_text(selected)
                    .width(220.0)
                    .show_ui(ui, |ui| {
                        ui.selectable_value(&mut form.assignee, None, "Unassigned");
                        for person in &people {
                            ui.selectable_value(
                                &mut form.assignee,
                                Some(person.id),
                                person.display_name(),
                            );
                        }
                    });
                ui.end_row();
            });

        let problem = form.problem();
        if let Some(problem) = problem {
            ui.add_space(4.0);
            ui.label(RichText::new(problem).small().color(theme::TEXT_WARNING));
        }
        let (ok, no) = dialog_buttons(ui, "Create", problem.is_none(), false);
        submit = ok;
        cancel |= no;
    });
    if submit && app.create_task_from_form(&form) {
        return;
    }
    if !cancel {
        app.dialogs.add_task = Some(form);
    }
}

fn show_rename_task_dialog(app: &mut SpchartApp, ctx: &Context, escape: bool) {
    let Some((id, mut name)) = app.dialogs.rename_task.take() else {
        return;
    };
    let mut submit = false;
    let mut cancel = escape;
    dialog("Rename Task").show(ctx, |ui| {
        let edit = ui.add(egui::TextEdit::singleline(&mut name).desired_width(f32::INFINITY));
        submit |= enter_pressed(ui, &edit);
        let (ok, no) = dialog_buttons(ui, "Rename", !name.trim().is_empty(), false);
        submit |= ok;
        cancel |= no;
    });
    if submit && !name.trim().is_empty() && app.rename_task(id, &name) {
        return;
    }
    if !cancel {
        app.dialogs.rename_task = Some((id, name));
    }
}

fn show_delete_task_dialog(app: &mut SpchartApp, ctx: &Context, escape: bool) {
    let Some(id) = app.dialogs.delete_task.take() else {
        return;
    };
    let Some(name) = app.feed.task(id).map(|t| t.name.clone()) else {
        return;
    };
    let mut confirm = false;
    let mut cancel = escape;
    dialog("Delete Task").show(ctx, |ui| {
        ui.label(format!("Delete '{}' and its sub-tasks?", name));
        let (ok, no) = dialog_buttons(ui, "Delete", true, true);
        confirm = ok;
        cancel |= no;
    });
    if confirm {
        app.delete_task(id);
    } else if !cancel {
        app.dialogs.delete_task = Some(id);
    }
}

fn show_assign_dialog(app: &mut SpchartApp, ctx: &Context, escape: bool) {
    let Some(task_id) = app.dialogs.assign.take() else {
        return;
    };
    let Some(task) = app.feed.task(task_id) else {
        return;
    };
    let current = task.assigned_person.as_ref().map(|p| p.id);
    let title = format!("Assign · {}", task.name);

    let mut picked: Option<Option<Uuid>> = None;
    let mut manage_people = false;
    let mut cancel = escape;
    dialog(&title).show(ctx, |ui| {
        egui::ScrollArea::vertical().max_height(280.0).show(ui, |ui| {
            if ui
                .selectable_label(current.is_none(), RichText::new("Unassigned").italics())
                .clicked()
            {
                picked = Some(None);
            }
            for person in &app.people {
                let text = RichText::new(format!("{}  {}", icons::USER_CIRCLE, person.display_name()))
                    .color(theme::person_color(person.display_color));
                if ui.selectable_label(current == Some(person.id), text).clicked() {
                    picked = Some(Some(person.id));
                }
            }
        });
        if app.people.is_empty() {
            ui.label(RichText::new("No people yet").small().color(theme::TEXT_DIM));
        }
        ui.add_space(6.0);
        ui.horizontal(|ui| {
            if ui.button(format!("{} Manage people…", icons::USERS)).clicked() {
                manage_people = true;
            }
            if ui.button("Close").clicked() {
                cancel = true;
            }
        });
    });

    if let Some(person_id) = picked {
        if person_id != current {
            app.assign(task_id, person_id);
        }
    } else if manage_people {
        app.dialogs.people = true;
    } else if !cancel {
        app.dialogs.assign = Some(task_id);
    }
}

fn show_people_dialog(app: &mut SpchartApp, ctx: &Context, escape: bool) {
    if !app.dialogs.people {
        return;
    }
    let mut form = app.dialogs.person_form.take();
    let mut save = false;
    let mut delete: Option<Uuid> = None;
    let mut close = escape && form.is_none();
    let mut cancel_form = escape;

    dialog("People").show(ctx, |ui| {
        egui::ScrollArea::vertical().max_height(260.0).show(ui, |ui| {
            for person in &app.people {
                ui.horizontal(|ui| {
                    ui.label(
                        RichText::new(icons::USER_CIRCLE)
                            .color(theme::person_color(person.display_color)),
                    );
                    ui.label(person.display_name());
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if ui
                            .small_button(icons::TRASH)
                            .on_hover_text("Delete; their tasks become unassigned")
                            .clicked()
                        {
                            delete = Some(person.id);
                        }
                        if ui.small_button(icons::PENCIL_SIMPLE).clicked() {
                            form = Some(PersonForm {
                                id: Some(person.id),
                                first_name: person.first_name.clone(),
                                last_name: person.last_name.clone(),
                            });
                        }
                    });
                });
            }
        });

        ui.add_space(6.0);
        ui.separator();
        match form.as_mut() {
            Some(form) => {
                egui::Grid::new("person_form")
                    .num_columns(2)
                    .spacing([12.0, 6.0])
                    .show(ui, |ui| {
                        ui.label(RichText::new("First name").color(theme::TEXT_SECONDARY));
                        ui.text_edit_singleline(&mut form.first_name);
                        ui.end_row();
                        ui.label(RichText::new("Last name").color(theme::TEXT_SECONDARY));
                        ui.text_edit_singleline(&mut form.last_name);
                        ui.end_row();
                    });
                let ready = !form.first_name.trim().is_empty() || !form.last_name.trim().is_empty();
                let (ok, no) = dialog_buttons(ui, "Save", ready, false);
                save = ok;
                cancel_form |= no;
            }
            None => {
                ui.horizontal(|ui| {
                    if ui.button(format!("{} Add person", icons::PLUS)).clicked() {
                        form = Some(PersonForm::default());
                    }
                    if ui.button("Close").clicked() {
                        close = true;
                    }
                });
            }
        }
    });

    if let Some(id) = delete {
        app.delete_person(id);
    }
    let saved = match &form {
        Some(f) if save => app.save_person(f.id, f.first_name.trim(), f.last_name.trim()),
        _ => false,
    };
    if saved || cancel_form {
        form = None;
    }
    app.dialogs.person_form = form;
    if close {
        app.dialogs.people = false;
    }
}

fn show_hidden_dialog(app: &mut SpchartApp, ctx: &Context, escape: bool) {
    if !app.dialogs.hidden {
        return;
    }
    let hidden: Vec<(Uuid, String)> = match app.view() {
        Some(view) => view
            .hidden_tasks(app.feed.tasks())
            .into_iter()
            .map(|t| (t.id, t.name.clone()))
            .collect(),
        None => Vec::new(),
    };
    let mut show: Vec<Uuid> = Vec::new();
    let mut close = escape;

    dialog("Hidden Tasks").show(ctx, |ui| {
        if hidden.is_empty() {
            ui.label(RichText::new("Nothing is hidden").color(theme::TEXT_DIM));
        }
        egui::ScrollArea::vertical().max_height(280.0).show(ui, |ui| {
            for (id, name) in &hidden {
                ui.horizontal(|ui| {
                    ui.label(name);
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if ui.small_button(format!("{} Show", icons::EYE)).clicked() {
                            show.push(*id);
                        }
                    });
                });
            }
        });
        ui.add_space(6.0);
        ui.horizontal(|ui| {
            if !hidden.is_empty() && ui.button("Show all").clicked() {
                show.extend(hidden.iter().map(|(id, _)| *id));
            }
            if ui.button("Close").clicked() {
                close = true;
            }
        });
    });

    if !show.is_empty() {
        let view = app.view_mut();
        for id in show {
            view.show(id);
        }
    }
    if close {
        app.dialogs.hidden = false;
    }
}

fn show_settings_dialog(app: &mut SpchartApp, ctx: &Context, escape: bool) {
    let Some(mut form) = app.dialogs.settings.take() else {
        return;
    };
    let mut save = false;
    let mut cancel = escape;
    dialog("Settings").show(ctx, |ui| {
        egui::Grid::new("settings_grid")
            .num_columns(2)
            .spacing([12.0, 8.0])
            .show(ui, |ui| {
                ui.label(RichText::new("Template URL").color(theme::TEXT_SECONDARY));
                ui.add(
                    egui::TextEdit::singleline(&mut form.template_url)
                        .hint_text("https://…/export?format=csv")
                        .desired_width(200.0),
                );
                ui.end_row();

                ui.label(RichText::new("Template CSV").color(theme::TEXT_SECONDARY));
                ui.add(
                    egui::TextEdit::singleline(&mut form.template_csv)
                        .hint_text("Used when no URL is set")
                        .desired_width(200.0),
                );
                ui.end_row();

                ui.label(RichText::new("Refresh (s)").color(theme::TEXT_SECONDARY));
                ui.add(egui::DragValue::new(&mut form.refresh_interval_secs).range(0..=3600))
                    .on_hover_text("0 turns automatic refresh off");
                ui.end_row();

                ui.label(RichText::new("Timeout (s)").color(theme::TEXT_SECONDARY));
                ui.add(egui::DragValue::new(&mut form.request_timeout_secs).range(1..=300));
                ui.end_row();
            });
        let (ok, no) = dialog_buttons(ui, "Save", true, false);
        save = ok;
        cancel |= no;
    });
    if save {
        app.save_settings_form(&form);
    } else if !cancel {
        app.dialogs.settings = Some(form);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn task_form_needs_name_and_ordered_dates() {
        let mut form = TaskForm::starting(d(2024, 9, 1));
        assert_eq!(form.problem(), Some("Enter a task name"));

        form.name = "チラシ手配".to_string();
        assert_eq!(form.problem(), None);

        form.end = d(2024, 8, 31);
        assert!(form.problem().is_some());
    }

    #[test]
    fn settings_form_mirrors_settings() {
        let settings = AppSettings {
            template_url: None,
            template_csv: Some(PathBuf::from("template.csv")),
            refresh_interval_secs: 0,
            ..Default::default()
        };
        let form = SettingsForm::from(&settings);
        assert_eq!(form.template_url, "");
        assert_eq!(form.template_csv, "template.csv");
        assert_eq!(form.refresh_interval_secs, 0);
    }
}
