use crate::app::SpchartApp;
use crate::model::Category;
use crate::ui::dialogs::{SettingsForm, TaskForm};
use crate::ui::theme;
use egui::{menu, RichText, Ui};
use egui_phosphor::regular as icons;

/// Render the top toolbar / menu bar.
pub fn show_toolbar(app: &mut SpchartApp, ui: &mut Ui) {
    menu::bar(ui, |ui| {
        ui.menu_button(RichText::new("  File  ").size(13.0), |ui| {
            if ui.button(format!("{}  New Project…", icons::FOLDER_PLUS)).clicked() {
                app.dialogs.add_project = Some(String::new());
                ui.close_menu();
            }
            if ui
                .add_enabled(
                    app.selected_project.is_some(),
                    egui::Button::new(format!("{}  Delete Project…", icons::TRASH)),
                )
                .clicked()
            {
                app.dialogs.delete_project = app.selected_project;
                ui.close_menu();
            }
            ui.separator();
            if ui.button(format!("{}  Export CSV…", icons::EXPORT)).clicked() {
                app.export_csv();
                ui.close_menu();
            }
            if ui.button(format!("{}  Template CSV…", icons::FILE_CSV)).clicked() {
                app.pick_template_csv();
                ui.close_menu();
            }
            ui.separator();
            if ui.button(format!("{}  Settings…", icons::GEAR)).clicked() {
                app.dialogs.settings = Some(SettingsForm::from(&app.settings));
                ui.close_menu();
            }
        });

        ui.menu_button(RichText::new("  View  ").size(13.0), |ui| {
            if ui.button("  Zoom In        Ctrl+Scroll ↑").clicked() {
                app.viewport.zoom_in();
                ui.close_menu();
            }
            if ui.button("  Zoom Out      Ctrl+Scroll ↓").clicked() {
                app.viewport.zoom_out();
                ui.close_menu();
            }
            ui.separator();
            if ui.button("  Refresh").clicked() {
                app.refresh();
                ui.close_menu();
            }
        });

        ui.separator();

        // Project picker
        let selected_name = app
            .current_project()
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "No project".to_string());
        let mut choice = app.selected_project;
        egui::ComboBox::from_id_salt("project_picker")
            .selected_text(selected_name)
            .width(180.0)
            .show_ui(ui, |ui| {
                for project in &app.projects {
                    ui.selectable_value(&mut choice, Some(project.id), &project.name);
                }
            });
        if choice != app.selected_project {
            app.select_project(choice);
        }

        if app.selected_project.is_none() {
            return;
        }

        // Open date
        let open_date = app.open_date();
        ui.label(RichText::new("Open").color(theme::TEXT_SECONDARY));
        let picker = ui.add(
            egui_extras::DatePickerButton::new(&mut app.open_date_draft).id_salt("open_date"),
        );
        if picker.changed() {
            let date = app.open_date_draft;
            app.set_open_date(Some(date));
        }
        match open_date {
            Some(_) => {
                if ui
                    .small_button(icons::X)
                    .on_hover_text("Clear the open date")
                    .clicked()
                {
                    app.set_open_date(None);
                }
            }
            None => {
                ui.label(RichText::new("not set").small().color(theme::TEXT_WARNING));
            }
        }

        ui.separator();

        // Category tabs
        for category in Category::ALL {
            let selected = app.category == category;
            let text = RichText::new(category.label()).size(12.0).color(if selected {
                theme::TEXT_PRIMARY
            } else {
                theme::TEXT_SECONDARY
            });
            if ui.selectable_label(selected, text).clicked() {
                app.select_category(category);
            }
        }

        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            if ui
                .button(icons::USERS)
                .on_hover_text("People")
                .clicked()
            {
                app.dialogs.people = true;
            }

            let hidden = app.view().map_or(0, |v| v.hidden_count());
            if hidden > 0
                && ui
                    .button(format!("{} {}", icons::EYE_SLASH, hidden))
                    .on_hover_text("Hidden tasks")
                    .clicked()
            {
                app.dialogs.hidden = true;
            }

            if ui
                .button(icons::ARROWS_CLOCKWISE)
                .on_hover_text("Reload the template and live tasks")
                .clicked()
            {
                app.refresh();
            }

            let add = egui::Button::new(
                RichText::new(format!("{} Task", icons::PLUS)).color(egui::Color32::WHITE),
            )
            .fill(theme::ACCENT);
            if ui.add(add).clicked() {
                app.dialogs.add_task = Some(TaskForm::starting(app.open_date_draft));
            }
        });
    });
}
