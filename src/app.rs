use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::AppSettings;
use crate::error::StoreError;
use crate::feed::{CategoryFeed, FeedScope};
use crate::model::{Category, GanttViewState, Person, Project, Task, TimelineViewport};
use crate::store::{
    ChangeReceiver, LiveStore, NewTask, ProjectPatch, PromotionEdit, SubTaskPatch, Subscription,
    TaskPatch,
};
use crate::ui;
use crate::ui::dialogs::{DialogState, SettingsForm, TaskForm};

/// Main application state.
pub struct SpchartApp {
    pub settings: AppSettings,
    store: Arc<dyn LiveStore>,
    pub feed: CategoryFeed,

    pub projects: Vec<Project>,
    pub people: Vec<Person>,
    pub selected_project: Option<Uuid>,
    pub category: Category,
    /// Draft for the open-date picker.
    pub open_date_draft: NaiveDate,

    // Session-only expand/hide state per project and category
    views: HashMap<(Uuid, Category), GanttViewState>,
    pub viewport: TimelineViewport,

    pub dialogs: DialogState,
    /// Text typed into each task's inline "add sub-task" field.
    pub sub_task_drafts: HashMap<Uuid, String>,

    pub status_message: String,
    /// Last failed store operation, shown inline until dismissed.
    pub error: Option<String>,
    /// Template error the user already dismissed.
    dismissed_notice: Option<String>,

    project_changes: ChangeReceiver,
    people_changes: ChangeReceiver,
}

impl SpchartApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        settings: AppSettings,
        store: Arc<dyn LiveStore>,
    ) -> Self {
        ui::theme::install_fonts(&cc.egui_ctx);
        ui::theme::apply_theme(&cc.egui_ctx);

        let mut feed = CategoryFeed::new(
            Arc::clone(&store),
            settings.template_source(),
            settings.refresh_interval(),
        );
        let repaint = cc.egui_ctx.clone();
        feed.set_waker(move || repaint.request_repaint());

        let today = chrono::Local::now().date_naive();
        let mut app = Self {
            project_changes: store.subscribe(Subscription::Projects),
            people_changes: store.subscribe(Subscription::People),
            settings,
            store,
            feed,
            projects: Vec::new(),
            people: Vec::new(),
            selected_project: None,
            category: Category::ALL[0],
            open_date_draft: today,
            views: HashMap::new(),
            viewport: TimelineViewport::fitted_to_tasks(&[], today),
            dialogs: DialogState::default(),
            sub_task_drafts: HashMap::new(),
            status_message: "Ready".to_string(),
            error: None,
            dismissed_notice: None,
        };

        app.reload_projects();
        app.reload_people();
        app.selected_project = app.projects.first().map(|p| p.id);
        app.sync_feed();
        app.feed.refresh_template();
        app
    }

    // --- Selection ---

    pub fn current_project(&self) -> Option<&Project> {
        let id = self.selected_project?;
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn open_date(&self) -> Option<NaiveDate> {
        self.current_project().and_then(|p| p.open_date)
    }

    fn scope(&self) -> Option<FeedScope> {
        self.selected_project.map(|project_id| FeedScope {
            project_id,
            category: self.category,
        })
    }

    fn view_key(&self) -> (Uuid, Category) {
        (self.selected_project.unwrap_or_default(), self.category)
    }

    pub fn view(&self) -> Option<&GanttViewState> {
        self.views.get(&self.view_key())
    }

    pub fn view_mut(&mut self) -> &mut GanttViewState {
        let key = self.view_key();
        self.views.entry(key).or_default()
    }

    fn sync_feed(&mut self) {
        let open_date = self.open_date();
        if let Some(date) = open_date {
            self.open_date_draft = date;
        }
        self.feed.select(self.scope(), open_date);
    }

    pub fn select_project(&mut self, id: Option<Uuid>) {
        if self.selected_project != id {
            self.selected_project = id;
            self.sync_feed();
            if let Some(name) = self.current_project().map(|p| p.name.clone()) {
                self.status_message = format!("Opened '{}'", name);
            }
        }
    }

    pub fn select_category(&mut self, category: Category) {
        if self.category != category {
            self.category = category;
            self.sync_feed();
        }
    }

    pub fn refresh(&mut self) {
        self.reload_projects();
        self.reload_people();
        self.sync_feed();
        self.feed.refresh();
        self.status_message = "Refreshing…".to_string();
    }

    // --- Store helpers ---

    /// Record a failed store call. The operation left nothing behind, so the
    /// user can simply retry.
    fn report<T>(&mut self, action: &str, result: Result<T, StoreError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.error = None;
                Some(value)
            }
            Err(e) => {
                tracing::error!(error = %e, action, "store operation failed");
                self.error = Some(format!("{action}: {e}"));
                self.status_message = format!("{action} failed");
                None
            }
        }
    }

    fn reload_projects(&mut self) {
        let result = self.store.list_projects();
        if let Some(projects) = self.report("Load projects", result) {
            self.projects = projects;
        }
        if let Some(id) = self.selected_project {
            if !self.projects.iter().any(|p| p.id == id) {
                self.selected_project = self.projects.first().map(|p| p.id);
            }
        }
    }

    fn reload_people(&mut self) {
        let result = self.store.list_people();
        if let Some(people) = self.report("Load people", result) {
            self.people = people;
        }
    }

    /// Apply project and people notifications from this or other sessions.
    fn poll_changes(&mut self) {
        let projects_changed = self.project_changes.try_iter().count() > 0;
        let people_changed = self.people_changes.try_iter().count() > 0;
        if projects_changed {
            self.reload_projects();
            self.sync_feed();
        }
        if people_changed {
            self.reload_people();
        }
    }

    // --- Projects ---

    pub fn add_project(&mut self, name: &str) -> bool {
        let result = self.store.add_project(name);
        match self.report("Add project", result) {
            Some(project) => {
                self.status_message = format!("Created project '{}'", project.name);
                self.reload_projects();
                self.select_project(Some(project.id));
                true
            }
            None => false,
        }
    }

    pub fn delete_project(&mut self, id: Uuid) {
        let result = self.store.delete_project(id);
        if self.report("Delete project", result).is_some() {
            self.views.retain(|(project_id, _), _| *project_id != id);
            self.reload_projects();
            if self.selected_project == Some(id) || self.selected_project.is_none() {
                self.selected_project = self.projects.first().map(|p| p.id);
            }
            self.sync_feed();
            self.status_message = "Project deleted".to_string();
        }
    }

    pub fn set_open_date(&mut self, open_date: Option<NaiveDate>) {
        let Some(id) = self.selected_project else {
            return;
        };
        let result = self.store.update_project(
            id,
            ProjectPatch {
                open_date: Some(open_date),
                ..Default::default()
            },
        );
        if self.report("Set open date", result).is_some() {
            if let Some(project) = self.projects.iter_mut().find(|p| p.id == id) {
                project.open_date = open_date;
            }
            self.sync_feed();
            self.status_message = match open_date {
                Some(date) => format!("Open date set to {}", date.format("%Y-%m-%d")),
                None => "Open date cleared".to_string(),
            };
        }
    }

    // --- Tasks ---

    pub fn create_task_from_form(&mut self, form: &TaskForm) -> bool {
        let Some(project_id) = self.selected_project else {
            return false;
        };
        let task = NewTask {
            name: form.name.trim().to_string(),
            start: form.start,
            end: form.end,
            assigned_person_id: form.assignee,
            order_index: None,
        };
        let result = self.store.add_task(project_id, self.category, task);
        match self.report("Add task", result) {
            Some(task) => {
                self.status_message = format!("Added '{}'", task.name);
                self.feed.apply_local(task.id, task);
                true
            }
            None => false,
        }
    }

    pub fn rename_task(&mut self, id: Uuid, name: &str) -> bool {
        let Some(mut task) = self.feed.task(id).cloned() else {
            return false;
        };
        let result = self.store.update_task(
            id,
            TaskPatch {
                name: Some(name.trim().to_string()),
                ..Default::default()
            },
        );
        if self.report("Rename task", result).is_none() {
            return false;
        }
        task.name = name.trim().to_string();
        self.status_message = format!("Renamed to '{}'", task.name);
        self.feed.apply_local(id, task);
        true
    }

    pub fn delete_task(&mut self, id: Uuid) {
        let result = self.store.delete_task(id);
        if self.report("Delete task", result).is_some() {
            self.view_mut().forget(id);
            self.sub_task_drafts.remove(&id);
            self.feed.refresh_live();
            self.status_message = "Task deleted".to_string();
        }
    }

    /// Copy a template task into the store together with its first edit.
    fn promote(&mut self, template: &Task, edit: PromotionEdit) -> Option<Task> {
        let project_id = self.selected_project?;
        let result = self.store.promote_task(project_id, template, edit);
        let live = self.report("Save template task", result)?;
        self.view_mut().rekey(template.id, live.id);
        self.feed.apply_local(template.id, live.clone());
        Some(live)
    }

    pub fn reschedule(&mut self, id: Uuid, start: NaiveDate, end: NaiveDate) {
        let Some(mut task) = self.feed.task(id).cloned() else {
            return;
        };
        if task.is_template() {
            if self.promote(&task, PromotionEdit::Reschedule(start, end)).is_none() {
                return;
            }
        } else {
            let result = self.store.update_task(
                id,
                TaskPatch {
                    schedule: Some((start, end)),
                    ..Default::default()
                },
            );
            if self.report("Move task", result).is_none() {
                return;
            }
            task.start = start;
            task.end = end;
            self.feed.apply_local(id, task.clone());
        }
        self.status_message = format!(
            "Updated '{}' ({} → {})",
            task.name,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );
    }

    pub fn assign(&mut self, id: Uuid, person_id: Option<Uuid>) {
        let Some(mut task) = self.feed.task(id).cloned() else {
            return;
        };
        if task.is_template() {
            if self.promote(&task, PromotionEdit::AssignPerson(person_id)).is_none() {
                return;
            }
        } else {
            let result = self.store.update_task(
                id,
                TaskPatch {
                    assigned_person: Some(person_id),
                    ..Default::default()
                },
            );
            if self.report("Assign person", result).is_none() {
                return;
            }
            task.assigned_person = person_id.and_then(|pid| self.people.iter().find(|p| p.id == pid).cloned());
            self.feed.apply_local(id, task.clone());
        }
        self.status_message = match person_id.and_then(|pid| self.people.iter().find(|p| p.id == pid)) {
            Some(person) => format!("Assigned '{}' to {}", task.name, person.display_name()),
            None => format!("Cleared assignee of '{}'", task.name),
        };
    }

    pub fn toggle_sub_task(&mut self, task_id: Uuid, sub_task_id: Uuid) {
        let Some(mut task) = self.feed.task(task_id).cloned() else {
            return;
        };
        if task.is_template() {
            if let Some(live) = self.promote(&task, PromotionEdit::ToggleSubTask(sub_task_id)) {
                self.status_message = format!("'{}' is {}% done", live.name, live.progress());
            }
            return;
        }
        let Some(completed) = task.toggle_sub_task(sub_task_id) else {
            return;
        };
        let result = self.store.update_sub_task(
            sub_task_id,
            SubTaskPatch {
                completed: Some(completed),
                ..Default::default()
            },
        );
        if self.report("Update sub-task", result).is_some() {
            self.status_message = format!("'{}' is {}% done", task.name, task.progress());
            self.feed.apply_local(task_id, task);
        }
    }

    pub fn add_sub_task(&mut self, task_id: Uuid, name: &str) {
        let result = self.store.add_sub_task(task_id, name);
        if let Some(sub) = self.report("Add sub-task", result) {
            self.sub_task_drafts.remove(&task_id);
            self.status_message = format!("Added sub-task '{}'", sub.name);
            self.feed.refresh_live();
        }
    }

    pub fn delete_sub_task(&mut self, sub_task_id: Uuid) {
        let result = self.store.delete_sub_task(sub_task_id);
        if self.report("Delete sub-task", result).is_some() {
            self.status_message = "Sub-task deleted".to_string();
            self.feed.refresh_live();
        }
    }

    // --- People ---

    pub fn save_person(&mut self, id: Option<Uuid>, first_name: &str, last_name: &str) -> bool {
        let result = match id {
            Some(id) => self.store.update_person(id, first_name, last_name),
            None => self.store.add_person(first_name, last_name).map(|_| ()),
        };
        if self.report("Save person", result).is_some() {
            self.reload_people();
            self.status_message = "Person saved".to_string();
            true
        } else {
            false
        }
    }

    pub fn delete_person(&mut self, id: Uuid) {
        let result = self.store.delete_person(id);
        if self.report("Delete person", result).is_some() {
            self.reload_people();
            self.status_message = "Person deleted".to_string();
        }
    }

    // --- Files and settings ---

    pub fn export_csv(&mut self) {
        let tasks = self.feed.tasks();
        if tasks.is_empty() {
            self.status_message = "Nothing to export, this category has no tasks".to_string();
            return;
        }

        let project = self.current_project().map(|p| p.name.clone()).unwrap_or_default();
        let default_name = format!("{}-{}.csv", project, self.category.label());
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("CSV Files", &["csv"])
            .set_file_name(&default_name)
            .save_file()
        {
            match crate::io::export_csv(self.feed.tasks(), &path) {
                Ok(count) => {
                    tracing::info!(count, path = %path.display(), "exported schedule");
                    self.status_message = format!("Exported {} tasks to CSV", count);
                }
                Err(e) => {
                    tracing::error!(error = %e, "CSV export failed");
                    self.status_message = format!("CSV export failed: {}", e);
                }
            }
        }
    }

    pub fn pick_template_csv(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("CSV Files", &["csv", "txt"])
            .pick_file()
        {
            self.settings.template_url = None;
            self.settings.template_csv = Some(path);
            self.apply_settings();
        }
    }

    pub fn save_settings_form(&mut self, form: &SettingsForm) {
        let url = form.template_url.trim();
        let csv = form.template_csv.trim();
        self.settings.template_url = (!url.is_empty()).then(|| url.to_string());
        self.settings.template_csv = (!csv.is_empty()).then(|| csv.into());
        self.settings.refresh_interval_secs = form.refresh_interval_secs;
        self.settings.request_timeout_secs = form.request_timeout_secs;
        self.apply_settings();
    }

    fn apply_settings(&mut self) {
        self.feed.set_refresh_interval(self.settings.refresh_interval());
        self.feed.set_source(self.settings.template_source());
        self.dismissed_notice = None;
        self.status_message = match self.settings.save() {
            Ok(_) => "Settings saved".to_string(),
            Err(e) => {
                tracing::error!(error = %e, "could not save settings");
                format!("Settings applied but not saved: {}", e)
            }
        };
    }

    /// Template failure notice, unless dismissed.
    pub fn template_notice(&self) -> Option<&str> {
        let error = self.feed.template_error()?;
        (self.dismissed_notice.as_deref() != Some(error)).then_some(error)
    }

    pub fn dismiss_template_notice(&mut self) {
        self.dismissed_notice = self.feed.template_error().map(str::to_string);
    }

    fn apply_table_action(&mut self, action: ui::task_table::TaskTableAction) {
        use ui::task_table::TaskTableAction;
        match action {
            TaskTableAction::None => {}
            TaskTableAction::ToggleExpand(id) => self.view_mut().toggle_expanded(id),
            TaskTableAction::ToggleSubTask {
                task_id,
                sub_task_id,
            } => self.toggle_sub_task(task_id, sub_task_id),
            TaskTableAction::AddSubTask { task_id, name } => self.add_sub_task(task_id, &name),
            TaskTableAction::DeleteSubTask(id) => self.delete_sub_task(id),
            TaskTableAction::Hide(id) => {
                self.view_mut().hide(id);
                self.status_message = "Task hidden for this session".to_string();
            }
            TaskTableAction::Assign(id) => self.dialogs.assign = Some(id),
            TaskTableAction::Rename(id) => {
                if let Some(task) = self.feed.task(id) {
                    self.dialogs.rename_task = Some((id, task.name.clone()));
                }
            }
            TaskTableAction::Delete(id) => self.dialogs.delete_task = Some(id),
        }
    }

    fn apply_chart_action(&mut self, action: ui::gantt_chart::ChartAction) {
        use ui::gantt_chart::ChartAction;
        match action {
            ChartAction::None => {}
            ChartAction::ToggleExpand(id) => self.view_mut().toggle_expanded(id),
            ChartAction::Reschedule {
                task_id,
                start,
                end,
            } => self.reschedule(task_id, start, end),
        }
    }
}

impl eframe::App for SpchartApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_changes();
        self.feed.poll();

        let today = chrono::Local::now().date_naive();
        self.viewport = TimelineViewport::for_view(
            self.open_date(),
            self.feed.tasks(),
            today,
            self.viewport.pixels_per_day,
        );

        // Top panel: toolbar
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui::toolbar::show_toolbar(self, ui);
        });

        // Notices: template outage and the last failed store call
        let notice = self.template_notice().map(str::to_string);
        if notice.is_some() || self.error.is_some() {
            let mut dismiss_notice = false;
            let mut dismiss_error = false;
            egui::TopBottomPanel::top("notices").show(ctx, |ui| {
                if let Some(notice) = &notice {
                    ui.horizontal(|ui| {
                        ui.label(
                            egui::RichText::new(format!(
                                "{} Template tasks unavailable: {}",
                                egui_phosphor::regular::WARNING,
                                notice
                            ))
                            .color(ui::theme::TEXT_WARNING),
                        );
                        if ui.small_button("Dismiss").clicked() {
                            dismiss_notice = true;
                        }
                    });
                }
                if let Some(error) = &self.error {
                    ui.horizontal(|ui| {
                        ui.label(
                            egui::RichText::new(format!(
                                "{} {}",
                                egui_phosphor::regular::X_CIRCLE,
                                error
                            ))
                            .color(ui::theme::TEXT_ERROR),
                        );
                        if ui.small_button("Dismiss").clicked() {
                            dismiss_error = true;
                        }
                    });
                }
            });
            if dismiss_notice {
                self.dismiss_template_notice();
            }
            if dismiss_error {
                self.error = None;
            }
        }

        // Bottom panel: status bar
        egui::TopBottomPanel::bottom("status_bar")
            .exact_height(ui::theme::STATUS_BAR_HEIGHT)
            .frame(
                egui::Frame::default()
                    .fill(ui::theme::BG_STATUS)
                    .inner_margin(egui::Margin::symmetric(10.0, 0.0)),
            )
            .show(ctx, |ui| {
                ui.horizontal_centered(|ui| {
                    if self.feed.is_loading() {
                        ui.spinner();
                    }
                    ui.label(
                        egui::RichText::new(&self.status_message)
                            .font(ui::theme::font_sub())
                            .color(ui::theme::TEXT_SECONDARY),
                    );
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        ui.label(
                            egui::RichText::new(format!(
                                "Zoom: {:.0}%",
                                self.viewport.pixels_per_day
                                    / crate::model::timeline::DEFAULT_PIXELS_PER_DAY
                                    * 100.0
                            ))
                            .size(10.5)
                            .color(ui::theme::TEXT_DIM),
                        );
                        ui.label(egui::RichText::new(" · ").size(10.5).color(ui::theme::TEXT_DIM));
                        ui.label(
                            egui::RichText::new(format!("Tasks: {}", self.feed.tasks().len()))
                                .size(10.5)
                                .color(ui::theme::TEXT_DIM),
                        );
                        ui.label(egui::RichText::new(" · ").size(10.5).color(ui::theme::TEXT_DIM));
                        ui.label(
                            egui::RichText::new(format!(
                                "Template rows: {}",
                                self.feed.template_row_count()
                            ))
                            .size(10.5)
                            .color(ui::theme::TEXT_DIM),
                        );
                        if let Some(error) = self.feed.live_error() {
                            ui.label(
                                egui::RichText::new(format!(
                                    "{} live tasks stale",
                                    egui_phosphor::regular::WARNING
                                ))
                                .size(10.5)
                                .color(ui::theme::TEXT_ERROR),
                            )
                            .on_hover_text(error);
                        }
                        if !self.feed.template_warnings().is_empty() {
                            ui.label(
                                egui::RichText::new(format!(
                                    "{} rows skipped",
                                    self.feed.template_warnings().len()
                                ))
                                .size(10.5)
                                .color(ui::theme::TEXT_WARNING),
                            )
                            .on_hover_text(self.feed.template_warnings().join("\n"));
                        }
                    });
                });
            });

        // Central panel: task table and chart share one vertical scroll
        let mut table_action = ui::task_table::TaskTableAction::None;
        let mut chart_action = ui::gantt_chart::ChartAction::None;
        let mut open_new_project = false;
        let has_project = self.selected_project.is_some();
        let view_key = self.view_key();
        let open_date = self.open_date();
        let loading = self.feed.is_loading();
        let chart_frame = egui::Frame::default()
            .fill(ui::theme::BG_DARK)
            .inner_margin(egui::Margin::ZERO);
        egui::CentralPanel::default().frame(chart_frame).show(ctx, |ui| {
            if !has_project {
                ui.vertical_centered(|ui| {
                    ui.add_space(ui.available_height() * 0.35);
                    ui.label(egui::RichText::new("No project yet").size(16.0).color(ui::theme::TEXT_SECONDARY));
                    ui.add_space(8.0);
                    if ui.button(format!("{}  New project", egui_phosphor::regular::PLUS)).clicked() {
                        open_new_project = true;
                    }
                });
                return;
            }

            let empty = GanttViewState::default();
            let view = self.views.get(&view_key).unwrap_or(&empty);
            let rows = view.visible_rows(self.feed.tasks());

            if rows.is_empty() {
                ui.vertical_centered(|ui| {
                    ui.add_space(ui.available_height() * 0.35);
                    let hint = if loading {
                        "Loading…"
                    } else if open_date.is_none() {
                        "No tasks. Set an open date to see the template schedule."
                    } else {
                        "No tasks in this category"
                    };
                    ui.label(egui::RichText::new(hint).color(ui::theme::TEXT_SECONDARY));
                });
                return;
            }

            egui::ScrollArea::vertical()
                .id_salt("rows")
                .auto_shrink([false, false])
                .show(ui, |ui| {
                    ui.horizontal_top(|ui| {
                        ui.spacing_mut().item_spacing.x = 0.0;
                        ui.allocate_ui_with_layout(
                            egui::vec2(ui::theme::SIDE_PANEL_WIDTH, 0.0),
                            egui::Layout::top_down(egui::Align::Min),
                            |ui| {
                                ui.set_width(ui::theme::SIDE_PANEL_WIDTH);
                                table_action = ui::task_table::show_task_table(
                                    &rows,
                                    view,
                                    &mut self.sub_task_drafts,
                                    ui,
                                );
                            },
                        );
                        chart_action = ui::gantt_chart::show_gantt_chart(
                            &rows,
                            &mut self.viewport,
                            open_date,
                            today,
                            ui,
                        );
                    });
                });
        });

        if open_new_project {
            self.dialogs.add_project = Some(String::new());
        }
        self.apply_table_action(table_action);
        self.apply_chart_action(chart_action);

        // Dialogs
        ui::dialogs::show_dialogs(self, ctx);

        // Keep polling the feed for notifications and the refresh timer
        let wake = if self.feed.is_loading() {
            Duration::from_millis(100)
        } else {
            Duration::from_secs(1)
        };
        ctx.request_repaint_after(wake);
    }
}
