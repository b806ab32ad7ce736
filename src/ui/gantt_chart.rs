use crate::model::{DragMode, DragSnapshot, Row, Task, TimelineViewport};
use crate::ui::theme;
use chrono::{Datelike, NaiveDate};
use egui::{Color32, Id, Pos2, Rect, Rounding, Sense, Stroke, Ui, Vec2};
use uuid::Uuid;

const ROW_HEIGHT: f32 = theme::ROW_HEIGHT;
const ROW_PADDING: f32 = theme::ROW_GAP;
const HEADER_HEIGHT: f32 = theme::HEADER_HEIGHT;
const HANDLE_WIDTH: f32 = theme::HANDLE_WIDTH;
const MONTH_BAND: f32 = 20.0;

/// Sunday first, matching `num_days_from_sunday`.
const WEEKDAY_INITIALS: [&str; 7] = ["日", "月", "火", "水", "木", "金", "土"];

/// What the chart asks the app to do after this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartAction {
    None,
    ToggleExpand(Uuid),
    /// A bar drag was released on new dates.
    Reschedule {
        task_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    },
}

/// Render the timeline for `rows`, aligned line for line with the task table.
pub fn show_gantt_chart(
    rows: &[Row<'_>],
    viewport: &mut TimelineViewport,
    open_date: Option<NaiveDate>,
    today: NaiveDate,
    ui: &mut Ui,
) -> ChartAction {
    let mut action = ChartAction::None;
    let chart_width = viewport.total_width();
    let chart_height = HEADER_HEIGHT + rows.len() as f32 * (ROW_HEIGHT + ROW_PADDING);

    // Handle zoom with scroll wheel
    if ui.rect_contains_pointer(ui.max_rect()) && ui.input(|i| i.modifiers.ctrl) {
        let scroll_delta = ui.input(|i| i.smooth_scroll_delta);
        if scroll_delta.y > 0.0 {
            viewport.zoom_in();
        } else if scroll_delta.y < 0.0 {
            viewport.zoom_out();
        }
    }

    egui::ScrollArea::horizontal()
        .id_salt("timeline")
        .auto_shrink([false, true])
        .show(ui, |ui| {
            let (response, painter) =
                ui.allocate_painter(Vec2::new(chart_width, chart_height), Sense::hover());
            let origin = response.rect.min;
            let ppd = viewport.pixels_per_day;

            painter.rect_filled(response.rect, 0.0, theme::BG_DARK);

            // Row backgrounds, matching the table
            for (i, row) in rows.iter().enumerate() {
                let y = row_top(origin, i);
                let bg = match row {
                    Row::Main(_) if i % 2 == 0 => theme::BG_PANEL,
                    Row::Main(_) => theme::BG_DARK,
                    _ => theme::BG_SUB_ROW,
                };
                painter.rect_filled(
                    Rect::from_min_size(
                        Pos2::new(origin.x, y),
                        Vec2::new(chart_width, ROW_HEIGHT + ROW_PADDING),
                    ),
                    0.0,
                    bg,
                );
                painter.line_segment(
                    [
                        Pos2::new(origin.x, y + ROW_HEIGHT + ROW_PADDING),
                        Pos2::new(origin.x + chart_width, y + ROW_HEIGHT + ROW_PADDING),
                    ],
                    Stroke::new(0.5, theme::BORDER_SUBTLE),
                );
            }

            draw_day_columns(&painter, origin, viewport, open_date, chart_height);
            draw_timeline_header(&painter, origin, viewport, open_date, chart_width);
            draw_today_line(&painter, origin, viewport, today, chart_height);

            for (i, row) in rows.iter().enumerate() {
                let y = row_top(origin, i) + ROW_PADDING;
                match *row {
                    Row::Main(task) => {
                        let row_action = task_bar(ui, &painter, origin, viewport, task, y, ppd);
                        if row_action != ChartAction::None {
                            action = row_action;
                        }
                    }
                    Row::Sub(task, sub) => {
                        if let Some((x, w)) = viewport.bar_pixels(task.start, task.end) {
                            let mid = y + ROW_HEIGHT / 2.0;
                            let color = if sub.completed {
                                theme::progress_color(100)
                            } else {
                                theme::TEXT_DIM
                            };
                            painter.line_segment(
                                [
                                    Pos2::new(origin.x + x, mid),
                                    Pos2::new(origin.x + x + w, mid),
                                ],
                                Stroke::new(2.0, color.gamma_multiply(0.6)),
                            );
                            painter.circle_filled(Pos2::new(origin.x + x, mid), 3.5, color);
                        }
                    }
                    Row::AddSub(_) => {}
                }
            }
        });

    action
}

fn row_top(origin: Pos2, index: usize) -> f32 {
    origin.y + HEADER_HEIGHT + index as f32 * (ROW_HEIGHT + ROW_PADDING)
}

fn drag_id(task_id: Uuid) -> Id {
    Id::new(("bar-drag", task_id))
}

/// Draw one task bar and handle clicks and drags on it.
fn task_bar(
    ui: &mut Ui,
    painter: &egui::Painter,
    origin: Pos2,
    viewport: &TimelineViewport,
    task: &Task,
    y: f32,
    ppd: f32,
) -> ChartAction {
    let mut action = ChartAction::None;
    let ctx = ui.ctx().clone();
    let key = drag_id(task.id);

    // While dragging, draw the dates under the pointer; the task itself is
    // only changed once the drag is released
    let snapshot = ctx.data(|d| d.get_temp::<DragSnapshot>(key));
    let (start, end) = match (snapshot, ctx.pointer_latest_pos()) {
        (Some(snapshot), Some(pointer)) => snapshot.dates_at(pointer.x, ppd),
        _ => (task.start, task.end),
    };

    // A dragged bar stays pinned inside the window so its widgets keep
    // being shown and egui keeps the drag alive
    let (draw_start, draw_end) = if snapshot.is_some() {
        viewport.clamp_range(start, end)
    } else {
        (start, end)
    };
    let Some((x, width)) = viewport.bar_pixels(draw_start, draw_end) else {
        return action;
    };
    let inset = theme::BAR_INSET;
    let bar_rect = Rect::from_min_size(
        Pos2::new(origin.x + x, y + inset),
        Vec2::new(width.max(4.0), ROW_HEIGHT - inset * 2.0),
    );
    let dragging = snapshot.is_some();
    draw_task_bar(painter, task, bar_rect, dragging);

    let bar_response = ui.interact(
        bar_rect,
        ui.make_persistent_id(("task-bar", task.id)),
        Sense::click_and_drag(),
    );
    let left_handle_rect = Rect::from_min_max(
        Pos2::new(bar_rect.left() - HANDLE_WIDTH * 0.5, bar_rect.top()),
        Pos2::new(bar_rect.left() + HANDLE_WIDTH * 0.5, bar_rect.bottom()),
    );
    let right_handle_rect = Rect::from_min_max(
        Pos2::new(bar_rect.right() - HANDLE_WIDTH * 0.5, bar_rect.top()),
        Pos2::new(bar_rect.right() + HANDLE_WIDTH * 0.5, bar_rect.bottom()),
    );
    let left_response = ui.interact(
        left_handle_rect.expand(3.0),
        ui.make_persistent_id(("task-resize-left", task.id)),
        Sense::drag(),
    );
    let right_response = ui.interact(
        right_handle_rect.expand(3.0),
        ui.make_persistent_id(("task-resize-right", task.id)),
        Sense::drag(),
    );

    if bar_response.double_clicked() {
        action = ChartAction::ToggleExpand(task.id);
    }

    for (response, mode) in [
        (&left_response, DragMode::Left),
        (&right_response, DragMode::Right),
        (&bar_response, DragMode::Move),
    ] {
        let pointer_x = response
            .interact_pointer_pos()
            .or_else(|| ctx.pointer_latest_pos())
            .map(|p| p.x);

        if response.drag_started() {
            if let Some(pointer_x) = pointer_x {
                ctx.data_mut(|d| {
                    d.insert_temp(
                        key,
                        DragSnapshot {
                            mode,
                            start: task.start,
                            end: task.end,
                            start_pointer_x: pointer_x,
                        },
                    )
                });
            }
        }

        if response.dragged() {
            ctx.set_cursor_icon(match mode {
                DragMode::Move => egui::CursorIcon::Grabbing,
                _ => egui::CursorIcon::ResizeHorizontal,
            });
        }

        if response.drag_stopped() {
            let snapshot = ctx.data_mut(|d| {
                let snapshot = d.get_temp::<DragSnapshot>(key);
                d.remove::<DragSnapshot>(key);
                snapshot
            });
            if let Some((start, end)) = snapshot
                .zip(pointer_x)
                .and_then(|(snapshot, x)| snapshot.release(x, ppd))
            {
                action = ChartAction::Reschedule {
                    task_id: task.id,
                    start,
                    end,
                };
            }
        }
    }

    // drag_stopped never fires for a drag egui already dropped; finish it
    // here once no button is held
    if !matches!(action, ChartAction::Reschedule { .. })
        && !ctx.input(|i| i.pointer.any_down())
    {
        let stale = ctx.data_mut(|d| {
            let snapshot = d.get_temp::<DragSnapshot>(key);
            d.remove::<DragSnapshot>(key);
            snapshot
        });
        if let Some(snapshot) = stale {
            tracing::debug!(task = %task.id, "finishing a drag without a release event");
            if let Some((start, end)) = ctx
                .pointer_latest_pos()
                .and_then(|p| snapshot.release(p.x, ppd))
            {
                action = ChartAction::Reschedule {
                    task_id: task.id,
                    start,
                    end,
                };
            }
        }
    }

    // Handle affordances
    let edge_hovered = left_response.hovered() || right_response.hovered();
    if edge_hovered || bar_response.hovered() || dragging {
        if edge_hovered {
            ctx.set_cursor_icon(egui::CursorIcon::ResizeHorizontal);
        } else if bar_response.hovered() && !dragging {
            ctx.set_cursor_icon(egui::CursorIcon::Grab);
        }
        let handle_h = bar_rect.height() * 0.55;
        let handle_y = bar_rect.center().y - handle_h / 2.0;
        let lh = Rect::from_min_size(
            Pos2::new(bar_rect.left() - 1.5, handle_y),
            Vec2::new(4.0, handle_h),
        );
        let rh = Rect::from_min_size(
            Pos2::new(bar_rect.right() - 2.5, handle_y),
            Vec2::new(4.0, handle_h),
        );
        painter.rect_filled(lh, Rounding::same(2.0), theme::HANDLE_COLOR);
        painter.rect_filled(rh, Rounding::same(2.0), theme::HANDLE_COLOR);
    }

    if bar_response.hovered() || edge_hovered || dragging {
        egui::show_tooltip_at_pointer(
            ui.ctx(),
            ui.layer_id(),
            Id::new(("task-tip", task.id)),
            |ui| {
                ui.strong(&task.name);
                ui.label(format!(
                    "{} → {} ({} days)",
                    start.format("%Y-%m-%d"),
                    end.format("%Y-%m-%d"),
                    (end - start).num_days() + 1,
                ));
                ui.label(format!(
                    "Progress: {}% ({}/{})",
                    task.progress(),
                    task.completed_sub_tasks(),
                    task.sub_tasks().len()
                ));
                if let Some(person) = &task.assigned_person {
                    ui.label(format!("Assignee: {}", person.display_name()));
                }
                if task.is_template() {
                    ui.label(
                        egui::RichText::new("Template task, editing saves a copy")
                            .small()
                            .color(theme::TEXT_DIM),
                    );
                }
            },
        );
    }

    action
}

/// Weekend shading and the open-date column behind the bars.
fn draw_day_columns(
    painter: &egui::Painter,
    origin: Pos2,
    viewport: &TimelineViewport,
    open_date: Option<NaiveDate>,
    height: f32,
) {
    let ppd = viewport.pixels_per_day;
    for date in viewport.days() {
        let x = origin.x + viewport.date_to_x(date);
        let column = Rect::from_min_size(
            Pos2::new(x, origin.y + HEADER_HEIGHT),
            Vec2::new(ppd, height - HEADER_HEIGHT),
        );
        if Some(date) == open_date {
            painter.rect_filled(column, 0.0, theme::BG_OPEN_DATE);
        } else if date.weekday().num_days_from_monday() >= 5 {
            painter.rect_filled(column, 0.0, theme::BG_WEEKEND);
        }
        if ppd >= 12.0 || date.day() == 1 {
            painter.line_segment(
                [
                    Pos2::new(x, origin.y + HEADER_HEIGHT),
                    Pos2::new(x, origin.y + height),
                ],
                Stroke::new(0.5, theme::GRID_LINE),
            );
        }
    }
}

fn draw_timeline_header(
    painter: &egui::Painter,
    origin: Pos2,
    viewport: &TimelineViewport,
    open_date: Option<NaiveDate>,
    width: f32,
) {
    // Background for header
    painter.rect_filled(
        Rect::from_min_size(origin, Vec2::new(width, HEADER_HEIGHT)),
        0.0,
        theme::BG_HEADER,
    );

    // Bottom border of header
    painter.line_segment(
        [
            Pos2::new(origin.x, origin.y + HEADER_HEIGHT),
            Pos2::new(origin.x + width, origin.y + HEADER_HEIGHT),
        ],
        Stroke::new(1.0, theme::BORDER_SUBTLE),
    );

    let ppd = viewport.pixels_per_day;
    for date in viewport.days() {
        let x = origin.x + viewport.date_to_x(date);

        // Month band: label at the first visible day of each month
        if date.day() == 1 || date == viewport.start {
            painter.line_segment(
                [Pos2::new(x, origin.y), Pos2::new(x, origin.y + HEADER_HEIGHT)],
                Stroke::new(1.0, theme::BORDER_SUBTLE),
            );
            painter.text(
                Pos2::new(x + 4.0, origin.y + MONTH_BAND / 2.0),
                egui::Align2::LEFT_CENTER,
                format!("{}年{}月", date.year(), date.month()),
                theme::font_header(),
                theme::TEXT_PRIMARY,
            );
        }

        if Some(date) == open_date {
            painter.rect_filled(
                Rect::from_min_size(
                    Pos2::new(x, origin.y + MONTH_BAND),
                    Vec2::new(ppd, HEADER_HEIGHT - MONTH_BAND),
                ),
                0.0,
                theme::OPEN_DATE_LINE,
            );
        }

        if ppd >= 14.0 {
            let weekday = date.weekday().num_days_from_sunday() as usize;
            let color = match weekday {
                _ if Some(date) == open_date => Color32::WHITE,
                0 | 6 => theme::TEXT_DIM,
                _ => theme::TEXT_SECONDARY,
            };
            let center_x = x + ppd / 2.0;
            painter.text(
                Pos2::new(center_x, origin.y + MONTH_BAND + 7.0),
                egui::Align2::CENTER_CENTER,
                date.day().to_string(),
                theme::font_sub(),
                color,
            );
            if ppd >= 20.0 {
                painter.text(
                    Pos2::new(center_x, origin.y + MONTH_BAND + 18.0),
                    egui::Align2::CENTER_CENTER,
                    WEEKDAY_INITIALS[weekday],
                    theme::font_small(),
                    color,
                );
            }
        }
    }

    if let Some(open) = open_date.filter(|d| viewport.contains(*d)) {
        let x = origin.x + viewport.date_to_x(open);
        let galley = painter.layout_no_wrap("OPEN".to_string(), theme::font_small(), Color32::WHITE);
        let badge = Rect::from_min_size(
            Pos2::new(x + viewport.pixels_per_day + 2.0, origin.y + 3.0),
            galley.size() + Vec2::new(8.0, 2.0),
        );
        painter.rect_filled(badge, Rounding::same(3.0), theme::OPEN_DATE_LINE);
        painter.galley(badge.min + Vec2::new(4.0, 1.0), galley, Color32::WHITE);
    }
}

fn draw_today_line(
    painter: &egui::Painter,
    origin: Pos2,
    viewport: &TimelineViewport,
    today: NaiveDate,
    height: f32,
) {
    if !viewport.contains(today) {
        return;
    }
    let x = origin.x + viewport.date_to_x(today) + viewport.pixels_per_day / 2.0;

    painter.line_segment(
        [
            Pos2::new(x, origin.y + HEADER_HEIGHT),
            Pos2::new(x, origin.y + height),
        ],
        Stroke::new(1.5, theme::TODAY_LINE),
    );

    // Top badge
    let badge_w = 42.0;
    let badge_rect = Rect::from_min_size(
        Pos2::new(x - badge_w / 2.0, origin.y + HEADER_HEIGHT - 1.0),
        Vec2::new(badge_w, 14.0),
    );
    painter.rect_filled(badge_rect, Rounding::same(3.0), theme::TODAY_LINE);
    painter.text(
        badge_rect.center(),
        egui::Align2::CENTER_CENTER,
        "Today",
        theme::font_small(),
        Color32::WHITE,
    );
}

fn draw_task_bar(painter: &egui::Painter, task: &Task, bar_rect: Rect, dragging: bool) {
    let rounding = Rounding::same(theme::BAR_ROUNDING);
    let color = theme::progress_color(task.progress());

    // Soft shadow
    let shadow_rect = bar_rect.translate(Vec2::new(1.0, 2.0));
    painter.rect_filled(shadow_rect, rounding, Color32::from_black_alpha(35));

    // Track, then the completed share in the band color
    painter.rect_filled(bar_rect, rounding, color.gamma_multiply(0.45));
    painter.rect_filled(bar_rect, rounding, theme::PROGRESS_TRACK);
    if task.progress() > 0 {
        let progress_width = bar_rect.width() * f32::from(task.progress()) / 100.0;
        let progress_rect =
            Rect::from_min_size(bar_rect.min, Vec2::new(progress_width, bar_rect.height()));
        painter.rect_filled(progress_rect, rounding, color);
    }

    // Lighter top highlight
    let highlight_rect = Rect::from_min_size(
        bar_rect.min,
        Vec2::new(bar_rect.width(), (bar_rect.height() * 0.45).max(4.0)),
    );
    painter.rect_filled(
        highlight_rect,
        Rounding {
            nw: theme::BAR_ROUNDING,
            ne: theme::BAR_ROUNDING,
            sw: 0.0,
            se: 0.0,
        },
        Color32::from_white_alpha(20),
    );

    // Template bars get a dashed-feel outline until someone edits them
    if task.is_template() {
        painter.rect_stroke(bar_rect, rounding, Stroke::new(1.0, Color32::from_white_alpha(70)));
    }
    if dragging {
        painter.rect_stroke(
            bar_rect.expand(1.5),
            Rounding::same(theme::BAR_ROUNDING + 1.5),
            Stroke::new(2.0, theme::BORDER_ACCENT),
        );
    }

    // Task name on bar (single line, clipped to bar bounds)
    if bar_rect.width() > 30.0 {
        let galley = painter.layout_no_wrap(task.name.clone(), theme::font_bar(), theme::TEXT_ON_BAR);
        let clipped = painter.with_clip_rect(bar_rect);
        let text_y = bar_rect.top() + (bar_rect.height() - galley.size().y) / 2.0;
        clipped.galley(
            Pos2::new(bar_rect.left() + 6.0, text_y),
            galley,
            Color32::TRANSPARENT,
        );
    }
}
