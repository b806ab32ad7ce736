use chrono::{Datelike, Duration, Months, NaiveDate};

use super::task::Task;

pub const DEFAULT_PIXELS_PER_DAY: f32 = 28.0;
const MIN_PIXELS_PER_DAY: f32 = 6.0;
const MAX_PIXELS_PER_DAY: f32 = 80.0;

/// Days of padding around task dates when no open date anchors the window.
const FIT_PADDING_DAYS: i64 = 7;
/// Days shown after the open date in the anchored window.
const DAYS_AFTER_OPEN: i64 = 30;
/// Months shown before the open date in the anchored window.
const MONTHS_BEFORE_OPEN: u32 = 4;

/// Horizontal placement of a bar as fractions of the visible window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarSpan {
    pub left: f32,
    pub width: f32,
}

/// The visible date window of the chart. Both ends are included, one
/// column per day.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineViewport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Pixels per day (controls zoom level).
    pub pixels_per_day: f32,
}

impl TimelineViewport {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end: end.max(start),
            pixels_per_day: DEFAULT_PIXELS_PER_DAY,
        }
    }

    /// From the first of the month four months before opening through
    /// thirty days after it.
    pub fn anchored_to_open_date(open_date: NaiveDate) -> Self {
        let back = open_date
            .checked_sub_months(Months::new(MONTHS_BEFORE_OPEN))
            .unwrap_or(open_date);
        let start = back.with_day(1).unwrap_or(back);
        Self::new(start, open_date + Duration::days(DAYS_AFTER_OPEN))
    }

    /// Span all task dates padded by a week on each side, or a window around
    /// `today` when there is nothing to show.
    pub fn fitted_to_tasks(tasks: &[Task], today: NaiveDate) -> Self {
        let min = tasks.iter().map(|t| t.start).min();
        let max = tasks.iter().map(|t| t.end).max();
        match (min, max) {
            (Some(min), Some(max)) => Self::new(
                min - Duration::days(FIT_PADDING_DAYS),
                max + Duration::days(FIT_PADDING_DAYS),
            ),
            _ => Self::new(today - Duration::days(30), today + Duration::days(30)),
        }
    }

    /// The window for a category view, keeping the current zoom level.
    pub fn for_view(
        open_date: Option<NaiveDate>,
        tasks: &[Task],
        today: NaiveDate,
        pixels_per_day: f32,
    ) -> Self {
        let mut viewport = match open_date {
            Some(open) => Self::anchored_to_open_date(open),
            None => Self::fitted_to_tasks(tasks, today),
        };
        viewport.pixels_per_day = pixels_per_day.clamp(MIN_PIXELS_PER_DAY, MAX_PIXELS_PER_DAY);
        viewport
    }

    pub fn day_count(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Every date in the window, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }

    /// Convert a date to an x-pixel offset from the viewport start.
    pub fn date_to_x(&self, date: NaiveDate) -> f32 {
        let days = (date - self.start).num_days() as f32;
        days * self.pixels_per_day
    }

    /// Total width in pixels for the visible range.
    pub fn total_width(&self) -> f32 {
        self.day_count() as f32 * self.pixels_per_day
    }

    /// Zoom in (increase pixels per day).
    pub fn zoom_in(&mut self) {
        self.pixels_per_day = (self.pixels_per_day * 1.2).min(MAX_PIXELS_PER_DAY);
    }

    /// Zoom out (decrease pixels per day).
    pub fn zoom_out(&mut self) {
        self.pixels_per_day = (self.pixels_per_day / 1.2).max(MIN_PIXELS_PER_DAY);
    }

    /// Bar placement for an inclusive `[start, end]` range, clipped to the
    /// window. `None` when the range lies entirely outside it.
    pub fn bar_span(&self, start: NaiveDate, end: NaiveDate) -> Option<BarSpan> {
        if end < self.start || start > self.end {
            return None;
        }
        let total = self.day_count() as f32;
        let first = (start.max(self.start) - self.start).num_days() as f32;
        let last = (end.min(self.end) - self.start).num_days() as f32;
        Some(BarSpan {
            left: first / total,
            width: (last - first + 1.0) / total,
        })
    }

    /// Pixel `(x, width)` of a bar relative to the chart origin.
    pub fn bar_pixels(&self, start: NaiveDate, end: NaiveDate) -> Option<(f32, f32)> {
        let span = self.bar_span(start, end)?;
        let width = self.total_width();
        Some((span.left * width, span.width * width))
    }

    /// Pin `[start, end]` inside the window. A range past either edge
    /// collapses onto that edge's day, so a dragged bar never disappears.
    pub fn clamp_range(&self, start: NaiveDate, end: NaiveDate) -> (NaiveDate, NaiveDate) {
        let start = start.clamp(self.start, self.end);
        let end = end.clamp(start, self.end);
        (start, end)
    }
}

/// Which part of a bar is being dragged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DragMode {
    Left,
    Right,
    Move,
}

/// Dates and pointer position captured when a drag starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragSnapshot {
    pub mode: DragMode,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub start_pointer_x: f32,
}

impl DragSnapshot {
    /// Dates for the pointer now at `pointer_x`.
    pub fn dates_at(&self, pointer_x: f32, pixels_per_day: f32) -> (NaiveDate, NaiveDate) {
        let day_delta = drag_days(pointer_x - self.start_pointer_x, pixels_per_day);
        apply_drag(self.mode, self.start, self.end, day_delta)
    }

    /// Dates to save when the drag ends at `pointer_x`, or `None` when the
    /// bar ends up where it started.
    pub fn release(&self, pointer_x: f32, pixels_per_day: f32) -> Option<(NaiveDate, NaiveDate)> {
        let dates = self.dates_at(pointer_x, pixels_per_day);
        (dates != (self.start, self.end)).then_some(dates)
    }
}

/// Whole days corresponding to a horizontal pointer movement.
pub fn drag_days(delta_x: f32, pixels_per_day: f32) -> i64 {
    if pixels_per_day <= 0.0 {
        return 0;
    }
    (delta_x / pixels_per_day).round() as i64
}

/// Shift one edge or the whole bar by `day_delta`. Edge drags are clamped
/// so the bar never gets shorter than one day (`start <= end`).
pub fn apply_drag(
    mode: DragMode,
    start: NaiveDate,
    end: NaiveDate,
    day_delta: i64,
) -> (NaiveDate, NaiveDate) {
    let delta = Duration::days(day_delta);
    match mode {
        DragMode::Left => ((start + delta).min(end), end),
        DragMode::Right => (start, (end + delta).max(start)),
        DragMode::Move => (start + delta, end + delta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, TaskOrigin};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn open_date_window() {
        let vp = TimelineViewport::anchored_to_open_date(d(2024, 10, 15));
        assert_eq!(vp.start, d(2024, 6, 1));
        assert_eq!(vp.end, d(2024, 11, 14));
        assert_eq!(vp.days().count() as i64, vp.day_count());
    }

    #[test]
    fn fitted_window_pads_a_week() {
        let tasks = vec![
            Task::new("a", d(2024, 3, 10), d(2024, 3, 12), Category::Other, TaskOrigin::Live),
            Task::new("b", d(2024, 3, 5), d(2024, 4, 1), Category::Other, TaskOrigin::Live),
        ];
        let vp = TimelineViewport::fitted_to_tasks(&tasks, d(2030, 1, 1));
        assert_eq!(vp.start, d(2024, 2, 27));
        assert_eq!(vp.end, d(2024, 4, 8));

        let empty = TimelineViewport::fitted_to_tasks(&[], d(2024, 5, 31));
        assert_eq!(empty.start, d(2024, 5, 1));
        assert_eq!(empty.end, d(2024, 6, 30));
    }

    #[test]
    fn bar_span_is_linear_and_clipped() {
        let vp = TimelineViewport::new(d(2024, 1, 1), d(2024, 1, 10));
        let span = vp.bar_span(d(2024, 1, 3), d(2024, 1, 4)).unwrap();
        assert!((span.left - 0.2).abs() < 1e-6);
        assert!((span.width - 0.2).abs() < 1e-6);

        let clipped = vp.bar_span(d(2023, 12, 25), d(2024, 1, 2)).unwrap();
        assert_eq!(clipped.left, 0.0);
        assert!((clipped.width - 0.2).abs() < 1e-6);

        assert!(vp.bar_span(d(2024, 2, 1), d(2024, 2, 3)).is_none());
        assert!(vp.bar_span(d(2023, 1, 1), d(2023, 12, 31)).is_none());
    }

    #[test]
    fn clamped_range_stays_drawable() {
        let vp = TimelineViewport::new(d(2024, 1, 1), d(2024, 1, 10));
        assert_eq!(vp.clamp_range(d(2024, 1, 3), d(2024, 1, 4)), (d(2024, 1, 3), d(2024, 1, 4)));

        let past_end = vp.clamp_range(d(2024, 2, 1), d(2024, 2, 3));
        assert_eq!(past_end, (d(2024, 1, 10), d(2024, 1, 10)));
        assert!(vp.bar_pixels(past_end.0, past_end.1).is_some());

        let before_start = vp.clamp_range(d(2023, 12, 1), d(2023, 12, 5));
        assert_eq!(before_start, (d(2024, 1, 1), d(2024, 1, 1)));
        assert!(vp.bar_pixels(before_start.0, before_start.1).is_some());
    }

    #[test]
    fn release_outside_window_keeps_dragged_dates() {
        let snap = DragSnapshot {
            mode: DragMode::Move,
            start: d(2024, 1, 8),
            end: d(2024, 1, 9),
            start_pointer_x: 100.0,
        };
        // 10 days right of a 10-day window still reports the real dates
        assert_eq!(
            snap.release(300.0, 20.0),
            Some((d(2024, 1, 18), d(2024, 1, 19)))
        );
        assert_eq!(snap.release(104.0, 20.0), None);
    }

    #[test]
    fn drag_days_rounds_pixel_delta() {
        assert_eq!(drag_days(0.0, 20.0), 0);
        assert_eq!(drag_days(9.0, 20.0), 0);
        assert_eq!(drag_days(11.0, 20.0), 1);
        assert_eq!(drag_days(-61.0, 20.0), -3);
        assert_eq!(drag_days(50.0, 0.0), 0);
    }

    #[test]
    fn edge_drags_keep_at_least_one_day() {
        let (start, end) = (d(2024, 5, 10), d(2024, 5, 14));

        assert_eq!(apply_drag(DragMode::Left, start, end, -2), (d(2024, 5, 8), end));
        assert_eq!(apply_drag(DragMode::Left, start, end, 10), (end, end));
        assert_eq!(apply_drag(DragMode::Right, start, end, 3), (start, d(2024, 5, 17)));
        assert_eq!(apply_drag(DragMode::Right, start, end, -10), (start, start));
        assert_eq!(
            apply_drag(DragMode::Move, start, end, -4),
            (d(2024, 5, 6), d(2024, 5, 10))
        );
    }

    #[test]
    fn snapshot_tracks_pointer_from_drag_origin() {
        let snap = DragSnapshot {
            mode: DragMode::Move,
            start: d(2024, 5, 10),
            end: d(2024, 5, 12),
            start_pointer_x: 100.0,
        };
        assert_eq!(snap.dates_at(160.0, 20.0), (d(2024, 5, 13), d(2024, 5, 15)));
        assert_eq!(snap.dates_at(100.0, 20.0), (snap.start, snap.end));
    }

    #[test]
    fn zoom_is_bounded() {
        let mut vp = TimelineViewport::new(d(2024, 1, 1), d(2024, 1, 31));
        for _ in 0..50 {
            vp.zoom_in();
        }
        assert_eq!(vp.pixels_per_day, MAX_PIXELS_PER_DAY);
        for _ in 0..50 {
            vp.zoom_out();
        }
        assert_eq!(vp.pixels_per_day, MIN_PIXELS_PER_DAY);
    }
}
