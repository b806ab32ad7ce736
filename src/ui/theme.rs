use egui::{Color32, FontId, Rounding, Stroke, Visuals};

use crate::model::{PersonColor, ProgressBand};

// ── Palette ──────────────────────────────────────────────────────────────────

pub const BG_DARK: Color32 = Color32::from_rgb(24, 24, 32);
pub const BG_PANEL: Color32 = Color32::from_rgb(30, 30, 40);
pub const BG_HEADER: Color32 = Color32::from_rgb(34, 37, 48);
pub const BG_FIELD: Color32 = Color32::from_rgb(20, 20, 28);
pub const BG_WEEKEND: Color32 = Color32::from_rgba_premultiplied(0, 0, 0, 40);
pub const BG_OPEN_DATE: Color32 = Color32::from_rgba_premultiplied(40, 90, 60, 90);
pub const BG_SUB_ROW: Color32 = Color32::from_rgb(27, 27, 36);
pub const BG_SELECTED: Color32 = Color32::from_rgba_premultiplied(80, 140, 220, 45);
pub const BG_STATUS: Color32 = Color32::from_rgb(22, 22, 30);

pub const BORDER_SUBTLE: Color32 = Color32::from_rgb(50, 52, 64);
pub const BORDER_ACCENT: Color32 = Color32::from_rgb(90, 140, 220);

pub const TEXT_PRIMARY: Color32 = Color32::from_rgb(230, 232, 240);
pub const TEXT_SECONDARY: Color32 = Color32::from_rgb(155, 160, 178);
pub const TEXT_DIM: Color32 = Color32::from_rgb(100, 105, 120);
pub const TEXT_ON_BAR: Color32 = Color32::from_rgb(255, 255, 255);
pub const TEXT_ERROR: Color32 = Color32::from_rgb(240, 110, 100);
pub const TEXT_WARNING: Color32 = Color32::from_rgb(240, 190, 90);

pub const ACCENT: Color32 = Color32::from_rgb(80, 140, 220);
pub const DANGER: Color32 = Color32::from_rgb(200, 60, 60);
pub const TODAY_LINE: Color32 = Color32::from_rgb(240, 75, 75);
pub const OPEN_DATE_LINE: Color32 = Color32::from_rgb(90, 200, 120);
pub const GRID_LINE: Color32 = Color32::from_rgb(44, 46, 58);
pub const HANDLE_COLOR: Color32 = Color32::from_rgb(255, 255, 255);

pub const PROGRESS_TRACK: Color32 = Color32::from_rgba_premultiplied(255, 255, 255, 18);

// ── Sizes ────────────────────────────────────────────────────────────────────

pub const ROW_HEIGHT: f32 = 30.0;
pub const ROW_GAP: f32 = 2.0;
pub const HEADER_HEIGHT: f32 = 44.0;
pub const HANDLE_WIDTH: f32 = 7.0;
pub const BAR_ROUNDING: f32 = 5.0;
pub const BAR_INSET: f32 = 3.0; // vertical inset so bars don't touch row edges
pub const SIDE_PANEL_WIDTH: f32 = 420.0;
pub const STATUS_BAR_HEIGHT: f32 = 24.0;
pub const DIALOG_WIDTH: f32 = 340.0;

// ── Fonts ────────────────────────────────────────────────────────────────────

pub fn font_header() -> FontId {
    FontId::proportional(12.0)
}

pub fn font_sub() -> FontId {
    FontId::proportional(10.5)
}

pub fn font_bar() -> FontId {
    FontId::proportional(11.5)
}

pub fn font_small() -> FontId {
    FontId::proportional(9.5)
}

// ── Semantic colors ──────────────────────────────────────────────────────────

pub fn progress_color(progress: u8) -> Color32 {
    match ProgressBand::from_progress(progress) {
        ProgressBand::Red => Color32::from_rgb(229, 57, 53),
        ProgressBand::Orange => Color32::from_rgb(251, 140, 0),
        ProgressBand::Yellow => Color32::from_rgb(230, 190, 30),
        ProgressBand::Blue => Color32::from_rgb(66, 133, 244),
        ProgressBand::Teal => Color32::from_rgb(0, 150, 136),
    }
}

pub fn person_color(color: PersonColor) -> Color32 {
    match color {
        PersonColor::Blue => Color32::from_rgb(59, 130, 246),
        PersonColor::Indigo => Color32::from_rgb(99, 102, 241),
        PersonColor::Purple => Color32::from_rgb(168, 85, 247),
        PersonColor::Pink => Color32::from_rgb(236, 72, 153),
        PersonColor::Red => Color32::from_rgb(239, 68, 68),
        PersonColor::Orange => Color32::from_rgb(249, 115, 22),
        PersonColor::Amber => Color32::from_rgb(245, 158, 11),
        PersonColor::Yellow => Color32::from_rgb(234, 179, 8),
        PersonColor::Lime => Color32::from_rgb(132, 204, 22),
        PersonColor::Green => Color32::from_rgb(34, 197, 94),
        PersonColor::Emerald => Color32::from_rgb(16, 185, 129),
        PersonColor::Teal => Color32::from_rgb(20, 184, 166),
        PersonColor::Cyan => Color32::from_rgb(6, 182, 212),
        PersonColor::Sky => Color32::from_rgb(14, 165, 233),
    }
}

// ── Fonts ────────────────────────────────────────────────────────────────────

/// System fonts with Japanese glyphs, tried in order. The bundled egui
/// fonts have none.
const CJK_FONT_CANDIDATES: &[&str] = &[
    "C:\\Windows\\Fonts\\YuGothM.ttc",
    "C:\\Windows\\Fonts\\meiryo.ttc",
    "C:\\Windows\\Fonts\\msgothic.ttc",
    "/System/Library/Fonts/ヒラギノ角ゴシック W3.ttc",
    "/System/Library/Fonts/Hiragino Sans GB.ttc",
    "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/noto-cjk/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/google-noto-cjk/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/truetype/takao-gothic/TakaoGothic.ttf",
];

/// Register Phosphor icons and, when one is installed, a Japanese font as
/// fallbacks so labels and icons render inline with text.
pub fn install_fonts(ctx: &egui::Context) {
    let mut fonts = egui::FontDefinitions::default();
    egui_phosphor::add_to_fonts(&mut fonts, egui_phosphor::Variant::Regular);

    let cjk = CJK_FONT_CANDIDATES
        .iter()
        .find_map(|path| std::fs::read(path).ok().map(|bytes| (*path, bytes)));
    match cjk {
        Some((path, bytes)) => {
            tracing::debug!(font = path, "using Japanese fallback font");
            fonts
                .font_data
                .insert("cjk".to_owned(), egui::FontData::from_owned(bytes));
            for family in [egui::FontFamily::Proportional, egui::FontFamily::Monospace] {
                fonts.families.entry(family).or_default().push("cjk".to_owned());
            }
        }
        None => tracing::warn!("no Japanese font found, category labels may not render"),
    }

    ctx.set_fonts(fonts);
}

// ── Apply custom visuals ─────────────────────────────────────────────────────

pub fn apply_theme(ctx: &egui::Context) {
    let mut visuals = Visuals::dark();

    visuals.override_text_color = Some(TEXT_PRIMARY);
    visuals.panel_fill = BG_PANEL;
    visuals.window_fill = BG_PANEL;
    visuals.extreme_bg_color = BG_FIELD; // TextEdit bg

    visuals.widgets.noninteractive.bg_fill = BG_PANEL;
    visuals.widgets.noninteractive.bg_stroke = Stroke::new(1.0, BORDER_SUBTLE);
    visuals.widgets.noninteractive.fg_stroke = Stroke::new(1.0, TEXT_SECONDARY);
    visuals.widgets.noninteractive.rounding = Rounding::same(4.0);

    visuals.widgets.inactive.bg_fill = Color32::from_rgb(42, 44, 56);
    visuals.widgets.inactive.bg_stroke = Stroke::new(1.0, BORDER_SUBTLE);
    visuals.widgets.inactive.fg_stroke = Stroke::new(1.0, TEXT_PRIMARY);
    visuals.widgets.inactive.rounding = Rounding::same(4.0);

    visuals.widgets.hovered.bg_fill = Color32::from_rgb(52, 54, 68);
    visuals.widgets.hovered.bg_stroke = Stroke::new(1.0, ACCENT);
    visuals.widgets.hovered.fg_stroke = Stroke::new(1.0, TEXT_PRIMARY);
    visuals.widgets.hovered.rounding = Rounding::same(4.0);

    visuals.widgets.active.bg_fill = Color32::from_rgb(60, 62, 76);
    visuals.widgets.active.bg_stroke = Stroke::new(1.0, ACCENT);
    visuals.widgets.active.fg_stroke = Stroke::new(2.0, Color32::WHITE);
    visuals.widgets.active.rounding = Rounding::same(4.0);

    visuals.widgets.open.bg_fill = Color32::from_rgb(50, 52, 66);
    visuals.widgets.open.bg_stroke = Stroke::new(1.0, ACCENT);
    visuals.widgets.open.fg_stroke = Stroke::new(1.0, TEXT_PRIMARY);
    visuals.widgets.open.rounding = Rounding::same(4.0);

    visuals.selection.bg_fill = BG_SELECTED;
    visuals.selection.stroke = Stroke::new(1.0, ACCENT);

    visuals.window_rounding = Rounding::same(8.0);
    visuals.window_stroke = Stroke::new(1.0, BORDER_SUBTLE);

    visuals.striped = false;
    visuals.faint_bg_color = BG_PANEL;

    ctx.set_visuals(visuals);

    let mut style = (*ctx.style()).clone();
    style.spacing.item_spacing = egui::vec2(8.0, 4.0);
    style.spacing.button_padding = egui::vec2(8.0, 4.0);
    ctx.set_style(style);
}
