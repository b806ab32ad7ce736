pub mod csv_export;
pub mod sheet_import;

pub use csv_export::export_csv;
pub use sheet_import::{
    build_template_set, CsvTemplateSource, HttpTemplateSource, SheetTask, TemplateSet,
    TemplateSource, UnconfiguredSource,
};
