pub mod category;
pub mod merge;
pub mod project;
pub mod task;
pub mod timeline;
pub mod view;

pub use category::Category;
pub use merge::merge;
pub use project::{Person, PersonColor, Project};
pub use task::{ProgressBand, SubTask, Task, TaskOrigin};
pub use timeline::{DragMode, DragSnapshot, TimelineViewport};
pub use view::{GanttViewState, Row};
