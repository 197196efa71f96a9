//! Small helpers shared by handlers and services.

pub mod avatar;
pub mod calculator;
pub mod depth;

pub use avatar::{random_color, random_icon};
pub use calculator::{calculate_file_size, calculate_time_ago, format_duration};
pub use depth::ancestor_depth;
