mod issues;
mod select;
mod spinner;
mod status;

pub use issues::print_issues;

pub use select::{select_category, select_course_interactive};

pub use spinner::with_spinner;

pub use status::{print_command_status, CommandStatus};
