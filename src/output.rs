//! Output formatting module.

pub mod console;
pub mod report;

pub use console::{
    ConsoleObserver, ConsoleSink, create_spinner, format_duration, print_plan, print_session,
    print_topology,
};
pub use report::{ReportDocument, save_report};
