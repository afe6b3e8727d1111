pub mod build_catalog;
pub mod dump_catalog;
pub mod import;
pub mod show_entry;
pub mod status;

pub use build_catalog::build_catalog;
pub use dump_catalog::dump_catalog;
pub use import::{import_consensus, import_reference, import_subjects};
pub use show_entry::show_entry;
pub use status::show_status;
