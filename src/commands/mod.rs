pub mod run;

pub use run::{Cli, handle_run};
