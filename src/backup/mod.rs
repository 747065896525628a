pub mod backup_config;
pub mod change_set;
pub mod clock;
pub mod compress;
pub mod file_ext;
pub mod finish;
pub mod lock;
pub mod orchestrator;
pub mod output;
pub mod progress;
pub mod result_error;
pub mod retention;
pub mod schedule;
pub mod state;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
