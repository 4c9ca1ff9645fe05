/// Questions asked per model unless configured otherwise
pub const DEFAULT_NUM_MESSAGES: usize = 2;

/// Line-per-question dataset looked up in the data directory
pub const QUESTIONS_FILE_NAME: &str = "qa_dataset.txt";

pub const CONFIG_FILE_NAME: &str = "config.json";

pub const RESULTS_DB_FILE_NAME: &str = "results.db";
