// doc constants
pub const DOC_ID: &str = "_id";
pub const FIELD_SEPARATOR: char = '.';
pub const DEFAULT_SOFT_DELETE_FIELD: &str = "_deleted_at";

// update operators
pub const SET_OPERATOR: &str = "$set";
pub const UNSET_OPERATOR: &str = "$unset";

// store constants
pub const ID_COLUMN: &str = "id";
pub const DATA_COLUMN: &str = "data";
pub const SEARCH_COLUMN_PREFIX: &str = "_s_";
pub const SEARCH_VALUE_SEPARATOR: &str = ",";
pub const META_TABLE: &str = "_docstore_meta";
pub const MATCH_FUNCTION: &str = "docstore_match";
pub const NUMBER_FUNCTION: &str = "docstore_number";

// encrypted record fields
pub const CIPHERTEXT_FIELD: &str = "ciphertext";
pub const IV_FIELD: &str = "iv";
pub const MIN_KEY_LENGTH: usize = 32;

// cursor constants
pub const DEFAULT_MAX_UNBOUNDED_RESULTS: usize = 10_000;
pub const DEFAULT_SAFE_RESULT_CAP: usize = 1_000;

// registry constants
pub const DEFAULT_SWEEP_THRESHOLD: usize = 256;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

// matcher constants
pub const DEFAULT_FUZZY_THRESHOLD: usize = 3;
pub const DEFAULT_FUZZY_MIN_SCORE: f64 = 0.7;
pub const MAX_FUZZY_DISTANCE: usize = 4;
pub const REGEX_CACHE_SIZE: usize = 128;

// id generation
pub const PREFIX_ID_WIDTH: usize = 6;
pub const PREFIX_ID_SEPARATOR: &str = "-";

pub const DOCSTORE_VERSION: &str = env!("CARGO_PKG_VERSION");
