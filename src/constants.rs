/// Names shared by the stages, the storage layout and the audit trail.

pub const DAG_ID: &str = "brewery_datalake_pipeline";

// Layer names (used by the metrics sink and datalake folders)
pub const BRONZE_LAYER: &str = "bronze";
pub const SILVER_LAYER: &str = "silver";
pub const GOLD_LAYER: &str = "gold";

// Task ids (used by the audit sink)
pub const API_HEALTH_TASK: &str = "api_health_check";
pub const BRONZE_TASK: &str = "bronze_ingestion";
pub const SILVER_TASK: &str = "silver_transformation";
pub const GOLD_TASK: &str = "gold_transformation";
pub const QUALITY_TASK: &str = "quality_checks";

// Datalake layout
pub const RAW_DIR: &str = "raw";
pub const SILVER_DIR: &str = "silver";
pub const GOLD_DIR: &str = "gold";
pub const INGESTION_PARTITION_KEY: &str = "ingestion_date";
pub const PROCESSING_PARTITION_KEY: &str = "processing_date";
pub const SILVER_DATASET: &str = "breweries";

// Gold table names
pub const GOLD_BY_STATE_TYPE: &str = "breweries_by_state_type";
pub const GOLD_BY_STATE: &str = "breweries_by_state";
pub const GOLD_BY_TYPE: &str = "breweries_by_type";
pub const GOLD_BY_CITY_STATE: &str = "breweries_by_city_state";

/// Canonical Silver columns, in output order.
pub const CANONICAL_COLUMNS: [&str; 11] = [
    "id",
    "name",
    "brewery_type",
    "city",
    "state",
    "country",
    "latitude",
    "longitude",
    "location",
    "has_geo",
    "processing_date",
];

/// Tokens that collapse to null after standardization.
pub const NULL_TOKENS: [&str; 3] = ["none", "nan", ""];

/// OpenBreweryDB types plus the `closed` fallback.
pub const ALLOWED_BREWERY_TYPES: [&str; 10] = [
    "micro",
    "nano",
    "regional",
    "brewpub",
    "large",
    "planning",
    "bar",
    "contract",
    "proprietor",
    "closed",
];

/// Columns OpenBreweryDB normally returns.
pub const DEFAULT_EXPECTED_SCHEMA: [&str; 16] = [
    "id",
    "name",
    "brewery_type",
    "address_1",
    "address_2",
    "address_3",
    "city",
    "state_province",
    "postal_code",
    "country",
    "longitude",
    "latitude",
    "phone",
    "website_url",
    "state",
    "street",
];

pub const DEFAULT_API_URL: &str = "https://api.openbrewerydb.org/v1/breweries";
pub const DEFAULT_DATALAKE_PATH: &str = "datalake";
pub const DEFAULT_LOG_FOLDER: &str = "logs";
