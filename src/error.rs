use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Invalid name '{name}' for {kind}: the name must be a valid identifier")]
    InvalidIdentifier { kind: &'static str, name: String },

    #[error("Duplicate name '{0}': KPI and query names must be unique within a report")]
    DuplicateName(String),

    #[error("Duplicate period name '{0}': period names must be unique within a report instance")]
    DuplicatePeriodName(String),

    #[error("Duplicate period id {0}: period ids must be unique within a report instance")]
    DuplicatePeriodId(u32),

    #[error("Wrong duration {duration} for period {period}: it must be positive")]
    InvalidDuration { period: String, duration: i64 },

    #[error("Wrong normalize factor {factor} for period {period}: it must be positive")]
    InvalidNormalizeFactor { period: String, factor: i64 },

    #[error("Period {period} compares with unknown period id {target}")]
    UnknownComparisonTarget { period: String, target: u32 },

    #[error("Unknown period id {0}")]
    UnknownPeriod(u32),

    #[error("Please define From and To dates for period {0}.")]
    MissingDateRange(String),

    #[error("Invalid domain '{domain}': {details}")]
    InvalidDomain { domain: String, details: String },

    #[error("Unknown time zone: {0}")]
    UnknownTimezone(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Backend error on model {model}: {message}")]
    Backend { model: String, message: String },

    #[error("Accounting expression error: {0}")]
    Accounting(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReportError>;
