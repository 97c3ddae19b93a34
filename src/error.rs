use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("stations must not be empty")]
    EmptyStations,
    #[error("ambulances must not be empty")]
    EmptyAmbulances,
    #[error("hospitals must not be empty when calls need transport")]
    EmptyHospitals,
    #[error("ambulance {ambulance} references unknown station '{station}'")]
    UnknownStation { ambulance: usize, station: String },
    #[error("duplicate station name '{0}'")]
    DuplicateStationName(String),
    #[error("call {0} arrives before the previous call")]
    UnorderedCalls(usize),
    #[error("{component}: {message}")]
    InvalidParameter {
        component: &'static str,
        message: String,
    },
    #[error("only one of until, duration and max_events may be given")]
    MultipleStopConditions,
    #[error("{0} does not implement this operation")]
    NotImplemented(String),
    #[error("{component}: expected length {expected}, got {actual}")]
    DimensionMismatch {
        component: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("demand totals differ between thresholds: {first} vs {second}")]
    DemandMismatch { first: f64, second: f64 },
    #[error("event scheduled at {time} is earlier than the clock ({now})")]
    EventInPast { time: f64, now: f64 },
    #[error("solver '{0}' is not available in this build")]
    SolverUnavailable(String),
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
    #[error("metric '{metric}' requires option '{option}'")]
    MissingMetricOption {
        metric: &'static str,
        option: &'static str,
    },
    #[error("{0}")]
    ConfigIo(String),
    #[error("{0}")]
    ConfigParse(String),
    #[error("unsupported config format '{0}'")]
    UnsupportedConfigFormat(String),
    #[error("{0}")]
    ModelParse(String),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Cli(String),
}

impl Error {
    pub(crate) fn invalid(component: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            component,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
