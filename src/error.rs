use thiserror::Error;

/// Where a failure was detected: a config file line, an input raster/stack, or a running cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorLocation {
    /// `(file, line)` inside a plain-text configuration file.
    ConfigLine(String, usize),
    /// The name of the offending input raster or forcing stack.
    Input(String),
    /// `(row, col, step)` of the cell and time step where a domain or numeric failure occurred.
    Cell { row: usize, col: usize, step: usize },
    /// An output artifact path.
    Output(String),
}

impl std::fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorLocation::ConfigLine(file, line) => write!(f, "{file}:{line}"),
            ErrorLocation::Input(name) => write!(f, "input '{name}'"),
            ErrorLocation::Cell { row, col, step } => write!(f, "cell (row={row}, col={col}) at step {step}"),
            ErrorLocation::Output(path) => write!(f, "output '{path}'"),
        }
    }
}

/// Malformed configuration: missing mandatory key, out-of-range numeric, bad syntax. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing mandatory key '{0}' at {1}")]
    MissingKey(String, ErrorLocation),
    #[error("value '{0}' for key '{1}' is out of its valid range at {2}")]
    OutOfRange(String, String, ErrorLocation),
    #[error("cannot parse line at {0}: {1}")]
    Malformed(ErrorLocation, String),
}

/// Raster or forcing stacks disagree on grid geometry, step-time, or time window. Fatal at startup.
#[derive(Error, Debug)]
pub enum InputShapeError {
    #[error("'{0}' has grid {1}x{2} but the reference grid is {3}x{4}")]
    MismatchedDimensions(String, usize, usize, usize, usize),
    #[error("'{0}' declares step-time {1}h but the reference step-time is {2}h")]
    MismatchedStepTime(String, i64, i64),
    #[error("the simulation window does not lie within the period covered by '{0}'")]
    WindowOutsideCoverage(String),
}

/// A value violates a physical domain constraint: illegal D8 code, unknown soil class, NaN forcing.
/// These abort the run; the model has no "skip this cell" mode.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("flow direction code {0} at {1} is not one of {{1,2,4,8,16,32,64,128}}")]
    IllegalFlowDirection(i32, ErrorLocation),
    #[error("soil class id {0} at {1} has no entry in the soil library")]
    UnknownSoilClass(i32, ErrorLocation),
    #[error("vegetation class id {0} at {1} has no entry in the vegetation library")]
    UnknownVegetationClass(i32, ErrorLocation),
    #[error("forcing field '{0}' is NaN at {1}")]
    NanForcing(String, ErrorLocation),
}

/// An iterative or explicit-scheme computation failed to converge or is unstable.
#[derive(Error, Debug)]
pub enum NumericError {
    #[error("Penman-Monteith evapotranspiration did not converge at {0}")]
    PenmanMonteithDiverged(ErrorLocation),
    #[error("snow energy-balance iteration did not converge at {0}")]
    SnowEnergyDiverged(ErrorLocation),
    #[error("the explicit water-table scheme is unstable at {0}: dt*max(Ks*D/(n*phi*cellsize^2)) = {1} > 0.5")]
    UnstableSaturatedScheme(ErrorLocation, f64),
}

/// Creation or write failure on a result artifact. Fatal.
#[derive(Error, Debug)]
pub enum OutputIoError {
    #[error("cannot create or write '{0}': {1}")]
    Write(String, String),
}

impl From<csv::Error> for OutputIoError {
    fn from(value: csv::Error) -> Self {
        OutputIoError::Write(String::new(), value.to_string())
    }
}

impl From<std::io::Error> for OutputIoError {
    fn from(value: std::io::Error) -> Self {
        OutputIoError::Write(String::new(), value.to_string())
    }
}

/// The discriminated outcome every fallible core operation returns. The exit code assigned to
/// each arm is the one the top-level orchestration surfaces on the process (config=2, input=3,
/// domain=4, numeric=5, output=6).
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("input shape error: {0}")]
    InputShape(#[from] InputShapeError),
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("numeric error: {0}")]
    Numeric(#[from] NumericError),
    #[error("output I/O error: {0}")]
    OutputIo(#[from] OutputIoError),
}

impl ModelError {
    /// The process exit code this error maps onto, per the error-handling design.
    pub fn exit_code(&self) -> i32 {
        match self {
            ModelError::Config(_) => 2,
            ModelError::InputShape(_) => 3,
            ModelError::Domain(_) => 4,
            ModelError::Numeric(_) => 5,
            ModelError::OutputIo(_) => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_the_error_handling_design() {
        let loc = ErrorLocation::Cell { row: 1, col: 2, step: 3 };
        assert_eq!(ModelError::from(ConfigError::MissingKey("x".into(), loc.clone())).exit_code(), 2);
        assert_eq!(
            ModelError::from(InputShapeError::MismatchedStepTime("p".into(), 1, 24)).exit_code(),
            3
        );
        assert_eq!(
            ModelError::from(DomainError::IllegalFlowDirection(3, loc.clone())).exit_code(),
            4
        );
        assert_eq!(
            ModelError::from(NumericError::UnstableSaturatedScheme(loc.clone(), 0.9)).exit_code(),
            5
        );
        assert_eq!(ModelError::from(OutputIoError::Write("f".into(), "e".into())).exit_code(), 6);
    }

    #[test]
    fn cell_location_formats_as_row_col_step() {
        let loc = ErrorLocation::Cell { row: 4, col: 5, step: 6 };
        assert_eq!(loc.to_string(), "cell (row=4, col=5) at step 6");
    }
}
