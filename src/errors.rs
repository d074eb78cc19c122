use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};

// ResultBoxedError returns a result of a given type or a boxed error, in order to encapsulate
// generic error types without requiring an explicit implementation for each error type
pub type ResultBoxedError<T> = Result<T, Box<dyn std::error::Error>>;

// ErrorShapeMismatch is raised when matrix dimensions do not line up for
// the requested operation: multiply, add, sub, concat, or a batched
// answer whose per-query slice is smaller than a single entry.
#[derive(Debug)]
pub struct ErrorShapeMismatch {
  details: String,
}
impl ErrorShapeMismatch {
  pub fn new(details: &str) -> Self {
    Self {
      details: details.to_string(),
    }
  }
}
impl Display for ErrorShapeMismatch {
  fn fmt(&self, f: &mut Formatter) -> FmtResult {
    write!(f, "Shape mismatch: {}", self.details)
  }
}
impl Error for ErrorShapeMismatch {}

// ErrorOutOfRange is raised by bounds-checked element and row accesses.
#[derive(Debug)]
pub struct ErrorOutOfRange {
  details: String,
}
impl ErrorOutOfRange {
  pub fn new(details: &str) -> Self {
    Self {
      details: details.to_string(),
    }
  }
}
impl Display for ErrorOutOfRange {
  fn fmt(&self, f: &mut Formatter) -> FmtResult {
    write!(f, "Out of range: {}", self.details)
  }
}
impl Error for ErrorOutOfRange {}

// ErrorInvalidParams covers database and parameter preconditions: empty
// databases, dimensions that cannot hold the packed entries, failed
// catalogue lookups, and squish invocations the modulus cannot support.
#[derive(Debug)]
pub struct ErrorInvalidParams {
  details: String,
}
impl ErrorInvalidParams {
  pub fn new(details: &str) -> Self {
    Self {
      details: details.to_string(),
    }
  }
}
impl Display for ErrorInvalidParams {
  fn fmt(&self, f: &mut Formatter) -> FmtResult {
    write!(f, "Invalid parameters: {}", self.details)
  }
}
impl Error for ErrorInvalidParams {}

// ErrorHardcodedConstraint is raised when a packed kernel is called with
// a (basis, squishing) pair other than the fixed (10, 3).
#[derive(Debug)]
pub struct ErrorHardcodedConstraint {
  details: String,
}
impl ErrorHardcodedConstraint {
  pub fn new(details: &str) -> Self {
    Self {
      details: details.to_string(),
    }
  }
}
impl Display for ErrorHardcodedConstraint {
  fn fmt(&self, f: &mut Formatter) -> FmtResult {
    write!(f, "Hard-coded constraint violated: {}", self.details)
  }
}
impl Error for ErrorHardcodedConstraint {}

// ErrorReconstructFailure indicates that a recovered value disagrees
// with the database entry, i.e. the parameter choice left too little
// noise budget for rounding.
#[derive(Debug)]
pub struct ErrorReconstructFailure {
  details: String,
}
impl ErrorReconstructFailure {
  pub fn new(details: &str) -> Self {
    Self {
      details: details.to_string(),
    }
  }
}
impl Display for ErrorReconstructFailure {
  fn fmt(&self, f: &mut Formatter) -> FmtResult {
    write!(f, "Reconstruction failed: {}", self.details)
  }
}
impl Error for ErrorReconstructFailure {}
