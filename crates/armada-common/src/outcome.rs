//! Results of operations that act on several objects at once
//!
//! Installing a chart group touches every member chart. A failure on one
//! member does not undo the others, so callers get back what was done
//! together with the first error encountered.

use crate::Error;

/// A (possibly partial) value paired with the first error, if any
#[derive(Debug)]
pub struct ManagerResult<T> {
    /// Value produced, even when an error occurred
    pub value: T,
    /// First error encountered
    pub error: Option<Error>,
}

impl<T> ManagerResult<T> {
    /// A fully successful result
    pub fn ok(value: T) -> Self {
        Self { value, error: None }
    }

    /// A result carrying an error alongside whatever was produced
    pub fn with_error(value: T, error: Error) -> Self {
        Self {
            value,
            error: Some(error),
        }
    }

    /// Keep the first of the collected errors
    pub fn from_errors(value: T, errors: Vec<Error>) -> Self {
        Self {
            value,
            error: errors.into_iter().next(),
        }
    }

    /// Keep the first of the collected errors, collapsing it to
    /// [`Error::NotFound`] when it is a not-found
    pub fn from_errors_not_found(value: T, errors: Vec<Error>) -> Self {
        Self {
            value,
            error: errors.into_iter().next().map(Error::normalize_not_found),
        }
    }

    /// True when no error was recorded
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// True when the recorded error is a not-found
    pub fn is_not_found(&self) -> bool {
        self.error.as_ref().is_some_and(Error::is_not_found)
    }

    /// Discard the value when an error was recorded
    pub fn into_result(self) -> Result<T, Error> {
        match self.error {
            None => Ok(self.value),
            Some(e) => Err(e),
        }
    }

    /// Split into the value and the optional error
    pub fn into_parts(self) -> (T, Option<Error>) {
        (self.value, self.error)
    }

    /// Transform the value, keeping the error
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ManagerResult<U> {
        ManagerResult {
            value: f(self.value),
            error: self.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_found() -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "armadacharts \"mariadb\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        }))
    }

    #[test]
    fn first_error_wins() {
        let result = ManagerResult::from_errors(
            vec!["a", "b"],
            vec![Error::internal("first"), not_found()],
        );
        assert!(!result.is_ok());
        assert!(result.error.as_ref().unwrap().to_string().contains("first"));
        assert_eq!(result.value.len(), 2);
    }

    #[test]
    fn leading_not_found_collapses_to_sentinel() {
        let result = ManagerResult::from_errors_not_found((), vec![not_found(), Error::internal("x")]);
        assert!(matches!(result.error, Some(Error::NotFound)));
        assert!(result.is_not_found());

        let result = ManagerResult::from_errors_not_found((), vec![Error::internal("x"), not_found()]);
        assert!(matches!(result.error, Some(Error::Internal { .. })));
        assert!(!result.is_not_found());
    }

    #[test]
    fn no_errors_is_ok() {
        let result = ManagerResult::from_errors(3, Vec::new());
        assert!(result.is_ok());
        assert_eq!(result.map(|v| v * 2).into_result().unwrap(), 6);
    }

    #[test]
    fn value_survives_an_error() {
        let (value, error) = ManagerResult::with_error("partial", Error::NotFound).into_parts();
        assert_eq!(value, "partial");
        assert!(error.is_some());
    }
}
