pub use http::StatusCode;
use kube::Error;

/// The reason string the API server attaches to a 409 when the object is already present.
const REASON_ALREADY_EXISTS: &str = "AlreadyExists";

pub trait HttpStatusCode {
    fn status_code(&self) -> Option<StatusCode>;

    /// The `reason` field of the API server's `Status` response, if there was one.
    fn status_reason(&self) -> Option<&str> {
        None
    }

    fn is_status_code(&self, status_code: StatusCode) -> bool {
        self.status_code()
            .map(|some| some == status_code)
            .unwrap_or_default()
    }
}

impl HttpStatusCode for kube::Error {
    fn status_code(&self) -> Option<StatusCode> {
        if let Error::Api(error_response) = self {
            StatusCode::from_u16(error_response.code).ok()
        } else {
            None
        }
    }

    fn status_reason(&self) -> Option<&str> {
        if let Error::Api(error_response) = self {
            Some(error_response.reason.as_str())
        } else {
            None
        }
    }
}

/// The classes of API failures callers branch on. Everything that is not one of the first three
/// is `Other` and is always surfaced.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorClass {
    NotFound,
    AlreadyExists,
    Conflict,
    Other,
}

impl ErrorClass {
    pub(crate) fn from_status<E>(error: &E) -> Self
    where
        E: HttpStatusCode,
    {
        match error.status_code() {
            Some(StatusCode::NOT_FOUND) => ErrorClass::NotFound,
            Some(StatusCode::CONFLICT) if error.status_reason() == Some(REASON_ALREADY_EXISTS) => {
                ErrorClass::AlreadyExists
            }
            Some(StatusCode::CONFLICT) => ErrorClass::Conflict,
            _ => ErrorClass::Other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn classify_api_errors() {
        assert_eq!(
            ErrorClass::from_status(&api_error(404, "NotFound")),
            ErrorClass::NotFound
        );
        assert_eq!(
            ErrorClass::from_status(&api_error(409, "AlreadyExists")),
            ErrorClass::AlreadyExists
        );
        assert_eq!(
            ErrorClass::from_status(&api_error(409, "Conflict")),
            ErrorClass::Conflict
        );
        assert_eq!(
            ErrorClass::from_status(&api_error(500, "InternalError")),
            ErrorClass::Other
        );
    }
}
