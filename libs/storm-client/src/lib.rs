pub mod client;
pub mod error;
pub mod metrics;
pub mod model;

pub use client::{Credentials, StormApiClient};
pub use error::{Result, StormApiError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_not_found() {
        let err = StormApiError::from_response(reqwest::StatusCode::NOT_FOUND, "x".into(), false);
        assert!(err.is_not_found());
        assert_eq!(err.metric_label(), "not_found");
    }

    #[test]
    fn classifies_auth() {
        let err = StormApiError::from_response(reqwest::StatusCode::UNAUTHORIZED, "x".into(), false);
        assert!(err.is_auth());
        let err = StormApiError::from_response(reqwest::StatusCode::FORBIDDEN, "x".into(), false);
        assert!(err.is_auth());
    }

    #[test]
    fn classifies_transient_on_5xx_and_429() {
        let err = StormApiError::from_response(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "x".into(),
            false,
        );
        assert!(err.is_transient());
        let err =
            StormApiError::from_response(reqwest::StatusCode::TOO_MANY_REQUESTS, "x".into(), false);
        assert!(err.is_transient());
    }

    #[test]
    fn classifies_permanent_on_other_4xx() {
        let err = StormApiError::from_response(reqwest::StatusCode::BAD_REQUEST, "x".into(), false);
        assert!(err.is_permanent());
    }

    #[test]
    fn not_found_body_needle_overrides_status() {
        // Storm's UI API sometimes reports a missing topology as a 500 with a
        // descriptive body rather than a bare 404.
        let err = StormApiError::from_response(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "topology does not exist".into(),
            true,
        );
        assert!(err.is_not_found());
    }
}
