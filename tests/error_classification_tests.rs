//! Retryability is decided by the error family alone

use proptest::prelude::*;
use rstest::rstest;
use std::time::Duration;

use hockey_stats_crawler::domain::{DomainError, ErrorCode, ErrorType};

#[rstest]
#[case(500, ErrorType::External, ErrorCode::TransientServer, true)]
#[case(503, ErrorType::External, ErrorCode::TransientServer, true)]
#[case(429, ErrorType::External, ErrorCode::RateLimited, true)]
#[case(404, ErrorType::Business, ErrorCode::NotFound, false)]
#[case(410, ErrorType::Business, ErrorCode::NotFound, false)]
#[case(403, ErrorType::Business, ErrorCode::AccessDenied, false)]
#[case(401, ErrorType::Business, ErrorCode::AccessDenied, false)]
#[case(302, ErrorType::External, ErrorCode::UnexpectedStatus, true)]
fn http_status_classification(
    #[case] status: u16,
    #[case] error_type: ErrorType,
    #[case] code: ErrorCode,
    #[case] retryable: bool,
) {
    let err = DomainError::http_status("https://www.fhspb.ru/Team.aspx?TeamID=7", status);
    assert_eq!(err.error_type(), error_type);
    assert_eq!(err.code(), code);
    assert_eq!(err.is_retryable(), retryable);
    assert_eq!(err.context().get("status_code"), Some(&status.to_string()));
}

#[rstest]
#[case::timeout(DomainError::timeout("fetch", Duration::from_secs(30)), true)]
#[case::incomplete(DomainError::parsing_temporary("roster", "table cut off"), true)]
#[case::malformed(DomainError::invalid_format("birth_date", "31.02.2010"), false)]
#[case::business(DomainError::business("no such level"), false)]
#[case::validation(DomainError::validation("base_url", "empty"), false)]
#[case::plumbing(DomainError::infrastructure("pool closed"), true)]
fn constructor_classification(#[case] err: DomainError, #[case] retryable: bool) {
    assert_eq!(err.is_retryable(), retryable);
    assert_eq!(err.error_type().is_retryable(), retryable);
}

fn any_error_type() -> impl Strategy<Value = ErrorType> {
    prop_oneof![
        Just(ErrorType::ParsingTemporary),
        Just(ErrorType::ParsingPermanent),
        Just(ErrorType::Network),
        Just(ErrorType::External),
        Just(ErrorType::Infrastructure),
        Just(ErrorType::Database),
        Just(ErrorType::Business),
        Just(ErrorType::Validation),
    ]
}

fn any_code() -> impl Strategy<Value = ErrorCode> {
    prop_oneof![
        Just(ErrorCode::TransientNetwork),
        Just(ErrorCode::TransientServer),
        Just(ErrorCode::RateLimited),
        Just(ErrorCode::Timeout),
        Just(ErrorCode::NotFound),
        Just(ErrorCode::InvalidFormat),
        Just(ErrorCode::BusinessRule),
        Just(ErrorCode::DatabaseConstraint),
    ]
}

proptest! {
    #[test]
    fn retryability_ignores_code_message_and_context(
        error_type in any_error_type(),
        code in any_code(),
        message in ".{0,40}",
        key in "[a-z_]{1,12}",
        value in ".{0,20}",
    ) {
        let err = DomainError::new(error_type, code, message).with_context(key, value).with_trace_id("t-1");
        prop_assert_eq!(err.is_retryable(), error_type.is_retryable());
        prop_assert_eq!(err.clone().is_retryable(), err.is_retryable());
    }

    #[test]
    fn server_errors_are_always_retryable(status in 500u16..600) {
        prop_assert!(DomainError::http_status("u", status).is_retryable());
    }
}
