use super::*;

#[test]
fn test_queue_full_is_retryable() {
    assert!(Error::QueueFull { capacity: 4 }.is_retryable());
    assert!(!Error::AlreadyRegistered("a".into()).is_retryable());
    assert!(!Error::Cancelled.is_retryable());
}

#[test]
fn test_format_error_for_cli_includes_suggestion() {
    let err = Error::NoSuitableAgent {
        task_type: "translate".to_string(),
    };
    let output = format_error_for_cli(&err);
    assert!(output.contains("translate"));
    assert!(output.contains("Register an agent"));
}

#[test]
fn test_format_error_without_suggestion() {
    let output = format_error_for_cli(&Error::Closed);
    assert_eq!(output, "The message router has shut down.");
}
