//! Maps transcoder stderr onto an advisory [`DiagnosticCode`].

use crate::models::DiagnosticCode;

/// Classify accumulated diagnostic text. The first matching rule wins.
pub fn classify_diagnostics(diagnostics: &str) -> DiagnosticCode {
    if diagnostics.contains("401 Unauthorized") {
        DiagnosticCode::Auth
    } else if diagnostics.contains("404 Not Found") {
        DiagnosticCode::NotFound
    } else if diagnostics.contains("Connection refused") {
        DiagnosticCode::ConnectionRefused
    } else if diagnostics.to_lowercase().contains("timeout") {
        DiagnosticCode::Timeout
    } else if diagnostics.contains("Invalid data found") {
        DiagnosticCode::InvalidStream
    } else {
        DiagnosticCode::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("method DESCRIBE failed: 401 Unauthorized", DiagnosticCode::Auth)]
    #[case("method DESCRIBE failed: 404 Not Found", DiagnosticCode::NotFound)]
    #[case("Connection to tcp://10.0.0.9:554 failed: Connection refused", DiagnosticCode::ConnectionRefused)]
    #[case("Connection TIMEOUT while reading", DiagnosticCode::Timeout)]
    #[case("rtsp: Operation timed out / socket timeout", DiagnosticCode::Timeout)]
    #[case("rtsp://cam/live: Invalid data found when processing input", DiagnosticCode::InvalidStream)]
    #[case("Conversion failed!", DiagnosticCode::Unknown)]
    #[case("", DiagnosticCode::Unknown)]
    fn test_classification(#[case] diagnostics: &str, #[case] expected: DiagnosticCode) {
        assert_eq!(classify_diagnostics(diagnostics), expected);
    }

    #[test]
    fn test_first_match_wins() {
        let text = "Connection refused\n401 Unauthorized\ntimeout";
        assert_eq!(classify_diagnostics(text), DiagnosticCode::Auth);

        let text = "Invalid data found\nread timeout";
        assert_eq!(classify_diagnostics(text), DiagnosticCode::Timeout);
    }
}
