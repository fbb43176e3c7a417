//! Transient/permanent classification of check failures.

use std::error::Error;
use std::io::ErrorKind;

use serde::Serialize;

use crate::mail::MailError;

/// What a failed check means for the account's polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorClass {
    /// Expected to resolve itself; retried on the next tick.
    Transient,
    /// Needs reconfiguration; the account's loop stops.
    Permanent,
}

/// Classifies an error by walking its cause chain.
///
/// Socket, I/O-wrapping-socket and timeout errors anywhere in the chain are
/// transient. Authentication and configuration errors are permanent, as is
/// anything unrecognised.
pub fn classify(error: &(dyn Error + 'static)) -> ErrorClass {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(class) = classify_link(err) {
            return class;
        }
        current = err.source();
    }
    ErrorClass::Permanent
}

fn classify_link(err: &(dyn Error + 'static)) -> Option<ErrorClass> {
    if let Some(mail) = err.downcast_ref::<MailError>() {
        return match mail {
            MailError::Authentication { .. }
            | MailError::InvalidConfig(_)
            | MailError::Credentials(_) => Some(ErrorClass::Permanent),
            MailError::Timeout(_) | MailError::Connect { .. } | MailError::Cancelled => {
                Some(ErrorClass::Transient)
            }
            _ => None,
        };
    }

    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        if is_transient_kind(io.kind()) {
            return Some(ErrorClass::Transient);
        }
        // io::Error::source() skips the wrapped error itself
        if let Some(inner) = io.get_ref() {
            if classify(inner) == ErrorClass::Transient {
                return Some(ErrorClass::Transient);
            }
        }
        return None;
    }

    if err.is::<tokio::time::error::Elapsed>() {
        return Some(ErrorClass::Transient);
    }

    if let Some(async_imap::error::Error::ConnectionLost) =
        err.downcast_ref::<async_imap::error::Error>()
    {
        return Some(ErrorClass::Transient);
    }

    None
}

fn is_transient_kind(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrInUse
            | ErrorKind::AddrNotAvailable
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::UnexpectedEof
            | ErrorKind::NetworkUnreachable
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkDown
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::SecretError;
    use std::fmt;
    use std::io;
    use std::time::Duration;

    #[derive(Debug)]
    struct Wrapper(Box<dyn Error + Send + Sync>);

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "wrapped: {}", self.0)
        }
    }

    impl Error for Wrapper {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(self.0.as_ref())
        }
    }

    #[derive(Debug)]
    struct Unknown;

    impl fmt::Display for Unknown {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("something odd")
        }
    }

    impl Error for Unknown {}

    #[test]
    fn test_socket_timeout_is_transient() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "read timed out");
        assert_eq!(classify(&err), ErrorClass::Transient);
        assert_eq!(
            classify(&MailError::Timeout(Duration::from_secs(30))),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_authentication_failure_is_permanent() {
        let err = MailError::Authentication {
            user: "me".to_string(),
            reason: "invalid credentials".to_string(),
        };
        assert_eq!(classify(&err), ErrorClass::Permanent);
    }

    #[test]
    fn test_config_errors_are_permanent() {
        assert_eq!(
            classify(&MailError::InvalidConfig("no tls".to_string())),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify(&MailError::Credentials(SecretError::NoSourceProvided)),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_wrapped_socket_error_is_transient() {
        let socket = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err = Wrapper(Box::new(Wrapper(Box::new(socket))));
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn test_io_error_wrapping_socket_error_is_transient() {
        let socket = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = io::Error::other(socket);
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn test_protocol_error_chain_is_walked() {
        let lost = MailError::Protocol(async_imap::error::Error::ConnectionLost);
        assert_eq!(classify(&lost), ErrorClass::Transient);

        let io = MailError::Protocol(async_imap::error::Error::Io(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "pipe",
        )));
        assert_eq!(classify(&io), ErrorClass::Transient);

        let rejected = MailError::Protocol(async_imap::error::Error::No("no such folder".into()));
        assert_eq!(classify(&rejected), ErrorClass::Permanent);
    }

    #[test]
    fn test_other_with_socket_source_is_transient() {
        let err = MailError::Other {
            message: "fetch failed".to_string(),
            source: Some(Box::new(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "aborted",
            ))),
        };
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn test_unknown_errors_are_permanent() {
        assert_eq!(classify(&Unknown), ErrorClass::Permanent);
        assert_eq!(classify(&Wrapper(Box::new(Unknown))), ErrorClass::Permanent);
        assert_eq!(
            classify(&io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
            ErrorClass::Permanent
        );
    }

    #[tokio::test]
    async fn test_elapsed_is_transient() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        assert_eq!(classify(&elapsed), ErrorClass::Transient);
    }
}
