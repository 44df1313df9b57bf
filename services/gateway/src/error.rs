//! Top-level gateway error type, composing the per-crate errors of
//! `libs/*` and mapping each to an ISO 8583 response code.

use thiserror::Error;

/// Every error the gateway's request-handling paths can raise, tagged with
/// the ISO 8583 response code (field 39) it maps to when the caller has
/// to build a client-facing error response.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("frame error: {0}")]
    Frame(#[from] frame::FrameError),

    #[error("ISO codec error: {0}")]
    Iso(#[from] iso8583::IsoError),

    #[error("HSM error: {0}")]
    Hsm(#[from] hsm::HsmError),

    #[error("database error: {0}")]
    Db(#[from] db::DbError),

    #[error("license check failed")]
    License,

    #[error("invalid transaction: {0}")]
    InvalidTransaction(&'static str),

    #[error("host is not connected")]
    HostDisconnected,

    #[error("timed out waiting for host response")]
    UpstreamTimeout,

    #[error("programming error: {0}")]
    Internal(&'static str),
}

impl GatewayError {
    /// ISO 8583 field 39 response code this error maps to.
    pub fn response_code(&self) -> &'static str {
        match self {
            GatewayError::Frame(e) => {
                if matches!(e, frame::FrameError::Format(_, _)) {
                    "30"
                } else {
                    "96"
                }
            }
            GatewayError::Iso(_) => "96",
            GatewayError::Hsm(e) => match e {
                hsm::HsmError::Failure(_) | hsm::HsmError::PanTooShort(_) => "55",
                _ => "96",
            },
            GatewayError::Db(_) => "96",
            GatewayError::License => "15",
            GatewayError::InvalidTransaction(_) => "12",
            GatewayError::HostDisconnected => "96",
            GatewayError::UpstreamTimeout => "96",
            GatewayError::Internal(_) => "96",
        }
    }

    /// Whether the connection the error occurred on should be dropped.
    /// A framing or codec error, or a license rejection, drops the
    /// connection; a database or HSM error lets it survive.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            GatewayError::Frame(_) | GatewayError::Iso(_) | GatewayError::License
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn license_error_maps_to_rc_15() {
        assert_eq!(GatewayError::License.response_code(), "15");
    }

    #[test]
    fn invalid_transaction_maps_to_rc_12() {
        assert_eq!(GatewayError::InvalidTransaction("bad mti").response_code(), "12");
    }

    #[test]
    fn frame_format_error_maps_to_rc_30() {
        let err = GatewayError::Frame(frame::FrameError::Format(0, frame::MAX_FRAME_LEN));
        assert_eq!(err.response_code(), "30");
        assert!(err.is_fatal_to_connection());
    }

    #[test]
    fn hsm_failure_maps_to_rc_55() {
        let err = GatewayError::Hsm(hsm::HsmError::Failure("55".into()));
        assert_eq!(err.response_code(), "55");
        assert!(!err.is_fatal_to_connection());
    }
}
