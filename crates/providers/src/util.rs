//! Shared plumbing for every adapter that speaks HTTP.

use ov_domain::Error;

pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() {
        Error::transport(e.to_string())
    } else if let Some(status) = e.status() {
        if status.is_client_error() {
            Error::new(ov_domain::ErrorKind::Schema, e.to_string())
        } else {
            Error::transport(e.to_string())
        }
    } else {
        Error::transport(e.to_string())
    }
}
