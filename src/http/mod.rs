//! HTTP protocol types shared across the crate.
//!
//! This module provides the vocabulary the pipeline speaks:
//! [`Method`], [`StatusCode`], [`Status`], [`Headers`], [`Request`], and
//! [`ResponseContext`].

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::Request;
pub use response::ResponseContext;

/// An HTTP response status code.
///
/// # Examples
///
/// ```
/// use xpress::StatusCode;
///
/// assert_eq!(StatusCode::NotFound.as_u16(), 404);
/// assert_eq!(StatusCode::NotFound.canonical_reason(), "Not Found");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    // 2xx Success
    Ok = 200,
    Created = 201,
    Accepted = 202,
    NoContent = 204,

    // 3xx Redirection
    MovedPermanently = 301,
    Found = 302,
    SeeOther = 303,
    NotModified = 304,

    // 4xx Client Error
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    Conflict = 409,
    PayloadTooLarge = 413,
    UnsupportedMediaType = 415,
    UnprocessableEntity = 422,
    TooManyRequests = 429,

    // 5xx Server Error
    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
    GatewayTimeout = 504,
}

impl StatusCode {
    /// Returns the numeric status code as a `u16`.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the canonical reason phrase for this status code.
    pub fn canonical_reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Created => "Created",
            Self::Accepted => "Accepted",
            Self::NoContent => "No Content",
            Self::MovedPermanently => "Moved Permanently",
            Self::Found => "Found",
            Self::SeeOther => "See Other",
            Self::NotModified => "Not Modified",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::Conflict => "Conflict",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::UnsupportedMediaType => "Unsupported Media Type",
            Self::UnprocessableEntity => "Unprocessable Entity",
            Self::TooManyRequests => "Too Many Requests",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::GatewayTimeout => "Gateway Timeout",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// The outcome value handlers and the pipeline exchange.
///
/// Carries a [`StatusCode`] plus free-form details. Code 200 is the success
/// sentinel: a success `Status` lets the pipeline keep walking, anything else
/// terminates the walk and reaches the error handler.
///
/// # Examples
///
/// ```
/// use xpress::{Status, StatusCode};
///
/// let status = Status::detailed(StatusCode::Forbidden, "admin area");
/// assert!(!status.is_success());
/// assert_eq!(status.description(), "Forbidden");
/// assert_eq!(status.details(), "admin area");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: StatusCode,
    details: String,
}

impl Status {
    /// The success sentinel: `200 OK` with no details.
    pub fn ok() -> Self {
        Self::new(StatusCode::Ok)
    }

    /// A status with no details.
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            details: String::new(),
        }
    }

    /// A status carrying details for the error handler to display.
    pub fn detailed(code: StatusCode, details: impl Into<String>) -> Self {
        Self {
            code,
            details: details.into(),
        }
    }

    /// Returns the status code.
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// Returns the canonical reason phrase of the status code.
    pub fn description(&self) -> &'static str {
        self.code.canonical_reason()
    }

    /// Returns the free-form details, empty when none were attached.
    pub fn details(&self) -> &str {
        &self.details
    }

    /// Returns `true` exactly when the code is the `200 OK` sentinel.
    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if !self.details.is_empty() {
            write!(f, ": {}", self.details)?;
        }
        Ok(())
    }
}

/// An HTTP request method.
///
/// Standard methods are unit variants for zero-cost comparison; non-standard
/// methods are captured in `Custom`.
///
/// # Examples
///
/// ```
/// use xpress::Method;
///
/// let method: Method = "GET".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert_eq!(method.as_str(), "GET");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    /// A non-standard extension method.
    Custom(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            other => Self::Custom(other.to_owned()),
        })
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_display() {
        assert_eq!(StatusCode::Ok.to_string(), "200 OK");
        assert_eq!(
            StatusCode::ServiceUnavailable.to_string(),
            "503 Service Unavailable"
        );
    }

    #[test]
    fn success_sentinel_is_exactly_200() {
        assert!(Status::ok().is_success());
        assert!(!Status::new(StatusCode::Created).is_success());
        assert!(!Status::new(StatusCode::NotFound).is_success());
    }

    #[test]
    fn detailed_status_keeps_details() {
        let s = Status::detailed(StatusCode::BadRequest, "missing field");
        assert_eq!(s.code(), StatusCode::BadRequest);
        assert_eq!(s.details(), "missing field");
        assert_eq!(s.to_string(), "400 Bad Request: missing field");
    }

    #[test]
    fn method_round_trip() {
        for raw in ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH"] {
            let m: Method = raw.parse().unwrap();
            assert_eq!(m.as_str(), raw);
        }
    }

    #[test]
    fn unknown_method_is_custom() {
        let m: Method = "PURGE".parse().unwrap();
        assert_eq!(m, Method::Custom("PURGE".to_owned()));
        assert_eq!(m.as_str(), "PURGE");
    }
}
