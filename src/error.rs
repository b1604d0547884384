// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Library error codes and results.

use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// Project-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Max string length when the error is converted to string using `to_string_full`.
const MAX_ERROR_SOURCE_STRING_LENGTH: usize = 128;

/// Error kind to better contextualize the returned error.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    MalformedData,
    BadNetwork,
    InvalidSignature,
    ExpiredDeadline,
    DuplicatedResult,
    AlreadyResolved,
    DatabaseFault,
    SandboxFault,
    ProgramFault,
    Timeout,
    ResourceNotFound,
    NotImplemented,
    Other,
}

/// Error kind strings.
pub(super) mod error_kind_str {
    pub const MALFORMED_DATA: &str = "malformed data";
    pub const BAD_NETWORK: &str = "bad network";
    pub const INVALID_SIGNATURE: &str = "invalid signature";
    pub const EXPIRED_DEADLINE: &str = "expired deadline";
    pub const DUPLICATED_RESULT: &str = "duplicated result";
    pub const ALREADY_RESOLVED: &str = "already resolved";
    pub const DATABASE_FAULT: &str = "database fault";
    pub const SANDBOX_FAULT: &str = "sandbox fault";
    pub const PROGRAM_FAULT: &str = "program fault";
    pub const TIMEOUT: &str = "timeout";
    pub const RESOURCE_NOT_FOUND: &str = "resource not found";
    pub const NOT_IMPLEMENTED: &str = "not implemented";
    pub const OTHER: &str = "other";
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use ErrorKind::*;
        let kind_str = match self {
            MalformedData => error_kind_str::MALFORMED_DATA,
            BadNetwork => error_kind_str::BAD_NETWORK,
            InvalidSignature => error_kind_str::INVALID_SIGNATURE,
            ExpiredDeadline => error_kind_str::EXPIRED_DEADLINE,
            DuplicatedResult => error_kind_str::DUPLICATED_RESULT,
            AlreadyResolved => error_kind_str::ALREADY_RESOLVED,
            DatabaseFault => error_kind_str::DATABASE_FAULT,
            SandboxFault => error_kind_str::SANDBOX_FAULT,
            ProgramFault => error_kind_str::PROGRAM_FAULT,
            Timeout => error_kind_str::TIMEOUT,
            ResourceNotFound => error_kind_str::RESOURCE_NOT_FOUND,
            NotImplemented => error_kind_str::NOT_IMPLEMENTED,
            Other => error_kind_str::OTHER,
        };
        write!(f, "{}", kind_str)
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let msg = self.to_string();
        serializer.serialize_str(&msg)
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ErrorKindVisitor;

        impl<'de> Visitor<'de> for ErrorKindVisitor {
            type Value = String;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string")
            }

            fn visit_str<R>(self, value: &str) -> std::result::Result<String, R> {
                Ok(value.to_string())
            }
        }

        let kind = match deserializer.deserialize_str(ErrorKindVisitor)?.as_str() {
            error_kind_str::MALFORMED_DATA => ErrorKind::MalformedData,
            error_kind_str::BAD_NETWORK => ErrorKind::BadNetwork,
            error_kind_str::INVALID_SIGNATURE => ErrorKind::InvalidSignature,
            error_kind_str::EXPIRED_DEADLINE => ErrorKind::ExpiredDeadline,
            error_kind_str::DUPLICATED_RESULT => ErrorKind::DuplicatedResult,
            error_kind_str::ALREADY_RESOLVED => ErrorKind::AlreadyResolved,
            error_kind_str::DATABASE_FAULT => ErrorKind::DatabaseFault,
            error_kind_str::SANDBOX_FAULT => ErrorKind::SandboxFault,
            error_kind_str::PROGRAM_FAULT => ErrorKind::ProgramFault,
            error_kind_str::TIMEOUT => ErrorKind::Timeout,
            error_kind_str::RESOURCE_NOT_FOUND => ErrorKind::ResourceNotFound,
            error_kind_str::NOT_IMPLEMENTED => ErrorKind::NotImplemented,
            _ => ErrorKind::Other,
        };
        Ok(kind)
    }
}

/// Project-wide error type.
/// Contains a kind enumerate and a `source` to identify the subsystem that may
/// have propagated the error.
#[derive(Debug, Serialize, Deserialize)]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Human readable detail, not preserved across clones.
    #[serde(serialize_with = "source_se", deserialize_with = "source_de")]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

fn source_se<S: Serializer>(
    source: &Option<Box<dyn std::error::Error + Send + Sync>>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match source {
        Some(b) => s.serialize_str(&b.to_string()),
        None => s.serialize_unit(),
    }
}

fn source_de<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Box<dyn std::error::Error + Send + Sync>>, D::Error> {
    let source: Option<String> = Option::deserialize(d)?;
    Ok(source.map(|s| s.into()))
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Error {
            kind: self.kind,
            source: None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::new_ext(ErrorKind::Other, s)
    }
}

impl<T> From<ErrorKind> for Result<T> {
    fn from(kind: ErrorKind) -> Self {
        Err(kind.into())
    }
}

impl Error {
    pub fn new_ext<E>(kind: ErrorKind, error: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let source = error.into();
        Error {
            kind,
            source: Some(source),
        }
    }

    pub fn new(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }

    pub fn to_string_full(&self) -> String {
        let mut err_string = self.to_string();
        if let Some(ref source) = self.source {
            let detail = format!(": {}", source);
            let max_len = std::cmp::min(detail.len(), MAX_ERROR_SOURCE_STRING_LENGTH);
            let mut end = max_len;
            while !detail.is_char_boundary(end) {
                end -= 1;
            }
            err_string.push_str(&detail[..end]);
        }
        err_string
    }

    /// Errors that the owning loop survives by retrying on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::BadNetwork | ErrorKind::Timeout | ErrorKind::SandboxFault
        )
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        if self.kind != other.kind {
            return false;
        }
        match (&self.source, &other.source) {
            (None, None) => true,
            (Some(a), Some(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.source {
            None => None,
            Some(ref source) => Some(source.as_ref()),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::serialize::{rmp_deserialize, rmp_serialize};
    use std::io;
    use ErrorKind::*;

    #[test]
    fn generic_error_type() {
        let src1 = io::Error::new(io::ErrorKind::PermissionDenied, "oh no!");
        let src2 = io::Error::new(io::ErrorKind::TimedOut, "oh no?");
        let err1 = Error::new_ext(DatabaseFault, src1);
        let err2 = Error::new_ext(DatabaseFault, src2);

        assert_ne!(err1, err2);
    }

    #[test]
    fn external_db_failure() {
        let source = io::Error::new(io::ErrorKind::PermissionDenied, "oh no!");

        let error = Error::new_ext(DatabaseFault, source);

        assert_eq!(error.to_string(), "database fault");
        assert_eq!(error.to_string_full(), "database fault: oh no!");
        let source = std::error::Error::source(&error)
            .unwrap()
            .downcast_ref::<io::Error>()
            .unwrap();
        assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn long_source_is_truncated() {
        let error = Error::new_ext(SandboxFault, "x".repeat(1000));

        let full = error.to_string_full();

        assert_eq!(
            full.len(),
            "sandbox fault".len() + MAX_ERROR_SOURCE_STRING_LENGTH
        );
    }

    // MessagePack: [ "database fault", "oh no!" ]
    const ERROR_HEX: &str = "92ae6461746162617365206661756c74a66f68206e6f21";
    const ERROR_NO_SOURCE_HEX: &str = "92ae6461746162617365206661756c74c0";

    #[test]
    fn error_serialize() {
        let error = Error::new_ext(DatabaseFault, "oh no!");

        let buf = rmp_serialize(&error).unwrap();

        assert_eq!(hex::encode(&buf), ERROR_HEX);
    }

    #[test]
    fn error_deserialize() {
        let buf = hex::decode(ERROR_HEX).unwrap();

        let err: Error = rmp_deserialize(&buf).unwrap();

        assert_eq!(err, Error::new_ext(DatabaseFault, "oh no!"));
    }

    #[test]
    fn error_serialize_no_source() {
        let error = Error::new(DatabaseFault);

        let buf = rmp_serialize(&error).unwrap();

        assert_eq!(hex::encode(&buf), ERROR_NO_SOURCE_HEX);
    }

    #[test]
    fn error_deserialize_no_source() {
        let buf = hex::decode(ERROR_NO_SOURCE_HEX).unwrap();

        let err: Error = rmp_deserialize(&buf).unwrap();

        assert_eq!(err, Error::new(DatabaseFault));
    }

    #[test]
    fn error_json_body() {
        let error = Error::new_ext(ExpiredDeadline, "deadline is in the past");

        let json = serde_json::to_string(&error).unwrap();

        assert_eq!(
            json,
            r#"{"kind":"expired deadline","source":"deadline is in the past"}"#
        );
    }

    #[test]
    fn transient_kinds() {
        assert!(Error::new(BadNetwork).is_transient());
        assert!(Error::new(Timeout).is_transient());
        assert!(!Error::new(DatabaseFault).is_transient());
    }
}
