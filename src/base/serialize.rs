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

use crate::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// Serialize using MessagePack format (without field names).
///
/// # Error
///
/// If the data cannot be serialized a `MalformedData` error kind is returned.
pub fn rmp_serialize<T>(val: &T) -> Result<Vec<u8>>
where
    T: Serialize,
{
    rmp_serde::to_vec(val).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

/// Deserialize using MessagePack format.
///
/// # Error
///
/// If the data cannot be deserialized a `MalformedData` error kind is returned.
pub fn rmp_deserialize<'a, T>(buf: &'a [u8]) -> Result<T>
where
    T: Deserialize<'a>,
{
    rmp_serde::from_slice(buf).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

/// Serialize using JSON format.
/// Used for the payloads exchanged with the external services.
pub fn json_serialize<T>(val: &T) -> Result<Vec<u8>>
where
    T: Serialize,
{
    serde_json::to_vec(val).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

/// Deserialize using JSON format.
pub fn json_deserialize<'a, T>(buf: &'a [u8]) -> Result<T>
where
    T: Deserialize<'a>,
{
    serde_json::from_slice(buf).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
    struct Stamp<'a> {
        id: u64,
        seed: &'a str,
        #[serde(with = "serde_bytes")]
        hash: &'a [u8],
    }

    const STAMP_HEX: &str = "9303a3616263c40201ff";
    const STAMP_JSON: &str = r#"{"id":3,"seed":"abc","hash":[1,255]}"#;

    fn create_stamp() -> Stamp<'static> {
        Stamp {
            id: 3,
            seed: "abc",
            hash: &[0x01, 0xff],
        }
    }

    #[test]
    fn stamp_serialize() {
        let st = create_stamp();

        let buf = rmp_serialize(&st).unwrap();

        assert_eq!(hex::encode(&buf), STAMP_HEX);
    }

    #[test]
    fn stamp_deserialize() {
        let buf = hex::decode(STAMP_HEX).unwrap();

        let st: Stamp = rmp_deserialize(&buf).unwrap();

        assert_eq!(st, create_stamp());
    }

    #[test]
    fn stamp_json() {
        let st = create_stamp();

        let buf = json_serialize(&st).unwrap();

        assert_eq!(String::from_utf8(buf).unwrap(), STAMP_JSON);
    }

    #[test]
    fn truncated_buffer() {
        let buf = hex::decode("9303a361").unwrap();

        let err = rmp_deserialize::<Stamp>(&buf).unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }
}
