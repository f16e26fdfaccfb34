// Copyright 2021 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
////////////////////////////////////////////////////////////////////////////////

use super::*;
use crate::util::expect_err;

#[test]
fn test_value_roundtrip() {
    let tests = vec![
        (Value::Integer(2451.into()), "190993"),
        (Value::Text("abc".to_owned()), "63616263"),
        (
            Value::Tag(47, Box::new(Value::Integer(2462.into()))),
            "d82f19099e",
        ),
    ];

    for (i, (value, value_data)) in tests.iter().enumerate() {
        let got = value.clone().to_vec().unwrap();
        assert_eq!(*value_data, hex::encode(&got), "case {i}");

        let got = Value::from_slice(&got).unwrap();
        assert_eq!(*value, got);
    }
}

#[test]
fn test_read_to_value_fail() {
    let tests = vec![
        ("", "EndOfFile"),
        ("0102", "ExtraneousData"),
        ("a1", "EndOfFile"),
    ];
    for (data, err_msg) in tests.iter() {
        let data = hex::decode(data).unwrap();
        let result = read_to_value(&data);
        expect_err(result, err_msg);
    }
}

#[test]
fn test_int_to_i64() {
    assert_eq!(int_to_i64(7.into()).unwrap(), 7);
    assert_eq!(int_to_i64((-7).into()).unwrap(), -7);
    let big = ciborium::value::Integer::from(u64::MAX);
    expect_err(int_to_i64(big), "OutOfRangeIntegerValue");
}

#[test]
fn test_error_display() {
    assert_eq!(
        CodecError::UnexpectedItem("tstr", "bstr").to_string(),
        "got tstr, expected bstr"
    );
    assert_eq!(
        CodecError::UnknownWrapper("\"x\"".to_owned()).to_string(),
        "unknown voucher wrapper key \"x\""
    );
}
