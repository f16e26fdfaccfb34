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

#[test]
fn test_cbor_type_error() {
    let cases = vec![
        (Value::Null, "nul"),
        (Value::Bool(true), "bool"),
        (Value::Bool(false), "bool"),
        (Value::Integer(128.into()), "int"),
        (Value::Integer((-1).into()), "int"),
        (Value::Bytes(vec![1, 2]), "bstr"),
        (Value::Text("string".to_owned()), "tstr"),
        (Value::Array(vec![Value::Integer(0.into())]), "array"),
        (Value::Map(vec![]), "map"),
        (Value::Tag(1, Box::new(Value::Integer(0.into()))), "tag"),
        (Value::Float(1.054571817), "float"),
    ];
    for (val, want) in cases {
        let e = cbor_type_error::<()>(&val, "a");
        expect_err(e, want);
    }
}

#[test]
fn test_value_try_as() {
    assert_eq!(Value::Integer(2451.into()).try_as_i64().unwrap(), 2451);
    assert_eq!(Value::Bytes(vec![1, 2, 3]).try_as_bytes().unwrap(), vec![1, 2, 3]);
    assert_eq!(Value::Text("x".to_owned()).try_as_string().unwrap(), "x");
    assert!(Value::Bool(true).try_as_bool().unwrap());
    assert!(Value::Map(vec![]).try_as_map().unwrap().is_empty());

    expect_err(Value::Text("x".to_owned()).try_as_bytes(), "expected bstr");
    expect_err(Value::Bytes(vec![]).try_as_string(), "expected tstr");
    expect_err(Value::Integer(1.into()).try_as_bool(), "expected bool");
    expect_err(Value::Array(vec![]).try_as_map(), "expected map");
    expect_err(Value::Null.try_as_i64(), "expected int");
}
