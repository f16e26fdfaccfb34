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
fn test_sid_conversion() {
    assert_eq!(Some(VoucherSid::Voucher), VoucherSid::from_i64(2451));
    assert_eq!(Some(VoucherSid::SerialNumber), VoucherSid::from_i64(2462));
    assert_eq!(VoucherSid::Nonce as i64, 2458);
    assert_eq!(None, VoucherSid::from_i64(2450));
    assert_eq!(None, VoucherSid::from_i64(2463));

    assert_eq!(
        Some(VoucherRequestSid::ProximityRegistrarSpki),
        VoucherRequestSid::from_i64(2513)
    );
    assert_eq!(VoucherRequestSid::SerialNumber.to_i64(), 2514);
    assert_eq!(None, VoucherRequestSid::from_i64(2515));
}

#[test]
fn test_leaf_offsets() {
    // Leaves sit at +1 .. +13 above the request container.
    let base = VoucherRequestSid::VoucherRequest.to_i64();
    for sid in base + 1..=base + 13 {
        assert!(VoucherRequestSid::from_i64(sid).is_some(), "sid {sid}");
    }
}

#[test]
fn test_content_format() {
    assert_eq!(ContentFormat::from_i64(836), Some(ContentFormat::VoucherCoseCbor));
    assert_eq!(ContentFormat::Pkcs10.to_i64(), 286);
    assert_eq!(
        ContentFormat::VoucherCoseCbor.media_type(),
        "application/voucher-cose+cbor"
    );
    assert_eq!(ContentFormat::from_i64(1), None);
}

#[test]
fn test_cbor_tag() {
    assert_eq!(CborTag::SidAbsolute.to_i64(), 47);
    assert_eq!(CborTag::from_i64(18), Some(CborTag::CoseSign1));
}
