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
use crate::{iana::ContentFormat, testing, ErrorKind, VoucherBuilder};
use chrono::DateTime;

const NONCE: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

fn masa(config: MasaConfig) -> Masa {
    let pki = testing::pki();
    Masa::new(pki.masa.clone(), config).idevid_ca(pki.manufacturer.certificate().to_vec())
}

fn pledge_request(serial: &str) -> Vec<u8> {
    let pki = testing::pki();
    let request = VoucherBuilder::request()
        .constrained(true)
        .assertion(Assertion::Proximity)
        .created_on(Utc::now().trunc_subsecs(0))
        .nonce(NONCE.to_vec())
        .serial_number(serial)
        .proximity_registrar_spki(
            x509::subject_public_key_info(pki.registrar.certificate()).unwrap(),
        )
        .build();
    signed::sign(&request, VoucherFormat::Cbor, &pki.pledge).unwrap()
}

fn registrar_request(
    serial: &str,
    prior: Option<Vec<u8>>,
    nonce: Option<Vec<u8>>,
    format: VoucherFormat,
    signer: &Credential,
) -> Vec<u8> {
    let mut request = Voucher {
        kind: VoucherKind::VoucherRequest,
        constrained: format == VoucherFormat::Cbor,
        created_on: Some(Utc::now().trunc_subsecs(0)),
        serial_number: Some(serial.to_owned()),
        nonce,
        prior_signed_voucher_request: prior,
        ..Default::default()
    };
    request.idevid_issuer =
        x509::authority_key_identifier(testing::pki().pledge.certificate()).unwrap();
    signed::sign(&request, format, signer).unwrap()
}

fn valid_request(format: VoucherFormat, nonce: Option<Vec<u8>>) -> Vec<u8> {
    registrar_request(
        testing::PLEDGE_SERIAL,
        Some(pledge_request(testing::PLEDGE_SERIAL)),
        nonce,
        format,
        &testing::pki().registrar,
    )
}

#[test]
fn test_issue_voucher() {
    let pki = testing::pki();
    let masa = masa(MasaConfig::default());
    for format in [VoucherFormat::Cbor, VoucherFormat::Json] {
        let (data, got_format) = masa
            .issue_voucher(&valid_request(format, Some(NONCE.to_vec())))
            .unwrap();
        assert_eq!(got_format, format);

        let signed = SignedVoucher::open(&data).unwrap();
        assert_eq!(signed.format, format);
        signed.verify(masa.certificate()).unwrap();
        assert_eq!(signed.signer(), Some(pki.masa.certificate()));

        let voucher = signed.voucher;
        assert_eq!(voucher.kind, VoucherKind::Voucher);
        assert_eq!(voucher.constrained, format == VoucherFormat::Cbor);
        assert_eq!(voucher.assertion, Some(Assertion::Proximity));
        assert_eq!(voucher.serial_number.as_deref(), Some(testing::PLEDGE_SERIAL));
        assert_eq!(voucher.nonce, Some(NONCE.to_vec()));
        assert!(voucher.expires_on.is_none());
        assert_eq!(
            voucher.pinned_domain_cert.as_deref(),
            Some(pki.domain_ca.certificate())
        );
        assert!(voucher.idevid_issuer.is_some());
        assert!(voucher.created_on.is_some());
    }
}

#[test]
fn test_issue_voucher_without_nonce() {
    let masa = masa(MasaConfig {
        voucher_lifetime: Duration::from_secs(120),
    });
    let (data, _) = masa
        .issue_voucher(&valid_request(VoucherFormat::Cbor, None))
        .unwrap();
    let voucher = SignedVoucher::open(&data).unwrap().voucher;
    assert!(voucher.nonce.is_none());
    let created_on: DateTime<Utc> = voucher.created_on.unwrap();
    assert_eq!((voucher.expires_on.unwrap() - created_on).num_seconds(), 120);
}

#[test]
fn test_issue_voucher_fail() {
    let pki = testing::pki();
    let masa = masa(MasaConfig::default());
    let no_ra = testing::issue(testing::registrar_params("Plain", false), &pki.domain_ca);
    let tests = vec![
        // Not COSE at all.
        (vec![0x01, 0x02], ErrorKind::Structural),
        // Registrar omitted the pledge's request.
        (
            registrar_request(
                testing::PLEDGE_SERIAL,
                None,
                None,
                VoucherFormat::Cbor,
                &pki.registrar,
            ),
            ErrorKind::Structural,
        ),
        // Signer lacks the registration authority purpose.
        (
            registrar_request(
                testing::PLEDGE_SERIAL,
                Some(pledge_request(testing::PLEDGE_SERIAL)),
                None,
                VoucherFormat::Cbor,
                &no_ra,
            ),
            ErrorKind::Trust,
        ),
        // Registrar request and pledge request disagree on the serial number.
        (
            registrar_request(
                "OTHER",
                Some(pledge_request(testing::PLEDGE_SERIAL)),
                None,
                VoucherFormat::Cbor,
                &pki.registrar,
            ),
            ErrorKind::Trust,
        ),
        // Pledge request claims a serial number its certificate does not carry.
        (
            registrar_request(
                "OTHER",
                Some(pledge_request("OTHER")),
                None,
                VoucherFormat::Cbor,
                &pki.registrar,
            ),
            ErrorKind::Trust,
        ),
        // Prior request is not a signed object.
        (
            registrar_request(
                testing::PLEDGE_SERIAL,
                Some(vec![0xa0]),
                None,
                VoucherFormat::Cbor,
                &pki.registrar,
            ),
            ErrorKind::Structural,
        ),
    ];
    for (i, (data, kind)) in tests.into_iter().enumerate() {
        let err = masa.issue_voucher(&data).unwrap_err();
        assert_eq!(err.kind, kind, "case {}: {}", i, err);
    }
}

#[test]
fn test_issue_voucher_not_a_request() {
    let pki = testing::pki();
    let masa = masa(MasaConfig::default());
    let voucher = VoucherBuilder::new()
        .assertion(Assertion::Verified)
        .created_on(Utc::now())
        .serial_number(testing::PLEDGE_SERIAL)
        .pinned_domain_cert(pki.domain_ca.certificate().to_vec())
        .build();
    let data = signed::sign(&voucher, VoucherFormat::Cbor, &pki.registrar).unwrap();
    let err = masa.issue_voucher(&data).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Structural);
}

#[test]
fn test_issue_voucher_foreign_pledge() {
    let pki = testing::pki();
    // Only vouch for pledges issued by the domain CA, which ours was not.
    let masa = Masa::new(pki.masa.clone(), MasaConfig::default())
        .idevid_ca(pki.domain_ca.certificate().to_vec());
    let err = masa
        .issue_voucher(&valid_request(VoucherFormat::Cbor, None))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Trust);

    // Without a configured issuer the pledge is accepted.
    let masa = Masa::new(pki.masa.clone(), MasaConfig::default());
    assert!(masa
        .issue_voucher(&valid_request(VoucherFormat::Cbor, None))
        .is_ok());
}

#[test]
fn test_service() {
    let masa = masa(MasaConfig::default());
    let cf = VoucherFormat::Cbor.signed_content_format();

    let response = masa.handle(&Request::post(
        PATH_MASA_REQUEST_VOUCHER,
        cf,
        valid_request(VoucherFormat::Cbor, None),
    ));
    assert_eq!(response.code, ResponseCode::Changed);
    assert_eq!(response.content_format, Some(cf));
    assert!(SignedVoucher::open(&response.payload).is_ok());

    let tests = vec![
        (
            Request::post("/.well-known/brski/other", cf, vec![]),
            ResponseCode::NotFound,
        ),
        (
            Request::get(PATH_MASA_REQUEST_VOUCHER),
            ResponseCode::MethodNotAllowed,
        ),
        (
            Request::post(PATH_MASA_REQUEST_VOUCHER, ContentFormat::Cbor, vec![0xa0]),
            ResponseCode::UnsupportedContentFormat,
        ),
        (
            Request::post(PATH_MASA_REQUEST_VOUCHER, cf, vec![0x00]),
            ResponseCode::BadRequest,
        ),
    ];
    for (request, code) in tests {
        let response = masa.handle(&request);
        assert_eq!(response.code, code, "for {}", request.path);
        assert!(response.diagnostic.is_some());
    }
}

#[test]
fn test_config_deserialize() {
    let config: MasaConfig = serde_json::from_str(r#"{"voucher_lifetime": 30}"#).unwrap();
    assert_eq!(config.voucher_lifetime, Duration::from_secs(30));
    let config: MasaConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, MasaConfig::default());
}
