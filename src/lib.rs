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

//! Zero-touch device bootstrapping ([BRSKI] and constrained BRSKI).
//!
//! A new device (the *pledge*) proves its manufacturer-installed identity, obtains a signed
//! *voucher* from its manufacturer's authorization service (the *MASA*) through the domain's
//! *registrar*, pins the domain trust anchor named in that voucher, and then enrolls an
//! operational certificate from the domain CA.
//!
//! Builds on the [`ciborium`](https://docs.rs/ciborium) crate for underlying [CBOR][CBOR] support
//! and on [`coset`](https://docs.rs/coset) for COSE_Sign1 envelopes.
//!
//! ## Usage
//!
//! ```
//! use brski::{Assertion, CborSerializable, Voucher, VoucherBuilder};
//!
//! let request = VoucherBuilder::request()
//!     .constrained(true)
//!     .assertion(Assertion::Proximity)
//!     .serial_number("JADA123456789")
//!     .proximity_registrar_spki(vec![0x30, 0x59])
//!     .build();
//! assert!(request.validate());
//!
//! // Compact CBOR: the container and every leaf are keyed by SID.
//! let data = request.clone().to_vec().unwrap();
//! let decoded = Voucher::from_slice(&data).unwrap();
//! assert_eq!(request, decoded);
//! ```
//!
//! [BRSKI]: https://tools.ietf.org/html/rfc8995
//! [CBOR]: https://tools.ietf.org/html/rfc8949

#![deny(rustdoc::broken_intra_doc_links)]

/// Re-export of the `ciborium` crate used for underlying CBOR encoding.
pub use ciborium as cbor;

#[macro_use]
pub(crate) mod util;

pub mod iana;

mod common;
pub use common::*;
mod voucher;
pub use voucher::*;
mod codec;
pub use codec::*;
mod error;
pub use error::*;
mod message;
pub use message::*;
pub mod signed;
pub mod telemetry;
pub mod x509;
pub mod trust;
pub mod transport;
pub mod ca;
pub mod masa;
pub mod registrar;
pub mod pledge;

#[cfg(test)]
pub(crate) mod testing;
