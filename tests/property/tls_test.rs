// tests/property/tls_test.rs

//! Property-based tests for TLS enablement
//! Tests that an address is TLS-decorated exactly when all four attributes
//! are present.

use gatewire::core::transport::{TlsAttributes, TransportAddress};
use proptest::option;
use proptest::prelude::*;
use std::path::PathBuf;

fn attributes() -> impl Strategy<Value = TlsAttributes> {
    (
        option::of("/[a-z]{1,8}\\.key"),
        option::of("/[a-z]{1,8}\\.crt"),
        option::of("TLS13_AES_(128|256)_GCM_SHA(256|384)"),
        option::of("TLSv1\\.[23]"),
    )
        .prop_map(|(key, cert, cipher, version)| TlsAttributes {
            key_path: key.map(PathBuf::from),
            cert_path: cert.map(PathBuf::from),
            cipher,
            version,
        })
}

proptest! {
    #[test]
    fn test_tls_enabled_iff_all_attributes_present(attrs in attributes(), port in 1u16..=u16::MAX) {
        let complete = attrs.key_path.is_some()
            && attrs.cert_path.is_some()
            && attrs.cipher.is_some()
            && attrs.version.is_some();
        prop_assert_eq!(attrs.is_complete(), complete);

        let address = TransportAddress::tcp("backend.local", port).with_tls(attrs);
        prop_assert_eq!(address.is_tls(), complete);
        prop_assert_eq!(address.describe().starts_with("tls+"), complete);
    }
}
