use std::borrow::Cow;

use russh::Preferred;

/// Algorithm ordering used for every hop connection (spec §4.1). Strongest
/// AEAD ciphers and ETM MACs first; legacy CBC/non-ETM entries are only
/// reachable when a hop opts into `insecure_accept_any_host_key`-style
/// relaxed negotiation, mirroring how bastions are usually configured against
/// older appliances.
pub fn preferred(allow_legacy_algos: bool) -> Preferred {
    if allow_legacy_algos {
        return Preferred::DEFAULT;
    }

    Preferred {
        kex: Cow::Borrowed(&[
            russh::kex::CURVE25519,
            russh::kex::CURVE25519_PRE_RFC_8731,
            russh::kex::ECDH_SHA2_NISTP256,
            russh::kex::ECDH_SHA2_NISTP384,
            russh::kex::ECDH_SHA2_NISTP521,
            russh::kex::DH_G14_SHA256,
        ]),
        cipher: Cow::Borrowed(&[
            russh::cipher::AES_128_GCM,
            russh::cipher::AES_256_GCM,
            russh::cipher::CHACHA20_POLY1305,
            russh::cipher::AES_128_CTR,
            russh::cipher::AES_192_CTR,
            russh::cipher::AES_256_CTR,
        ]),
        mac: Cow::Borrowed(&[
            russh::mac::HMAC_SHA256_ETM,
            russh::mac::HMAC_SHA128_ETM,
            russh::mac::HMAC_SHA256,
            russh::mac::HMAC_SHA128,
        ]),
        key: Preferred::DEFAULT.key,
        compression: Preferred::DEFAULT.compression,
    }
}
